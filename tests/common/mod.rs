// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use campaign_core::{
    models::{
        campaign::{Campaign, CreateCampaignRequest},
        participant::Participant,
        test_definition::{CategoryConfig, QuestionKey, TestDefinition},
    },
    repository::MemoryStore,
    services::Services,
    utils::{
        clock::ManualClock,
        notify::{LogNotifier, Notifier},
    },
};
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const TEST_ID: i64 = 1000;
pub const CATEGORY_A: i64 = 10;
pub const CATEGORY_B: i64 = 20;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

/// 500 points, one hour. Category A (60%) holds questions 101 and 102,
/// category B (40%) holds 103 and 104. The correct option of question
/// `100 + n` is index `n - 1`; every question has four options.
pub fn sample_test() -> TestDefinition {
    let key = |question_id: i64, correct: i32| QuestionKey {
        question_id,
        option_count: 4,
        correct_option: Some(correct),
    };

    TestDefinition {
        id: TEST_ID,
        name: "Annual assessment".to_string(),
        duration_seconds: 3600,
        total_score: 500.0,
        categories: vec![
            CategoryConfig {
                category_id: CATEGORY_A,
                name: "Category A".to_string(),
                question_count: 2,
                percent_of_total: 60.0,
                questions: vec![key(101, 0), key(102, 1)],
            },
            CategoryConfig {
                category_id: CATEGORY_B,
                name: "Category B".to_string(),
                question_count: 2,
                percent_of_total: 40.0,
                questions: vec![key(103, 2), key(104, 3)],
            },
        ],
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub services: Services,
}

pub async fn harness() -> Harness {
    harness_with_notifier(Arc::new(LogNotifier)).await
}

pub async fn harness_with_notifier(notifier: Arc<dyn Notifier>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.put_test(sample_test()).await;
    let clock = Arc::new(ManualClock::new(base_time()));

    let services = Services::new(
        store.clone(),
        store.clone(),
        store.clone(),
        notifier,
        clock.clone(),
    );

    Harness {
        store,
        clock,
        services,
    }
}

impl Harness {
    pub async fn participant(&self, code: &str) -> Participant {
        self.store
            .put_participant(code, &format!("{}@example.com", code), &format!("Participant {}", code))
            .await
    }

    /// Campaign open from base+1h to base+5h. The clock is left at base.
    pub async fn campaign(&self) -> Campaign {
        self.services
            .campaigns
            .create(CreateCampaignRequest {
                name: "Spring round".to_string(),
                description: "Quarterly assessment".to_string(),
                start_at: base_time() + Duration::hours(1),
                end_at: base_time() + Duration::hours(5),
                test_id: TEST_ID,
            })
            .await
            .expect("campaign should be created")
    }

    /// Moves the clock inside the window of [`Harness::campaign`].
    pub fn open_window(&self) {
        self.clock.set(base_time() + Duration::hours(2));
    }

    /// Moves the clock past the end of [`Harness::campaign`].
    pub fn close_window(&self) {
        self.clock.set(base_time() + Duration::hours(6));
    }
}
