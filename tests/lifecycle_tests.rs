// tests/lifecycle_tests.rs

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::{
    error::AppError,
    models::{
        answer::{Answer, NewAnswer},
        campaign::{Campaign, CampaignChanges, CreateCampaignRequest, NewCampaign, UpdateCampaignRequest},
        enrollment::Enrollment,
        participant::RosterEntry,
        result::{CategoryResult, NewCategoryResult},
    },
    repository::{AssessmentStore, MemoryStore, ParticipantDirectory},
    services::{Services, scoring::ScoreOutcome},
    utils::notify::{LogNotifier, Notification, Notifier},
};
use chrono::{DateTime, Duration, Utc};
use common::{CATEGORY_A, CATEGORY_B, TEST_ID, base_time, harness, harness_with_notifier};

fn close_to(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

fn roster_entry(code: &str) -> RosterEntry {
    RosterEntry {
        code: code.to_string(),
        email: format!("{}@example.com", code),
        full_name: format!("Participant {}", code),
    }
}

#[derive(Debug)]
struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), AppError> {
        Err(AppError::InternalServerError("mail relay down".to_string()))
    }
}

/// Delegates to the in-memory store and injects the faults a shared
/// database can produce between a sweep's reads and writes.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    /// Another sweeper closes every campaign right after it is listed.
    lose_closure_race: bool,
    /// Reading this enrollment's answers fails.
    broken_enrollment: Option<i64>,
}

#[async_trait]
impl AssessmentStore for FaultyStore {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, AppError> {
        self.inner.insert_campaign(campaign).await
    }

    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError> {
        self.inner.find_campaign(id).await
    }

    async fn update_campaign(
        &self,
        id: i64,
        changes: &CampaignChanges,
    ) -> Result<Option<Campaign>, AppError> {
        self.inner.update_campaign(id, changes).await
    }

    async fn close_campaign(&self, id: i64) -> Result<Option<u64>, AppError> {
        self.inner.close_campaign(id).await
    }

    async fn list_overdue_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, AppError> {
        let overdue = self.inner.list_overdue_campaigns(now).await?;
        if self.lose_closure_race {
            for campaign in &overdue {
                self.inner.close_campaign(campaign.id).await?;
            }
        }
        Ok(overdue)
    }

    async fn insert_enrollment(
        &self,
        campaign_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, AppError> {
        self.inner.insert_enrollment(campaign_id, participant_id, now).await
    }

    async fn find_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError> {
        self.inner.find_enrollment(id).await
    }

    async fn find_enrollment_for(
        &self,
        participant_id: i64,
        campaign_id: i64,
    ) -> Result<Option<Enrollment>, AppError> {
        self.inner.find_enrollment_for(participant_id, campaign_id).await
    }

    async fn mark_started(
        &self,
        id: i64,
        now: DateTime<Utc>,
        duration_seconds: i32,
    ) -> Result<Enrollment, AppError> {
        self.inner.mark_started(id, now, duration_seconds).await
    }

    async fn record_progress(
        &self,
        enrollment_id: i64,
        answer: Option<NewAnswer>,
        remaining_time_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner
            .record_progress(enrollment_id, answer, remaining_time_seconds, now)
            .await
    }

    async fn mark_finished(&self, id: i64, now: DateTime<Utc>) -> Result<(), AppError> {
        self.inner.mark_finished(id, now).await
    }

    async fn list_answers(&self, enrollment_id: i64) -> Result<Vec<Answer>, AppError> {
        if self.broken_enrollment == Some(enrollment_id) {
            return Err(AppError::InternalServerError("answers unreadable".to_string()));
        }
        self.inner.list_answers(enrollment_id).await
    }

    async fn list_unscored_enrollments(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<Enrollment>, AppError> {
        self.inner.list_unscored_enrollments(campaign_id).await
    }

    async fn list_results(&self, enrollment_id: i64) -> Result<Vec<CategoryResult>, AppError> {
        self.inner.list_results(enrollment_id).await
    }

    async fn insert_results_if_unscored(
        &self,
        enrollment_id: i64,
        results: &[NewCategoryResult],
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner
            .insert_results_if_unscored(enrollment_id, results, now)
            .await
    }
}

/// Services over `store` sharing the harness's catalog, directory and clock.
fn services_over(h: &common::Harness, store: FaultyStore) -> Services {
    Services::new(
        Arc::new(store),
        h.store.clone(),
        h.store.clone(),
        Arc::new(LogNotifier),
        h.clock.clone(),
    )
}

#[tokio::test]
async fn second_enroll_for_same_pair_conflicts() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;

    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    let err = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn enroll_survives_notification_failure() {
    let h = harness_with_notifier(Arc::new(FailingNotifier)).await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;

    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    tokio::task::yield_now().await;

    assert!(h.store.find_enrollment(enrollment.id).await.unwrap().is_some());
}

#[tokio::test]
async fn enroll_rejects_unknown_participant_and_campaign() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;

    let err = h.services.enrollments.enroll(9_999, campaign.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = h.services.enrollments.enroll(p.id, 9_999).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn create_campaign_validates_window_and_test() {
    let h = harness().await;
    let request = |start_offset: i64, end_offset: i64, test_id: i64| CreateCampaignRequest {
        name: "Round".to_string(),
        description: String::new(),
        start_at: base_time() + Duration::hours(start_offset),
        end_at: base_time() + Duration::hours(end_offset),
        test_id,
    };

    // Start not in the future.
    let err = h.services.campaigns.create(request(0, 2, TEST_ID)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // End not after start.
    let err = h.services.campaigns.create(request(2, 2, TEST_ID)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // Unknown test.
    let err = h.services.campaigns.create(request(1, 2, 4242)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let campaign = h.services.campaigns.create(request(1, 2, TEST_ID)).await.unwrap();
    assert!(campaign.active);
}

#[tokio::test]
async fn resume_returns_last_heartbeat_not_duration() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();

    let first = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap();
    assert_eq!(first.remaining_time_seconds, 3600);
    assert!(first.answers.is_empty());

    let ledger = &h.services.enrollments;
    ledger.record_progress(first.enrollment_id, 101, Some(0), 3000).await.unwrap();
    // Heartbeat without an answer only moves the clock.
    ledger.record_progress(first.enrollment_id, 102, None, 2900).await.unwrap();

    let second = ledger.start_or_resume(p.id, campaign.id).await.unwrap();
    assert_eq!(second.enrollment_id, first.enrollment_id);
    assert_eq!(second.remaining_time_seconds, 2900);
    assert_eq!(second.answers.len(), 1);
    assert_eq!(second.answers[0].question_id, 101);
    assert_eq!(second.answers[0].selected_option, Some(0));
}

#[tokio::test]
async fn duplicate_answers_are_all_kept() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();

    let session = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap();
    let ledger = &h.services.enrollments;
    ledger.record_progress(session.enrollment_id, 101, Some(2), 3500).await.unwrap();
    ledger.record_progress(session.enrollment_id, 101, Some(0), 3400).await.unwrap();

    let resumed = ledger.start_or_resume(p.id, campaign.id).await.unwrap();
    let selections: Vec<_> = resumed.answers.iter().map(|a| a.selected_option).collect();
    assert_eq!(selections, vec![Some(2), Some(0)]);
}

#[tokio::test]
async fn start_outside_window_is_rejected() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();

    // Before start_at.
    let err = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    // Exactly at end_at.
    h.clock.set(campaign.end_at);
    let err = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let enrollment = h.store.find_enrollment_for(p.id, campaign.id).await.unwrap().unwrap();
    assert!(enrollment.exam_started_at.is_none());
    assert!(enrollment.remaining_time_seconds.is_none());
}

#[tokio::test]
async fn start_without_enrollment_is_not_found() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.open_window();

    let err = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn finished_exam_cannot_be_resumed_or_finished_again() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();

    let session = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap();
    h.services.enrollments.finish(session.enrollment_id).await.unwrap();
    let finished_at = h
        .store
        .find_enrollment(session.enrollment_id)
        .await
        .unwrap()
        .unwrap()
        .exam_finished_at;

    let err = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    h.clock.advance(Duration::minutes(5));
    let err = h.services.enrollments.finish(session.enrollment_id).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let err = h
        .services
        .enrollments
        .record_progress(session.enrollment_id, 101, Some(0), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let after = h.store.find_enrollment(session.enrollment_id).await.unwrap().unwrap();
    assert_eq!(after.exam_finished_at, finished_at);
}

#[tokio::test]
async fn finish_or_progress_before_start_is_rejected() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();

    let err = h.services.enrollments.finish(enrollment.id).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let err = h
        .services
        .enrollments
        .record_progress(enrollment.id, 101, Some(0), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));
}

#[tokio::test]
async fn progress_rejects_bad_input() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();
    let session = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap();
    let ledger = &h.services.enrollments;

    let err = ledger.record_progress(session.enrollment_id, 555, Some(0), 100).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = ledger.record_progress(session.enrollment_id, 101, Some(0), -1).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = ledger.record_progress(9_999, 101, Some(0), 100).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // Nothing was written by the rejected calls.
    let resumed = ledger.start_or_resume(p.id, campaign.id).await.unwrap();
    assert!(resumed.answers.is_empty());
    assert_eq!(resumed.remaining_time_seconds, 3600);
}

#[tokio::test]
async fn full_scoring_scenario_through_the_sweep() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();

    let session = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap();
    let id = session.enrollment_id;
    let ledger = &h.services.enrollments;
    ledger.record_progress(id, 101, Some(0), 3500).await.unwrap(); // correct
    ledger.record_progress(id, 102, Some(0), 3400).await.unwrap(); // wrong
    ledger.record_progress(id, 103, Some(2), 3300).await.unwrap(); // correct
    ledger.record_progress(id, 104, None, 3200).await.unwrap(); // skipped
    ledger.finish(id).await.unwrap();

    // Finishing alone does not score.
    let pending = h.services.scoring.results(id).await.unwrap();
    assert!(pending.per_category.is_empty());

    h.close_window();
    let report = h.services.closure.run_once().await.unwrap();
    assert_eq!(report.campaigns.len(), 1);
    assert_eq!(report.campaigns[0].scored, 1);
    assert_eq!(report.campaigns[0].failed, 0);

    let results = h.services.scoring.results(id).await.unwrap();
    assert_eq!(results.per_category.len(), 2);
    let a = results.per_category.iter().find(|c| c.category_id == CATEGORY_A).unwrap();
    let b = results.per_category.iter().find(|c| c.category_id == CATEGORY_B).unwrap();
    assert!(close_to(a.score, 150.0));
    assert!(close_to(a.max_score, 300.0));
    assert!(close_to(b.score, 100.0));
    assert!(close_to(b.max_score, 200.0));
    assert!(close_to(results.total_score, 250.0));
    assert!(close_to(results.total_max, 500.0));
}

#[tokio::test]
async fn scoring_twice_is_a_quiet_no_op() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();

    let first = h.services.scoring.score(campaign.id, enrollment.id).await.unwrap();
    assert!(matches!(first, ScoreOutcome::Scored(_)));

    let second = h.services.scoring.score(campaign.id, enrollment.id).await.unwrap();
    assert_eq!(second, ScoreOutcome::AlreadyScored);

    let rows = h.store.list_results(enrollment.id).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn scoring_rejects_enrollment_of_another_campaign() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let other = h.campaign().await;
    let p = h.participant("p1").await;
    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();

    let err = h.services.scoring.score(other.id, enrollment.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn expiry_sweep_scores_absentees_with_zero() {
    let h = harness().await;
    // Overdue but still active, as left behind by a missed sweep.
    let campaign = h
        .store
        .insert_campaign(NewCampaign {
            name: "Expired".to_string(),
            description: String::new(),
            start_at: base_time() - Duration::days(3),
            end_at: base_time() - Duration::days(1),
            test_id: TEST_ID,
        })
        .await
        .unwrap();
    let p = h.participant("p1").await;
    let enrollment = h
        .store
        .insert_enrollment(campaign.id, p.id, base_time() - Duration::days(2))
        .await
        .unwrap();

    let report = h.services.closure.run_once().await.unwrap();
    assert_eq!(report.campaigns.len(), 1);
    assert_eq!(report.campaigns[0].closed, 1);
    assert_eq!(report.campaigns[0].scored, 1);

    let campaign = h.store.find_campaign(campaign.id).await.unwrap().unwrap();
    assert!(!campaign.active);

    let enrollment = h.store.find_enrollment(enrollment.id).await.unwrap().unwrap();
    assert!(!enrollment.active);
    assert_eq!(enrollment.remaining_time_seconds, Some(0));

    let rows = h.store.list_results(enrollment.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.score == 0.0));
}

#[tokio::test]
async fn every_enrollment_is_closed_and_scored_after_sweep() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let mut ids = Vec::new();
    for code in ["p1", "p2", "p3"] {
        let p = h.participant(code).await;
        ids.push(h.services.enrollments.enroll(p.id, campaign.id).await.unwrap().id);
    }
    h.open_window();
    // Only the first participant ever starts.
    let first = h.store.find_enrollment(ids[0]).await.unwrap().unwrap();
    let session = h
        .services
        .enrollments
        .start_or_resume(first.participant_id, campaign.id)
        .await
        .unwrap();
    h.services
        .enrollments
        .record_progress(session.enrollment_id, 101, Some(0), 1200)
        .await
        .unwrap();

    h.close_window();
    h.services.closure.run_once().await.unwrap();

    for enrollment in h.store.enrollments_of(campaign.id).await {
        assert!(!enrollment.active);
        assert!(!h.store.list_results(enrollment.id).await.unwrap().is_empty());
    }

    // A second sweep finds nothing left to do.
    let again = h.services.closure.run_once().await.unwrap();
    assert!(again.campaigns.is_empty());
    assert_eq!(h.store.list_results(ids[0]).await.unwrap().len(), 2);
}

#[tokio::test]
async fn sweep_reports_failures_per_campaign() {
    let h = harness().await;
    let broken = h
        .store
        .insert_campaign(NewCampaign {
            name: "Broken".to_string(),
            description: String::new(),
            start_at: base_time() - Duration::days(3),
            end_at: base_time() - Duration::days(1),
            // No such test: scoring of its enrollments fails.
            test_id: 4242,
        })
        .await
        .unwrap();
    let healthy = h
        .store
        .insert_campaign(NewCampaign {
            name: "Healthy".to_string(),
            description: String::new(),
            start_at: base_time() - Duration::days(3),
            end_at: base_time() - Duration::days(1),
            test_id: TEST_ID,
        })
        .await
        .unwrap();
    let p1 = h.participant("p1").await;
    let p2 = h.participant("p2").await;
    let now = base_time() - Duration::days(2);
    h.store.insert_enrollment(broken.id, p1.id, now).await.unwrap();
    h.store.insert_enrollment(broken.id, p2.id, now).await.unwrap();
    let scored = h.store.insert_enrollment(healthy.id, p1.id, now).await.unwrap();

    let report = h.services.closure.run_once().await.unwrap();

    let broken_sweep = report.campaigns.iter().find(|c| c.campaign_id == broken.id).unwrap();
    assert_eq!(broken_sweep.closed, 2);
    assert_eq!(broken_sweep.failed, 2);
    assert_eq!(broken_sweep.scored, 0);

    let healthy_sweep = report.campaigns.iter().find(|c| c.campaign_id == healthy.id).unwrap();
    assert_eq!(healthy_sweep.scored, 1);
    assert_eq!(h.store.list_results(scored.id).await.unwrap().len(), 2);

    // The failed campaign is closed regardless and stays unscored.
    assert!(!h.store.find_campaign(broken.id).await.unwrap().unwrap().active);
    assert_eq!(h.store.list_unscored_enrollments(broken.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn manual_close_deactivates_without_scoring() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();

    let updated = h
        .services
        .campaigns
        .update(
            campaign.id,
            UpdateCampaignRequest {
                active: Some(false),
                ..UpdateCampaignRequest::default()
            },
        )
        .await
        .unwrap();
    assert!(!updated.active);

    let enrollment = h.store.find_enrollment(enrollment.id).await.unwrap().unwrap();
    assert!(!enrollment.active);
    assert_eq!(enrollment.remaining_time_seconds, Some(0));
    assert!(h.store.list_results(enrollment.id).await.unwrap().is_empty());

    // Closed is terminal.
    let err = h
        .services
        .campaigns
        .update(
            campaign.id,
            UpdateCampaignRequest {
                active: Some(true),
                ..UpdateCampaignRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    // The sweep only picks up active campaigns, so it stays unscored.
    h.close_window();
    let report = h.services.closure.run_once().await.unwrap();
    assert!(report.campaigns.is_empty());
}

#[tokio::test]
async fn update_revalidates_dates() {
    let h = harness().await;
    let campaign = h.campaign().await;

    let err = h
        .services
        .campaigns
        .update(
            campaign.id,
            UpdateCampaignRequest {
                end_at: Some(campaign.start_at - Duration::minutes(1)),
                ..UpdateCampaignRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = h
        .services
        .campaigns
        .update(9_999, UpdateCampaignRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let updated = h
        .services
        .campaigns
        .update(
            campaign.id,
            UpdateCampaignRequest {
                name: Some("Renamed".to_string()),
                end_at: Some(campaign.end_at + Duration::hours(1)),
                ..UpdateCampaignRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.end_at, campaign.end_at + Duration::hours(1));
    assert!(updated.active);
}

#[tokio::test]
async fn roster_counts_created_and_reused() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let existing = h.participant("p1").await;
    h.services.enrollments.enroll(existing.id, campaign.id).await.unwrap();
    // A previously deactivated identity is reactivated by the roster.
    let dormant = h.participant("p2").await;
    h.store.set_participant_active(dormant.id, false).await;

    let summary = h
        .services
        .campaigns
        .attach_roster(
            campaign.id,
            &[roster_entry("p1"), roster_entry("p2"), roster_entry("p3")],
        )
        .await
        .unwrap();

    assert_eq!(summary.created, 2);
    assert_eq!(summary.reused, 1);
    assert_eq!(h.store.enrollments_of(campaign.id).await.len(), 3);
}

#[tokio::test]
async fn roster_with_duplicates_writes_nothing() {
    let h = harness().await;
    let campaign = h.campaign().await;

    let err = h
        .services
        .campaigns
        .attach_roster(
            campaign.id,
            &[roster_entry("p1"), roster_entry("p2"), roster_entry("p1")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(h.store.enrollments_of(campaign.id).await.is_empty());
}

#[tokio::test]
async fn progress_rejects_option_outside_the_question() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.open_window();
    let session = h.services.enrollments.start_or_resume(p.id, campaign.id).await.unwrap();
    let id = session.enrollment_id;
    let ledger = &h.services.enrollments;

    ledger.record_progress(id, 101, Some(0), 3000).await.unwrap();
    for option in [i32::MAX, 4] {
        let err = ledger.record_progress(id, 103, Some(option), 2900).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
    ledger.record_progress(id, 103, Some(2), 2800).await.unwrap();

    let resumed = ledger.start_or_resume(p.id, campaign.id).await.unwrap();
    assert_eq!(resumed.answers.len(), 2);
    assert_eq!(resumed.remaining_time_seconds, 2800);

    h.close_window();
    let report = h.services.closure.run_once().await.unwrap();
    assert_eq!(report.campaigns[0].scored, 1);
    assert_eq!(report.campaigns[0].failed, 0);
    let results = h.services.scoring.results(id).await.unwrap();
    assert!(close_to(results.total_score, 250.0));
}

#[tokio::test]
async fn writes_after_closure_are_refused() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let started = h.participant("p1").await;
    let idle = h.participant("p2").await;
    h.services.enrollments.enroll(started.id, campaign.id).await.unwrap();
    let idle = h.services.enrollments.enroll(idle.id, campaign.id).await.unwrap();
    h.open_window();
    let session = h.services.enrollments.start_or_resume(started.id, campaign.id).await.unwrap();
    let id = session.enrollment_id;
    h.services.enrollments.record_progress(id, 101, Some(0), 1200).await.unwrap();

    // The closure commits after the ledger's checks passed but before its
    // writes reach the store.
    h.store.close_campaign(campaign.id).await.unwrap();
    let now = base_time() + Duration::hours(2);

    let err = h
        .store
        .record_progress(
            id,
            Some(NewAnswer {
                question_id: 102,
                selected_option: 1,
            }),
            1100,
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let err = h.store.mark_finished(id, now).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let err = h.store.mark_started(idle.id, now, 3600).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let closed = h.store.find_enrollment(id).await.unwrap().unwrap();
    assert_eq!(closed.remaining_time_seconds, Some(0));
    assert!(closed.exam_finished_at.is_none());
    assert_eq!(h.store.list_answers(id).await.unwrap().len(), 1);

    let idle = h.store.find_enrollment(idle.id).await.unwrap().unwrap();
    assert!(idle.exam_started_at.is_none());
    assert_eq!(idle.remaining_time_seconds, Some(0));

    // Through the ledger the same calls fail early.
    let err = h.services.enrollments.record_progress(id, 102, Some(1), 1100).await.unwrap_err();
    assert!(matches!(err, AppError::State(_)));
}

#[tokio::test]
async fn overlapping_sweeps_run_once() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.close_window();

    let closure = &h.services.closure;
    let (first, second) = tokio::join!(closure.run_once(), closure.run_once());
    let reports = [first.unwrap(), second.unwrap()];

    assert_eq!(reports.iter().filter(|r| r.skipped).count(), 1);
    let ran = reports.iter().find(|r| !r.skipped).unwrap();
    assert_eq!(ran.campaigns.len(), 1);
    assert_eq!(ran.campaigns[0].scored, 1);
    let skipped = reports.iter().find(|r| r.skipped).unwrap();
    assert!(skipped.campaigns.is_empty());

    assert_eq!(h.store.list_results(enrollment.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn sweep_that_loses_the_closure_scores_nothing() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let p = h.participant("p1").await;
    let enrollment = h.services.enrollments.enroll(p.id, campaign.id).await.unwrap();
    h.close_window();

    let services = services_over(
        &h,
        FaultyStore {
            inner: h.store.clone(),
            lose_closure_race: true,
            broken_enrollment: None,
        },
    );
    let report = services.closure.run_once().await.unwrap();

    assert_eq!(report.campaigns.len(), 1);
    assert_eq!(report.campaigns[0].closed, 0);
    assert_eq!(report.campaigns[0].scored, 0);
    assert!(report.campaigns[0].error.is_none());
    assert!(h.store.list_results(enrollment.id).await.unwrap().is_empty());

    // The conditional flip is what decides the winner.
    assert_eq!(h.store.close_campaign(campaign.id).await.unwrap(), None);
}

#[tokio::test]
async fn one_failing_enrollment_does_not_stop_its_siblings() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let mut ids = Vec::new();
    for code in ["p1", "p2", "p3"] {
        let p = h.participant(code).await;
        ids.push(h.services.enrollments.enroll(p.id, campaign.id).await.unwrap().id);
    }
    h.close_window();

    let services = services_over(
        &h,
        FaultyStore {
            inner: h.store.clone(),
            lose_closure_race: false,
            broken_enrollment: Some(ids[1]),
        },
    );
    let report = services.closure.run_once().await.unwrap();

    let sweep = &report.campaigns[0];
    assert_eq!(sweep.closed, 3);
    assert_eq!(sweep.scored, 2);
    assert_eq!(sweep.failed, 1);

    assert_eq!(h.store.list_results(ids[0]).await.unwrap().len(), 2);
    assert!(h.store.list_results(ids[1]).await.unwrap().is_empty());
    assert_eq!(h.store.list_results(ids[2]).await.unwrap().len(), 2);
    assert!(!h.store.find_campaign(campaign.id).await.unwrap().unwrap().active);
}

#[tokio::test]
async fn roster_matches_existing_identity_by_normalized_email() {
    let h = harness().await;
    let campaign = h.campaign().await;
    let existing = h.participant("p1").await;

    let summary = h
        .services
        .campaigns
        .attach_roster(
            campaign.id,
            &[RosterEntry {
                code: "p1-renumbered".to_string(),
                email: "P1@Example.COM".to_string(),
                full_name: "Participant p1".to_string(),
            }],
        )
        .await
        .unwrap();
    assert_eq!(summary.created, 1);

    let enrollments = h.store.enrollments_of(campaign.id).await;
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0].participant_id, existing.id);

    // Padded codes resolve to the same identity too.
    let resolved = h
        .store
        .resolve_participant(&RosterEntry {
            code: " p1 ".to_string(),
            email: "someone-else@example.com".to_string(),
            full_name: "Participant p1".to_string(),
        })
        .await
        .unwrap();
    assert!(resolved.existing);
    assert_eq!(resolved.participant.id, existing.id);
}
