// src/repository/memory.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::Mutex;

use crate::{
    error::AppError,
    models::{
        answer::{Answer, NewAnswer},
        campaign::{Campaign, CampaignChanges, NewCampaign},
        enrollment::Enrollment,
        participant::{Participant, ResolvedParticipant, RosterEntry},
        result::{CategoryResult, NewCategoryResult},
        test_definition::TestDefinition,
    },
    repository::{AssessmentStore, ParticipantDirectory, TestCatalog},
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    tests: HashMap<i64, TestDefinition>,
    participants: BTreeMap<i64, Participant>,
    campaigns: BTreeMap<i64, Campaign>,
    enrollments: BTreeMap<i64, Enrollment>,
    // Vec order is insertion order.
    answers: Vec<Answer>,
    results: Vec<CategoryResult>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn enrollment_mut(&mut self, id: i64) -> Result<&mut Enrollment, AppError> {
        self.enrollments
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Enrollment {} not found", id)))
    }

    fn has_results(&self, enrollment_id: i64) -> bool {
        self.results.iter().any(|r| r.enrollment_id == enrollment_id)
    }
}

/// In-process implementation of the repository traits.
///
/// All tables sit behind one mutex, so every trait call is atomic. Used by
/// the test-suite and for embedding the core without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test definition, standing in for the test provider.
    pub async fn put_test(&self, test: TestDefinition) {
        self.tables.lock().await.tests.insert(test.id, test);
    }

    /// Registers a participant identity and returns it.
    pub async fn put_participant(&self, code: &str, email: &str, full_name: &str) -> Participant {
        let mut tables = self.tables.lock().await;
        let participant = Participant {
            id: tables.next_id(),
            code: code.to_string(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            active: true,
        };
        tables.participants.insert(participant.id, participant.clone());
        participant
    }

    pub async fn set_participant_active(&self, id: i64, active: bool) {
        if let Some(p) = self.tables.lock().await.participants.get_mut(&id) {
            p.active = active;
        }
    }

    /// Every enrollment of a campaign, for inspection.
    pub async fn enrollments_of(&self, campaign_id: i64) -> Vec<Enrollment> {
        let tables = self.tables.lock().await;
        tables
            .enrollments
            .values()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, AppError> {
        let mut tables = self.tables.lock().await;
        let row = Campaign {
            id: tables.next_id(),
            name: campaign.name,
            description: campaign.description,
            start_at: campaign.start_at,
            end_at: campaign.end_at,
            active: true,
            test_id: campaign.test_id,
        };
        tables.campaigns.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError> {
        Ok(self.tables.lock().await.campaigns.get(&id).cloned())
    }

    async fn update_campaign(
        &self,
        id: i64,
        changes: &CampaignChanges,
    ) -> Result<Option<Campaign>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(campaign) = tables.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            campaign.name = name.clone();
        }
        if let Some(description) = &changes.description {
            campaign.description = description.clone();
        }
        if let Some(start_at) = changes.start_at {
            campaign.start_at = start_at;
        }
        if let Some(end_at) = changes.end_at {
            campaign.end_at = end_at;
        }
        Ok(Some(campaign.clone()))
    }

    async fn close_campaign(&self, id: i64) -> Result<Option<u64>, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.campaigns.get_mut(&id) {
            Some(campaign) if campaign.active => campaign.active = false,
            _ => return Ok(None),
        }

        let mut deactivated = 0;
        for enrollment in tables.enrollments.values_mut() {
            if enrollment.campaign_id == id {
                enrollment.active = false;
                enrollment.remaining_time_seconds = Some(0);
                deactivated += 1;
            }
        }
        Ok(Some(deactivated))
    }

    async fn list_overdue_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, AppError> {
        let tables = self.tables.lock().await;
        let mut overdue: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.active && c.end_at <= now)
            .cloned()
            .collect();
        overdue.sort_by_key(|c| (c.end_at, c.id));
        Ok(overdue)
    }

    async fn insert_enrollment(
        &self,
        campaign_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, AppError> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .enrollments
            .values()
            .any(|e| e.campaign_id == campaign_id && e.participant_id == participant_id);
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Participant {} is already enrolled in campaign {}",
                participant_id, campaign_id
            )));
        }

        let enrollment = Enrollment {
            id: tables.next_id(),
            campaign_id,
            participant_id,
            enrolled_at: now,
            exam_started_at: None,
            exam_finished_at: None,
            remaining_time_seconds: None,
            active: true,
        };
        tables.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    async fn find_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError> {
        Ok(self.tables.lock().await.enrollments.get(&id).cloned())
    }

    async fn find_enrollment_for(
        &self,
        participant_id: i64,
        campaign_id: i64,
    ) -> Result<Option<Enrollment>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .enrollments
            .values()
            .find(|e| e.participant_id == participant_id && e.campaign_id == campaign_id)
            .cloned())
    }

    async fn mark_started(
        &self,
        id: i64,
        now: DateTime<Utc>,
        duration_seconds: i32,
    ) -> Result<Enrollment, AppError> {
        let mut tables = self.tables.lock().await;
        let enrollment = tables.enrollment_mut(id)?;
        enrollment.ensure_startable()?;
        if enrollment.exam_started_at.is_none() {
            enrollment.exam_started_at = Some(now);
            enrollment.remaining_time_seconds = Some(duration_seconds);
        }
        Ok(enrollment.clone())
    }

    async fn record_progress(
        &self,
        enrollment_id: i64,
        answer: Option<NewAnswer>,
        remaining_time_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let enrollment = tables.enrollment_mut(enrollment_id)?;
        enrollment.ensure_in_progress()?;
        enrollment.remaining_time_seconds = Some(remaining_time_seconds);

        if let Some(answer) = answer {
            let id = tables.next_id();
            tables.answers.push(Answer {
                id,
                enrollment_id,
                question_id: answer.question_id,
                selected_option: Some(answer.selected_option),
                created_at: now,
            });
        }
        Ok(())
    }

    async fn mark_finished(&self, id: i64, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let enrollment = tables.enrollment_mut(id)?;
        enrollment.ensure_in_progress()?;
        enrollment.exam_finished_at = Some(now);
        Ok(())
    }

    async fn list_answers(&self, enrollment_id: i64) -> Result<Vec<Answer>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .answers
            .iter()
            .filter(|a| a.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    async fn list_unscored_enrollments(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<Enrollment>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .enrollments
            .values()
            .filter(|e| e.campaign_id == campaign_id && !tables.has_results(e.id))
            .cloned()
            .collect())
    }

    async fn list_results(&self, enrollment_id: i64) -> Result<Vec<CategoryResult>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .results
            .iter()
            .filter(|r| r.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    async fn insert_results_if_unscored(
        &self,
        enrollment_id: i64,
        results: &[NewCategoryResult],
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        tables.enrollment_mut(enrollment_id)?;
        if tables.has_results(enrollment_id) {
            return Ok(false);
        }
        for result in results {
            let id = tables.next_id();
            tables.results.push(CategoryResult {
                id,
                enrollment_id,
                category_id: result.category_id,
                score: result.score,
                created_at: now,
            });
        }
        Ok(true)
    }
}

#[async_trait]
impl TestCatalog for MemoryStore {
    async fn find_test(&self, id: i64) -> Result<Option<TestDefinition>, AppError> {
        Ok(self.tables.lock().await.tests.get(&id).cloned())
    }
}

#[async_trait]
impl ParticipantDirectory for MemoryStore {
    async fn find_participant(&self, id: i64) -> Result<Option<Participant>, AppError> {
        Ok(self.tables.lock().await.participants.get(&id).cloned())
    }

    async fn resolve_participant(
        &self,
        entry: &RosterEntry,
    ) -> Result<ResolvedParticipant, AppError> {
        let code = entry.normalized_code();
        let email = entry.normalized_email();
        let mut tables = self.tables.lock().await;

        let found = tables
            .participants
            .values()
            .find(|p| p.code == code)
            .or_else(|| {
                tables
                    .participants
                    .values()
                    .find(|p| p.email.to_lowercase() == email)
            })
            .map(|p| p.id);

        if let Some(id) = found {
            let participant = tables
                .participants
                .get_mut(&id)
                .ok_or_else(|| AppError::not_found(format!("Participant {} not found", id)))?;
            participant.active = true;
            return Ok(ResolvedParticipant {
                participant: participant.clone(),
                existing: true,
            });
        }

        let participant = Participant {
            id: tables.next_id(),
            code: code.to_string(),
            email,
            full_name: entry.full_name.trim().to_string(),
            active: true,
        };
        tables.participants.insert(participant.id, participant.clone());
        Ok(ResolvedParticipant {
            participant,
            existing: false,
        })
    }
}
