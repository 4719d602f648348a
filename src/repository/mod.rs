// src/repository/mod.rs

//! Data-access seam.
//!
//! Every method returns plain, already-joined structures so the services
//! depend on data shapes rather than on a live object graph. Each method
//! is one atomic unit of work against the backing store.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

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
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Campaigns, enrollments, answers and results: the four tables this core owns.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, AppError>;

    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError>;

    /// Applies field changes. Returns `None` when the campaign does not exist.
    async fn update_campaign(
        &self,
        id: i64,
        changes: &CampaignChanges,
    ) -> Result<Option<Campaign>, AppError>;

    /// Flips `active` to false only if it is still true, and in the same unit
    /// deactivates every enrollment of the campaign with its time budget
    /// forced to 0.
    ///
    /// Returns the number of enrollments deactivated, or `None` when the
    /// campaign was already inactive (or unknown) and nothing was done.
    async fn close_campaign(&self, id: i64) -> Result<Option<u64>, AppError>;

    /// Active campaigns whose `end_at <= now`.
    async fn list_overdue_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, AppError>;

    /// Fails with `AppError::Conflict` if the (participant, campaign) pair exists.
    async fn insert_enrollment(
        &self,
        campaign_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, AppError>;

    async fn find_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError>;

    async fn find_enrollment_for(
        &self,
        participant_id: i64,
        campaign_id: i64,
    ) -> Result<Option<Enrollment>, AppError>;

    /// Sets `exam_started_at` and the initial budget, only if not started yet.
    /// Returns the enrollment as stored afterwards.
    ///
    /// Fails with `AppError::State` when, under the row lock, the enrollment
    /// is inactive or already finished.
    async fn mark_started(
        &self,
        id: i64,
        now: DateTime<Utc>,
        duration_seconds: i32,
    ) -> Result<Enrollment, AppError>;

    /// Appends `answer` (if any) and overwrites the time budget, both or neither.
    ///
    /// Fails with `AppError::State` unless, under the row lock, the exam is
    /// started, not finished and the enrollment still active.
    async fn record_progress(
        &self,
        enrollment_id: i64,
        answer: Option<NewAnswer>,
        remaining_time_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Sets `exam_finished_at`. Same state checks as `record_progress`.
    async fn mark_finished(&self, id: i64, now: DateTime<Utc>) -> Result<(), AppError>;

    /// Answers in insertion order.
    async fn list_answers(&self, enrollment_id: i64) -> Result<Vec<Answer>, AppError>;

    /// Enrollments of the campaign with zero result rows.
    async fn list_unscored_enrollments(&self, campaign_id: i64)
    -> Result<Vec<Enrollment>, AppError>;

    async fn list_results(&self, enrollment_id: i64) -> Result<Vec<CategoryResult>, AppError>;

    /// Writes all rows only if the enrollment still has zero results,
    /// re-checked under a lock. Returns false when it refused.
    async fn insert_results_if_unscored(
        &self,
        enrollment_id: i64,
        results: &[NewCategoryResult],
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

/// Test-definition provider.
#[async_trait]
pub trait TestCatalog: Send + Sync {
    async fn find_test(&self, id: i64) -> Result<Option<TestDefinition>, AppError>;
}

/// Participant-identity provider.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn find_participant(&self, id: i64) -> Result<Option<Participant>, AppError>;

    /// Looks the entry up by code or email; reactivates a deactivated
    /// identity, or creates a new one.
    ///
    /// Codes are matched trimmed and e-mails trimmed and case-insensitively,
    /// the same way roster files are checked for duplicates.
    async fn resolve_participant(&self, entry: &RosterEntry)
    -> Result<ResolvedParticipant, AppError>;
}
