// src/services/enrollments.rs

use std::sync::Arc;

use crate::{
    error::AppError,
    models::{
        campaign::Campaign,
        enrollment::{Enrollment, ExamSession},
    },
    repository::{AssessmentStore, ParticipantDirectory, TestCatalog},
    services::answers::AnswerStore,
    utils::{
        clock::Clock,
        notify::{self, Notification, Notifier},
    },
};

/// Enrollment creation and the start / progress / finish transitions of a
/// participant's single attempt.
pub struct EnrollmentLedger {
    store: Arc<dyn AssessmentStore>,
    catalog: Arc<dyn TestCatalog>,
    directory: Arc<dyn ParticipantDirectory>,
    answers: AnswerStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl EnrollmentLedger {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        catalog: Arc<dyn TestCatalog>,
        directory: Arc<dyn ParticipantDirectory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            answers: AnswerStore::new(Arc::clone(&store)),
            store,
            catalog,
            directory,
            notifier,
            clock,
        }
    }

    async fn load_campaign(&self, campaign_id: i64) -> Result<Campaign, AppError> {
        self.store
            .find_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Campaign {} not found", campaign_id)))
    }

    async fn load_enrollment(&self, enrollment_id: i64) -> Result<Enrollment, AppError> {
        self.store
            .find_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Enrollment {} not found", enrollment_id)))
    }

    /// Enrolls an existing participant without notifying anyone.
    /// Shared by `enroll` and roster attachment.
    pub(crate) async fn create_enrollment(
        &self,
        participant_id: i64,
        campaign_id: i64,
    ) -> Result<Enrollment, AppError> {
        let enrollment = self
            .store
            .insert_enrollment(campaign_id, participant_id, self.clock.now())
            .await?;

        tracing::info!(
            "Participant {} enrolled in campaign {} (enrollment {})",
            participant_id,
            campaign_id,
            enrollment.id
        );
        Ok(enrollment)
    }

    /// Creates the enrollment for a (participant, campaign) pair.
    ///
    /// Fails with `Conflict` when the pair is already enrolled, even if that
    /// enrollment was deactivated: reactivation is a roster concern.
    pub async fn enroll(&self, participant_id: i64, campaign_id: i64) -> Result<Enrollment, AppError> {
        let campaign = self.load_campaign(campaign_id).await?;
        if !campaign.active {
            return Err(AppError::state(format!("Campaign {} is closed", campaign_id)));
        }

        self.directory
            .find_participant(participant_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Participant {} not found", participant_id)))?;

        let enrollment = self.create_enrollment(participant_id, campaign_id).await?;

        notify::dispatch(
            &self.notifier,
            Notification::Enrolled {
                participant_id,
                campaign_id,
                enrollment_id: enrollment.id,
            },
        );

        Ok(enrollment)
    }

    /// Starts the exam on first call, resumes it afterwards.
    ///
    /// The first call stamps `exam_started_at` and sets the budget to the
    /// test duration; later calls return whatever the last heartbeat wrote,
    /// together with every captured answer.
    pub async fn start_or_resume(
        &self,
        participant_id: i64,
        campaign_id: i64,
    ) -> Result<ExamSession, AppError> {
        let enrollment = self
            .store
            .find_enrollment_for(participant_id, campaign_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "Participant {} is not enrolled in campaign {}",
                    participant_id, campaign_id
                ))
            })?;
        let campaign = self.load_campaign(campaign_id).await?;
        let now = self.clock.now();

        if !campaign.active {
            return Err(AppError::state(format!("Campaign {} is closed", campaign_id)));
        }
        if now < campaign.start_at {
            return Err(AppError::state(format!("Campaign {} has not opened yet", campaign_id)));
        }
        if now >= campaign.end_at {
            return Err(AppError::state(format!("Campaign {} has already ended", campaign_id)));
        }
        enrollment.ensure_startable()?;

        let enrollment = match enrollment.exam_started_at {
            Some(_) => enrollment,
            None => {
                let test = self
                    .catalog
                    .find_test(campaign.test_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::not_found(format!("Test {} not found", campaign.test_id))
                    })?;
                let started = self
                    .store
                    .mark_started(enrollment.id, now, test.duration_seconds)
                    .await?;
                tracing::info!("Enrollment {} started its exam", started.id);
                started
            }
        };

        let remaining_time_seconds = enrollment.remaining_time_seconds.ok_or_else(|| {
            AppError::InternalServerError(format!(
                "Enrollment {} started without a time budget",
                enrollment.id
            ))
        })?;
        let answers = self.answers.history(enrollment.id).await?;

        Ok(ExamSession {
            enrollment_id: enrollment.id,
            remaining_time_seconds,
            answers,
        })
    }

    /// Heartbeat from the exam client: captures an answer if one is given
    /// and always overwrites the remaining time.
    ///
    /// The time budget is trusted as sent; wall-clock expiry mid-session is
    /// not enforced here.
    pub async fn record_progress(
        &self,
        enrollment_id: i64,
        question_id: i64,
        selected_option: Option<i32>,
        remaining_time_seconds: i32,
    ) -> Result<(), AppError> {
        if remaining_time_seconds < 0 {
            return Err(AppError::validation("remaining_time_seconds must not be negative"));
        }
        if selected_option.is_some_and(|o| o < 0) {
            return Err(AppError::validation("selected_option must not be negative"));
        }

        let enrollment = self.load_enrollment(enrollment_id).await?;
        enrollment.ensure_in_progress()?;

        if let Some(option) = selected_option {
            let campaign = self.load_campaign(enrollment.campaign_id).await?;
            let test = self
                .catalog
                .find_test(campaign.test_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Test {} not found", campaign.test_id)))?;
            let question = test.question(question_id).ok_or_else(|| {
                AppError::validation(format!(
                    "Question {} is not part of test {}",
                    question_id, test.id
                ))
            })?;
            if !question.has_option(option) {
                return Err(AppError::validation(format!(
                    "Question {} has no option {}",
                    question_id, option
                )));
            }
        }

        // The store re-checks the enrollment state under its lock, so a
        // closure landing after the checks above still wins.
        self.answers
            .capture(
                enrollment_id,
                question_id,
                selected_option,
                remaining_time_seconds,
                self.clock.now(),
            )
            .await
    }

    /// Terminal transition. Scoring is left to the closure sweep.
    ///
    /// Only a started, unfinished exam on a live enrollment can finish.
    pub async fn finish(&self, enrollment_id: i64) -> Result<(), AppError> {
        self.store.mark_finished(enrollment_id, self.clock.now()).await?;

        tracing::info!("Enrollment {} finished its exam", enrollment_id);
        Ok(())
    }

    pub async fn find(&self, enrollment_id: i64) -> Result<Enrollment, AppError> {
        self.load_enrollment(enrollment_id).await
    }
}
