// src/models/enrollment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::{error::AppError, models::answer::Answer};

/// Represents the 'enrollments' table in the database.
/// One participant's registration and single attempt record for a campaign.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub campaign_id: i64,
    pub participant_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub exam_started_at: Option<DateTime<Utc>>,

    /// Immutable once set: there are no retakes.
    pub exam_finished_at: Option<DateTime<Utc>>,

    /// NULL until the first start, never unset afterwards.
    pub remaining_time_seconds: Option<i32>,

    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    InProgress,
    Finished,
}

impl Enrollment {
    pub fn status(&self) -> EnrollmentStatus {
        if self.exam_finished_at.is_some() {
            EnrollmentStatus::Finished
        } else if self.exam_started_at.is_some() {
            EnrollmentStatus::InProgress
        } else {
            EnrollmentStatus::Enrolled
        }
    }

    /// Heartbeats and finishing need a running exam on a live enrollment.
    /// Stores re-check this under their lock before writing.
    pub fn ensure_in_progress(&self) -> Result<(), AppError> {
        match self.status() {
            EnrollmentStatus::Enrolled => Err(AppError::state("Exam has not been started")),
            EnrollmentStatus::Finished => Err(AppError::state("Exam already finished")),
            EnrollmentStatus::InProgress if !self.active => Err(AppError::state(format!(
                "Enrollment {} is inactive",
                self.id
            ))),
            EnrollmentStatus::InProgress => Ok(()),
        }
    }

    /// Starting needs a live enrollment whose exam is not finished.
    pub fn ensure_startable(&self) -> Result<(), AppError> {
        if self.exam_finished_at.is_some() {
            return Err(AppError::state("Exam already finished; retakes are not allowed"));
        }
        if !self.active {
            return Err(AppError::state(format!("Enrollment {} is inactive", self.id)));
        }
        Ok(())
    }
}

/// DTO for enrolling a participant, or starting/resuming their exam.
#[derive(Debug, Deserialize)]
pub struct ParticipantRequest {
    pub participant_id: i64,
}

/// Returned by start/resume. The client rebuilds its in-progress state
/// from `answers`.
#[derive(Debug, Serialize)]
pub struct ExamSession {
    pub enrollment_id: i64,
    pub remaining_time_seconds: i32,
    pub answers: Vec<Answer>,
}

/// DTO for the progress heartbeat.
#[derive(Debug, Deserialize, Validate)]
pub struct ProgressRequest {
    pub question_id: i64,
    /// 0-based option index, or null to only refresh the time budget.
    #[validate(range(min = 0, message = "selected_option must not be negative"))]
    pub selected_option: Option<i32>,
    #[validate(range(min = 0, message = "remaining_time_seconds must not be negative"))]
    pub remaining_time_seconds: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment() -> Enrollment {
        Enrollment {
            id: 7,
            campaign_id: 1,
            participant_id: 2,
            enrolled_at: Utc::now(),
            exam_started_at: None,
            exam_finished_at: None,
            remaining_time_seconds: None,
            active: true,
        }
    }

    #[test]
    fn test_in_progress_requires_start_and_live_enrollment() {
        let mut e = enrollment();
        assert!(matches!(e.ensure_in_progress(), Err(AppError::State(_))));

        e.exam_started_at = Some(Utc::now());
        assert!(e.ensure_in_progress().is_ok());

        e.active = false;
        assert!(matches!(e.ensure_in_progress(), Err(AppError::State(_))));
        assert!(matches!(e.ensure_startable(), Err(AppError::State(_))));
    }

    #[test]
    fn test_finished_is_terminal() {
        let mut e = enrollment();
        e.exam_started_at = Some(Utc::now());
        e.exam_finished_at = Some(Utc::now());
        assert!(matches!(e.ensure_in_progress(), Err(AppError::State(msg)) if msg.contains("finished")));
        assert!(matches!(e.ensure_startable(), Err(AppError::State(_))));
    }
}
