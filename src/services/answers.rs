// src/services/answers.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::answer::{Answer, NewAnswer},
    repository::AssessmentStore,
};

/// Append-only answer capture plus the enrollment's running time budget.
#[derive(Clone)]
pub struct AnswerStore {
    store: Arc<dyn AssessmentStore>,
}

impl AnswerStore {
    pub fn new(store: Arc<dyn AssessmentStore>) -> Self {
        Self { store }
    }

    /// Appends one answer row when an option is given and always overwrites
    /// the time budget. Both writes land together or not at all.
    pub async fn capture(
        &self,
        enrollment_id: i64,
        question_id: i64,
        selected_option: Option<i32>,
        remaining_time_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let answer = selected_option.map(|selected_option| NewAnswer {
            question_id,
            selected_option,
        });

        self.store
            .record_progress(enrollment_id, answer, remaining_time_seconds, now)
            .await
    }

    /// Every captured row, oldest first, duplicates included.
    pub async fn history(&self, enrollment_id: i64) -> Result<Vec<Answer>, AppError> {
        self.store.list_answers(enrollment_id).await
    }
}
