// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'answers' table in the database.
/// Insert-only: a resubmission for the same question is a new row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub enrollment_id: i64,
    pub question_id: i64,

    /// 0-based index into the question's options; NULL means skipped.
    pub selected_option: Option<i32>,

    pub created_at: DateTime<Utc>,
}

/// The answer half of a progress heartbeat.
#[derive(Debug, Clone, Copy)]
pub struct NewAnswer {
    pub question_id: i64,
    pub selected_option: i32,
}
