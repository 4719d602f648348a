// src/models/result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'results' table in the database.
/// The computed score for one category within one enrollment.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CategoryResult {
    pub id: i64,
    pub enrollment_id: i64,
    pub category_id: i64,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// A score ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCategoryResult {
    pub category_id: i64,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct CategoryScoreView {
    pub category_id: i64,
    pub category_name: String,
    pub score: f64,
    pub max_score: f64,
}

/// Response for `GET /api/enrollments/{id}/results`.
#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub enrollment_id: i64,
    pub per_category: Vec<CategoryScoreView>,
    pub total_score: f64,
    pub total_max: f64,
}
