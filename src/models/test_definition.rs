// src/models/test_definition.rs

use serde::{Deserialize, Serialize};

/// A test as served by the test-definition provider, already joined with
/// its category configurations and question keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: i64,
    pub name: String,
    pub duration_seconds: i32,
    pub total_score: f64,
    pub categories: Vec<CategoryConfig>,
}

/// Weight and question assignment of one category within a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub category_id: i64,
    pub name: String,
    pub question_count: i32,
    pub percent_of_total: f64,
    pub questions: Vec<QuestionKey>,
}

/// A question assigned to a category with its correct option.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuestionKey {
    pub question_id: i64,
    /// Length of the question's option list.
    pub option_count: i32,
    /// 0-based index of the correct option, `None` if none is configured.
    pub correct_option: Option<i32>,
}

impl QuestionKey {
    /// Scoring encoding: 1-based option position, 0 for "no option".
    pub fn correct_encoding(&self) -> i64 {
        encode_selection(self.correct_option)
    }

    pub fn has_option(&self, index: i32) -> bool {
        (0..self.option_count).contains(&index)
    }
}

/// Encodes a selection the way results are compared: `None` is 0, option
/// index `i` is `i + 1`. Widened so no stored value can overflow.
pub fn encode_selection(selected_option: Option<i32>) -> i64 {
    selected_option.map_or(0, |index| i64::from(index) + 1)
}

impl TestDefinition {
    pub fn category(&self, category_id: i64) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.category_id == category_id)
    }

    pub fn question(&self, question_id: i64) -> Option<&QuestionKey> {
        self.categories
            .iter()
            .flat_map(|c| c.questions.iter())
            .find(|q| q.question_id == question_id)
    }
}

impl CategoryConfig {
    /// `total_score * percent_of_total / 100`.
    pub fn max_score(&self, total_score: f64) -> f64 {
        total_score * (self.percent_of_total / 100.0)
    }
}
