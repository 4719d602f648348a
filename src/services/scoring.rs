// src/services/scoring.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{
        answer::Answer,
        result::{CategoryScoreView, NewCategoryResult, ResultsResponse},
        test_definition::{TestDefinition, encode_selection},
    },
    repository::{AssessmentStore, TestCatalog},
    utils::clock::Clock,
};

/// What a call to [`ScoringEngine::score`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// Result rows were written.
    Scored(Vec<NewCategoryResult>),
    /// The enrollment already had results; nothing was written.
    AlreadyScored,
}

/// Builds `question_id -> encoded selection`, walking answers in insertion
/// order so a later row for the same question replaces an earlier one.
fn latest_selections(answers: &[Answer]) -> HashMap<i64, i64> {
    let mut selections = HashMap::new();
    for answer in answers {
        selections.insert(answer.question_id, encode_selection(answer.selected_option));
    }
    selections
}

/// Computes one score per category configuration of `test`.
///
/// * No answers at all: every category scores 0 (did not attend).
/// * Otherwise each correctly answered assigned question adds
///   `total_score * percent / 100 / question_count` to its category.
///   No partial credit, no intermediate rounding.
pub fn compute_scores(
    test: &TestDefinition,
    answers: &[Answer],
) -> Result<Vec<NewCategoryResult>, AppError> {
    if answers.is_empty() {
        return Ok(test
            .categories
            .iter()
            .map(|c| NewCategoryResult {
                category_id: c.category_id,
                score: 0.0,
            })
            .collect());
    }

    let selections = latest_selections(answers);
    let mut scores = Vec::with_capacity(test.categories.len());

    for category in &test.categories {
        if category.question_count <= 0 {
            return Err(AppError::validation(format!(
                "Category {} of test {} has no questions configured",
                category.category_id, test.id
            )));
        }

        let per_question = category.max_score(test.total_score) / f64::from(category.question_count);
        let mut score = 0.0;
        for question in &category.questions {
            if selections.get(&question.question_id) == Some(&question.correct_encoding()) {
                score += per_question;
            }
        }

        scores.push(NewCategoryResult {
            category_id: category.category_id,
            score,
        });
    }

    Ok(scores)
}

/// Turns captured answers into per-category results, once per enrollment.
pub struct ScoringEngine {
    store: Arc<dyn AssessmentStore>,
    catalog: Arc<dyn TestCatalog>,
    clock: Arc<dyn Clock>,
}

impl ScoringEngine {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        catalog: Arc<dyn TestCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
        }
    }

    async fn load_test(&self, test_id: i64) -> Result<TestDefinition, AppError> {
        self.catalog
            .find_test(test_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Test {} not found", test_id)))
    }

    /// Scores one enrollment of `campaign_id`.
    ///
    /// Refuses quietly (returns [`ScoreOutcome::AlreadyScored`]) when the
    /// enrollment already has any result row. A partially written set of
    /// results therefore also counts as scored.
    pub async fn score(&self, campaign_id: i64, enrollment_id: i64) -> Result<ScoreOutcome, AppError> {
        let enrollment = self
            .store
            .find_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Enrollment {} not found", enrollment_id)))?;

        if enrollment.campaign_id != campaign_id {
            return Err(AppError::validation(format!(
                "Enrollment {} does not belong to campaign {}",
                enrollment_id, campaign_id
            )));
        }

        if !self.store.list_results(enrollment_id).await?.is_empty() {
            tracing::debug!("Enrollment {} already scored, skipping", enrollment_id);
            return Ok(ScoreOutcome::AlreadyScored);
        }

        let campaign = self
            .store
            .find_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Campaign {} not found", campaign_id)))?;
        let test = self.load_test(campaign.test_id).await?;
        let answers = self.store.list_answers(enrollment_id).await?;

        let scores = compute_scores(&test, &answers)?;

        let written = self
            .store
            .insert_results_if_unscored(enrollment_id, &scores, self.clock.now())
            .await?;

        if !written {
            tracing::debug!("Enrollment {} was scored concurrently", enrollment_id);
            return Ok(ScoreOutcome::AlreadyScored);
        }

        tracing::info!(
            "Scored enrollment {} of campaign {} ({} answers, {} categories)",
            enrollment_id,
            campaign_id,
            answers.len(),
            scores.len()
        );
        Ok(ScoreOutcome::Scored(scores))
    }

    /// Per-category scores of an enrollment with their maxima.
    /// An unscored enrollment yields an empty list.
    pub async fn results(&self, enrollment_id: i64) -> Result<ResultsResponse, AppError> {
        let enrollment = self
            .store
            .find_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Enrollment {} not found", enrollment_id)))?;
        let campaign = self
            .store
            .find_campaign(enrollment.campaign_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("Campaign {} not found", enrollment.campaign_id))
            })?;
        let test = self.load_test(campaign.test_id).await?;

        let per_category: Vec<CategoryScoreView> = self
            .store
            .list_results(enrollment_id)
            .await?
            .into_iter()
            .map(|r| {
                let category = test.category(r.category_id);
                CategoryScoreView {
                    category_id: r.category_id,
                    category_name: category.map(|c| c.name.clone()).unwrap_or_default(),
                    score: r.score,
                    max_score: category.map_or(0.0, |c| c.max_score(test.total_score)),
                }
            })
            .collect();

        let total_score = per_category.iter().map(|c| c.score).sum();

        Ok(ResultsResponse {
            enrollment_id,
            per_category,
            total_score,
            total_max: test.total_score,
        })
    }
}
