// src/repository/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::fmt;

use crate::{
    error::AppError,
    models::{
        answer::{Answer, NewAnswer},
        campaign::{Campaign, CampaignChanges, NewCampaign},
        enrollment::Enrollment,
        participant::{Participant, ResolvedParticipant, RosterEntry},
        result::{CategoryResult, NewCategoryResult},
        test_definition::{CategoryConfig, QuestionKey, TestDefinition},
    },
    repository::{AssessmentStore, ParticipantDirectory, TestCatalog},
};

/// Postgres-backed implementation of every repository trait.
///
/// Holds the injected pool; the pool itself is opened and closed by the
/// process entry point.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl fmt::Debug for PgStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgStore").finish()
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Helper struct for fetching the test header.
#[derive(FromRow)]
struct TestRow {
    id: i64,
    name: String,
    duration_seconds: i32,
    total_score: f64,
}

/// Helper struct for fetching category configurations.
#[derive(FromRow)]
struct CategoryRow {
    id: i64,
    category_id: i64,
    name: String,
    question_count: i32,
    percent_of_total: f64,
}

/// Helper struct for fetching answer keys.
#[derive(FromRow)]
struct QuestionKeyRow {
    test_category_id: i64,
    question_id: i64,
    option_count: i32,
    correct_option: Option<i32>,
}

/// Loads an enrollment inside `tx` and holds its row lock until commit.
/// `close_campaign` updates the same rows, so the two serialise.
async fn lock_enrollment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
) -> Result<Enrollment, AppError> {
    sqlx::query_as::<_, Enrollment>(
        r#"
        SELECT id, campaign_id, participant_id, enrolled_at, exam_started_at,
               exam_finished_at, remaining_time_seconds, active
        FROM enrollments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::not_found(format!("Enrollment {} not found", id)))
}

#[async_trait]
impl AssessmentStore for PgStore {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, AppError> {
        let row = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (name, description, start_at, end_at, active, test_id)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            RETURNING id, name, description, start_at, end_at, active, test_id
            "#,
        )
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.start_at)
        .bind(campaign.end_at)
        .bind(campaign.test_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert campaign: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(row)
    }

    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError> {
        let row = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, description, start_at, end_at, active, test_id
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_campaign(
        &self,
        id: i64,
        changes: &CampaignChanges,
    ) -> Result<Option<Campaign>, AppError> {
        let row = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                start_at = COALESCE($4, start_at),
                end_at = COALESCE($5, end_at)
            WHERE id = $1
            RETURNING id, name, description, start_at, end_at, active, test_id
            "#,
        )
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.start_at)
        .bind(changes.end_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update campaign {}: {:?}", id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(row)
    }

    async fn close_campaign(&self, id: i64) -> Result<Option<u64>, AppError> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query("UPDATE campaigns SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if flipped == 0 {
            // Someone else closed it first (or it never existed).
            tx.rollback().await?;
            return Ok(None);
        }

        let deactivated = sqlx::query(
            r#"
            UPDATE enrollments
            SET active = FALSE, remaining_time_seconds = 0
            WHERE campaign_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(Some(deactivated))
    }

    async fn list_overdue_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, AppError> {
        let rows = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, description, start_at, end_at, active, test_id
            FROM campaigns
            WHERE active AND end_at <= $1
            ORDER BY end_at, id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_enrollment(
        &self,
        campaign_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, AppError> {
        sqlx::query_as::<_, Enrollment>(
            r#"
            INSERT INTO enrollments (campaign_id, participant_id, enrolled_at, active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING id, campaign_id, participant_id, enrolled_at, exam_started_at,
                      exam_finished_at, remaining_time_seconds, active
            "#,
        )
        .bind(campaign_id)
        .bind(participant_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "Participant {} is already enrolled in campaign {}",
                    participant_id, campaign_id
                ))
            } else {
                tracing::error!("Failed to insert enrollment: {:?}", e);
                AppError::InternalServerError(e.to_string())
            }
        })
    }

    async fn find_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError> {
        let row = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT id, campaign_id, participant_id, enrolled_at, exam_started_at,
                   exam_finished_at, remaining_time_seconds, active
            FROM enrollments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_enrollment_for(
        &self,
        participant_id: i64,
        campaign_id: i64,
    ) -> Result<Option<Enrollment>, AppError> {
        let row = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT id, campaign_id, participant_id, enrolled_at, exam_started_at,
                   exam_finished_at, remaining_time_seconds, active
            FROM enrollments
            WHERE participant_id = $1 AND campaign_id = $2
            "#,
        )
        .bind(participant_id)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn mark_started(
        &self,
        id: i64,
        now: DateTime<Utc>,
        duration_seconds: i32,
    ) -> Result<Enrollment, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut enrollment = lock_enrollment(&mut tx, id).await?;
        enrollment.ensure_startable()?;

        // A concurrent double start initialises once.
        if enrollment.exam_started_at.is_none() {
            sqlx::query(
                r#"
                UPDATE enrollments
                SET exam_started_at = $2, remaining_time_seconds = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(now)
            .bind(duration_seconds)
            .execute(&mut *tx)
            .await?;

            enrollment.exam_started_at = Some(now);
            enrollment.remaining_time_seconds = Some(duration_seconds);
        }

        tx.commit().await?;

        Ok(enrollment)
    }

    async fn record_progress(
        &self,
        enrollment_id: i64,
        answer: Option<NewAnswer>,
        remaining_time_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises heartbeats from several tabs of one session,
        // and against a closure that lands in between.
        lock_enrollment(&mut tx, enrollment_id)
            .await?
            .ensure_in_progress()?;

        if let Some(answer) = answer {
            sqlx::query(
                r#"
                INSERT INTO answers (enrollment_id, question_id, selected_option, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(enrollment_id)
            .bind(answer.question_id)
            .bind(answer.selected_option)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE enrollments SET remaining_time_seconds = $2 WHERE id = $1")
            .bind(enrollment_id)
            .bind(remaining_time_seconds)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn mark_finished(&self, id: i64, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        lock_enrollment(&mut tx, id).await?.ensure_in_progress()?;

        sqlx::query("UPDATE enrollments SET exam_finished_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn list_answers(&self, enrollment_id: i64) -> Result<Vec<Answer>, AppError> {
        let rows = sqlx::query_as::<_, Answer>(
            r#"
            SELECT id, enrollment_id, question_id, selected_option, created_at
            FROM answers
            WHERE enrollment_id = $1
            ORDER BY id
            "#,
        )
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_unscored_enrollments(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<Enrollment>, AppError> {
        let rows = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT e.id, e.campaign_id, e.participant_id, e.enrolled_at, e.exam_started_at,
                   e.exam_finished_at, e.remaining_time_seconds, e.active
            FROM enrollments e
            WHERE e.campaign_id = $1
              AND NOT EXISTS (SELECT 1 FROM results r WHERE r.enrollment_id = e.id)
            ORDER BY e.id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_results(&self, enrollment_id: i64) -> Result<Vec<CategoryResult>, AppError> {
        let rows = sqlx::query_as::<_, CategoryResult>(
            r#"
            SELECT id, enrollment_id, category_id, score, created_at
            FROM results
            WHERE enrollment_id = $1
            ORDER BY id
            "#,
        )
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_results_if_unscored(
        &self,
        enrollment_id: i64,
        results: &[NewCategoryResult],
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM enrollments WHERE id = $1 FOR UPDATE")
            .bind(enrollment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("Enrollment {} not found", enrollment_id))
            })?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM results WHERE enrollment_id = $1")
                .bind(enrollment_id)
                .fetch_one(&mut *tx)
                .await?;

        if existing > 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO results (enrollment_id, category_id, score, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(enrollment_id)
            .bind(result.category_id)
            .bind(result.score)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to write result for enrollment {}: {:?}",
                    enrollment_id,
                    e
                );
                AppError::InternalServerError(e.to_string())
            })?;
        }

        tx.commit().await?;

        Ok(true)
    }
}

#[async_trait]
impl TestCatalog for PgStore {
    async fn find_test(&self, id: i64) -> Result<Option<TestDefinition>, AppError> {
        let Some(test) = sqlx::query_as::<_, TestRow>(
            "SELECT id, name, duration_seconds, total_score FROM tests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let categories = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, category_id, name, question_count, percent_of_total
            FROM test_categories
            WHERE test_id = $1
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let keys = sqlx::query_as::<_, QuestionKeyRow>(
            r#"
            SELECT q.test_category_id, q.question_id,
                   jsonb_array_length(q.options) AS option_count, q.correct_option
            FROM category_questions q
            JOIN test_categories c ON c.id = q.test_category_id
            WHERE c.test_id = $1
            ORDER BY q.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut keys_by_category: HashMap<i64, Vec<QuestionKey>> = HashMap::new();
        for key in keys {
            keys_by_category
                .entry(key.test_category_id)
                .or_default()
                .push(QuestionKey {
                    question_id: key.question_id,
                    option_count: key.option_count,
                    correct_option: key.correct_option,
                });
        }

        let categories = categories
            .into_iter()
            .map(|c| CategoryConfig {
                category_id: c.category_id,
                name: c.name,
                question_count: c.question_count,
                percent_of_total: c.percent_of_total,
                questions: keys_by_category.remove(&c.id).unwrap_or_default(),
            })
            .collect();

        Ok(Some(TestDefinition {
            id: test.id,
            name: test.name,
            duration_seconds: test.duration_seconds,
            total_score: test.total_score,
            categories,
        }))
    }
}

#[async_trait]
impl ParticipantDirectory for PgStore {
    async fn find_participant(&self, id: i64) -> Result<Option<Participant>, AppError> {
        let row = sqlx::query_as::<_, Participant>(
            "SELECT id, code, email, full_name, active FROM participants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn resolve_participant(
        &self,
        entry: &RosterEntry,
    ) -> Result<ResolvedParticipant, AppError> {
        let code = entry.normalized_code();
        let email = entry.normalized_email();

        let existing = sqlx::query_as::<_, Participant>(
            r#"
            SELECT id, code, email, full_name, active
            FROM participants
            WHERE code = $1 OR lower(email) = $2
            ORDER BY (code = $1) DESC, id
            LIMIT 1
            "#,
        )
        .bind(code)
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(mut participant) = existing {
            if !participant.active {
                sqlx::query("UPDATE participants SET active = TRUE WHERE id = $1")
                    .bind(participant.id)
                    .execute(&self.pool)
                    .await?;
                participant.active = true;
                tracing::info!("Reactivated participant {}", participant.code);
            }
            return Ok(ResolvedParticipant {
                participant,
                existing: true,
            });
        }

        let participant = sqlx::query_as::<_, Participant>(
            r#"
            INSERT INTO participants (code, email, full_name, active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING id, code, email, full_name, active
            "#,
        )
        .bind(code)
        .bind(&email)
        .bind(entry.full_name.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Participant '{}' already exists", code))
            } else {
                AppError::InternalServerError(e.to_string())
            }
        })?;

        Ok(ResolvedParticipant {
            participant,
            existing: false,
        })
    }
}
