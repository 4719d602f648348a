// src/handlers/enrollments.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::enrollment::{ParticipantRequest, ProgressRequest},
    services::{enrollments::EnrollmentLedger, scoring::ScoringEngine},
};

/// Enrolls a participant in a campaign.
pub async fn enroll(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Path(campaign_id): Path<i64>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = ledger.enroll(payload.participant_id, campaign_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": enrollment.id })),
    ))
}

/// Starts the participant's exam, or resumes it with the answers captured so far.
pub async fn start_or_resume(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Path(campaign_id): Path<i64>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = ledger
        .start_or_resume(payload.participant_id, campaign_id)
        .await?;
    Ok(Json(session))
}

/// Answer capture and time-budget heartbeat.
pub async fn record_progress(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Path(enrollment_id): Path<i64>,
    Json(payload): Json<ProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    ledger
        .record_progress(
            enrollment_id,
            payload.question_id,
            payload.selected_option,
            payload.remaining_time_seconds,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn finish(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Path(enrollment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ledger.finish(enrollment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_enrollment(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Path(enrollment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = ledger.find(enrollment_id).await?;
    let status = enrollment.status();

    Ok(Json(serde_json::json!({
        "enrollment": enrollment,
        "status": status,
    })))
}

/// Per-category scores with maxima. Empty until the enrollment is scored.
pub async fn get_results(
    State(scoring): State<Arc<ScoringEngine>>,
    Path(enrollment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let results = scoring.results(enrollment_id).await?;
    Ok(Json(results))
}
