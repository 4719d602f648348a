// src/handlers/admin.rs

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::{error::AppError, services::closure::ClosureScheduler};

/// Runs the closure sweep now and returns its per-campaign report.
/// Admin only.
pub async fn run_closure_sweep(
    State(scheduler): State<Arc<ClosureScheduler>>,
) -> Result<impl IntoResponse, AppError> {
    let report = scheduler.run_once().await?;
    Ok(Json(report))
}
