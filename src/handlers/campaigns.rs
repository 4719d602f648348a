// src/handlers/campaigns.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::{
        campaign::{CreateCampaignRequest, UpdateCampaignRequest},
        participant::AttachRosterRequest,
    },
    services::campaigns::CampaignRegistry,
};

/// Creates a campaign. Returns 201 with the new id.
pub async fn create_campaign(
    State(registry): State<Arc<CampaignRegistry>>,
    Json(payload): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let campaign = registry.create(payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": campaign.id })),
    ))
}

pub async fn get_campaign(
    State(registry): State<Arc<CampaignRegistry>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let campaign = registry.get(id).await?;
    Ok(Json(registry.view(campaign)))
}

/// Updates campaign fields. `"active": false` closes the campaign without scoring.
pub async fn update_campaign(
    State(registry): State<Arc<CampaignRegistry>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCampaignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let campaign = registry.update(id, payload).await?;
    Ok(Json(registry.view(campaign)))
}

/// Attaches an imported roster; all-or-nothing on validation.
pub async fn attach_roster(
    State(registry): State<Arc<CampaignRegistry>>,
    Path(id): Path<i64>,
    Json(payload): Json<AttachRosterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let summary = registry.attach_roster(id, &payload.participants).await?;
    Ok(Json(summary))
}
