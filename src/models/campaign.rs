// src/models/campaign.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'campaigns' table in the database.
/// A time-boxed assessment window bound to one test definition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,

    /// Once false, never true again.
    pub active: bool,

    pub test_id: i64,
}

/// Lifecycle phase derived from the active flag and the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Scheduled,
    Active,
    Closed,
}

impl Campaign {
    pub fn phase(&self, now: DateTime<Utc>) -> CampaignPhase {
        if !self.active {
            CampaignPhase::Closed
        } else if now < self.start_at {
            CampaignPhase::Scheduled
        } else {
            CampaignPhase::Active
        }
    }
}

/// Insert payload, already validated by the registry.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub test_id: i64,
}

/// DTO for creating a campaign.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCampaignRequest {
    #[validate(length(min = 1, max = 200, message = "Name length must be between 1 and 200 characters."))]
    pub name: String,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub test_id: i64,
}

/// DTO for updating a campaign. Fields are optional.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateCampaignRequest {
    #[validate(length(min = 1, max = 200, message = "Name length must be between 1 and 200 characters."))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub active: Option<bool>,
}

/// Field changes applied by the repository. The active flag is not part of
/// it: deactivation goes through the explicit close cascade.
#[derive(Debug, Clone, Default)]
pub struct CampaignChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub phase: CampaignPhase,
}
