// src/models/participant.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'participants' table in the database.
/// Owned by the participant-identity provider.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    /// Unique participant code (e.g. staff or student number).
    pub code: String,
    pub email: String,
    pub full_name: String,
    pub active: bool,
}

/// One row of an imported roster.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RosterEntry {
    #[validate(length(min = 1, max = 64, message = "code must be between 1 and 64 characters"))]
    pub code: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, max = 200, message = "full_name must be between 1 and 200 characters"))]
    pub full_name: String,
}

impl RosterEntry {
    /// Code as stored and compared.
    pub fn normalized_code(&self) -> &str {
        self.code.trim()
    }

    /// E-mail as stored and compared: trimmed, lower-case.
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// DTO for attaching a roster to a campaign.
#[derive(Debug, Deserialize)]
pub struct AttachRosterRequest {
    pub participants: Vec<RosterEntry>,
}

/// How the identity provider resolved a roster entry.
#[derive(Debug, Clone)]
pub struct ResolvedParticipant {
    pub participant: Participant,
    /// True when an existing identity was found (and reactivated if needed).
    pub existing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub created: usize,
    pub reused: usize,
}
