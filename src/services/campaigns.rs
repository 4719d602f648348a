// src/services/campaigns.rs

use std::collections::HashSet;
use std::sync::Arc;

use validator::Validate;

use crate::{
    error::AppError,
    models::{
        campaign::{
            Campaign, CampaignChanges, CampaignResponse, CreateCampaignRequest, NewCampaign,
            UpdateCampaignRequest,
        },
        participant::{RosterEntry, RosterSummary},
    },
    repository::{AssessmentStore, ParticipantDirectory, TestCatalog},
    services::enrollments::EnrollmentLedger,
    utils::{
        clock::Clock,
        notify::{self, Notification, Notifier},
    },
};

/// Checks a whole roster before anything is written: every row must be
/// well-formed and codes and e-mails must be unique within the file.
fn validate_roster(entries: &[RosterEntry]) -> Result<(), AppError> {
    if entries.is_empty() {
        return Err(AppError::validation("Roster is empty"));
    }

    let mut codes = HashSet::new();
    let mut emails = HashSet::new();

    for (row, entry) in entries.iter().enumerate() {
        entry
            .validate()
            .map_err(|e| AppError::validation(format!("Row {}: {}", row + 1, e)))?;

        if !codes.insert(entry.normalized_code()) {
            return Err(AppError::validation(format!(
                "Row {}: duplicate code '{}'",
                row + 1,
                entry.code
            )));
        }
        if !emails.insert(entry.normalized_email()) {
            return Err(AppError::validation(format!(
                "Row {}: duplicate email '{}'",
                row + 1,
                entry.email
            )));
        }
    }

    Ok(())
}

/// Campaign creation, updates, manual closure and roster attachment.
pub struct CampaignRegistry {
    store: Arc<dyn AssessmentStore>,
    catalog: Arc<dyn TestCatalog>,
    directory: Arc<dyn ParticipantDirectory>,
    ledger: Arc<EnrollmentLedger>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl CampaignRegistry {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        catalog: Arc<dyn TestCatalog>,
        directory: Arc<dyn ParticipantDirectory>,
        ledger: Arc<EnrollmentLedger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            directory,
            ledger,
            notifier,
            clock,
        }
    }

    /// Creates an active campaign. The window must open in the future and
    /// close after it opens; the test must exist.
    pub async fn create(&self, req: CreateCampaignRequest) -> Result<Campaign, AppError> {
        req.validate()?;

        if req.start_at <= self.clock.now() {
            return Err(AppError::validation("start_at must be in the future"));
        }
        if req.end_at <= req.start_at {
            return Err(AppError::validation("end_at must be after start_at"));
        }
        if self.catalog.find_test(req.test_id).await?.is_none() {
            return Err(AppError::validation(format!("Test {} does not exist", req.test_id)));
        }

        let campaign = self
            .store
            .insert_campaign(NewCampaign {
                name: req.name,
                description: req.description,
                start_at: req.start_at,
                end_at: req.end_at,
                test_id: req.test_id,
            })
            .await?;

        tracing::info!(
            "Campaign {} '{}' created ({} .. {})",
            campaign.id,
            campaign.name,
            campaign.start_at,
            campaign.end_at
        );
        Ok(campaign)
    }

    pub async fn get(&self, id: i64) -> Result<Campaign, AppError> {
        self.store
            .find_campaign(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Campaign {} not found", id)))
    }

    /// Campaign plus its lifecycle phase as of now.
    pub fn view(&self, campaign: Campaign) -> CampaignResponse {
        let phase = campaign.phase(self.clock.now());
        CampaignResponse { campaign, phase }
    }

    /// Updates fields and handles the active toggle.
    ///
    /// Turning a campaign off deactivates all of its enrollments (budget
    /// forced to 0) but does not score them; only the closure sweep scores.
    /// A closed campaign cannot be turned back on.
    pub async fn update(&self, id: i64, req: UpdateCampaignRequest) -> Result<Campaign, AppError> {
        req.validate()?;
        let current = self.get(id).await?;

        if req.active == Some(true) && !current.active {
            return Err(AppError::state(format!(
                "Campaign {} is closed and cannot be reactivated",
                id
            )));
        }

        let start_at = req.start_at.unwrap_or(current.start_at);
        let end_at = req.end_at.unwrap_or(current.end_at);
        if end_at <= start_at {
            return Err(AppError::validation("end_at must be after start_at"));
        }

        let changes = CampaignChanges {
            name: req.name,
            description: req.description,
            start_at: req.start_at,
            end_at: req.end_at,
        };
        let has_changes = changes.name.is_some()
            || changes.description.is_some()
            || changes.start_at.is_some()
            || changes.end_at.is_some();

        if has_changes {
            self.store
                .update_campaign(id, &changes)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Campaign {} not found", id)))?;
        }

        if req.active == Some(false) && current.active {
            if let Some(deactivated) = self.store.close_campaign(id).await? {
                tracing::info!(
                    "Campaign {} closed manually; {} enrollments deactivated, scoring left pending",
                    id,
                    deactivated
                );
            }
        }

        self.get(id).await
    }

    /// Attaches an imported roster: resolves each participant identity,
    /// then enrolls it or reuses its existing enrollment.
    ///
    /// The whole roster is rejected before any write if a row is invalid.
    pub async fn attach_roster(
        &self,
        campaign_id: i64,
        entries: &[RosterEntry],
    ) -> Result<RosterSummary, AppError> {
        validate_roster(entries)?;

        let campaign = self.get(campaign_id).await?;
        if !campaign.active {
            return Err(AppError::state(format!("Campaign {} is closed", campaign_id)));
        }

        let mut summary = RosterSummary::default();
        let mut participant_ids = Vec::with_capacity(entries.len());

        for entry in entries {
            let resolved = self.directory.resolve_participant(entry).await?;
            let participant_id = resolved.participant.id;
            if !resolved.existing {
                tracing::debug!("Created participant {} from roster", resolved.participant.code);
            }

            // Only closure deactivates enrollments and closed campaigns are
            // rejected above, so an existing enrollment is always live.
            match self.store.find_enrollment_for(participant_id, campaign_id).await? {
                Some(_) => summary.reused += 1,
                None => {
                    self.ledger.create_enrollment(participant_id, campaign_id).await?;
                    summary.created += 1;
                }
            }
            participant_ids.push(participant_id);
        }

        tracing::info!(
            "Roster attached to campaign {}: {} created, {} reused",
            campaign_id,
            summary.created,
            summary.reused
        );

        notify::dispatch(
            &self.notifier,
            Notification::RosterAttached {
                campaign_id,
                participant_ids,
            },
        );

        Ok(summary)
    }
}
