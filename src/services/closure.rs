// src/services/closure.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, task::JoinSet};

use crate::{
    error::AppError,
    repository::AssessmentStore,
    services::scoring::{ScoreOutcome, ScoringEngine},
    utils::clock::Clock,
};

/// When the sweep fires: once a day at a fixed UTC time.
#[derive(Debug, Clone, Copy)]
pub struct ClosureSchedule {
    at: NaiveTime,
}

impl ClosureSchedule {
    pub fn daily_at(hour: u32) -> Result<Self, AppError> {
        let at = NaiveTime::from_hms_opt(hour, 0, 0)
            .ok_or_else(|| AppError::validation(format!("Invalid sweep hour {}", hour)))?;
        Ok(Self { at })
    }

    /// First scheduled instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }
}

/// Outcome of closing one campaign.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignSweep {
    pub campaign_id: i64,
    /// Enrollments deactivated by the closure.
    pub closed: u64,
    pub scored: usize,
    pub already_scored: usize,
    pub failed: usize,
    /// Set when the campaign could not be processed at all.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub campaigns: Vec<CampaignSweep>,
    /// Campaign tasks that panicked.
    pub panicked: usize,
    /// True when another sweep was still running and this one did nothing.
    pub skipped: bool,
}

/// Periodic closure sweep: force-expires overdue campaigns and makes sure
/// every one of their enrollments ends up scored.
pub struct ClosureScheduler {
    store: Arc<dyn AssessmentStore>,
    scoring: Arc<ScoringEngine>,
    clock: Arc<dyn Clock>,
    running: Mutex<()>,
}

impl ClosureScheduler {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        scoring: Arc<ScoringEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scoring,
            clock,
            running: Mutex::new(()),
        }
    }

    /// One full sweep.
    ///
    /// Each campaign runs as its own task and each enrollment's scoring as
    /// its own sub-task, so a failure is reported for that item only.
    /// Overlapping sweeps in this process are skipped; across processes the
    /// conditional flip in `close_campaign` makes the second claimant skip.
    pub async fn run_once(&self) -> Result<SweepReport, AppError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("Closure sweep already running, skipping this tick");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let now = self.clock.now();
        let overdue = self.store.list_overdue_campaigns(now).await?;
        tracing::info!("Closure sweep started: {} overdue campaigns", overdue.len());

        let mut tasks = JoinSet::new();
        for campaign in overdue {
            let store = Arc::clone(&self.store);
            let scoring = Arc::clone(&self.scoring);
            tasks.spawn(async move {
                match close_and_score(store, scoring, campaign.id).await {
                    Ok(sweep) => sweep,
                    Err(e) => {
                        tracing::error!("Failed to close campaign {}: {}", campaign.id, e);
                        CampaignSweep {
                            campaign_id: campaign.id,
                            error: Some(e.to_string()),
                            ..CampaignSweep::default()
                        }
                    }
                }
            });
        }

        let mut report = SweepReport {
            started_at: Some(now),
            ..SweepReport::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sweep) => report.campaigns.push(sweep),
                Err(e) => {
                    tracing::error!("Campaign closure task aborted: {}", e);
                    report.panicked += 1;
                }
            }
        }
        report.campaigns.sort_by_key(|c| c.campaign_id);

        tracing::info!(
            "Closure sweep finished: {} campaigns processed, {} aborted",
            report.campaigns.len(),
            report.panicked
        );
        Ok(report)
    }

    /// Runs the sweep forever on `schedule`.
    pub fn spawn(self: Arc<Self>, schedule: ClosureSchedule, run_on_startup: bool) -> JoinHandle<()> {
        tokio::spawn(async move {
            if run_on_startup {
                if let Err(e) = self.run_once().await {
                    tracing::error!("Startup closure sweep failed: {}", e);
                }
            }

            loop {
                let now = self.clock.now();
                let next = schedule.next_after(now);
                tracing::info!("Next closure sweep at {}", next);
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                if let Err(e) = self.run_once().await {
                    tracing::error!("Closure sweep failed: {}", e);
                }
            }
        })
    }
}

/// Closes one campaign and scores every enrollment still lacking results.
async fn close_and_score(
    store: Arc<dyn AssessmentStore>,
    scoring: Arc<ScoringEngine>,
    campaign_id: i64,
) -> Result<CampaignSweep, AppError> {
    let mut sweep = CampaignSweep {
        campaign_id,
        ..CampaignSweep::default()
    };

    // Flip first: a concurrent sweep that loses the flip skips the campaign.
    let Some(closed) = store.close_campaign(campaign_id).await? else {
        tracing::info!("Campaign {} already closed by another sweep", campaign_id);
        return Ok(sweep);
    };
    sweep.closed = closed;

    let unscored = store.list_unscored_enrollments(campaign_id).await?;

    let mut tasks = JoinSet::new();
    for enrollment in unscored {
        let scoring = Arc::clone(&scoring);
        tasks.spawn(async move {
            let outcome = scoring.score(campaign_id, enrollment.id).await;
            (enrollment.id, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(ScoreOutcome::Scored(_)))) => sweep.scored += 1,
            Ok((_, Ok(ScoreOutcome::AlreadyScored))) => sweep.already_scored += 1,
            Ok((enrollment_id, Err(e))) => {
                // Left unscored until someone intervenes.
                tracing::error!(
                    "Failed to score enrollment {} of campaign {}: {}",
                    enrollment_id,
                    campaign_id,
                    e
                );
                sweep.failed += 1;
            }
            Err(e) => {
                tracing::error!("Scoring task of campaign {} aborted: {}", campaign_id, e);
                sweep.failed += 1;
            }
        }
    }

    tracing::info!(
        campaign_id,
        closed = sweep.closed,
        scored = sweep.scored,
        failed = sweep.failed,
        "Campaign closed by sweep"
    );
    Ok(sweep)
}
