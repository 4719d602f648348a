use std::sync::Arc;

use crate::config::Config;
use crate::services::{
    Services, campaigns::CampaignRegistry, closure::ClosureScheduler,
    enrollments::EnrollmentLedger, scoring::ScoringEngine,
};
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Config,
}

impl FromRef<AppState> for Arc<CampaignRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.services.campaigns.clone()
    }
}

impl FromRef<AppState> for Arc<EnrollmentLedger> {
    fn from_ref(state: &AppState) -> Self {
        state.services.enrollments.clone()
    }
}

impl FromRef<AppState> for Arc<ScoringEngine> {
    fn from_ref(state: &AppState) -> Self {
        state.services.scoring.clone()
    }
}

impl FromRef<AppState> for Arc<ClosureScheduler> {
    fn from_ref(state: &AppState) -> Self {
        state.services.closure.clone()
    }
}
