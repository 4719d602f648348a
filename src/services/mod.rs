// src/services/mod.rs

pub mod answers;
pub mod campaigns;
pub mod closure;
pub mod enrollments;
pub mod scoring;

use std::sync::Arc;

use crate::{
    repository::{AssessmentStore, ParticipantDirectory, TestCatalog},
    utils::{clock::Clock, notify::Notifier},
};

use self::{
    campaigns::CampaignRegistry, closure::ClosureScheduler, enrollments::EnrollmentLedger,
    scoring::ScoringEngine,
};

/// The wired core, sharing one data-access context.
#[derive(Clone)]
pub struct Services {
    pub campaigns: Arc<CampaignRegistry>,
    pub enrollments: Arc<EnrollmentLedger>,
    pub scoring: Arc<ScoringEngine>,
    pub closure: Arc<ClosureScheduler>,
}

impl Services {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        catalog: Arc<dyn TestCatalog>,
        directory: Arc<dyn ParticipantDirectory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scoring = Arc::new(ScoringEngine::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&clock),
        ));
        let enrollments = Arc::new(EnrollmentLedger::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&directory),
            Arc::clone(&notifier),
            Arc::clone(&clock),
        ));
        let campaigns = Arc::new(CampaignRegistry::new(
            Arc::clone(&store),
            catalog,
            directory,
            Arc::clone(&enrollments),
            notifier,
            Arc::clone(&clock),
        ));
        let closure = Arc::new(ClosureScheduler::new(store, Arc::clone(&scoring), clock));

        Self {
            campaigns,
            enrollments,
            scoring,
            closure,
        }
    }
}
