use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::evaluator::Evaluator;
use crate::store::JobStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    jobs: Arc<dyn JobStore>,
    evaluator: Arc<dyn Evaluator>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        jobs: Arc<dyn JobStore>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, jobs, evaluator }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.inner.jobs
    }

    pub(crate) fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.inner.evaluator
    }
}
