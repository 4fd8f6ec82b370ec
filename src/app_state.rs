use std::sync::Arc;

use crate::services::store::{AccountStore, JobStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub accounts: Arc<dyn AccountStore>,
}

impl AppState {
    pub fn new(jobs: Arc<dyn JobStore>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { jobs, accounts }
    }
}
