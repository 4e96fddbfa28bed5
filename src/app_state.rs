use std::sync::Arc;

use crate::services::{admission::AdmissionController, queue::WorkQueue};
use crate::store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>, default_model_id: &str) -> Self {
        let admission = AdmissionController::new(store.clone(), queue.clone(), default_model_id);
        Self {
            store,
            queue,
            admission: Arc::new(admission),
        }
    }
}
