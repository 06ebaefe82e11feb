use std::sync::Arc;

use crate::services::batch::BatchCoordinator;
use crate::services::cache::ResultStore;
use crate::services::persistence::DurableStore;
use crate::services::queue::QueueChannel;
use crate::services::submission::SubmissionService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: ResultStore,
    pub queue: Arc<dyn QueueChannel>,
    pub submission: SubmissionService,
    pub batch: BatchCoordinator,
    /// Present only when persistence is enabled.
    pub durable: Option<Arc<dyn DurableStore>>,
}

impl AppState {
    pub fn new(
        store: ResultStore,
        queue: Arc<dyn QueueChannel>,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Self {
        let submission = SubmissionService::new(store.clone(), queue.clone());
        let batch = BatchCoordinator::new(submission.clone(), store.clone());
        Self {
            store,
            queue,
            submission,
            batch,
            durable,
        }
    }
}
