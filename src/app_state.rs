use std::sync::Arc;

use crate::services::{
    controller::ScanController, pipeline::ItemPipelines, worker_client::WorkerClient,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<WorkerClient>,
    pub scan: Arc<ScanController>,
    pub items: Arc<ItemPipelines>,
}

impl AppState {
    pub fn new(worker: Arc<WorkerClient>, scan: ScanController, items: ItemPipelines) -> Self {
        Self {
            worker,
            scan: Arc::new(scan),
            items: Arc::new(items),
        }
    }
}
