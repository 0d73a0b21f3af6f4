use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::db::store::JobStore;
use crate::services::pipeline::ExtractionPipeline;
use crate::services::pool::ConnectionPool;
use crate::services::queue_manager::QueueManager;
use crate::services::storage::ImageStorage;
use crate::services::vlm::VlmClient;
use crate::services::worker::QueueWorker;

/// Application context constructed once at process startup and passed
/// explicitly to whoever needs it. No module-level singletons.
pub struct AppContext {
    pub store: Arc<dyn JobStore>,
    pub pool: ConnectionPool,
    pub worker: Arc<QueueWorker>,
    pub queue_manager: Arc<QueueManager>,
}

impl AppContext {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        storage: Arc<ImageStorage>,
        vlm: Arc<VlmClient>,
    ) -> Self {
        let pool = ConnectionPool::new(config.max_concurrency, config.requests_per_minute);
        let pipeline = Arc::new(ExtractionPipeline::new(
            Arc::clone(&store),
            storage,
            vlm,
            pool.clone(),
        ));
        let worker = Arc::new(QueueWorker::new(config, Arc::clone(&store), pipeline));
        let queue_manager = Arc::new(QueueManager::new(Arc::clone(&store)));

        Self {
            store,
            pool,
            worker,
            queue_manager,
        }
    }
}
