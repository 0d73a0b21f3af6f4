pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod queue_manager;
pub mod storage;
pub mod vlm;
pub mod worker;
