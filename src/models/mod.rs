pub mod batch;
pub mod extraction;
pub mod job;
pub mod metric;
