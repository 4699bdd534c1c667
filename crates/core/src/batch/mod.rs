//! Batch submission.
//!
//! A batch runs each record through the lifecycle manager independently and
//! reports a per-record outcome in input order.

mod processor;
mod types;

pub use processor::BatchProcessor;
pub use types::{BatchJob, BatchOutcome, RecordOutcome};
