//! Processor module
//!
//! The per-item pipeline the scheduler runs on every worker.

mod balance;
mod error;
mod item_processor;

pub use error::ProcessingError;
pub use item_processor::{ItemProcessor, REASON_DUPLICATE_REFERENCE, REASON_MAX_RETRIES};
