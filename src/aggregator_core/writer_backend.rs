//! Writer backend trait for average records
//!
//! Defines the interface for persisting aggregation results to a destination.

use super::jsonl_writer::AverageRecord;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Backend trait for writing average records
#[async_trait]
pub trait ResultWriterBackend: Send {
    /// Write a single record; it must be visible at the destination on return
    async fn write_record(&mut self, record: &AverageRecord) -> Result<(), WriterError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), WriterError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
