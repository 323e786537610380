//! Error types for TallyKV
//!
//! Provides a unified error type for the engine, the counter layer and the
//! verification harness.

use std::io::ErrorKind;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias using TallyError
pub type Result<T> = std::result::Result<T, TallyError>;

/// Unified error type for TallyKV operations
#[derive(Debug, Error)]
pub enum TallyError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("Failed to open engine: {0}")]
    EngineOpen(String),

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Merge Errors
    // -------------------------------------------------------------------------
    #[error("No merge operator registered for column family '{0}'")]
    MergeOperatorMissing(String),

    #[error("Merge failed: {0}")]
    MergeFailed(String),

    #[error("Merge operator self-test failed: expected {expected}, observed {observed}")]
    MergeSelfTest { expected: u64, observed: u64 },

    // -------------------------------------------------------------------------
    // Counter Errors
    // -------------------------------------------------------------------------
    #[error("Write failed after {attempts} attempt(s): {source}")]
    WriteFailed {
        attempts: u32,
        #[source]
        source: Box<TallyError>,
    },

    #[error("Batched write failed: {0}")]
    BatchFailed(#[source] Arc<TallyError>),

    #[error("Read failed: {0}")]
    ReadFailed(#[source] Box<TallyError>),

    #[error("Write coordinator is shut down")]
    CoordinatorClosed,

    #[error("Divergence detected: expected {expected}, stored {stored}, oracle {oracle}")]
    DivergenceDetected { expected: u64, stored: u64, oracle: u64 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TallyError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only I/O conditions that describe a momentary state of the device or
    /// the OS qualify. Everything else is surfaced on the first attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            TallyError::Io(e) => matches!(
                e.kind(),
                ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
                    | ErrorKind::TimedOut
                    | ErrorKind::WriteZero
            ),
            _ => false,
        }
    }
}
