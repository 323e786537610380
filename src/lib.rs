//! # TallyKV
//!
//! Durable, concurrency-safe counters on a log-structured embedded
//! key-value engine:
//! - Write-Ahead Logging (WAL) with atomic multi-operation records
//! - Column families with per-family merge operators
//! - Crash recovery that skips operations already flushed to SSTables
//! - Interchangeable increment strategies, checked against an in-memory
//!   reference count by a concurrent load harness
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Verification Harness                        │
//! │         (Concurrent Load / Quiescence / Verdict)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Counter Service                            │
//! │          (Increment / Get / Reset + Reference Count)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Write Coordinator                           │
//! │       (Direct / Batch / Single Writer, Retry + Backoff)      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          Storage Adapter (u64 codec, CF handles)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │  (Append)   │          │  (RwLock)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │  merge operators fold on read/flush
//!                                   ▼
//!                           ┌─────────────┐
//!                           │   Storage   │
//!                           │  (SSTable)  │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod engine;
pub mod merge;

pub mod adapter;
pub mod coordinator;
pub mod service;
pub mod harness;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TallyError};
pub use config::{ColumnFamilyOptions, Config, WalSyncStrategy};
pub use engine::{ColumnFamilyHandle, Engine, StorageEngine, WriteBatch};
pub use merge::{MergeOperator, UInt64AddOperator};
pub use coordinator::{RetryPolicy, WriteCoordinator, WriteStrategy};
pub use service::{CounterService, CounterSnapshot};
pub use harness::{Harness, HarnessReport, LoadPlan, Verdict};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TallyKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
