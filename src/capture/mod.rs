//! Ingestion Queue Manager
//!
//! Turns captured observations into durable records and keeps them flowing
//! to the remote service:
//!
//! ```text
//!   capture/ingest ──► main collection (always) ──► submit
//!                                                    │
//!                        Confirmed ◄─────────────────┤
//!                        Rejected (flagged) ◄────────┤
//!                        pending queue ◄─────────────┘ Transient
//!                             │
//!                      drain_pending (FIFO, halts on Transient)
//! ```
//!
//! Network failures never surface to the caller of `capture`/`ingest`; only
//! local validation and storage failures do.

mod queue;

pub use queue::IngestQueue;

use serde::Serialize;
use uuid::Uuid;

use crate::storage::StorageError;
use crate::types::ObservationError;

/// What happened to an observation at ingestion time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Server accepted it; the local record now carries the server fields
    Confirmed { server_id: String },
    /// Held in the pending queue for a later drain
    Queued,
    /// Server refused it; flagged for follow-up and never retried
    Rejected { reason: String },
}

/// Result handed back to the capture collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub local_id: Uuid,
    pub package_id: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
    pub low_confidence: bool,
}

/// Why a drain pass stopped before emptying the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DrainHalt {
    /// The service is unreachable; the head entry stays queued
    Transient(String),
    /// Caller cancelled the pass
    Cancelled,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub confirmed: usize,
    pub rejected: usize,
    pub remaining: usize,
    pub halted: Option<DrainHalt>,
}

impl DrainReport {
    /// The pass ended on an unreachable service
    pub fn hit_transient(&self) -> bool {
        matches!(self.halted, Some(DrainHalt::Transient(_)))
    }
}

/// Record counts by sync state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub confirmed: usize,
    pub unsynced: usize,
    pub rejected: usize,
    pub pending: usize,
    pub low_confidence: usize,
    pub verification_requested: usize,
}

/// Capture failures visible to the caller
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid observation: {0}")]
    Invalid(#[from] ObservationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
