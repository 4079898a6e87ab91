//! Paket Field: offline-first field-operations engine
//!
//! Runs on field devices with intermittent connectivity against the remote
//! package/route service.
//!
//! ## Architecture
//!
//! - **Ingestion Queue** (`capture`): captured labels become durable records,
//!   are submitted immediately when possible and queued for retry otherwise
//! - **Route Progression** (`route`): one active route, a cursor over its
//!   stops, best-effort status push on every completion or skip
//! - **Durable Store** (`storage`): whole-collection persistence shared by
//!   both engines (sled, JSON files, or memory)
//! - **Remote Gateway** (`gateway`): HTTP accessor with transient/rejected
//!   failure classification and no internal retries
//! - **Drain Scheduler** (`sync`): background drain with exponential backoff

pub mod capture;
pub mod config;
pub mod gateway;
pub mod route;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export configuration
pub use config::{ConfigHandle, FieldConfig};

// Re-export engines
pub use capture::{DrainReport, IngestOutcome, IngestQueue, IngestReceipt};
pub use route::{ProgressError, RouteEvent, RouteProgress, SkipReason};

// Re-export collaborator seams
pub use gateway::{GatewayError, HttpGateway, RemoteGateway, ScriptedGateway};
pub use storage::{DurableStore, StorageError};

// Re-export commonly used types
pub use types::{
    GeoPoint, Observation, ObservationRecord, Priority, Route, RouteStatus, Stop, StopStatus,
};
