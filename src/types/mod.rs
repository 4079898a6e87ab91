//! Shared data structures for the field-operations engine
//!
//! This module defines the value types both device subsystems operate on:
//! - Capture: Observation, ObservationRecord, PendingEntry, ConfirmedRecord
//! - Delivery: Route, Stop, StopStatus, RouteStatus

mod observation;
mod route;

pub use observation::*;
pub use route::*;
