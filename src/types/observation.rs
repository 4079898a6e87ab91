//! Capture types: Observation, ObservationRecord, PendingEntry, ConfirmedRecord

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest package identifier the ingest service accepts.
pub const MAX_PACKAGE_ID_LEN: usize = 50;

// ============================================================================
// Validation
// ============================================================================

/// Reasons an observation cannot be constructed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObservationError {
    #[error("recognized text is empty")]
    EmptyText,
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("package id must be 1..={MAX_PACKAGE_ID_LEN} characters, got {0}")]
    InvalidPackageId(usize),
    #[error("device id is empty")]
    EmptyDeviceId,
    #[error("unknown priority '{0}' (expected urgent, high, standard or low)")]
    UnknownPriority(String),
}

// ============================================================================
// Observation
// ============================================================================

/// Handling priority tag attached at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Standard,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Standard => "standard",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = ObservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Priority::Urgent),
            "high" => Ok(Priority::High),
            "standard" => Ok(Priority::Standard),
            "low" => Ok(Priority::Low),
            other => Err(ObservationError::UnknownPriority(other.to_string())),
        }
    }
}

/// WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point, rejecting out-of-range or non-finite coordinates.
    pub fn new(lat: f64, lon: f64) -> Result<Self, ObservationError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ObservationError::LatitudeOutOfRange(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ObservationError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }
}

/// A captured unit of work before server confirmation.
///
/// Immutable once created. Sync progress lives on [`ObservationRecord`],
/// never on the observation itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Locally generated identifier, unique per capture
    pub local_id: Uuid,
    /// Business package identifier (the server's de-duplication key)
    pub package_id: String,
    /// Capturing device
    pub device_id: String,
    /// Recognized label text
    pub text: String,
    /// Recognition confidence in [0, 1]
    pub confidence: f64,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl Observation {
    /// Validate inputs and stamp a new observation with a fresh local id.
    pub fn new(
        package_id: impl Into<String>,
        device_id: impl Into<String>,
        text: impl Into<String>,
        confidence: f64,
        priority: Priority,
        location: Option<GeoPoint>,
    ) -> Result<Self, ObservationError> {
        let package_id = package_id.into();
        let device_id = device_id.into();
        let text = text.into();

        let id_len = package_id.chars().count();
        if id_len == 0 || id_len > MAX_PACKAGE_ID_LEN {
            return Err(ObservationError::InvalidPackageId(id_len));
        }
        if device_id.trim().is_empty() {
            return Err(ObservationError::EmptyDeviceId);
        }
        if text.trim().is_empty() {
            return Err(ObservationError::EmptyText);
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ObservationError::ConfidenceOutOfRange(confidence));
        }

        Ok(Self {
            local_id: Uuid::new_v4(),
            package_id,
            device_id,
            text,
            confidence,
            priority,
            created_at: Utc::now(),
            location,
        })
    }
}

/// Generate a globally unique package identifier.
///
/// Timestamp-derived ids collide across devices; a v4 UUID does not.
pub fn new_package_id() -> String {
    format!("PKT{}", Uuid::new_v4().simple()).to_ascii_uppercase()
}

// ============================================================================
// Server confirmation
// ============================================================================

/// Server-side processing status of an ingested package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    Processing,
    Parsed,
    Geocoded,
    Routed,
    Delivered,
    Failed,
    VerificationNeeded,
    #[serde(other)]
    Unknown,
}

/// The server's authoritative view of a submitted observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedRecord {
    /// Server-assigned identifier
    pub server_id: String,
    pub package_id: String,
    pub status: PackageStatus,
    pub message: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_address: Option<serde_json::Value>,
    #[serde(default)]
    pub geocoded: bool,
    #[serde(default)]
    pub requires_verification: bool,
}

// ============================================================================
// Main collection record
// ============================================================================

/// Where an observation stands with respect to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Not yet confirmed; either in flight or waiting in the pending queue
    Unsynced,
    /// Superseded by the server's record
    Confirmed {
        record: ConfirmedRecord,
        confirmed_at: DateTime<Utc>,
    },
    /// Server refused it; will not be retried automatically
    Rejected {
        reason: String,
        rejected_at: DateTime<Utc>,
    },
}

/// Why a record is surfaced for user follow-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attention {
    /// Server refused the submission
    Rejected(String),
    /// Server accepted but asked for a human check of the address
    VerificationRequested,
    /// Recognition confidence was below the configured threshold at capture
    LowConfidence,
}

impl std::fmt::Display for Attention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attention::Rejected(reason) => write!(f, "REJECTED: {}", reason),
            Attention::VerificationRequested => write!(f, "VERIFY_ADDRESS"),
            Attention::LowConfidence => write!(f, "LOW_CONFIDENCE"),
        }
    }
}

/// An entry of the observation history (main collection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub observation: Observation,
    pub sync: SyncState,
    /// Confidence was below the threshold in force at capture time
    #[serde(default)]
    pub low_confidence: bool,
    /// Number of submissions that ended in a transient failure
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ObservationRecord {
    pub fn captured(observation: Observation, low_confidence: bool) -> Self {
        Self {
            observation,
            sync: SyncState::Unsynced,
            low_confidence,
            failed_attempts: 0,
            last_error: None,
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.observation.local_id
    }

    pub fn is_unsynced(&self) -> bool {
        matches!(self.sync, SyncState::Unsynced)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.sync, SyncState::Confirmed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.sync, SyncState::Rejected { .. })
    }

    /// The server record, once confirmed
    pub fn confirmed(&self) -> Option<&ConfirmedRecord> {
        match &self.sync {
            SyncState::Confirmed { record, .. } => Some(record),
            _ => None,
        }
    }

    /// Most pressing follow-up reason, if any.
    pub fn attention(&self) -> Option<Attention> {
        match &self.sync {
            SyncState::Rejected { reason, .. } => Some(Attention::Rejected(reason.clone())),
            SyncState::Confirmed { record, .. } if record.requires_verification => {
                Some(Attention::VerificationRequested)
            }
            _ if self.low_confidence => Some(Attention::LowConfidence),
            _ => None,
        }
    }
}

/// An observation waiting in the pending-sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub observation: Observation,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl PendingEntry {
    pub fn new(observation: Observation) -> Self {
        Self {
            observation,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.observation.local_id
    }
}
