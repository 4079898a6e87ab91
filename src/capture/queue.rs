//! IngestQueue: main collection + pending-sync queue over a durable store

use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CaptureError, DrainHalt, DrainReport, IngestOutcome, IngestReceipt, QueueStats};
use crate::config::ConfigHandle;
use crate::gateway::{GatewayError, SharedGateway};
use crate::storage::{load_collection, save_collection, Collection, SharedStore, StorageError};
use crate::types::{
    new_package_id, Attention, ConfirmedRecord, GeoPoint, Observation, ObservationRecord,
    PendingEntry, SyncState,
};

/// Ingestion queue manager.
///
/// Every mutation persists before it returns. Mutating methods take
/// `&mut self`, so two drains can never overlap on one instance.
pub struct IngestQueue {
    store: SharedStore,
    gateway: SharedGateway,
    config: ConfigHandle,
    /// Newest first
    records: Vec<ObservationRecord>,
    /// Oldest first
    pending: VecDeque<PendingEntry>,
}

impl IngestQueue {
    /// Rehydrate both collections and reconcile them.
    ///
    /// A crash can leave the two collections out of step; reconciliation
    /// restores the invariant that every unsynced record is queued exactly
    /// once and nothing settled is.
    pub fn open(
        store: SharedStore,
        gateway: SharedGateway,
        config: ConfigHandle,
    ) -> Result<Self, StorageError> {
        let records: Vec<ObservationRecord> =
            load_collection(store.as_ref(), Collection::Observations)?;
        let pending: Vec<PendingEntry> = load_collection(store.as_ref(), Collection::PendingSync)?;

        let mut queue = Self {
            store,
            gateway,
            config,
            records,
            pending: pending.into(),
        };

        if queue.reconcile() {
            queue.persist_records()?;
            queue.persist_pending()?;
        }

        info!(
            records = queue.records.len(),
            pending = queue.pending.len(),
            backend = queue.store.backend_name(),
            "Ingest queue opened"
        );
        Ok(queue)
    }

    /// Returns true if anything changed.
    fn reconcile(&mut self) -> bool {
        let mut changed = false;
        let threshold = self.config.current().capture.confidence_threshold;

        // Restore queued observations the main collection lost
        for entry in &self.pending {
            if self.position(entry.local_id()).is_none() {
                warn!(
                    local_id = %entry.local_id(),
                    package_id = %entry.observation.package_id,
                    "Queued observation missing from history, restoring"
                );
                let low = entry.observation.confidence < threshold;
                let mut record = ObservationRecord::captured(entry.observation.clone(), low);
                record.failed_attempts = entry.attempts;
                self.records.push(record);
                changed = true;
            }
        }

        // Drop settled and duplicate queue entries
        let mut seen = HashSet::new();
        let records = &self.records;
        let before = self.pending.len();
        self.pending.retain(|entry| {
            let id = entry.local_id();
            let unsynced = records
                .iter()
                .find(|r| r.local_id() == id)
                .map_or(false, ObservationRecord::is_unsynced);
            unsynced && seen.insert(id)
        });
        if self.pending.len() != before {
            info!(
                dropped = before - self.pending.len(),
                "Dropped settled entries from pending queue"
            );
            changed = true;
        }

        // Requeue unsynced records whose submission outcome was never recorded
        let mut orphaned: Vec<&ObservationRecord> = self
            .records
            .iter()
            .filter(|r| r.is_unsynced() && !seen.contains(&r.local_id()))
            .collect();
        orphaned.sort_by_key(|r| r.observation.created_at);
        for record in orphaned {
            warn!(
                local_id = %record.local_id(),
                package_id = %record.observation.package_id,
                "Unsynced observation not queued, requeueing"
            );
            let mut entry = PendingEntry::new(record.observation.clone());
            entry.attempts = record.failed_attempts;
            self.pending.push_back(entry);
            changed = true;
        }

        self.records
            .sort_by(|a, b| b.observation.created_at.cmp(&a.observation.created_at));
        changed
    }

    // ========================================================================
    // Capture / ingest
    // ========================================================================

    /// Build an observation from recognized text and ingest it.
    ///
    /// Assigns a fresh package id and takes the device id and priority from
    /// the current configuration.
    pub async fn capture(
        &mut self,
        text: &str,
        confidence: f64,
        location: Option<GeoPoint>,
    ) -> Result<IngestReceipt, CaptureError> {
        let cfg = self.config.current();
        let observation = Observation::new(
            new_package_id(),
            cfg.device.device_id.as_str(),
            text,
            confidence,
            cfg.capture.default_priority,
            location,
        )?;
        Ok(self.ingest(observation).await?)
    }

    /// Record an observation durably, then try to submit it.
    ///
    /// Only storage failures are returned, and a failed call leaves the queue
    /// as it was on disk, so the caller can simply retry. Ingesting a local id
    /// that is already settled or queued returns its current state without
    /// resubmitting.
    pub async fn ingest(&mut self, observation: Observation) -> Result<IngestReceipt, StorageError> {
        let local_id = observation.local_id;

        if let Some(idx) = self.position(local_id) {
            let record = &self.records[idx];
            if !record.is_unsynced() || self.is_queued(local_id) {
                debug!(local_id = %local_id, "Observation already ingested");
                return Ok(receipt(record));
            }
            // Recorded, but the submission outcome never was
            debug!(local_id = %local_id, "Resuming interrupted ingest");
        } else {
            let threshold = self.config.current().capture.confidence_threshold;
            let low_confidence = observation.confidence < threshold;
            if low_confidence {
                info!(
                    package_id = %observation.package_id,
                    confidence = observation.confidence,
                    threshold,
                    "Low-confidence capture flagged for review"
                );
            }
            let record = ObservationRecord::captured(observation.clone(), low_confidence);
            self.commit_records(|records| records.insert(0, record))?;
        }

        if !self.config.current().sync.auto_sync {
            debug!(package_id = %observation.package_id, "Auto-sync off, queueing");
            let entry = PendingEntry::new(observation.clone());
            self.commit_pending(|pending| pending.push_back(entry))?;
            return Ok(self.receipt_for(local_id));
        }

        match self.gateway.submit_observation(&observation).await {
            Ok(confirmed) => {
                self.commit_records(|records| mark_confirmed(records, local_id, confirmed))?;
            }
            Err(GatewayError::Transient(reason)) => {
                warn!(
                    package_id = %observation.package_id,
                    error = %reason,
                    "Submission failed, queued for retry"
                );
                let mut entry = PendingEntry::new(observation.clone());
                entry.attempts = 1;
                self.commit_pending(|pending| pending.push_back(entry))?;
                self.commit_records(|records| mark_failed_attempt(records, local_id, &reason))?;
            }
            Err(GatewayError::Rejected { status, message }) => {
                warn!(
                    package_id = %observation.package_id,
                    status,
                    error = %message,
                    "Observation rejected by server"
                );
                self.commit_records(|records| mark_rejected(records, local_id, message))?;
            }
        }

        Ok(self.receipt_for(local_id))
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Submit queued observations in FIFO order.
    ///
    /// Stops at the first transient failure, leaving that entry at the head.
    /// Cancellation is checked before each item; a submission already in
    /// flight runs to its outcome and is recorded.
    pub async fn drain_pending(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<DrainReport, StorageError> {
        let mut report = DrainReport::default();

        if !self.pending.is_empty() {
            debug!(pending = self.pending.len(), "Draining pending queue");
        }

        while let Some(head) = self.pending.front() {
            if cancel.is_cancelled() {
                report.halted = Some(DrainHalt::Cancelled);
                break;
            }

            let observation = head.observation.clone();
            let local_id = observation.local_id;

            if !self.find(local_id).map_or(true, ObservationRecord::is_unsynced) {
                // Settled by an earlier pass whose queue write failed
                debug!(package_id = %observation.package_id, "Dropping settled head entry");
                self.commit_pending(|pending| {
                    pending.pop_front();
                })?;
                continue;
            }

            match self.gateway.submit_observation(&observation).await {
                Ok(confirmed) => {
                    info!(
                        package_id = %observation.package_id,
                        server_id = %confirmed.server_id,
                        "Queued observation confirmed"
                    );
                    self.commit_records(|records| mark_confirmed(records, local_id, confirmed))?;
                    self.commit_pending(|pending| {
                        pending.pop_front();
                    })?;
                    report.confirmed += 1;
                }
                Err(GatewayError::Transient(reason)) => {
                    warn!(
                        package_id = %observation.package_id,
                        error = %reason,
                        "Drain halted, service unreachable"
                    );
                    self.commit_pending(|pending| {
                        if let Some(head) = pending.front_mut() {
                            head.attempts += 1;
                        }
                    })?;
                    self.commit_records(|records| mark_failed_attempt(records, local_id, &reason))?;
                    report.halted = Some(DrainHalt::Transient(reason));
                    break;
                }
                Err(GatewayError::Rejected { status, message }) => {
                    warn!(
                        package_id = %observation.package_id,
                        status,
                        error = %message,
                        "Queued observation rejected, flagged for follow-up"
                    );
                    self.commit_records(|records| mark_rejected(records, local_id, message))?;
                    self.commit_pending(|pending| {
                        pending.pop_front();
                    })?;
                    report.rejected += 1;
                }
            }
        }

        report.remaining = self.pending.len();
        if report.confirmed > 0 || report.rejected > 0 {
            info!(
                confirmed = report.confirmed,
                rejected = report.rejected,
                remaining = report.remaining,
                "Drain pass finished"
            );
        }
        Ok(report)
    }

    /// Return a rejected record to the queue for another attempt.
    ///
    /// Returns false if the id is unknown or the record is not rejected.
    pub fn requeue_rejected(&mut self, local_id: Uuid) -> Result<bool, StorageError> {
        let Some(record) = self.find(local_id).filter(|r| r.is_rejected()) else {
            return Ok(false);
        };
        let entry = PendingEntry::new(record.observation.clone());
        info!(package_id = %entry.observation.package_id, "Rejected observation requeued");

        // Queue first: a stray entry for a still-rejected record is dropped by
        // the next drain, and the requeue can be repeated
        self.commit_pending(|pending| pending.push_back(entry))?;
        self.commit_records(|records| {
            if let Some(record) = records.iter_mut().find(|r| r.local_id() == local_id) {
                record.sync = SyncState::Unsynced;
                record.last_error = None;
            }
        })?;
        Ok(true)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All records, newest first
    pub fn records(&self) -> &[ObservationRecord] {
        &self.records
    }

    /// Queued entries, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &PendingEntry> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn find(&self, local_id: Uuid) -> Option<&ObservationRecord> {
        self.position(local_id).map(|idx| &self.records[idx])
    }

    /// Records a user should look at, newest first
    pub fn needs_attention(&self) -> Vec<(&ObservationRecord, Attention)> {
        self.records
            .iter()
            .filter_map(|r| r.attention().map(|a| (r, a)))
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.records.len(),
            pending: self.pending.len(),
            ..QueueStats::default()
        };
        for record in &self.records {
            match &record.sync {
                SyncState::Unsynced => stats.unsynced += 1,
                SyncState::Confirmed { record: server, .. } => {
                    stats.confirmed += 1;
                    if server.requires_verification {
                        stats.verification_requested += 1;
                    }
                }
                SyncState::Rejected { .. } => stats.rejected += 1,
            }
            if record.low_confidence {
                stats.low_confidence += 1;
            }
        }
        stats
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn position(&self, local_id: Uuid) -> Option<usize> {
        self.records.iter().position(|r| r.local_id() == local_id)
    }

    fn is_queued(&self, local_id: Uuid) -> bool {
        self.pending.iter().any(|e| e.local_id() == local_id)
    }

    fn receipt_for(&self, local_id: Uuid) -> IngestReceipt {
        let idx = self.position(local_id).unwrap_or(0);
        receipt(&self.records[idx])
    }

    /// Apply `change` to a copy of the records and keep it only once saved.
    fn commit_records(
        &mut self,
        change: impl FnOnce(&mut Vec<ObservationRecord>),
    ) -> Result<(), StorageError> {
        let mut next = self.records.clone();
        change(&mut next);
        save_collection(self.store.as_ref(), Collection::Observations, &next)?;
        self.records = next;
        Ok(())
    }

    /// Apply `change` to a copy of the queue and keep it only once saved.
    fn commit_pending(
        &mut self,
        change: impl FnOnce(&mut VecDeque<PendingEntry>),
    ) -> Result<(), StorageError> {
        let mut next = self.pending.clone();
        change(&mut next);
        save_collection(self.store.as_ref(), Collection::PendingSync, next.make_contiguous())?;
        self.pending = next;
        Ok(())
    }

    fn persist_records(&self) -> Result<(), StorageError> {
        save_collection(self.store.as_ref(), Collection::Observations, &self.records)
    }

    fn persist_pending(&self) -> Result<(), StorageError> {
        let entries: Vec<&PendingEntry> = self.pending.iter().collect();
        save_collection(self.store.as_ref(), Collection::PendingSync, &entries)
    }
}

fn record_mut(records: &mut [ObservationRecord], local_id: Uuid) -> Option<&mut ObservationRecord> {
    records.iter_mut().find(|r| r.local_id() == local_id)
}

fn mark_confirmed(records: &mut [ObservationRecord], local_id: Uuid, confirmed: ConfirmedRecord) {
    if let Some(record) = record_mut(records, local_id) {
        record.sync = SyncState::Confirmed {
            record: confirmed,
            confirmed_at: Utc::now(),
        };
        record.last_error = None;
    }
}

fn mark_failed_attempt(records: &mut [ObservationRecord], local_id: Uuid, reason: &str) {
    if let Some(record) = record_mut(records, local_id) {
        record.failed_attempts += 1;
        record.last_error = Some(reason.to_string());
    }
}

fn mark_rejected(records: &mut [ObservationRecord], local_id: Uuid, reason: String) {
    if let Some(record) = record_mut(records, local_id) {
        record.last_error = Some(reason.clone());
        record.sync = SyncState::Rejected {
            reason,
            rejected_at: Utc::now(),
        };
    }
}

fn receipt(record: &ObservationRecord) -> IngestReceipt {
    let outcome = match &record.sync {
        SyncState::Confirmed { record: server, .. } => IngestOutcome::Confirmed {
            server_id: server.server_id.clone(),
        },
        SyncState::Rejected { reason, .. } => IngestOutcome::Rejected {
            reason: reason.clone(),
        },
        SyncState::Unsynced => IngestOutcome::Queued,
    };
    IngestReceipt {
        local_id: record.local_id(),
        package_id: record.observation.package_id.clone(),
        outcome,
        low_confidence: record.low_confidence,
    }
}
