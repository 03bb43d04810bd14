//! Digital-twin adapter - sole translator between the twin feed and the bus
//!
//! # Notification Flow
//!
//! ```text
//! handle_notification(raw)
//!     ├─ 1. Parse into the closed TwinChange set (reject → dead letter, no sequence)
//!     ├─ 2. First sighting? emit VEHICLE_REGISTERED first
//!     ├─ 3. Assign per-vehicle sequence (persisted, transactional)
//!     ├─ 4. Validate payload against the registered schema (fail-closed)
//!     ├─ 5. Publish with bounded exponential backoff
//!     └─ 6. Exhausted retries → dead letter + alert (never blocks the feed)
//! ```
//!
//! The adapter holds no shared mutable state beyond its own sequence
//! counters; publishing is its only externally visible effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use shared::envelope::{EventEnvelope, EventPayload};
use shared::error::{SyncError, SyncResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::schema::{validate_value, SchemaRegistry};

use super::checkpoint::{AdapterCheckpoint, DeadLetterEntry};
use super::notification::{parse_notification, TwinChange};

/// Bounded exponential backoff for transient publish failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first (0 = no retries)
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped, plus a small jitter to decorrelate producers
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = (self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1))).min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=self.base_delay_ms / 4);
        Duration::from_millis((exp + jitter).min(self.max_delay_ms))
    }
}

/// What became of one handled notification
#[derive(Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sequences published to the bus (registration + change, or change only)
    Published { sequences: Vec<u64> },
    /// Routed to the dead letter sink
    DeadLettered { reason: String },
}

/// Adapter counters (read by the host process for alerting)
#[derive(Debug, Default)]
pub struct AdapterStats {
    published: AtomicU64,
    dead_lettered: AtomicU64,
    alerts: AtomicU64,
}

impl AdapterStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
    /// Alert conditions raised (retry budget exhausted)
    pub fn alerts(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }
}

/// Digital-twin adapter
pub struct TwinAdapter {
    topic: String,
    bus: Arc<dyn EventBus>,
    registry: Arc<dyn SchemaRegistry>,
    checkpoint: AdapterCheckpoint,
    retry: RetryPolicy,
    stats: AdapterStats,
}

impl TwinAdapter {
    pub fn new(
        topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
        registry: Arc<dyn SchemaRegistry>,
        checkpoint: AdapterCheckpoint,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            topic: topic.into(),
            bus,
            registry,
            checkpoint,
            retry,
            stats: AdapterStats::default(),
        }
    }

    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    /// Normalize one twin notification and publish the resulting envelopes
    ///
    /// Returns `Err` only on checkpoint storage failure; refused and
    /// unpublishable notifications resolve to
    /// [`PublishOutcome::DeadLettered`].
    pub async fn handle_notification(
        &self,
        raw: serde_json::Value,
    ) -> SyncResult<PublishOutcome> {
        let change = match parse_notification(&raw) {
            Ok(change) => change,
            Err(reject) => {
                let reason = reject.to_string();
                tracing::warn!(reason = %reason, "Twin notification refused at boundary");
                self.dead_letter(raw, None, &reason, 0)?;
                return Ok(PublishOutcome::DeadLettered { reason });
            }
        };

        let vehicle_id = change.vehicle_id().to_string();
        let mut sequences = Vec::with_capacity(2);

        // First sighting: announce the twin before its first change event,
        // the way the translator seeds a create message for unknown ids.
        if self.checkpoint.mark_known(&vehicle_id)? {
            let payload = EventPayload::VehicleRegistered {
                vehicle_type: change.vehicle_type(),
            };
            match self.publish_payload(&vehicle_id, payload).await? {
                Some(sequence) => sequences.push(sequence),
                None => {
                    return Ok(PublishOutcome::DeadLettered {
                        reason: "registration publish failed".to_string(),
                    });
                }
            }
        }

        let payload = match change {
            TwinChange::Telemetry {
                location,
                battery_level,
                ..
            } => EventPayload::TelemetryUpdated {
                location,
                battery_level,
            },
            TwinChange::Fault {
                fault_code, detail, ..
            } => EventPayload::FaultReported { fault_code, detail },
            TwinChange::ServiceComplete { .. } => EventPayload::ServiceCompleted {},
            TwinChange::Deregistration { reason, .. } => {
                EventPayload::VehicleDeregistered { reason }
            }
        };

        match self.publish_payload(&vehicle_id, payload).await? {
            Some(sequence) => {
                sequences.push(sequence);
                Ok(PublishOutcome::Published { sequences })
            }
            None => Ok(PublishOutcome::DeadLettered {
                reason: "publish retries exhausted".to_string(),
            }),
        }
    }

    /// Build, validate and publish one envelope; `None` means dead-lettered
    async fn publish_payload(
        &self,
        vehicle_id: &str,
        payload: EventPayload,
    ) -> SyncResult<Option<u64>> {
        let subject = payload.event_type().schema_subject();
        let schema = match self.registry.latest(subject).await {
            Ok(schema) => schema,
            Err(err) => {
                tracing::error!(subject, error = %err, "Schema resolution failed, dead-lettering");
                self.dead_letter(
                    serde_json::to_value(&payload).unwrap_or_default(),
                    Some(vehicle_id),
                    &err.to_string(),
                    0,
                )?;
                return Ok(None);
            }
        };

        let value =
            serde_json::to_value(&payload).map_err(|e| SyncError::schema(e.to_string()))?;
        if let Err(err) = validate_value(&schema, &value) {
            // Malformed payload: dead-letter without retrying, but the
            // sequence counter is untouched (nothing was assigned yet).
            tracing::error!(vehicle_id, subject, error = %err, "Outgoing payload failed validation");
            self.dead_letter(value, Some(vehicle_id), &err.to_string(), 0)?;
            return Ok(None);
        }

        let sequence = self.checkpoint.next_sequence(vehicle_id)?;
        let envelope = EventEnvelope::new(
            self.topic.clone(),
            vehicle_id,
            sequence,
            schema.version,
            None,
            payload,
        );

        match self.publish_with_retry(&envelope).await {
            Ok(partition) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    vehicle_id,
                    sequence,
                    partition,
                    event_type = %envelope.event_type,
                    "Envelope published"
                );
                Ok(Some(sequence))
            }
            Err(err) => {
                // The adapter never blocks indefinitely on one failed
                // publish: dead-letter, raise the alert condition, move on.
                self.stats.alerts.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: "alert",
                    vehicle_id,
                    sequence,
                    retries = self.retry.max_retries,
                    error = %err,
                    "Publish retries exhausted, envelope dead-lettered"
                );
                self.dead_letter(
                    serde_json::to_value(&envelope).unwrap_or_default(),
                    Some(vehicle_id),
                    &err.to_string(),
                    self.retry.max_retries + 1,
                )?;
                Ok(None)
            }
        }
    }

    async fn publish_with_retry(&self, envelope: &EventEnvelope) -> SyncResult<u32> {
        let mut attempt = 0u32;
        loop {
            match self.bus.publish(envelope.clone()).await {
                Ok(partition) => return Ok(partition),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        partition_key = %envelope.partition_key,
                        sequence = envelope.sequence,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient publish failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn dead_letter(
        &self,
        raw: serde_json::Value,
        vehicle_id: Option<&str>,
        reason: &str,
        retry_count: u32,
    ) -> SyncResult<()> {
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        let entry = DeadLetterEntry {
            entry_id: shared::util::new_id(),
            vehicle_id: vehicle_id.map(str::to_string),
            raw,
            reason: reason.to_string(),
            retry_count,
            failed_at: shared::util::now_millis(),
        };
        self.checkpoint.push_dead_letter(&entry)?;
        Ok(())
    }

    /// Consume the twin notification feed until it closes or shutdown
    pub async fn run(
        self: Arc<Self>,
        mut feed: mpsc::Receiver<serde_json::Value>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(topic = %self.topic, "Twin adapter started");
        loop {
            tokio::select! {
                notification = feed.recv() => {
                    match notification {
                        Some(raw) => {
                            if let Err(err) = self.handle_notification(raw).await {
                                // Checkpoint storage failure is the only
                                // non-local error here; surface it loudly.
                                tracing::error!(error = %err, "Adapter checkpoint failure");
                            }
                        }
                        None => {
                            tracing::info!("Twin feed closed, stopping adapter");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping adapter");
                    break;
                }
            }
        }
    }
}
