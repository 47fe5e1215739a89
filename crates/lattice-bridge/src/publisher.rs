//! # Lattice Publisher
//!
//! Retrying, batching front end over a [`Transport`]. Implements the domain
//! [`Publisher`] contract, so the simulation engine only ever sees per-entity
//! booleans.
//!
//! Retries use linear backoff: after failed attempt `n` (1-based) the
//! publisher sleeps `retry_delay * n`. Batch retries resend only the ids that
//! failed. Whatever is still failing once attempts run out is reported
//! `false`.

use std::thread;
use std::time::{Duration, Instant};

use sensor_domain::{DetectionEvent, EntitySnapshot, PublishResults, Publisher, SensorReading};
use tracing::{debug, error, warn};

use crate::config::PublisherConfig;
use crate::entity::LatticeEntity;
use crate::transport::Transport;

pub struct LatticePublisher<T: Transport> {
    transport: T,
    config: PublisherConfig,
    batch: Vec<LatticeEntity>,
    batch_started: Option<Instant>,
}

impl<T: Transport> LatticePublisher<T> {
    pub fn new(transport: T, config: PublisherConfig) -> Self {
        Self {
            transport,
            config,
            batch: Vec::with_capacity(config.batch_size),
            batch_started: None,
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Entries waiting in the batch buffer
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Publish one entity with retries
    pub fn publish_entity(
        &mut self,
        entity: &EntitySnapshot,
        reading: Option<&SensorReading>,
        sensor_id: Option<&str>,
    ) -> bool {
        let formatted = LatticeEntity::from_detection(entity, reading, sensor_id);
        self.publish_with_retry(&formatted)
    }

    /// Publish detections in one batch request with retries
    pub fn publish_events(&mut self, events: &[DetectionEvent]) -> PublishResults {
        if events.is_empty() {
            return PublishResults::new();
        }
        let formatted = events
            .iter()
            .map(|event| {
                LatticeEntity::from_detection(
                    &event.entity,
                    Some(&event.reading),
                    Some(event.sensor_id.as_str()),
                )
            })
            .collect();
        self.publish_batch_with_retry(formatted)
    }

    /// Buffer an entity, flushing once the batch is full or old enough.
    ///
    /// Returns the flush results when a flush happened.
    pub fn add_to_batch(
        &mut self,
        entity: &EntitySnapshot,
        reading: Option<&SensorReading>,
        sensor_id: Option<&str>,
    ) -> Option<PublishResults> {
        let started = *self.batch_started.get_or_insert_with(Instant::now);
        self.batch
            .push(LatticeEntity::from_detection(entity, reading, sensor_id));

        let full = self.batch.len() >= self.config.batch_size;
        let expired = started.elapsed() >= self.config.batch_timeout;
        if full || expired {
            debug!(pending = self.batch.len(), full, expired, "Flushing batch");
            Some(self.flush_batch())
        } else {
            None
        }
    }

    const fn attempts(&self) -> u32 {
        if self.config.max_retries == 0 {
            1
        } else {
            self.config.max_retries
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_delay * (attempt + 1)
    }

    fn publish_with_retry(&mut self, entity: &LatticeEntity) -> bool {
        let attempts = self.attempts();
        for attempt in 0..attempts {
            match self.transport.put_entity(entity) {
                Ok(()) => return true,
                Err(e) => warn!(
                    entity_id = %entity.id,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    "Publish failed"
                ),
            }
            if attempt + 1 < attempts {
                thread::sleep(self.backoff(attempt));
            }
        }
        error!(entity_id = %entity.id, attempts, "Failed to publish entity, giving up");
        false
    }

    fn publish_batch_with_retry(&mut self, mut pending: Vec<LatticeEntity>) -> PublishResults {
        let attempts = self.attempts();
        let mut results = PublishResults::with_capacity(pending.len());

        for attempt in 0..attempts {
            match self.transport.post_batch(&pending) {
                Ok(outcome) => {
                    pending.retain(|e| !outcome.get(&e.id).copied().unwrap_or(false));
                    results.extend(outcome);
                    if pending.is_empty() {
                        return results;
                    }
                    warn!(
                        failed = pending.len(),
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "Batch publish partially failed"
                    );
                }
                Err(e) => warn!(
                    count = pending.len(),
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    "Batch publish failed"
                ),
            }
            if attempt + 1 < attempts {
                thread::sleep(self.backoff(attempt));
            }
        }

        error!(failed = pending.len(), attempts, "Batch entities not published, giving up");
        results.extend(pending.into_iter().map(|e| (e.id, false)));
        results
    }
}

impl<T: Transport> Publisher for LatticePublisher<T> {
    fn publish(&mut self, entity: &EntitySnapshot, reading: &SensorReading, sensor_id: &str) -> bool {
        self.publish_entity(entity, Some(reading), Some(sensor_id))
    }

    fn publish_batch(&mut self, events: &[DetectionEvent]) -> PublishResults {
        self.publish_events(events)
    }

    fn flush_batch(&mut self) -> PublishResults {
        self.batch_started = None;
        if self.batch.is_empty() {
            return PublishResults::new();
        }
        let pending = std::mem::take(&mut self.batch);
        self.publish_batch_with_retry(pending)
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for LatticePublisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatticePublisher")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("pending", &self.batch.len())
            .finish()
    }
}
