//! Thread-safe per-sensor publish metrics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use sensor_domain::MetricsSink;
use serde::Serialize;

/// Latency samples kept for the rolling average
pub const LATENCY_WINDOW: usize = 100;

/// Counters for a single sensor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorMetrics {
    pub sensor_id: String,
    pub messages_sent: u64,
    pub errors: u64,
    pub last_update: Option<DateTime<Utc>>,
    /// Mean over the last [`LATENCY_WINDOW`] samples
    pub avg_latency_ms: f64,
    #[serde(skip)]
    latency_samples: VecDeque<f64>,
}

impl SensorMetrics {
    fn new(sensor_id: &str) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            latency_samples: VecDeque::with_capacity(LATENCY_WINDOW),
            ..Self::default()
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_message(&mut self, latency_ms: Option<f64>) {
        self.messages_sent += 1;
        self.last_update = Some(Utc::now());

        if let Some(latency) = latency_ms.filter(|l| l.is_finite()) {
            if self.latency_samples.len() == LATENCY_WINDOW {
                self.latency_samples.pop_front();
            }
            self.latency_samples.push_back(latency);
            self.avg_latency_ms =
                self.latency_samples.iter().sum::<f64>() / self.latency_samples.len() as f64;
        }
    }

    fn record_error(&mut self) {
        self.errors += 1;
        self.last_update = Some(Utc::now());
    }
}

/// Point-in-time view of every counter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: f64,
    pub total_messages: u64,
    pub total_errors: u64,
    /// Errors per message; zero messages count as one
    pub error_rate: f64,
    pub total_entities: usize,
    pub active_entities: usize,
    pub sensors: BTreeMap<String, SensorMetrics>,
}

#[derive(Debug)]
struct MetricsState {
    sensors: HashMap<String, SensorMetrics>,
    started: Instant,
    total_entities: usize,
    active_entities: usize,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            sensors: HashMap::new(),
            started: Instant::now(),
            total_entities: 0,
            active_entities: 0,
        }
    }

    fn sensor(&mut self, sensor_id: &str) -> &mut SensorMetrics {
        self.sensors
            .entry(sensor_id.to_string())
            .or_insert_with(|| SensorMetrics::new(sensor_id))
    }
}

/// Mutex-protected metrics shared by the engine and publish paths
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        // Counters stay meaningful even if a recording thread panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_message(&self, sensor_id: &str, latency_ms: Option<f64>) {
        self.lock().sensor(sensor_id).record_message(latency_ms);
    }

    pub fn record_error(&self, sensor_id: &str) {
        self.lock().sensor(sensor_id).record_error();
    }

    pub fn update_entity_counts(&self, total: usize, active: usize) {
        let mut state = self.lock();
        state.total_entities = total;
        state.active_entities = active;
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> MetricsSummary {
        let state = self.lock();
        let total_messages: u64 = state.sensors.values().map(|s| s.messages_sent).sum();
        let total_errors: u64 = state.sensors.values().map(|s| s.errors).sum();

        MetricsSummary {
            uptime_seconds: state.started.elapsed().as_secs_f64(),
            total_messages,
            total_errors,
            error_rate: total_errors as f64 / total_messages.max(1) as f64,
            total_entities: state.total_entities,
            active_entities: state.active_entities,
            sensors: state
                .sensors
                .iter()
                .map(|(id, metrics)| (id.clone(), metrics.clone()))
                .collect(),
        }
    }

    pub fn sensor_metrics(&self, sensor_id: &str) -> Option<SensorMetrics> {
        self.lock().sensors.get(sensor_id).cloned()
    }

    /// Clear every counter and restart the uptime clock
    pub fn reset(&self) {
        *self.lock() = MetricsState::new();
    }
}

impl MetricsSink for MetricsCollector {
    fn record_success(&self, sensor_id: &str, latency_ms: f64) {
        self.record_message(sensor_id, Some(latency_ms));
    }

    fn record_error(&self, sensor_id: &str) {
        Self::record_error(self, sensor_id);
    }

    fn update_entity_counts(&self, total: usize, active: usize) {
        Self::update_entity_counts(self, total, active);
    }
}
