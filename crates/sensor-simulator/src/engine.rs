//! Time-stepped simulation engine.
//!
//! The engine exclusively owns the entity and sensor collections. Each tick
//! advances every entity in insertion order, lets every active sensor scan
//! the updated set, resolves the readings back to entity snapshots and hands
//! them to the publisher. All randomness flows from one seedable generator
//! and all timestamps from a simulation clock, so identical inputs produce
//! identical ticks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sensor_domain::{DetectionEvent, EntitySnapshot, MetricsSink, Publisher, SensorStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::entity::Entity;
use crate::error::{Result, SimulationError};
use crate::sensors::{HEALTH_OPERATIONAL, Sensor};

/// Prefix of the health string set on a sensor whose last scan faulted.
pub const HEALTH_FAULT_PREFIX: &str = "fault: ";

/// Loop pacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Multiplier from wall-clock to simulated time
    pub simulation_speed: f64,
    /// Target loop frequency
    pub update_rate_hz: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            simulation_speed: 1.0,
            update_rate_hz: 10.0,
        }
    }
}

impl EngineSettings {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("simulation_speed", self.simulation_speed),
            ("update_rate_hz", self.update_rate_hz),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimulationError::InvalidSetting {
                    field: field.to_string(),
                    reason: format!("must be > 0, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Outcome of a single tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub sim_time: DateTime<Utc>,
    /// Resolved detections handed to the publisher
    pub events: Vec<DetectionEvent>,
    /// Readings dropped because they named no live entity (false alarms included)
    pub unresolved: usize,
    pub faulted_sensors: Vec<String>,
}

/// Per-entity detection history kept alongside the entity table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionStats {
    pub detections: u64,
    pub last_detection: DateTime<Utc>,
    pub last_sensor: String,
}

/// Operator-facing engine status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub sensor_count: usize,
    pub entity_count: usize,
    pub simulation_speed: f64,
    pub update_rate_hz: f64,
    pub runtime_seconds: f64,
    pub sensors: Vec<SensorStatus>,
}

/// Thread-safe handle for interrupting a running loop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the loop to stop at its next iteration.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Publisher shared between the engine and blocking publish tasks.
type SharedPublisher = Arc<Mutex<Box<dyn Publisher>>>;

/// The simulation engine.
pub struct SimulationEngine {
    entities: Vec<Entity>,
    sensors: Vec<Sensor>,
    publisher: Option<SharedPublisher>,
    metrics: Option<Arc<dyn MetricsSink>>,
    settings: EngineSettings,
    rng: StdRng,
    clock: DateTime<Utc>,
    tick: u64,
    is_running: bool,
    started_at: Option<Instant>,
    stop: StopHandle,
    detection_stats: HashMap<String, DetectionStats>,
}

impl SimulationEngine {
    /// Create an empty engine seeded from OS entropy.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            entities: Vec::new(),
            sensors: Vec::new(),
            publisher: None,
            metrics: None,
            settings,
            rng: StdRng::from_entropy(),
            clock: Utc::now(),
            tick: 0,
            is_running: false,
            started_at: None,
            stop: StopHandle::default(),
            detection_stats: HashMap::new(),
        })
    }

    /// Replace the random source with a seeded one.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Start the simulation clock at a fixed instant.
    #[must_use]
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.clock = start;
        self
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Some(Arc::new(Mutex::new(publisher)));
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Current simulation time.
    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // =========================================================================
    // COLLECTION MANAGEMENT
    // =========================================================================

    pub fn add_entity(&mut self, entity: Entity) -> Result<()> {
        if self.entity(entity.id()).is_some() {
            return Err(SimulationError::DuplicateEntity(entity.id().to_string()));
        }
        info!(entity_id = %entity.id(), entity_type = entity.entity_type().as_str(), "Added entity");
        self.entities.push(entity);
        Ok(())
    }

    /// Remove an entity and its derived detection history.
    pub fn remove_entity(&mut self, entity_id: &str) -> Option<Entity> {
        let index = self.entities.iter().position(|e| e.id() == entity_id)?;
        let entity = self.entities.remove(index);
        self.detection_stats.remove(entity_id);
        info!(entity_id = %entity_id, "Removed entity");
        Some(entity)
    }

    pub fn add_sensor(&mut self, sensor: Sensor) -> Result<()> {
        if self.sensor(sensor.id()).is_some() {
            return Err(SimulationError::DuplicateSensor(sensor.id().to_string()));
        }
        info!(sensor_id = %sensor.id(), sensor_type = sensor.sensor_type().as_str(), "Added sensor");
        self.sensors.push(sensor);
        Ok(())
    }

    pub fn remove_sensor(&mut self, sensor_id: &str) -> Option<Sensor> {
        let index = self.sensors.iter().position(|s| s.id() == sensor_id)?;
        info!(sensor_id = %sensor_id, "Removed sensor");
        Some(self.sensors.remove(index))
    }

    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id() == entity_id)
    }

    pub fn entity_mut(&mut self, entity_id: &str) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id() == entity_id)
    }

    pub fn sensor(&self, sensor_id: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id() == sensor_id)
    }

    pub fn sensor_mut(&mut self, sensor_id: &str) -> Option<&mut Sensor> {
        self.sensors.iter_mut().find(|s| s.id() == sensor_id)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn detection_stats(&self, entity_id: &str) -> Option<&DetectionStats> {
        self.detection_stats.get(entity_id)
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance the simulation by `delta_time` simulated seconds.
    pub fn step(&mut self, delta_time: f64) -> Result<TickReport> {
        let report = self.advance(delta_time)?;
        if let Some(publisher) = &self.publisher {
            publish_events(&mut **lock_publisher(publisher), self.metrics.as_deref(), &report.events);
        }
        self.report_entity_counts();
        Ok(report)
    }

    /// [`Self::step`] with publishing moved onto the blocking pool.
    async fn step_async(&mut self, delta_time: f64) -> Result<TickReport> {
        let mut report = self.advance(delta_time)?;
        if let Some(publisher) = self.publisher.clone().filter(|_| !report.events.is_empty()) {
            let metrics = self.metrics.clone();
            let events = std::mem::take(&mut report.events);
            report.events = tokio::task::spawn_blocking(move || {
                publish_events(&mut **lock_publisher(&publisher), metrics.as_deref(), &events);
                events
            })
            .await
            .map_err(|err| SimulationError::PublishTask(err.to_string()))?;
        }
        self.report_entity_counts();
        Ok(report)
    }

    /// Move entities, scan sensors and resolve readings for one tick.
    fn advance(&mut self, delta_time: f64) -> Result<TickReport> {
        if !delta_time.is_finite() || delta_time < 0.0 {
            return Err(SimulationError::NegativeDeltaTime(delta_time));
        }
        #[allow(clippy::cast_possible_truncation)]
        let advance = chrono::Duration::microseconds((delta_time * 1_000_000.0).round() as i64);
        let now = self
            .clock
            .checked_add_signed(advance)
            .ok_or(SimulationError::ClockOverflow(delta_time))?;

        self.clock = now;
        self.tick += 1;

        self.advance_entities(delta_time, now)?;
        let (readings, faulted_sensors) = self.scan_sensors(now);

        let mut events = Vec::with_capacity(readings.len());
        let mut unresolved = 0;
        for (reading, sensor_id) in readings {
            let snapshot = if reading.is_false_alarm() {
                None
            } else {
                self.entity(&reading.entity_id).map(Entity::snapshot)
            };
            let Some(snapshot) = snapshot else {
                unresolved += 1;
                continue;
            };

            let stats = self
                .detection_stats
                .entry(reading.entity_id.clone())
                .or_insert_with(|| DetectionStats {
                    detections: 0,
                    last_detection: now,
                    last_sensor: String::new(),
                });
            stats.detections += 1;
            stats.last_detection = now;
            stats.last_sensor.clone_from(&sensor_id);

            events.push(DetectionEvent {
                entity: snapshot,
                reading,
                sensor_id,
            });
        }

        trace!(
            tick = self.tick,
            delta_time,
            events = events.len(),
            unresolved,
            faulted = faulted_sensors.len(),
            "Tick complete"
        );

        Ok(TickReport {
            tick: self.tick,
            sim_time: now,
            events,
            unresolved,
            faulted_sensors,
        })
    }

    fn report_entity_counts(&self) {
        if let Some(metrics) = &self.metrics {
            let active = self.entities.iter().filter(|e| e.motion().speed_ms > 0.0).count();
            metrics.update_entity_counts(self.entities.len(), active);
        }
    }

    fn advance_entities(&mut self, delta_time: f64, now: DateTime<Utc>) -> Result<()> {
        for index in 0..self.entities.len() {
            let entity = &self.entities[index];
            // Leaders earlier in insertion order are already advanced this tick
            let leader = entity
                .leader_id()
                .filter(|leader_id| *leader_id != entity.id())
                .and_then(|leader_id| self.entities.iter().find(|e| e.id() == leader_id))
                .map(Entity::kinematics);

            self.entities[index].step(delta_time, now, leader, &mut self.rng)?;
        }
        Ok(())
    }

    fn scan_sensors(
        &mut self,
        now: DateTime<Utc>,
    ) -> (Vec<(sensor_domain::SensorReading, String)>, Vec<String>) {
        let mut readings = Vec::new();
        let mut faulted = Vec::new();

        for sensor in &mut self.sensors {
            if !sensor.is_active() {
                continue;
            }
            match sensor.detect_entities(&self.entities, now, &mut self.rng) {
                Ok(batch) => {
                    if sensor.health_status().starts_with(HEALTH_FAULT_PREFIX) {
                        info!(sensor_id = %sensor.id(), "Sensor recovered");
                        sensor.set_health_status(HEALTH_OPERATIONAL);
                    }
                    let sensor_id = sensor.id().to_string();
                    readings.extend(batch.into_iter().map(|r| (r, sensor_id.clone())));
                }
                Err(err) => {
                    error!(sensor_id = %sensor.id(), error = %err, "Sensor fault");
                    sensor.set_health_status(format!("{HEALTH_FAULT_PREFIX}{err}"));
                    if let Some(metrics) = &self.metrics {
                        metrics.record_error(sensor.id());
                    }
                    faulted.push(sensor.id().to_string());
                }
            }
        }

        (readings, faulted)
    }

    // =========================================================================
    // RUN LOOPS
    // =========================================================================

    fn start(&mut self) -> Result<()> {
        if self.is_running {
            return Err(SimulationError::AlreadyRunning);
        }
        self.is_running = true;
        self.started_at = Some(Instant::now());
        info!(
            sensors = self.sensors.len(),
            entities = self.entities.len(),
            simulation_speed = self.settings.simulation_speed,
            update_rate_hz = self.settings.update_rate_hz,
            "Starting simulation"
        );
        Ok(())
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.settings.update_rate_hz)
    }

    /// Blocking loop; returns after `duration_seconds` of wall time, on
    /// [`StopHandle::stop`], or on the first step error.
    pub fn run(&mut self, duration_seconds: Option<f64>) -> Result<()> {
        self.start()?;
        let guard = RunGuard { engine: self };
        let engine = &mut *guard.engine;

        let interval = engine.tick_interval();
        let started = Instant::now();
        let mut last_tick = started;

        while !engine.stop.is_stop_requested() {
            let tick_start = Instant::now();
            let delta = tick_start.duration_since(last_tick).as_secs_f64() * engine.settings.simulation_speed;
            last_tick = tick_start;

            engine.step(delta)?;

            if duration_limit_reached(started, tick_start, duration_seconds) {
                break;
            }

            if let Some(remaining) = interval.checked_sub(tick_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        Ok(())
    }

    /// Cooperative loop; suspends at each pacing point and returns as soon
    /// as `shutdown` resolves. Publishing runs on the blocking pool so a
    /// retrying publisher never stalls the runtime. Dropping the future also
    /// stops the engine and flushes the publisher.
    pub async fn run_async<F>(&mut self, duration_seconds: Option<f64>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        let guard = RunGuard { engine: self };
        let engine = &mut *guard.engine;
        tokio::pin!(shutdown);

        let interval = engine.tick_interval();
        let started = Instant::now();
        let mut last_tick = started;

        while !engine.stop.is_stop_requested() {
            let tick_start = Instant::now();
            let delta = tick_start.duration_since(last_tick).as_secs_f64() * engine.settings.simulation_speed;
            last_tick = tick_start;

            engine.step_async(delta).await?;

            if duration_limit_reached(started, tick_start, duration_seconds) {
                break;
            }

            let remaining = interval.saturating_sub(tick_start.elapsed());
            tokio::select! {
                () = tokio::time::sleep(remaining) => {}
                () = &mut shutdown => {
                    info!("Simulation cancelled");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop the simulation and flush buffered publishes. Idempotent.
    pub fn stop(&mut self) {
        if !self.is_running {
            return;
        }
        self.is_running = false;

        if let Some(publisher) = &self.publisher {
            // Waits out any publish still running on the blocking pool
            let results = lock_publisher(publisher).flush_batch();
            let failed = results.values().filter(|ok| !**ok).count();
            if failed > 0 {
                warn!(failed, total = results.len(), "Final batch flush had failures");
            }
        }

        let runtime = self.started_at.take().map_or(0.0, |t| t.elapsed().as_secs_f64());
        self.stop.clear();
        info!(runtime_seconds = runtime, ticks = self.tick, "Simulation stopped");
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            is_running: self.is_running,
            sensor_count: self.sensors.len(),
            entity_count: self.entities.len(),
            simulation_speed: self.settings.simulation_speed,
            update_rate_hz: self.settings.update_rate_hz,
            runtime_seconds: self
                .started_at
                .filter(|_| self.is_running)
                .map_or(0.0, |t| t.elapsed().as_secs_f64()),
            sensors: self.sensors.iter().map(Sensor::status).collect(),
        }
    }

    pub fn entity_summary(&self) -> Vec<EntitySnapshot> {
        self.entities.iter().map(Entity::snapshot).collect()
    }
}

impl std::fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("entities", &self.entities.len())
            .field("sensors", &self.sensors.len())
            .field("settings", &self.settings)
            .field("tick", &self.tick)
            .field("is_running", &self.is_running)
            .finish_non_exhaustive()
    }
}

/// Calls [`SimulationEngine::stop`] when a run loop exits by any path.
struct RunGuard<'a> {
    engine: &'a mut SimulationEngine,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine.stop();
    }
}

fn duration_limit_reached(started: Instant, now: Instant, limit: Option<f64>) -> bool {
    match limit {
        Some(limit) if now.duration_since(started).as_secs_f64() >= limit => {
            info!(duration_seconds = limit, "Simulation duration limit reached");
            true
        }
        _ => false,
    }
}

fn lock_publisher(publisher: &SharedPublisher) -> MutexGuard<'_, Box<dyn Publisher>> {
    publisher.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Batch when a tick produced more than one event, single publishes otherwise.
fn publish_events(
    publisher: &mut dyn Publisher,
    metrics: Option<&dyn MetricsSink>,
    events: &[DetectionEvent],
) {
    if events.len() > 1 {
        let started = Instant::now();
        let results = publisher.publish_batch(events);
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        for event in events {
            let ok = results.get(&event.entity.entity_id).copied().unwrap_or(false);
            record_publish(metrics, event, ok, latency_ms);
        }
        debug!(count = events.len(), "Published detection batch");
    } else {
        for event in events {
            let started = Instant::now();
            let ok = publisher.publish(&event.entity, &event.reading, &event.sensor_id);
            let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
            record_publish(metrics, event, ok, latency_ms);
        }
    }
}

fn record_publish(
    metrics: Option<&dyn MetricsSink>,
    event: &DetectionEvent,
    ok: bool,
    latency_ms: f64,
) {
    if !ok {
        warn!(
            entity_id = %event.entity.entity_id,
            sensor_id = %event.sensor_id,
            "Publish failed"
        );
    }
    let Some(metrics) = metrics else {
        return;
    };
    if ok {
        metrics.record_success(&event.sensor_id, latency_ms);
    } else {
        metrics.record_error(&event.sensor_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_m;
    use crate::movement::{
        EvasivePattern, FormationPattern, Kinematics, MovementPattern, PatrolPattern, PatrolShape,
        RandomWalkPattern,
    };
    use crate::sensors::{AcousticModel, AdsbModel, RadarModel, SensorModel};
    use sensor_domain::{EntityType, GeoPosition, Motion, PublishResults, SensorReading};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct PublishLog {
        singles: usize,
        batches: Vec<usize>,
        flushes: usize,
        threads: Vec<std::thread::ThreadId>,
    }

    struct RecordingPublisher {
        log: Arc<Mutex<PublishLog>>,
        succeed: bool,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&mut self, _: &EntitySnapshot, _: &SensorReading, _: &str) -> bool {
            let mut log = self.log.lock().unwrap();
            log.singles += 1;
            log.threads.push(std::thread::current().id());
            self.succeed
        }

        fn publish_batch(&mut self, events: &[DetectionEvent]) -> PublishResults {
            let mut log = self.log.lock().unwrap();
            log.batches.push(events.len());
            log.threads.push(std::thread::current().id());
            events
                .iter()
                .map(|e| (e.entity.entity_id.clone(), self.succeed))
                .collect()
        }

        fn flush_batch(&mut self) -> PublishResults {
            self.log.lock().unwrap().flushes += 1;
            PublishResults::new()
        }
    }

    struct PanickingPublisher;

    impl Publisher for PanickingPublisher {
        fn publish(&mut self, _: &EntitySnapshot, _: &SensorReading, _: &str) -> bool {
            panic!("transport exploded")
        }

        fn publish_batch(&mut self, _: &[DetectionEvent]) -> PublishResults {
            panic!("transport exploded")
        }

        fn flush_batch(&mut self) -> PublishResults {
            PublishResults::new()
        }
    }

    /// Stationary targets beside the radar with sim time outpacing the 1 Hz scan rate.
    fn fast_radar_engine(seed: u64) -> SimulationEngine {
        let mut engine = SimulationEngine::new(EngineSettings {
            simulation_speed: 100.0,
            update_rate_hz: 50.0,
        })
        .unwrap()
        .with_seed(seed);
        engine.add_entity(stationary("a", 34.0)).unwrap();
        engine.add_entity(stationary("b", 34.001)).unwrap();
        engine.add_sensor(radar("RADAR-1", 0.0)).unwrap();
        engine
    }

    #[derive(Default)]
    struct CountingMetrics {
        successes: AtomicUsize,
        errors: AtomicUsize,
        counts: Mutex<(usize, usize)>,
    }

    impl MetricsSink for CountingMetrics {
        fn record_success(&self, _: &str, _: f64) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn record_error(&self, _: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn update_entity_counts(&self, total: usize, active: usize) {
            *self.counts.lock().unwrap() = (total, active);
        }
    }

    fn engine(seed: u64) -> SimulationEngine {
        SimulationEngine::new(EngineSettings::default()).unwrap().with_seed(seed)
    }

    fn recording(engine: SimulationEngine, succeed: bool) -> (SimulationEngine, Arc<Mutex<PublishLog>>) {
        let log = Arc::new(Mutex::new(PublishLog::default()));
        let publisher = RecordingPublisher {
            log: Arc::clone(&log),
            succeed,
        };
        (engine.with_publisher(Box::new(publisher)), log)
    }

    fn radar(id: &str, false_alarm_rate: f64) -> Sensor {
        Sensor::with_defaults(
            id,
            GeoPosition::new(34.0, -118.0, 0.0),
            SensorModel::Radar(RadarModel {
                false_alarm_rate,
                ..RadarModel::default()
            }),
        )
        .unwrap()
    }

    fn stationary(id: &str, lat: f64) -> Entity {
        Entity::new(id, EntityType::StationaryObject, GeoPosition::new(lat, -118.0, 0.0)).unwrap()
    }

    fn populated(seed: u64) -> SimulationEngine {
        let mut engine = engine(seed);
        let walker = Entity::new("walker", EntityType::GroundVehicle, GeoPosition::new(34.0, -118.0, 0.0))
            .unwrap()
            .with_pattern(MovementPattern::RandomWalk(
                RandomWalkPattern::new(34.0, -118.0, 15.0, 45.0, Some(2_000.0), 0.0).unwrap(),
            ));
        let jinker = Entity::new("jinker", EntityType::Aircraft, GeoPosition::new(34.05, -118.0, 3_000.0))
            .unwrap()
            .with_motion(Motion {
                heading_deg: 90.0,
                speed_ms: 120.0,
            })
            .with_pattern(MovementPattern::Evasive(
                EvasivePattern::new(120.0, 0.3, 100.0, 60.0).unwrap(),
            ));
        engine.add_entity(walker).unwrap();
        engine.add_entity(jinker).unwrap();
        engine.add_sensor(radar("RADAR-1", 0.05)).unwrap();
        engine
            .add_sensor(
                Sensor::with_defaults(
                    "ADSB-1",
                    GeoPosition::new(34.0, -118.0, 0.0),
                    SensorModel::Adsb(AdsbModel::default()),
                )
                .unwrap(),
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let err = SimulationEngine::new(EngineSettings {
            simulation_speed: 0.0,
            update_rate_hz: 10.0,
        })
        .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidSetting { .. }));
    }

    #[test]
    fn test_negative_delta_fails_loudly() {
        let mut engine = populated(1);
        let before: Vec<Kinematics> = engine.entities().iter().map(Entity::kinematics).collect();
        let clock = engine.clock();

        assert!(matches!(engine.step(-0.5), Err(SimulationError::NegativeDeltaTime(_))));
        assert!(engine.step(f64::INFINITY).is_err());

        let after: Vec<Kinematics> = engine.entities().iter().map(Entity::kinematics).collect();
        assert_eq!(before, after);
        assert_eq!(engine.clock(), clock);
    }

    #[test]
    fn test_end_to_end_radar_detects_stationary_object() {
        let mut detected = 0;
        for seed in 0..20 {
            let mut engine = engine(seed);
            engine.add_entity(stationary("TARGET-1", 34.0)).unwrap();
            engine.add_sensor(radar("RADAR-1", 0.01)).unwrap();

            let report = engine.step(1.0).unwrap();
            let hits: Vec<_> = report
                .events
                .iter()
                .filter(|e| e.entity.entity_id == "TARGET-1")
                .collect();
            assert!(hits.len() <= 1);

            if let Some(event) = hits.first() {
                detected += 1;
                let r = &event.reading;
                assert!(!r.is_false_alarm());
                assert_eq!(event.sensor_id, "RADAR-1");
                assert!((0.0..=1.0).contains(&r.confidence));
                assert!(distance_m(34.0, -118.0, r.position.lat, r.position.lon) < 400.0);
                assert_eq!(engine.detection_stats("TARGET-1").unwrap().detections, 1);
            }
        }
        // p >= 0.9 per seed
        assert!(detected >= 12, "detected in {detected}/20 seeds");
    }

    #[test]
    fn test_seeded_steps_are_deterministic() {
        let start = Utc::now();
        let mut a = populated(99).with_start_time(start);
        let mut b = populated(99).with_start_time(start);

        for _ in 0..30 {
            let ra = a.step(0.5).unwrap();
            let rb = b.step(0.5).unwrap();
            assert_eq!(ra.events.len(), rb.events.len());
        }

        let ka: Vec<Kinematics> = a.entities().iter().map(Entity::kinematics).collect();
        let kb: Vec<Kinematics> = b.entities().iter().map(Entity::kinematics).collect();
        assert_eq!(ka, kb);
    }

    #[test]
    fn test_formation_follows_leader_in_same_tick() {
        let mut engine = engine(4);
        let leader = Entity::new("lead", EntityType::Aircraft, GeoPosition::new(34.0, -118.0, 1_000.0))
            .unwrap()
            .with_pattern(MovementPattern::Patrol(
                PatrolPattern::new(34.0, -118.0, PatrolShape::Circular, 5_000.0, 100.0, 1_000.0)
                    .unwrap(),
            ));
        let wing = Entity::new("wing", EntityType::Aircraft, GeoPosition::new(0.0, 0.0, 0.0))
            .unwrap()
            .with_pattern(MovementPattern::Formation(FormationPattern::new("lead", -200.0, 0.0, 50.0)));
        engine.add_entity(leader).unwrap();
        engine.add_entity(wing).unwrap();

        engine.step(1.0).unwrap();
        let lead = engine.entity("lead").unwrap().kinematics();
        let wing = engine.entity("wing").unwrap().kinematics();
        assert!((distance_m(lead.lat, lead.lon, wing.lat, wing.lon) - 200.0).abs() < 2.0);
        assert_eq!(wing.altitude_m, 1_050.0);
        assert_eq!(wing.heading_deg, lead.heading_deg);

        // Leader gone: the follower holds
        engine.remove_entity("lead");
        engine.step(1.0).unwrap();
        let held = engine.entity("wing").unwrap().kinematics();
        assert_eq!((held.lat, held.lon), (wing.lat, wing.lon));
        assert_eq!(held.speed_ms, 0.0);
    }

    #[test]
    fn test_sensor_fault_is_isolated() {
        let metrics = Arc::new(CountingMetrics::default());
        let mut engine = engine(5).with_metrics(metrics.clone());
        engine.add_entity(stationary("ok", 34.0)).unwrap();
        engine.add_entity(stationary("broken", 34.001)).unwrap();
        engine.add_sensor(radar("RADAR-1", 0.0)).unwrap();

        engine
            .entity_mut("broken")
            .unwrap()
            .update_position(f64::NAN, f64::NAN, None, Utc::now());

        let report = engine.step(1.0).unwrap();
        assert_eq!(report.faulted_sensors, vec!["RADAR-1".to_string()]);
        assert!(report.events.is_empty());
        assert_eq!(metrics.errors.load(Ordering::SeqCst), 1);
        let sensor = engine.sensor("RADAR-1").unwrap();
        assert!(sensor.health_status().starts_with(HEALTH_FAULT_PREFIX));
        assert_eq!(sensor.last_update(), None);

        // Once the bad entity is gone the sensor recovers
        engine.remove_entity("broken");
        let report = engine.step(1.0).unwrap();
        assert!(report.faulted_sensors.is_empty());
        assert_eq!(engine.sensor("RADAR-1").unwrap().health_status(), HEALTH_OPERATIONAL);
    }

    #[test]
    fn test_batch_versus_single_publish_routing() {
        let metrics = Arc::new(CountingMetrics::default());
        let (engine, log) = recording(engine(6), true);
        let mut engine = engine.with_metrics(metrics.clone());
        engine.add_sensor(radar("RADAR-1", 0.0)).unwrap();
        engine.add_entity(stationary("a", 34.0)).unwrap();

        let mut total_events = 0;
        for _ in 0..10 {
            total_events += engine.step(1.0).unwrap().events.len();
        }
        {
            let log = log.lock().unwrap();
            assert_eq!(log.singles, total_events);
            assert!(log.batches.is_empty());
        }

        for i in 0..4 {
            engine.add_entity(stationary(&format!("b{i}"), 34.0 + 0.001 * f64::from(i))).unwrap();
        }
        let mut batched = 0;
        for _ in 0..10 {
            let events = engine.step(1.0).unwrap().events.len();
            if events > 1 {
                batched += 1;
            }
            total_events += events;
        }
        let log = log.lock().unwrap();
        assert_eq!(log.batches.len(), batched);
        assert!(batched > 0);
        assert_eq!(metrics.successes.load(Ordering::SeqCst), total_events);
        assert_eq!(*metrics.counts.lock().unwrap(), (5, 0));
    }

    #[test]
    fn test_failed_publishes_are_recorded() {
        let metrics = Arc::new(CountingMetrics::default());
        let (engine, _log) = recording(engine(7), false);
        let mut engine = engine.with_metrics(metrics.clone());
        engine.add_sensor(radar("RADAR-1", 0.0)).unwrap();
        engine.add_entity(stationary("a", 34.0)).unwrap();

        let mut events = 0;
        for _ in 0..5 {
            events += engine.step(1.0).unwrap().events.len();
        }
        assert_eq!(metrics.errors.load(Ordering::SeqCst), events);
        assert_eq!(metrics.successes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unresolved_readings_are_skipped() {
        let mut engine = engine(8);
        engine.add_sensor(radar("RADAR-1", 1.0)).unwrap();
        let report = engine.step(1.0).unwrap();
        assert!(report.events.is_empty());
        assert_eq!(report.unresolved, 1);
    }

    #[test]
    fn test_inactive_sensor_is_skipped() {
        let mut engine = engine(9);
        engine.add_entity(stationary("a", 34.0)).unwrap();
        engine.add_sensor(radar("RADAR-1", 1.0)).unwrap();
        engine.sensor_mut("RADAR-1").unwrap().set_active(false);

        for _ in 0..5 {
            let report = engine.step(1.0).unwrap();
            assert!(report.events.is_empty());
            assert_eq!(report.unresolved, 0);
        }
    }

    #[test]
    fn test_collection_management() {
        let mut engine = engine(10);
        engine.add_entity(stationary("a", 34.0)).unwrap();
        assert!(matches!(
            engine.add_entity(stationary("a", 35.0)),
            Err(SimulationError::DuplicateEntity(_))
        ));
        engine.add_sensor(radar("R", 0.0)).unwrap();
        assert!(matches!(engine.add_sensor(radar("R", 0.0)), Err(SimulationError::DuplicateSensor(_))));

        for _ in 0..10 {
            engine.step(1.0).unwrap();
        }
        assert!(engine.detection_stats("a").is_some());

        let removed = engine.remove_entity("a").unwrap();
        assert_eq!(removed.id(), "a");
        assert!(engine.detection_stats("a").is_none());
        assert!(engine.remove_entity("a").is_none());
        assert!(engine.remove_sensor("R").is_some());

        let status = engine.status();
        assert_eq!((status.entity_count, status.sensor_count), (0, 0));
        assert!(!status.is_running);
        assert_eq!(status.runtime_seconds, 0.0);
    }

    #[test]
    fn test_entity_summary_shape() {
        let engine = populated(11);
        let summary = engine.entity_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].entity_id, "walker");
        assert_eq!(summary[1].motion.speed_ms, 120.0);
    }

    #[test]
    fn test_run_honours_duration_and_flushes() {
        let (engine, log) = recording(
            SimulationEngine::new(EngineSettings {
                simulation_speed: 10.0,
                update_rate_hz: 100.0,
            })
            .unwrap()
            .with_seed(12),
            true,
        );
        let mut engine = engine;
        engine.add_entity(stationary("a", 34.0)).unwrap();

        engine.run(Some(0.05)).unwrap();
        assert!(!engine.is_running());
        assert_eq!(log.lock().unwrap().flushes, 1);

        // stop is idempotent
        engine.stop();
        assert_eq!(log.lock().unwrap().flushes, 1);
    }

    #[test]
    fn test_stop_handle_interrupts_blocking_run() {
        let mut engine = populated(13);
        let handle = engine.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            handle.stop();
        });

        engine.run(None).unwrap();
        stopper.join().unwrap();
        assert!(!engine.is_running());
        assert!(!engine.stop_handle().is_stop_requested());
    }

    #[tokio::test]
    async fn test_run_async_shutdown_future() {
        let (engine, log) = recording(populated(14), true);
        let mut engine = engine;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        let shutdown = async {
            let _ = rx.await;
        };
        tokio_test::assert_ok!(engine.run_async(None, shutdown).await);
        assert!(!engine.is_running());
        assert_eq!(log.lock().unwrap().flushes, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_async_still_flushes() {
        let (engine, log) = recording(populated(15), true);
        let mut engine = engine;

        let outcome = tokio::time::timeout(
            Duration::from_millis(40),
            engine.run_async(None, std::future::pending::<()>()),
        )
        .await;
        assert!(outcome.is_err());
        assert!(!engine.is_running());
        assert_eq!(log.lock().unwrap().flushes, 1);
    }

    #[tokio::test]
    async fn test_run_async_publishes_off_the_runtime_thread() {
        let (engine, log) = recording(fast_radar_engine(18), true);
        let mut engine = engine;
        let runtime_thread = std::thread::current().id();

        tokio_test::assert_ok!(engine.run_async(Some(0.2), std::future::pending::<()>()).await);

        let log = log.lock().unwrap();
        assert!(!log.threads.is_empty());
        assert!(log.threads.iter().all(|id| *id != runtime_thread));
        assert_eq!(log.flushes, 1);
    }

    #[test]
    fn test_step_publishes_on_the_calling_thread() {
        let (engine, log) = recording(fast_radar_engine(18), true);
        let mut engine = engine;
        for _ in 0..5 {
            engine.step(1.0).unwrap();
        }

        let log = log.lock().unwrap();
        assert!(!log.threads.is_empty());
        assert!(log.threads.iter().all(|id| *id == std::thread::current().id()));
    }

    #[tokio::test]
    async fn test_publisher_panic_ends_async_run_with_error() {
        let mut engine = fast_radar_engine(19).with_publisher(Box::new(PanickingPublisher));

        let outcome = engine.run_async(Some(0.2), std::future::pending::<()>()).await;
        assert!(matches!(outcome, Err(SimulationError::PublishTask(_))));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_run_async_rejects_double_start() {
        let mut engine = populated(16);
        engine.start().unwrap();
        let err = engine.run_async(Some(0.01), std::future::pending::<()>()).await;
        assert!(matches!(err, Err(SimulationError::AlreadyRunning)));
        engine.stop();
    }

    #[test]
    fn test_acoustic_sensor_contributes_events() {
        let mut engine = engine(17);
        let truck = Entity::new("truck", EntityType::GroundVehicle, GeoPosition::new(34.0, -118.0, 0.0))
            .unwrap()
            .with_motion(Motion {
                heading_deg: 0.0,
                speed_ms: 150.0,
            });
        engine.add_entity(truck).unwrap();
        engine
            .add_sensor(
                Sensor::with_defaults(
                    "MIC-1",
                    GeoPosition::new(34.0, -118.0, 0.0),
                    SensorModel::Acoustic(AcousticModel::default()),
                )
                .unwrap(),
            )
            .unwrap();

        let events: usize = (0..20).map(|_| engine.step(1.0).unwrap().events.len()).sum();
        assert!(events > 5);
        assert_eq!(engine.detection_stats("truck").unwrap().last_sensor, "MIC-1");
    }
}
