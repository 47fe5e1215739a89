//! YAML scenario documents.
//!
//! A scenario lists the sensors and entities of a run plus optional loop
//! settings. [`ScenarioConfig::validate`] collects every problem in one pass;
//! [`ScenarioConfig::build_engine`] turns a valid document into a ready
//! [`SimulationEngine`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use sensor_domain::{EntityType, GeoPosition, Metadata, Motion};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{EngineSettings, SimulationEngine};
use crate::entity::Entity;
use crate::error::{ConfigError, Result};
use crate::movement::{
    EvasivePattern, FormationPattern, MovementPattern, PatrolPattern, PatrolShape,
    RandomWalkPattern, Waypoint, WaypointPattern,
};
use crate::sensors::{
    AcousticModel, AdsbModel, CameraModel, RadarModel, Sensor, SensorModel, SensorPlatform,
};

/// Built-in demonstration scenario.
pub const DEMO_SCENARIO: &str = include_str!("../scenarios/coastal_watch.yaml");

/// Position block used throughout scenario documents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionConfig {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

impl From<PositionConfig> for GeoPosition {
    fn from(p: PositionConfig) -> Self {
        GeoPosition::new(p.lat, p.lon, p.altitude_m)
    }
}

/// Loop settings; CLI flags may override any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub update_rate_hz: f64,
    pub simulation_speed: f64,
    pub duration_seconds: Option<f64>,
    pub seed: Option<u64>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Self {
            update_rate_hz: settings.update_rate_hz,
            simulation_speed: settings.simulation_speed,
            duration_seconds: None,
            seed: None,
        }
    }
}

/// Per-family physics, tagged by `sensor_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor_type", rename_all = "snake_case")]
pub enum SensorModelConfig {
    Radar(RadarModel),
    Adsb(AdsbModel),
    Camera(CameraModel),
    Acoustic(AcousticModel),
}

impl From<SensorModelConfig> for SensorModel {
    fn from(config: SensorModelConfig) -> Self {
        match config {
            SensorModelConfig::Radar(m) => Self::Radar(m),
            SensorModelConfig::Adsb(m) => Self::Adsb(m),
            SensorModelConfig::Camera(m) => Self::Camera(m),
            SensorModelConfig::Acoustic(m) => Self::Acoustic(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sensor_id: String,
    pub position: PositionConfig,
    /// Platform values fall back to the family defaults
    #[serde(default)]
    pub update_rate_hz: Option<f64>,
    #[serde(default)]
    pub max_range_m: Option<f64>,
    #[serde(default)]
    pub field_of_view_deg: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(flatten)]
    pub model: SensorModelConfig,
}

impl SensorConfig {
    fn build(&self) -> std::result::Result<Sensor, ConfigError> {
        let model = SensorModel::from(self.model.clone());
        let defaults = SensorPlatform::defaults_for(model.sensor_type());
        let platform = SensorPlatform {
            update_rate_hz: self.update_rate_hz.unwrap_or(defaults.update_rate_hz),
            max_range_m: self.max_range_m.unwrap_or(defaults.max_range_m),
            field_of_view_deg: self.field_of_view_deg.unwrap_or(defaults.field_of_view_deg),
        };
        let mut sensor = Sensor::new(&self.sensor_id, self.position.into(), platform, model)?
            .with_metadata(self.metadata.clone());
        sensor.set_active(self.active);
        Ok(sensor)
    }
}

/// Movement pattern, tagged by `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum MovementConfig {
    Waypoint {
        waypoints: Vec<Waypoint>,
        #[serde(default = "default_waypoint_speed")]
        speed_ms: f64,
        #[serde(default = "default_arrival_threshold")]
        arrival_threshold_m: f64,
        #[serde(default, rename = "loop")]
        loop_route: bool,
    },
    Patrol {
        /// Defaults to the entity's starting position
        #[serde(default)]
        center: Option<PositionConfig>,
        #[serde(default)]
        shape: PatrolShape,
        #[serde(default = "default_patrol_radius")]
        radius_m: f64,
        #[serde(default = "default_waypoint_speed")]
        speed_ms: f64,
        #[serde(default)]
        altitude_m: Option<f64>,
    },
    RandomWalk {
        #[serde(default)]
        origin: Option<PositionConfig>,
        #[serde(default = "default_walk_speed")]
        speed_ms: f64,
        #[serde(default = "default_max_deviation")]
        max_deviation_deg: f64,
        #[serde(default)]
        boundary_radius_m: Option<f64>,
        #[serde(default)]
        altitude_m: Option<f64>,
        #[serde(default)]
        initial_heading_deg: Option<f64>,
    },
    Formation {
        leader_id: String,
        #[serde(default)]
        offset_north_m: f64,
        #[serde(default)]
        offset_east_m: f64,
        #[serde(default)]
        offset_altitude_m: f64,
    },
    Evasive {
        #[serde(default = "default_evasive_speed")]
        base_speed_ms: f64,
        #[serde(default = "default_maneuver_probability")]
        maneuver_probability: f64,
        #[serde(default = "default_max_altitude_change")]
        max_altitude_change_m: f64,
        #[serde(default = "default_max_heading_change")]
        max_heading_change_deg: f64,
    },
}

impl MovementConfig {
    fn build(&self, start: GeoPosition) -> std::result::Result<MovementPattern, ConfigError> {
        let pattern = match self {
            Self::Waypoint {
                waypoints,
                speed_ms,
                arrival_threshold_m,
                loop_route,
            } => MovementPattern::Waypoint(WaypointPattern::new(
                waypoints.clone(),
                *speed_ms,
                *arrival_threshold_m,
                *loop_route,
            )?),
            Self::Patrol {
                center,
                shape,
                radius_m,
                speed_ms,
                altitude_m,
            } => {
                let center = center.map_or(start, GeoPosition::from);
                MovementPattern::Patrol(PatrolPattern::new(
                    center.lat,
                    center.lon,
                    *shape,
                    *radius_m,
                    *speed_ms,
                    altitude_m.unwrap_or(start.altitude_m),
                )?)
            }
            Self::RandomWalk {
                origin,
                speed_ms,
                max_deviation_deg,
                boundary_radius_m,
                altitude_m,
                initial_heading_deg,
            } => {
                let origin = origin.map_or(start, GeoPosition::from);
                let mut walk = RandomWalkPattern::new(
                    origin.lat,
                    origin.lon,
                    *speed_ms,
                    *max_deviation_deg,
                    *boundary_radius_m,
                    altitude_m.unwrap_or(start.altitude_m),
                )?;
                if let Some(heading) = initial_heading_deg {
                    walk = walk.with_initial_heading(*heading);
                }
                MovementPattern::RandomWalk(walk)
            }
            Self::Formation {
                leader_id,
                offset_north_m,
                offset_east_m,
                offset_altitude_m,
            } => MovementPattern::Formation(FormationPattern::new(
                leader_id.clone(),
                *offset_north_m,
                *offset_east_m,
                *offset_altitude_m,
            )),
            Self::Evasive {
                base_speed_ms,
                maneuver_probability,
                max_altitude_change_m,
                max_heading_change_deg,
            } => MovementPattern::Evasive(EvasivePattern::new(
                *base_speed_ms,
                *maneuver_probability,
                *max_altitude_change_m,
                *max_heading_change_deg,
            )?),
        };
        Ok(pattern)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub position: PositionConfig,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub speed_ms: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub movement: Option<MovementConfig>,
}

impl EntityConfig {
    fn build(&self) -> Result<Entity> {
        let position = GeoPosition::from(self.position);
        let mut entity = Entity::new(&self.entity_id, self.entity_type, position)?
            .with_motion(Motion {
                heading_deg: self.heading_deg,
                speed_ms: self.speed_ms,
            })
            .with_metadata(self.metadata.clone());
        if let Some(movement) = &self.movement {
            entity = entity.with_pattern(movement.build(position)?);
        }
        Ok(entity)
    }
}

/// Complete scenario document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub simulation: SimulationSection,
    pub sensors: Vec<SensorConfig>,
    pub entities: Vec<EntityConfig>,
}

impl ScenarioConfig {
    /// Load, parse and validate a scenario file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&contents)?;
        info!(
            path = %path.display(),
            sensors = config.sensors.len(),
            entities = config.entities.len(),
            "Loaded scenario"
        );
        Ok(config)
    }

    /// Parse and validate a scenario document.
    pub fn from_yaml_str(contents: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Every problem found in the document; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let sim = &self.simulation;

        if !(sim.update_rate_hz.is_finite() && sim.update_rate_hz > 0.0) {
            errors.push("simulation.update_rate_hz must be a positive number".to_string());
        }
        if !(sim.simulation_speed.is_finite() && sim.simulation_speed > 0.0) {
            errors.push("simulation.simulation_speed must be a positive number".to_string());
        }
        if let Some(duration) = sim.duration_seconds {
            if !(duration.is_finite() && duration > 0.0) {
                errors.push("simulation.duration_seconds must be a positive number".to_string());
            }
        }

        let mut sensor_ids = HashSet::new();
        for sensor in &self.sensors {
            let id = &sensor.sensor_id;
            if !sensor_ids.insert(id.as_str()) {
                errors.push(format!("sensor {id}: duplicate sensor_id"));
            }
            check_position(&mut errors, &format!("sensor {id}"), sensor.position);
            if let Err(err) = sensor.build() {
                errors.push(format!("sensor {id}: {err}"));
            }
        }

        let entity_ids: HashSet<&str> = self.entities.iter().map(|e| e.entity_id.as_str()).collect();
        let mut seen = HashSet::new();
        for entity in &self.entities {
            let id = &entity.entity_id;
            if !seen.insert(id.as_str()) {
                errors.push(format!("entity {id}: duplicate entity_id"));
            }
            check_position(&mut errors, &format!("entity {id}"), entity.position);

            if let Some(MovementConfig::Formation { leader_id, .. }) = &entity.movement {
                if leader_id == id {
                    errors.push(format!("entity {id}: formation leader cannot be itself"));
                } else if !entity_ids.contains(leader_id.as_str()) {
                    errors.push(format!("entity {id}: unknown formation leader {leader_id}"));
                }
            }
            if let Some(movement) = &entity.movement {
                if let Err(err) = movement.build(entity.position.into()) {
                    errors.push(format!("entity {id}: {err}"));
                }
            }
        }

        errors
    }

    /// Loop settings from the `simulation` section.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            simulation_speed: self.simulation.simulation_speed,
            update_rate_hz: self.simulation.update_rate_hz,
        }
    }

    /// Build an engine holding every sensor and entity, in document order.
    pub fn build_engine(&self, settings: EngineSettings) -> Result<SimulationEngine> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors).into());
        }

        let mut engine = SimulationEngine::new(settings)?;
        if let Some(seed) = self.simulation.seed {
            engine = engine.with_seed(seed);
        }
        for sensor in &self.sensors {
            engine.add_sensor(sensor.build()?)?;
        }
        for entity in &self.entities {
            engine.add_entity(entity.build()?)?;
        }
        Ok(engine)
    }
}

fn check_position(errors: &mut Vec<String>, owner: &str, position: PositionConfig) {
    if !(-90.0..=90.0).contains(&position.lat) {
        errors.push(format!("{owner}: latitude must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&position.lon) {
        errors.push(format!("{owner}: longitude must be between -180 and 180"));
    }
}

fn default_true() -> bool {
    true
}

fn default_waypoint_speed() -> f64 {
    50.0
}

fn default_arrival_threshold() -> f64 {
    100.0
}

fn default_patrol_radius() -> f64 {
    5_000.0
}

fn default_walk_speed() -> f64 {
    30.0
}

fn default_max_deviation() -> f64 {
    45.0
}

fn default_evasive_speed() -> f64 {
    100.0
}

fn default_maneuver_probability() -> f64 {
    0.1
}

fn default_max_altitude_change() -> f64 {
    500.0
}

fn default_max_heading_change() -> f64 {
    90.0
}
