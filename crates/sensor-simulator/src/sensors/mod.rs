//! Probabilistic sensor models.
//!
//! A [`Sensor`] is a fixed platform (position, scan rate, range, field of
//! view) plus one closed [`SensorModel`] variant carrying the physics for
//! that sensor family. All variants share the same scan gating and reading
//! shape; only the detection probability, noise and confidence differ.

mod acoustic;
mod adsb;
mod camera;
mod radar;

pub use acoustic::AcousticModel;
pub use adsb::AdsbModel;
pub use camera::CameraModel;
pub use radar::RadarModel;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::StandardNormal;
use sensor_domain::{GeoPosition, Metadata, SensorReading, SensorStatus, SensorType};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::{ConfigError, SensorError};
use crate::geo::{add_noise, distance_m};

/// Health string reported by a sensor that has not faulted.
pub const HEALTH_OPERATIONAL: &str = "operational";

/// Platform-level scan parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorPlatform {
    pub update_rate_hz: f64,
    pub max_range_m: f64,
    pub field_of_view_deg: f64,
}

impl SensorPlatform {
    /// Typical platform values for a sensor family.
    pub fn defaults_for(sensor_type: SensorType) -> Self {
        let (update_rate_hz, max_range_m, field_of_view_deg) = match sensor_type {
            SensorType::Radar => (1.0, 50_000.0, 360.0),
            SensorType::Adsb => (1.0, 200_000.0, 360.0),
            SensorType::Camera => (5.0, 15_000.0, 60.0),
            SensorType::Acoustic => (10.0, 5_000.0, 360.0),
        };
        Self {
            update_rate_hz,
            max_range_m,
            field_of_view_deg,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.update_rate_hz.is_finite() && self.update_rate_hz > 0.0) {
            return Err(ConfigError::invalid_field(
                "update_rate_hz",
                format!("must be > 0, got {}", self.update_rate_hz),
            ));
        }
        if !(self.max_range_m.is_finite() && self.max_range_m > 0.0) {
            return Err(ConfigError::invalid_field(
                "max_range_m",
                format!("must be > 0, got {}", self.max_range_m),
            ));
        }
        if !(self.field_of_view_deg > 0.0 && self.field_of_view_deg <= 360.0) {
            return Err(ConfigError::invalid_field(
                "field_of_view_deg",
                format!("must be within (0, 360], got {}", self.field_of_view_deg),
            ));
        }
        Ok(())
    }
}

/// Sensor physics variants
#[derive(Debug, Clone, PartialEq)]
pub enum SensorModel {
    Radar(RadarModel),
    Adsb(AdsbModel),
    Camera(CameraModel),
    Acoustic(AcousticModel),
}

impl SensorModel {
    pub fn sensor_type(&self) -> SensorType {
        match self {
            Self::Radar(_) => SensorType::Radar,
            Self::Adsb(_) => SensorType::Adsb,
            Self::Camera(_) => SensorType::Camera,
            Self::Acoustic(_) => SensorType::Acoustic,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Radar(m) => m.validate(),
            Self::Adsb(m) => m.validate(),
            Self::Camera(m) => m.validate(),
            Self::Acoustic(m) => m.validate(),
        }
    }

    fn detect<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        entity: &Entity,
        range_m: f64,
        rng: &mut R,
    ) -> Result<Option<SensorReading>, SensorError> {
        match self {
            Self::Radar(m) => m.detect(scan, entity, range_m, rng),
            Self::Adsb(m) => Ok(m.detect(scan, entity, range_m, rng)),
            Self::Camera(m) => m.detect(scan, entity, range_m, rng),
            Self::Acoustic(m) => m.detect(scan, entity, range_m, rng),
        }
    }
}

/// A sensor platform with its physics model and operational state.
#[derive(Debug, Clone)]
pub struct Sensor {
    sensor_id: String,
    position: GeoPosition,
    platform: SensorPlatform,
    model: SensorModel,
    is_active: bool,
    health_status: String,
    last_update: Option<DateTime<Utc>>,
    metadata: Metadata,
}

impl Sensor {
    pub fn new(
        sensor_id: impl Into<String>,
        position: GeoPosition,
        platform: SensorPlatform,
        model: SensorModel,
    ) -> Result<Self, ConfigError> {
        let sensor_id = sensor_id.into();
        if sensor_id.trim().is_empty() {
            return Err(ConfigError::invalid_field("sensor_id", "must not be empty"));
        }
        if !position.is_valid() {
            return Err(ConfigError::invalid_field(
                "position",
                format!("invalid coordinates lat={}, lon={}", position.lat, position.lon),
            ));
        }
        platform.validate()?;
        model.validate()?;

        Ok(Self {
            sensor_id,
            position,
            platform,
            model,
            is_active: true,
            health_status: HEALTH_OPERATIONAL.to_string(),
            last_update: None,
            metadata: Metadata::new(),
        })
    }

    /// Build with the family's default platform values.
    pub fn with_defaults(
        sensor_id: impl Into<String>,
        position: GeoPosition,
        model: SensorModel,
    ) -> Result<Self, ConfigError> {
        let platform = SensorPlatform::defaults_for(model.sensor_type());
        Self::new(sensor_id, position, platform, model)
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.sensor_id
    }

    pub fn sensor_type(&self) -> SensorType {
        self.model.sensor_type()
    }

    pub fn position(&self) -> GeoPosition {
        self.position
    }

    pub fn platform(&self) -> &SensorPlatform {
        &self.platform
    }

    pub fn model(&self) -> &SensorModel {
        &self.model
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn health_status(&self) -> &str {
        &self.health_status
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    pub fn set_health_status(&mut self, status: impl Into<String>) {
        self.health_status = status.into();
    }

    /// Whether at least one scan interval has elapsed since the last scan.
    pub fn should_update(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_update else {
            return true;
        };
        let min_interval = 1.0 / self.platform.update_rate_hz;
        (now - last)
            .num_microseconds()
            .is_some_and(|us| us as f64 / 1_000_000.0 >= min_interval)
    }

    /// Range to the entity when it is inside the detection envelope.
    ///
    /// Fields of view narrower than 360 degrees are accepted but not yet
    /// checked against an azimuth: every bearing counts as visible.
    pub fn can_detect(&self, entity: &Entity) -> Result<Option<f64>, SensorError> {
        if !self.is_active {
            return Ok(None);
        }
        let target = entity.position();
        let range_m = distance_m(self.position.lat, self.position.lon, target.lat, target.lon);
        if !range_m.is_finite() {
            return Err(SensorError::NonFiniteGeometry {
                entity_id: entity.id().to_string(),
            });
        }
        Ok((range_m <= self.platform.max_range_m).then_some(range_m))
    }

    /// Scan the entity set, returning this tick's readings.
    ///
    /// Inactive sensors and sensors whose scan interval has not elapsed
    /// return nothing and leave their state untouched. `last_update` only
    /// advances once a scan finishes without fault.
    pub fn detect_entities<R: Rng + ?Sized>(
        &mut self,
        entities: &[Entity],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<SensorReading>, SensorError> {
        if !self.is_active || !self.should_update(now) {
            return Ok(Vec::new());
        }

        let scan = Scan {
            sensor_id: &self.sensor_id,
            sensor_type: self.model.sensor_type(),
            position: self.position,
            max_range_m: self.platform.max_range_m,
            now,
        };

        let mut readings = Vec::new();
        for entity in entities {
            let Some(range_m) = self.can_detect(entity)? else {
                continue;
            };
            if let Some(reading) = self.model.detect(&scan, entity, range_m, rng)? {
                readings.push(reading);
            }
        }

        if let SensorModel::Radar(radar) = &self.model {
            if let Some(clutter) = radar.false_alarm(&scan, rng) {
                readings.push(clutter);
            }
        }

        trace!(
            sensor_id = %self.sensor_id,
            readings = readings.len(),
            "Scan complete"
        );

        self.last_update = Some(now);
        Ok(readings)
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus {
            sensor_id: self.sensor_id.clone(),
            sensor_type: self.sensor_type(),
            position: self.position,
            update_rate_hz: self.platform.update_rate_hz,
            max_range_m: self.platform.max_range_m,
            field_of_view_deg: self.platform.field_of_view_deg,
            is_active: self.is_active,
            health_status: self.health_status.clone(),
            last_update: self.last_update,
        }
    }
}

/// Per-scan context handed to the variant models.
pub(crate) struct Scan<'a> {
    pub sensor_id: &'a str,
    pub sensor_type: SensorType,
    pub position: GeoPosition,
    pub max_range_m: f64,
    pub now: DateTime<Utc>,
}

impl Scan<'_> {
    /// Normalized range in [0, 1].
    pub fn range_ratio(&self, range_m: f64) -> f64 {
        range_m / self.max_range_m
    }

    /// Build a reading with horizontal noise `sigma_m` and vertical noise
    /// `altitude_sigma_m` around the entity's true position.
    pub fn reading<R: Rng + ?Sized>(
        &self,
        entity: &Entity,
        rng: &mut R,
        sigma_m: f64,
        altitude_sigma_m: f64,
        confidence: f64,
        mut metadata: Metadata,
    ) -> SensorReading {
        let truth = entity.position();
        let (lat, lon) = add_noise(rng, truth.lat, truth.lon, sigma_m);
        let altitude_noise: f64 = rng.sample(StandardNormal);

        metadata.insert("sensor_type".into(), self.sensor_type.as_str().into());

        SensorReading {
            reading_id: self.reading_id(rng),
            entity_id: entity.id().to_string(),
            sensor_id: self.sensor_id.to_string(),
            timestamp: self.now,
            position: GeoPosition::new(lat, lon, truth.altitude_m + altitude_noise * altitude_sigma_m),
            confidence: confidence.clamp(0.0, 1.0),
            metadata,
        }
    }

    pub fn reading_id<R: Rng + ?Sized>(&self, rng: &mut R) -> Uuid {
        uuid::Builder::from_random_bytes(rng.r#gen()).into_uuid()
    }
}

/// Reject probabilities that evaluated to NaN or infinity.
pub(crate) fn checked_probability(entity: &Entity, value: f64) -> Result<f64, SensorError> {
    if value.is_finite() {
        Ok(value.clamp(0.0, 1.0))
    } else {
        Err(SensorError::InvalidProbability {
            entity_id: entity.id().to_string(),
            value,
        })
    }
}

/// Bernoulli trial.
pub(crate) fn roll<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.r#gen::<f64>() < probability
}

pub(crate) fn require_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_field(field, format!("must be within [0, 1], got {value}")))
    }
}

pub(crate) fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_field(field, format!("must be >= 0, got {value}")))
    }
}
