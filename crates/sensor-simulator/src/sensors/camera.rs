//! EO/IR camera: visual detection shaped by target type, weather and lighting.

use rand::Rng;
use sensor_domain::{DayNightMode, EntityType, Metadata, SensorReading};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Scan, checked_probability, require_non_negative, require_unit_interval, roll};
use crate::entity::Entity;
use crate::error::{ConfigError, SensorError};

const ALTITUDE_SIGMA_M: f64 = 15.0;
const NIGHT_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraModel {
    pub detection_accuracy_m: f64,
    /// 1.0 is clear air
    pub weather_visibility_factor: f64,
    pub day_night_mode: DayNightMode,
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            detection_accuracy_m: 20.0,
            weather_visibility_factor: 1.0,
            day_night_mode: DayNightMode::Auto,
        }
    }
}

impl CameraModel {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("detection_accuracy_m", self.detection_accuracy_m)?;
        require_unit_interval("weather_visibility_factor", self.weather_visibility_factor)
    }

    pub fn type_visibility(entity_type: EntityType) -> f64 {
        match entity_type {
            EntityType::Aircraft => 0.9,
            EntityType::GroundVehicle => 0.7,
            EntityType::MaritimeVessel => 0.8,
            EntityType::UnknownContact => 0.5,
            EntityType::StationaryObject => 0.6,
        }
    }

    fn day_night_factor(&self) -> f64 {
        match self.day_night_mode {
            DayNightMode::Night => NIGHT_FACTOR,
            DayNightMode::Day | DayNightMode::Auto => 1.0,
        }
    }

    fn detection_probability(&self, scan: &Scan<'_>, entity: &Entity, range_m: f64) -> f64 {
        (1.0 - scan.range_ratio(range_m))
            * Self::type_visibility(entity.entity_type())
            * self.weather_visibility_factor
            * self.day_night_factor()
    }

    pub(super) fn detect<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        entity: &Entity,
        range_m: f64,
        rng: &mut R,
    ) -> Result<Option<SensorReading>, SensorError> {
        let probability =
            checked_probability(entity, self.detection_probability(scan, entity, range_m))?;
        if !roll(rng, probability) {
            return Ok(None);
        }

        let confidence = probability * (1.0 - scan.range_ratio(range_m) * 0.3);
        let mut metadata = Metadata::new();
        metadata.insert("range_m".into(), json!(range_m));
        metadata.insert("detection_accuracy_m".into(), json!(self.detection_accuracy_m));
        metadata.insert("weather_visibility".into(), json!(self.weather_visibility_factor));
        metadata.insert("mode".into(), json!(self.day_night_mode.as_str()));

        Ok(Some(scan.reading(
            entity,
            rng,
            self.detection_accuracy_m,
            ALTITUDE_SIGMA_M,
            confidence,
            metadata,
        )))
    }
}
