//! Passive acoustic array: loud, fast targets heard over ambient noise.

use rand::Rng;
use sensor_domain::{EntityType, Metadata, SensorReading};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Scan, checked_probability, require_non_negative, require_unit_interval, roll};
use crate::entity::Entity;
use crate::error::{ConfigError, SensorError};

const ALTITUDE_SIGMA_M: f64 = 50.0;
/// Floor applied to ambient noise before computing SNR
const MIN_AMBIENT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcousticModel {
    pub detection_accuracy_m: f64,
    /// Background noise in [0, 1]
    pub ambient_noise_level: f64,
    /// Divisor on detection probability; 1.0 is calm air
    pub wind_impact_factor: f64,
}

impl Default for AcousticModel {
    fn default() -> Self {
        Self {
            detection_accuracy_m: 100.0,
            ambient_noise_level: 0.5,
            wind_impact_factor: 1.0,
        }
    }
}

impl AcousticModel {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("detection_accuracy_m", self.detection_accuracy_m)?;
        require_unit_interval("ambient_noise_level", self.ambient_noise_level)?;
        if !(self.wind_impact_factor.is_finite() && self.wind_impact_factor > 0.0) {
            return Err(ConfigError::invalid_field(
                "wind_impact_factor",
                format!("must be > 0, got {}", self.wind_impact_factor),
            ));
        }
        Ok(())
    }

    /// Estimated sound level in [0, 1] from type and speed.
    pub fn sound_level(entity_type: EntityType, speed_ms: f64) -> f64 {
        let base = match entity_type {
            EntityType::Aircraft => 0.8,
            EntityType::GroundVehicle => 0.6,
            EntityType::MaritimeVessel => 0.5,
            EntityType::UnknownContact => 0.4,
            EntityType::StationaryObject => 0.1,
        };
        let speed_factor = (speed_ms / 100.0).min(1.5);
        (base * speed_factor).min(1.0)
    }

    fn snr_factor(&self, sound_level: f64) -> f64 {
        let snr = sound_level / self.ambient_noise_level.max(MIN_AMBIENT);
        (snr / 2.0).min(1.0)
    }

    pub(super) fn detect<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        entity: &Entity,
        range_m: f64,
        rng: &mut R,
    ) -> Result<Option<SensorReading>, SensorError> {
        let sound_level = Self::sound_level(entity.entity_type(), entity.motion().speed_ms);
        let snr_factor = self.snr_factor(sound_level);
        let range_factor = 1.0 / (1.0 + scan.range_ratio(range_m).powi(2));
        let wind_factor = 1.0 / self.wind_impact_factor;

        let probability = checked_probability(entity, range_factor * snr_factor * wind_factor)?;
        if !roll(rng, probability) {
            return Ok(None);
        }

        let mut metadata = Metadata::new();
        metadata.insert("range_m".into(), json!(range_m));
        metadata.insert("detection_accuracy_m".into(), json!(self.detection_accuracy_m));
        metadata.insert("sound_level".into(), json!(sound_level));
        metadata.insert("ambient_noise".into(), json!(self.ambient_noise_level));
        metadata.insert("wind_factor".into(), json!(self.wind_impact_factor));

        Ok(Some(scan.reading(
            entity,
            rng,
            self.detection_accuracy_m,
            ALTITUDE_SIGMA_M,
            probability * snr_factor,
            metadata,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::tests::entity_at;
    use crate::sensors::{Sensor, SensorModel};
    use chrono::{Duration, Utc};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use sensor_domain::{GeoPosition, Motion};

    fn moving(id: &str, entity_type: EntityType, speed_ms: f64) -> Entity {
        entity_at(id, entity_type, 1_000.0).with_motion(Motion {
            heading_deg: 0.0,
            speed_ms,
        })
    }

    fn hits(model: AcousticModel, entity: Entity) -> usize {
        let mut rng = StdRng::seed_from_u64(17);
        let mut s = Sensor::with_defaults(
            "MIC-1",
            GeoPosition::new(34.0, -118.0, 0.0),
            SensorModel::Acoustic(model),
        )
        .unwrap();
        let entities = vec![entity];
        let start = Utc::now();
        (0..300)
            .map(|tick| {
                s.detect_entities(&entities, start + Duration::seconds(tick), &mut rng)
                    .unwrap()
                    .len()
            })
            .sum()
    }

    #[test]
    fn test_sound_level_scales_with_speed() {
        assert_eq!(AcousticModel::sound_level(EntityType::Aircraft, 0.0), 0.0);
        assert!((AcousticModel::sound_level(EntityType::Aircraft, 50.0) - 0.4).abs() < 1e-12);
        assert_eq!(AcousticModel::sound_level(EntityType::Aircraft, 500.0), 1.0);
        assert!(
            (AcousticModel::sound_level(EntityType::StationaryObject, 1_000.0) - 0.15).abs() < 1e-12
        );
    }

    #[test]
    fn test_silent_target_is_never_heard() {
        assert_eq!(hits(AcousticModel::default(), moving("still", EntityType::GroundVehicle, 0.0)), 0);
    }

    #[test]
    fn test_wind_and_noise_reduce_detections() {
        let calm = hits(AcousticModel::default(), moving("ac", EntityType::Aircraft, 120.0));
        let windy = hits(
            AcousticModel {
                ambient_noise_level: 0.9,
                wind_impact_factor: 3.0,
                ..AcousticModel::default()
            },
            moving("ac", EntityType::Aircraft, 120.0),
        );
        assert!(calm > windy * 2, "calm {calm} windy {windy}");
    }

    #[test]
    fn test_wind_factor_must_be_positive() {
        let model = AcousticModel {
            wind_impact_factor: 0.0,
            ..AcousticModel::default()
        };
        assert!(model.validate().is_err());
    }
}
