//! Primary radar: range and cross-section driven detection with clutter.

use rand::Rng;
use sensor_domain::{EntityType, GeoPosition, Metadata, SensorReading};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Scan, checked_probability, require_non_negative, require_unit_interval, roll};
use crate::entity::Entity;
use crate::error::{ConfigError, SensorError};

/// Range beyond which cross-section is attenuated.
const RCS_ATTENUATION_RANGE_M: f64 = 10_000.0;
const RCS_ATTENUATION: f64 = 0.8;
const ALTITUDE_SIGMA_M: f64 = 10.0;
/// Clutter spread around the site, degrees.
const FALSE_ALARM_SPREAD_DEG: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarModel {
    pub min_detectable_rcs_m2: f64,
    pub range_accuracy_m: f64,
    pub angle_accuracy_deg: f64,
    /// Probability of one clutter return per scan
    pub false_alarm_rate: f64,
}

impl Default for RadarModel {
    fn default() -> Self {
        Self {
            min_detectable_rcs_m2: 0.1,
            range_accuracy_m: 50.0,
            angle_accuracy_deg: 0.5,
            false_alarm_rate: 0.01,
        }
    }
}

impl RadarModel {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_detectable_rcs_m2.is_finite() && self.min_detectable_rcs_m2 > 0.0) {
            return Err(ConfigError::invalid_field(
                "min_detectable_rcs_m2",
                format!("must be > 0, got {}", self.min_detectable_rcs_m2),
            ));
        }
        require_non_negative("range_accuracy_m", self.range_accuracy_m)?;
        require_non_negative("angle_accuracy_deg", self.angle_accuracy_deg)?;
        require_unit_interval("false_alarm_rate", self.false_alarm_rate)
    }

    /// Estimated cross-section in square meters.
    pub fn cross_section_m2(entity_type: EntityType, range_m: f64) -> f64 {
        let base = match entity_type {
            EntityType::Aircraft => 10.0,
            EntityType::GroundVehicle => 5.0,
            EntityType::MaritimeVessel => 100.0,
            EntityType::UnknownContact => 1.0,
            EntityType::StationaryObject => 50.0,
        };
        if range_m > RCS_ATTENUATION_RANGE_M {
            base * RCS_ATTENUATION
        } else {
            base
        }
    }

    fn detection_probability<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        rcs_m2: f64,
        range_m: f64,
        rng: &mut R,
    ) -> f64 {
        if rcs_m2 < self.min_detectable_rcs_m2 {
            return 0.0;
        }
        let range_factor = 1.0 - scan.range_ratio(range_m);
        let rcs_factor = (rcs_m2 / self.min_detectable_rcs_m2).min(2.0) / 2.0;
        range_factor * rcs_factor * rng.gen_range(0.9..=1.0)
    }

    pub(super) fn detect<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        entity: &Entity,
        range_m: f64,
        rng: &mut R,
    ) -> Result<Option<SensorReading>, SensorError> {
        let rcs_m2 = Self::cross_section_m2(entity.entity_type(), range_m);
        let probability =
            checked_probability(entity, self.detection_probability(scan, rcs_m2, range_m, rng))?;

        if !roll(rng, probability) {
            return Ok(None);
        }

        let confidence = probability * (1.0 - scan.range_ratio(range_m));
        let mut metadata = Metadata::new();
        metadata.insert("range_m".into(), json!(range_m));
        metadata.insert("rcs_m2".into(), json!(rcs_m2));
        metadata.insert("range_accuracy_m".into(), json!(self.range_accuracy_m));
        metadata.insert("angle_accuracy_deg".into(), json!(self.angle_accuracy_deg));

        Ok(Some(scan.reading(
            entity,
            rng,
            self.range_accuracy_m,
            ALTITUDE_SIGMA_M,
            confidence,
            metadata,
        )))
    }

    /// At most one synthetic clutter return near the site.
    pub(super) fn false_alarm<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        rng: &mut R,
    ) -> Option<SensorReading> {
        if !roll(rng, self.false_alarm_rate) {
            return None;
        }

        let lat = scan.position.lat + rng.gen_range(-FALSE_ALARM_SPREAD_DEG..=FALSE_ALARM_SPREAD_DEG);
        let lon = scan.position.lon + rng.gen_range(-FALSE_ALARM_SPREAD_DEG..=FALSE_ALARM_SPREAD_DEG);
        let (lat, lon) = crate::geo::normalize_position(lat, lon);

        let mut metadata = Metadata::new();
        metadata.insert("sensor_type".into(), json!(scan.sensor_type.as_str()));
        metadata.insert("false_alarm".into(), json!(true));

        Some(SensorReading {
            reading_id: scan.reading_id(rng),
            entity_id: format!("false_alarm_{}", scan.now.timestamp()),
            sensor_id: scan.sensor_id.to_string(),
            timestamp: scan.now,
            position: GeoPosition::new(lat, lon, rng.gen_range(0.0..=10_000.0)),
            confidence: rng.gen_range(0.1..=0.3),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_m;
    use crate::sensors::tests::entity_at;
    use crate::sensors::{Sensor, SensorModel};
    use chrono::{Duration, Utc};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn radar(model: RadarModel) -> Sensor {
        Sensor::with_defaults(
            "RADAR-1",
            GeoPosition::new(34.0, -118.0, 0.0),
            SensorModel::Radar(model),
        )
        .unwrap()
    }

    #[test]
    fn test_cross_section_table() {
        assert_eq!(RadarModel::cross_section_m2(EntityType::MaritimeVessel, 1_000.0), 100.0);
        assert_eq!(RadarModel::cross_section_m2(EntityType::Aircraft, 5_000.0), 10.0);
        assert_eq!(RadarModel::cross_section_m2(EntityType::Aircraft, 20_000.0), 8.0);
    }

    #[test]
    fn test_below_minimum_rcs_is_never_detected() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = radar(RadarModel {
            min_detectable_rcs_m2: 2.0,
            false_alarm_rate: 0.0,
            ..RadarModel::default()
        });
        let entities = vec![entity_at("uc", EntityType::UnknownContact, 100.0)];
        let start = Utc::now();
        for tick in 0..100 {
            let readings = s
                .detect_entities(&entities, start + Duration::seconds(tick), &mut rng)
                .unwrap();
            assert!(readings.is_empty());
        }
    }

    #[test]
    fn test_close_large_target_detected_with_metadata() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut s = radar(RadarModel {
            false_alarm_rate: 0.0,
            ..RadarModel::default()
        });
        let entities = vec![entity_at("ship", EntityType::MaritimeVessel, 1_000.0)];
        let start = Utc::now();

        let mut hits = 0;
        for tick in 0..100 {
            for r in s
                .detect_entities(&entities, start + Duration::seconds(tick), &mut rng)
                .unwrap()
            {
                hits += 1;
                assert_eq!(r.entity_id, "ship");
                assert!(!r.is_false_alarm());
                assert_eq!(r.metadata["rcs_m2"], 100.0);
                let truth = entities[0].position();
                assert!(distance_m(truth.lat, truth.lon, r.position.lat, r.position.lon) < 400.0);
            }
        }
        // p is about 0.93 at 1 km
        assert!(hits > 80, "only {hits} hits");
    }

    #[test]
    fn test_detection_rate_falls_with_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut s = radar(RadarModel {
            false_alarm_rate: 0.0,
            ..RadarModel::default()
        });
        let near = vec![entity_at("near", EntityType::Aircraft, 2_000.0)];
        let far = vec![entity_at("far", EntityType::Aircraft, 45_000.0)];
        let start = Utc::now();

        let (mut near_hits, mut far_hits) = (0, 0);
        for tick in 0..400 {
            near_hits += s
                .detect_entities(&near, start + Duration::seconds(2 * tick), &mut rng)
                .unwrap()
                .len();
            far_hits += s
                .detect_entities(&far, start + Duration::seconds(2 * tick + 1), &mut rng)
                .unwrap()
                .len();
        }
        assert!(near_hits > far_hits * 3, "near {near_hits} far {far_hits}");
    }

    #[test]
    fn test_false_alarm_shape() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut s = radar(RadarModel {
            false_alarm_rate: 1.0,
            ..RadarModel::default()
        });
        let now = Utc::now();
        let readings = s.detect_entities(&[], now, &mut rng).unwrap();

        assert_eq!(readings.len(), 1);
        let clutter = &readings[0];
        assert!(clutter.is_false_alarm());
        assert_eq!(clutter.entity_id, format!("false_alarm_{}", now.timestamp()));
        assert!((0.1..=0.3).contains(&clutter.confidence));
        assert!((clutter.position.lat - 34.0).abs() <= 0.01);
        assert!((0.0..=10_000.0).contains(&clutter.position.altitude_m));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(RadarModel {
            min_detectable_rcs_m2: 0.0,
            ..RadarModel::default()
        }
        .validate()
        .is_err());
        assert!(RadarModel {
            false_alarm_rate: 1.2,
            ..RadarModel::default()
        }
        .validate()
        .is_err());
    }
}
