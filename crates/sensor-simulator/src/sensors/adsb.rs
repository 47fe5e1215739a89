//! ADS-B receiver: cooperative transponder reports from aircraft only.

use rand::Rng;
use sensor_domain::{EntityType, Metadata, SensorReading};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Scan, require_non_negative, require_unit_interval, roll};
use crate::entity::Entity;
use crate::error::ConfigError;

const ALTITUDE_SIGMA_M: f64 = 5.0;
const MIN_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsbModel {
    pub reception_accuracy_m: f64,
    /// Fraction of aircraft carrying a working transponder
    pub transponder_coverage: f64,
}

impl Default for AdsbModel {
    fn default() -> Self {
        Self {
            reception_accuracy_m: 10.0,
            transponder_coverage: 0.95,
        }
    }
}

impl AdsbModel {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("reception_accuracy_m", self.reception_accuracy_m)?;
        require_unit_interval("transponder_coverage", self.transponder_coverage)
    }

    fn has_transponder<R: Rng + ?Sized>(&self, entity: &Entity, rng: &mut R) -> bool {
        entity.entity_type() == EntityType::Aircraft && roll(rng, self.transponder_coverage)
    }

    pub(super) fn detect<R: Rng + ?Sized>(
        &self,
        scan: &Scan<'_>,
        entity: &Entity,
        range_m: f64,
        rng: &mut R,
    ) -> Option<SensorReading> {
        if !self.has_transponder(entity, rng) {
            return None;
        }

        let confidence = (1.0 - scan.range_ratio(range_m) * 0.1).clamp(MIN_CONFIDENCE, 1.0);
        let motion = entity.motion();

        let mut metadata = Metadata::new();
        metadata.insert("range_m".into(), json!(range_m));
        metadata.insert("transponder_id".into(), json!(format!("ADSB_{}", entity.id())));
        metadata.insert("reception_accuracy_m".into(), json!(self.reception_accuracy_m));
        metadata.insert("speed_ms".into(), json!(motion.speed_ms));
        metadata.insert("heading_deg".into(), json!(motion.heading_deg));

        Some(scan.reading(
            entity,
            rng,
            self.reception_accuracy_m,
            ALTITUDE_SIGMA_M,
            confidence,
            metadata,
        ))
    }
}
