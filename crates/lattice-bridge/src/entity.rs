//! Lattice Entities API wire format.

use chrono::{DateTime, Utc};
use sensor_domain::{EntitySnapshot, EntityType, Metadata, SensorReading};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Source label used when a detection carries no sensor id
pub const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticePosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeMotion {
    pub heading_degrees: f64,
    pub speed_meters_per_second: f64,
}

/// Entity document as accepted by `PUT /api/v1/entities/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub timestamp: DateTime<Utc>,
    pub position: LatticePosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<LatticeMotion>,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl LatticeEntity {
    /// Format an entity for publishing.
    ///
    /// When a reading is present its (noisy) position, confidence, timestamp
    /// and metadata win over the entity's own values. Motion always comes from
    /// the entity.
    pub fn from_detection(
        entity: &EntitySnapshot,
        reading: Option<&SensorReading>,
        sensor_id: Option<&str>,
    ) -> Self {
        let (position, confidence, timestamp) = reading.map_or(
            (entity.position, 1.0, entity.last_update),
            |r| (r.position, r.confidence, r.timestamp),
        );

        let mut metadata = entity.metadata.clone();
        if let Some(reading) = reading {
            metadata.extend(reading.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        metadata.insert(
            "source_sensor".into(),
            json!(sensor_id.unwrap_or(UNKNOWN_SOURCE)),
        );
        metadata.insert("entity_type".into(), json!(entity.entity_type.as_str()));

        Self {
            id: entity.entity_id.clone(),
            entity_type: entity.entity_type,
            timestamp,
            position: LatticePosition {
                latitude: position.lat,
                longitude: position.lon,
                altitude_meters: position.altitude_m,
            },
            motion: Some(LatticeMotion {
                heading_degrees: entity.motion.heading_deg,
                speed_meters_per_second: entity.motion.speed_ms,
            }),
            confidence,
            metadata,
        }
    }
}
