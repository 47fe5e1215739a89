//! # Sensor Simulation - Domain Model
//!
//! Value objects, enums and collaborator contracts shared by the simulation
//! core and the publishing bridge. These types are the single source of truth
//! for what an entity, a sensor reading and a detection event look like.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form, string-keyed metadata attached to entities and readings.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Per-entity publish outcome keyed by entity id.
pub type PublishResults = HashMap<String, bool>;

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic position (WGS84 degrees, altitude in meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
}

impl GeoPosition {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self {
            lat,
            lon,
            altitude_m,
        }
    }

    /// Check latitude/longitude ranges and finiteness
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.altitude_m.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Validate, returning the offending coordinates on failure
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DomainError::InvalidCoordinates {
                lat: self.lat,
                lon: self.lon,
            })
        }
    }
}

/// Heading and ground speed
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Motion {
    pub heading_deg: f64,
    pub speed_ms: f64,
}

// =============================================================================
// ENUMS
// =============================================================================

/// Kinds of simulated physical entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Aircraft,
    GroundVehicle,
    MaritimeVessel,
    UnknownContact,
    StationaryObject,
}

impl EntityType {
    pub const ALL: [Self; 5] = [
        Self::Aircraft,
        Self::GroundVehicle,
        Self::MaritimeVessel,
        Self::UnknownContact,
        Self::StationaryObject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aircraft => "aircraft",
            Self::GroundVehicle => "ground_vehicle",
            Self::MaritimeVessel => "maritime_vessel",
            Self::UnknownContact => "unknown_contact",
            Self::StationaryObject => "stationary_object",
        }
    }
}

/// Sensor families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Radar,
    Adsb,
    Camera,
    Acoustic,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Radar => "radar",
            Self::Adsb => "adsb",
            Self::Camera => "camera",
            Self::Acoustic => "acoustic",
        }
    }
}

/// Camera operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayNightMode {
    Day,
    Night,
    #[default]
    Auto,
}

impl DayNightMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Night => "night",
            Self::Auto => "auto",
        }
    }
}

// =============================================================================
// READINGS & EVENTS
// =============================================================================

/// One noisy, timestamped observation produced by a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub reading_id: Uuid,
    pub entity_id: String,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub position: GeoPosition,
    /// Always within [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SensorReading {
    /// Whether the reading is a synthetic clutter return
    #[must_use]
    pub fn is_false_alarm(&self) -> bool {
        self.metadata
            .get("false_alarm")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Serializable summary of an entity at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub position: GeoPosition,
    pub motion: Motion,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// An (entity, reading, sensor) triple handed to the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub entity: EntitySnapshot,
    pub reading: SensorReading,
    pub sensor_id: String,
}

/// Operator-facing sensor status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub position: GeoPosition,
    pub update_rate_hz: f64,
    pub max_range_m: f64,
    pub field_of_view_deg: f64,
    pub is_active: bool,
    pub health_status: String,
    pub last_update: Option<DateTime<Utc>>,
}

// =============================================================================
// COLLABORATOR CONTRACTS
// =============================================================================

/// Downstream sink for detections.
///
/// Failures are reported as per-entity booleans; transport detail and retry
/// policy stay behind this boundary.
pub trait Publisher: Send {
    /// Publish a single detection
    fn publish(&mut self, entity: &EntitySnapshot, reading: &SensorReading, sensor_id: &str)
        -> bool;

    /// Publish a set of detections in one request
    fn publish_batch(&mut self, events: &[DetectionEvent]) -> PublishResults;

    /// Drain any internally buffered entries
    fn flush_batch(&mut self) -> PublishResults;
}

/// Fire-and-forget metrics aggregator.
///
/// Implementations must be internally synchronized; the same sink may be
/// shared by the engine and other publish paths.
pub trait MetricsSink: Send + Sync {
    fn record_success(&self, sensor_id: &str, latency_ms: f64);

    fn record_error(&self, sensor_id: &str);

    fn update_entity_counts(&self, total: usize, active: usize);
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl DomainError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::Fake;

    fn reading(metadata: Metadata) -> SensorReading {
        SensorReading {
            reading_id: Uuid::new_v4(),
            entity_id: (8..16).fake::<String>(),
            sensor_id: (8..16).fake::<String>(),
            timestamp: Utc::now(),
            position: GeoPosition::new(34.0, -118.0, 0.0),
            confidence: 0.5,
            metadata,
        }
    }

    #[test]
    fn test_position_validation() {
        assert!(GeoPosition::new(34.0, -118.0, 100.0).is_valid());
        assert!(GeoPosition::new(90.0, 180.0, 0.0).is_valid());
        assert!(!GeoPosition::new(91.0, 0.0, 0.0).is_valid());
        assert!(!GeoPosition::new(0.0, -180.5, 0.0).is_valid());
        assert!(!GeoPosition::new(f64::NAN, 0.0, 0.0).is_valid());

        let err = GeoPosition::new(95.0, 10.0, 0.0).validate().unwrap_err();
        assert!(matches!(err, DomainError::InvalidCoordinates { .. }));
    }

    #[test]
    fn test_domain_error_messages() {
        let err = GeoPosition::new(95.0, 10.0, 0.0).validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid coordinates: lat=95, lon=10");

        let err = DomainError::invalid_parameter("entity_id", "must not be empty");
        assert_eq!(err.to_string(), "Invalid parameter entity_id: must not be empty");
    }

    #[test]
    fn test_entity_type_serde_names() {
        for ty in EntityType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
        let parsed: SensorType = serde_json::from_str("\"adsb\"").unwrap();
        assert_eq!(parsed, SensorType::Adsb);
    }

    #[test]
    fn test_false_alarm_flag() {
        assert!(!reading(Metadata::new()).is_false_alarm());

        let mut metadata = Metadata::new();
        metadata.insert("false_alarm".into(), serde_json::Value::Bool(true));
        assert!(reading(metadata).is_false_alarm());
    }

    #[test]
    fn test_snapshot_serializes_nested_shape() {
        let snapshot = EntitySnapshot {
            entity_id: "AC-1".into(),
            entity_type: EntityType::Aircraft,
            position: GeoPosition::new(34.0, -118.0, 3000.0),
            motion: Motion {
                heading_deg: 90.0,
                speed_ms: 120.0,
            },
            metadata: Metadata::new(),
            created_at: Utc::now(),
            last_update: Utc::now(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["entity_type"], "aircraft");
        assert_eq!(value["position"]["altitude_m"], 3000.0);
        assert_eq!(value["motion"]["speed_ms"], 120.0);
    }
}
