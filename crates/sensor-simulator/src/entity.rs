//! Simulated entities and their per-tick advancement.

use chrono::{DateTime, Utc};
use rand::Rng;
use sensor_domain::{DomainError, EntitySnapshot, EntityType, GeoPosition, Metadata, Motion};

use crate::error::{Result, SimulationError};
use crate::geo::{normalize_heading, normalize_position};
use crate::movement::{Kinematics, MovementPattern};

/// A simulated physical object.
///
/// State is only mutated through [`Entity::step`] and the `update_*` helpers,
/// all of which keep latitude/longitude in range, speed non-negative and
/// `last_update` moving forward.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_id: String,
    entity_type: EntityType,
    lat: f64,
    lon: f64,
    altitude_m: f64,
    heading_deg: f64,
    speed_ms: f64,
    pattern: Option<MovementPattern>,
    metadata: Metadata,
    created_at: DateTime<Utc>,
    last_update: DateTime<Utc>,
}

impl Entity {
    /// Create a stationary entity at `position`.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        position: GeoPosition,
    ) -> std::result::Result<Self, DomainError> {
        let entity_id = entity_id.into();
        if entity_id.trim().is_empty() {
            return Err(DomainError::invalid_parameter("entity_id", "must not be empty"));
        }
        position.validate()?;

        let now = Utc::now();
        Ok(Self {
            entity_id,
            entity_type,
            lat: position.lat,
            lon: position.lon,
            altitude_m: position.altitude_m,
            heading_deg: 0.0,
            speed_ms: 0.0,
            pattern: None,
            metadata: Metadata::new(),
            created_at: now,
            last_update: now,
        })
    }

    #[must_use]
    pub fn with_motion(mut self, motion: Motion) -> Self {
        self.heading_deg = normalize_heading(motion.heading_deg);
        self.speed_ms = motion.speed_ms.max(0.0);
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: MovementPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.entity_id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn position(&self) -> GeoPosition {
        GeoPosition::new(self.lat, self.lon, self.altitude_m)
    }

    pub fn motion(&self) -> Motion {
        Motion {
            heading_deg: self.heading_deg,
            speed_ms: self.speed_ms,
        }
    }

    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            lat: self.lat,
            lon: self.lon,
            altitude_m: self.altitude_m,
            heading_deg: self.heading_deg,
            speed_ms: self.speed_ms,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn pattern(&self) -> Option<&MovementPattern> {
        self.pattern.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Id of the formation leader this entity follows, if any.
    pub fn leader_id(&self) -> Option<&str> {
        self.pattern.as_ref().and_then(MovementPattern::leader_id)
    }

    /// Move to a new position; `None` keeps the current altitude.
    pub fn update_position(&mut self, lat: f64, lon: f64, altitude_m: Option<f64>, now: DateTime<Utc>) {
        (self.lat, self.lon) = normalize_position(lat, lon);
        if let Some(alt) = altitude_m {
            self.altitude_m = alt;
        }
        self.touch(now);
    }

    pub fn update_motion(&mut self, heading_deg: f64, speed_ms: f64, now: DateTime<Utc>) {
        self.heading_deg = normalize_heading(heading_deg);
        self.speed_ms = speed_ms.max(0.0);
        self.touch(now);
    }

    /// Advance one tick through the movement pattern.
    ///
    /// `leader` carries the resolved leader state for formation followers.
    /// Entities without a pattern stay where they are.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        delta_time: f64,
        now: DateTime<Utc>,
        leader: Option<Kinematics>,
        rng: &mut R,
    ) -> Result<()> {
        if !delta_time.is_finite() || delta_time < 0.0 {
            return Err(SimulationError::NegativeDeltaTime(delta_time));
        }

        let current = self.kinematics();
        let Some(pattern) = self.pattern.as_mut() else {
            return Ok(());
        };

        let next = pattern.update(current, delta_time, leader, rng);
        self.update_position(next.lat, next.lon, Some(next.altitude_m), now);
        self.update_motion(next.heading_deg, next.speed_ms, now);
        Ok(())
    }

    /// Serializable summary of the current state.
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: self.entity_id.clone(),
            entity_type: self.entity_type,
            position: self.position(),
            motion: self.motion(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            last_update: self.last_update,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        // Monotonic even if the caller's clock lags creation time
        self.last_update = self.last_update.max(now);
    }
}
