//! Movement patterns driving entity kinematics.
//!
//! Each entity owns at most one pattern instance. Patterns carry their own
//! progress state (waypoint index, phase angle, maneuver timer) and are
//! dispatched through the closed [`MovementPattern`] enum.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geo::{
    bearing_deg, destination, distance_m, normalize_heading, offset_by_meters,
};

/// Climb/descent rate used when approaching a waypoint altitude (m/s).
pub const WAYPOINT_CLIMB_RATE_MS: f64 = 10.0;

/// Speed multiplier applied while an evasive maneuver is in progress.
pub const EVASIVE_SPEED_BOOST: f64 = 1.5;

/// Bounds of a randomly sampled maneuver duration (seconds).
pub const EVASIVE_MANEUVER_SECS: (f64, f64) = (2.0, 5.0);

/// Full kinematic state exchanged between an entity and its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub heading_deg: f64,
    pub speed_ms: f64,
}

/// Movement strategy variants.
#[derive(Debug, Clone, PartialEq)]
pub enum MovementPattern {
    Waypoint(WaypointPattern),
    Patrol(PatrolPattern),
    RandomWalk(RandomWalkPattern),
    Formation(FormationPattern),
    Evasive(EvasivePattern),
}

impl MovementPattern {
    /// Compute the next kinematic state.
    ///
    /// `leader` is the resolved state of a formation leader and is ignored by
    /// every other variant. A zero `delta_time` returns `current` unchanged;
    /// callers reject negative values before reaching this point.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        current: Kinematics,
        delta_time: f64,
        leader: Option<Kinematics>,
        rng: &mut R,
    ) -> Kinematics {
        debug_assert!(delta_time >= 0.0, "negative delta_time reached a pattern");
        if !(delta_time > 0.0) {
            return current;
        }

        match self {
            Self::Waypoint(p) => p.update(current, delta_time),
            Self::Patrol(p) => p.update(current, delta_time),
            Self::RandomWalk(p) => p.update(current, delta_time, rng),
            Self::Formation(p) => p.update(current, leader),
            Self::Evasive(p) => p.update(current, delta_time, rng),
        }
    }

    /// Entity id this pattern follows, if any.
    pub fn leader_id(&self) -> Option<&str> {
        match self {
            Self::Formation(p) => Some(p.leader_id.as_str()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Waypoint(_) => "waypoint",
            Self::Patrol(_) => "patrol",
            Self::RandomWalk(_) => "random_walk",
            Self::Formation(_) => "formation",
            Self::Evasive(_) => "evasive",
        }
    }
}

fn require_finite_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_field(field, format!("must be finite and >= 0, got {value}")))
    }
}

fn require_turn_limit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=360.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_field(field, format!("must be within [0, 360], got {value}")))
    }
}

/// Uniform sample in `[-limit, limit]` without forming the range width.
fn symmetric<R: Rng + ?Sized>(rng: &mut R, limit: f64) -> f64 {
    rng.gen_range(-1.0..=1.0) * limit
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_field(field, format!("must be > 0, got {value}")))
    }
}

// =============================================================================
// WAYPOINT
// =============================================================================

/// Route point; a missing altitude keeps the entity's current altitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude_m: Option<f64>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64, altitude_m: Option<f64>) -> Self {
        Self {
            lat,
            lon,
            altitude_m,
        }
    }
}

/// Fly an ordered route at fixed speed.
#[derive(Debug, Clone, PartialEq)]
pub struct WaypointPattern {
    waypoints: Vec<Waypoint>,
    speed_ms: f64,
    arrival_threshold_m: f64,
    loop_route: bool,
    current_index: usize,
}

impl WaypointPattern {
    pub fn new(
        waypoints: Vec<Waypoint>,
        speed_ms: f64,
        arrival_threshold_m: f64,
        loop_route: bool,
    ) -> Result<Self, ConfigError> {
        require_finite_non_negative("speed_ms", speed_ms)?;
        require_finite_non_negative("arrival_threshold_m", arrival_threshold_m)?;

        Ok(Self {
            waypoints,
            speed_ms,
            arrival_threshold_m,
            loop_route,
            current_index: 0,
        })
    }

    /// Index of the waypoint currently being approached.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    fn update(&mut self, current: Kinematics, delta_time: f64) -> Kinematics {
        let Some(mut target) = self.waypoints.get(self.current_index).copied() else {
            return Kinematics {
                speed_ms: 0.0,
                ..current
            };
        };

        let mut distance = distance_m(current.lat, current.lon, target.lat, target.lon);

        if distance <= self.arrival_threshold_m {
            self.current_index += 1;
            if self.current_index >= self.waypoints.len() {
                if self.loop_route {
                    self.current_index = 0;
                } else {
                    // Hold at the final waypoint
                    self.current_index = self.waypoints.len() - 1;
                    return Kinematics {
                        lat: target.lat,
                        lon: target.lon,
                        altitude_m: target.altitude_m.unwrap_or(current.altitude_m),
                        heading_deg: current.heading_deg,
                        speed_ms: 0.0,
                    };
                }
            }
            target = self.waypoints[self.current_index];
            distance = distance_m(current.lat, current.lon, target.lat, target.lon);
        }

        let bearing = bearing_deg(current.lat, current.lon, target.lat, target.lon);
        let travel = (self.speed_ms * delta_time).min(distance);
        let (lat, lon) = destination(current.lat, current.lon, bearing, travel);

        let target_alt = target.altitude_m.unwrap_or(current.altitude_m);
        let alt_diff = target_alt - current.altitude_m;
        let alt_change = alt_diff.abs().min(WAYPOINT_CLIMB_RATE_MS * delta_time) * alt_diff.signum();

        Kinematics {
            lat,
            lon,
            altitude_m: current.altitude_m + alt_change,
            heading_deg: bearing,
            speed_ms: self.speed_ms,
        }
    }
}

// =============================================================================
// PATROL
// =============================================================================

/// Patrol track shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatrolShape {
    #[default]
    Circular,
    Racetrack,
    #[serde(alias = "figure8")]
    FigureEight,
}

/// Racetrack leg derived from the phase quartile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacetrackSegment {
    Straight,
    Turn,
}

/// Orbit a fixed center point.
#[derive(Debug, Clone, PartialEq)]
pub struct PatrolPattern {
    center_lat: f64,
    center_lon: f64,
    shape: PatrolShape,
    radius_m: f64,
    speed_ms: f64,
    altitude_m: f64,
    /// Phase angle in radians
    phase: f64,
}

impl PatrolPattern {
    pub fn new(
        center_lat: f64,
        center_lon: f64,
        shape: PatrolShape,
        radius_m: f64,
        speed_ms: f64,
        altitude_m: f64,
    ) -> Result<Self, ConfigError> {
        require_positive("radius_m", radius_m)?;
        require_finite_non_negative("speed_ms", speed_ms)?;

        Ok(Self {
            center_lat,
            center_lon,
            shape,
            radius_m,
            speed_ms,
            altitude_m,
            phase: 0.0,
        })
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn shape(&self) -> PatrolShape {
        self.shape
    }

    /// Current racetrack leg; `None` for the other shapes.
    pub fn segment(&self) -> Option<RacetrackSegment> {
        if self.shape != PatrolShape::Racetrack {
            return None;
        }
        let fraction = self.phase.rem_euclid(std::f64::consts::TAU) / std::f64::consts::TAU;
        if !(0.25..=0.75).contains(&fraction) {
            Some(RacetrackSegment::Straight)
        } else {
            Some(RacetrackSegment::Turn)
        }
    }

    fn update(&mut self, _current: Kinematics, delta_time: f64) -> Kinematics {
        self.phase += self.speed_ms / self.radius_m * delta_time;

        let (north, east) = match self.shape {
            PatrolShape::Circular | PatrolShape::Racetrack => (self.phase.cos(), self.phase.sin()),
            PatrolShape::FigureEight => (self.phase.sin(), (2.0 * self.phase).sin()),
        };

        let (lat, lon) = offset_by_meters(
            self.center_lat,
            self.center_lon,
            self.radius_m * north,
            self.radius_m * east,
        );

        Kinematics {
            lat,
            lon,
            altitude_m: self.altitude_m,
            heading_deg: normalize_heading(self.phase.to_degrees() + 90.0),
            speed_ms: self.speed_ms,
        }
    }
}

// =============================================================================
// RANDOM WALK
// =============================================================================

/// Wander with bounded heading changes, optionally fenced around an origin.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomWalkPattern {
    origin_lat: f64,
    origin_lon: f64,
    speed_ms: f64,
    max_deviation_deg: f64,
    boundary_radius_m: Option<f64>,
    altitude_m: f64,
    /// Sampled on first update when not supplied
    heading_deg: Option<f64>,
}

impl RandomWalkPattern {
    pub fn new(
        origin_lat: f64,
        origin_lon: f64,
        speed_ms: f64,
        max_deviation_deg: f64,
        boundary_radius_m: Option<f64>,
        altitude_m: f64,
    ) -> Result<Self, ConfigError> {
        require_finite_non_negative("speed_ms", speed_ms)?;
        require_turn_limit("max_deviation_deg", max_deviation_deg)?;
        if let Some(radius) = boundary_radius_m {
            require_positive("boundary_radius_m", radius)?;
        }

        Ok(Self {
            origin_lat,
            origin_lon,
            speed_ms,
            max_deviation_deg,
            boundary_radius_m,
            altitude_m,
            heading_deg: None,
        })
    }

    /// Fix the initial heading instead of sampling it.
    #[must_use]
    pub fn with_initial_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(normalize_heading(heading_deg));
        self
    }

    fn update<R: Rng + ?Sized>(
        &mut self,
        current: Kinematics,
        delta_time: f64,
        rng: &mut R,
    ) -> Kinematics {
        let base = match self.heading_deg {
            Some(h) => h,
            None => rng.gen_range(0.0..360.0),
        };
        let deviation = symmetric(rng, self.max_deviation_deg);
        let mut heading = normalize_heading(base + deviation);

        let travel = self.speed_ms * delta_time;
        let (mut lat, mut lon) = destination(current.lat, current.lon, heading, travel);

        if let Some(radius) = self.boundary_radius_m {
            if distance_m(self.origin_lat, self.origin_lon, lat, lon) > radius {
                heading = bearing_deg(current.lat, current.lon, self.origin_lat, self.origin_lon);
                (lat, lon) = destination(current.lat, current.lon, heading, travel);
            }
        }

        self.heading_deg = Some(heading);

        Kinematics {
            lat,
            lon,
            altitude_m: self.altitude_m,
            heading_deg: heading,
            speed_ms: self.speed_ms,
        }
    }
}

// =============================================================================
// FORMATION
// =============================================================================

/// Hold a fixed local offset from a leader entity.
///
/// The leader is referenced by id and resolved by the owner every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FormationPattern {
    leader_id: String,
    offset_north_m: f64,
    offset_east_m: f64,
    offset_altitude_m: f64,
}

impl FormationPattern {
    pub fn new(
        leader_id: impl Into<String>,
        offset_north_m: f64,
        offset_east_m: f64,
        offset_altitude_m: f64,
    ) -> Self {
        Self {
            leader_id: leader_id.into(),
            offset_north_m,
            offset_east_m,
            offset_altitude_m,
        }
    }

    pub fn leader_id(&self) -> &str {
        &self.leader_id
    }

    fn update(&self, current: Kinematics, leader: Option<Kinematics>) -> Kinematics {
        let Some(leader) = leader else {
            return Kinematics {
                speed_ms: 0.0,
                ..current
            };
        };

        let (lat, lon) = offset_by_meters(
            leader.lat,
            leader.lon,
            self.offset_north_m,
            self.offset_east_m,
        );

        Kinematics {
            lat,
            lon,
            altitude_m: leader.altitude_m + self.offset_altitude_m,
            heading_deg: leader.heading_deg,
            speed_ms: leader.speed_ms,
        }
    }
}

// =============================================================================
// EVASIVE
// =============================================================================

/// Evasive pattern state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvasiveState {
    Cruising,
    Maneuvering { remaining_s: f64 },
}

/// Cruise straight, breaking into randomized maneuver bursts.
#[derive(Debug, Clone, PartialEq)]
pub struct EvasivePattern {
    base_speed_ms: f64,
    maneuver_probability: f64,
    max_altitude_change_m: f64,
    max_heading_change_deg: f64,
    state: EvasiveState,
}

impl EvasivePattern {
    pub fn new(
        base_speed_ms: f64,
        maneuver_probability: f64,
        max_altitude_change_m: f64,
        max_heading_change_deg: f64,
    ) -> Result<Self, ConfigError> {
        require_finite_non_negative("base_speed_ms", base_speed_ms)?;
        require_finite_non_negative("max_altitude_change_m", max_altitude_change_m)?;
        require_turn_limit("max_heading_change_deg", max_heading_change_deg)?;
        if !(0.0..=1.0).contains(&maneuver_probability) {
            return Err(ConfigError::invalid_field(
                "maneuver_probability",
                format!("must be within [0, 1], got {maneuver_probability}"),
            ));
        }

        Ok(Self {
            base_speed_ms,
            maneuver_probability,
            max_altitude_change_m,
            max_heading_change_deg,
            state: EvasiveState::Cruising,
        })
    }

    pub fn state(&self) -> EvasiveState {
        self.state
    }

    fn update<R: Rng + ?Sized>(
        &mut self,
        current: Kinematics,
        delta_time: f64,
        rng: &mut R,
    ) -> Kinematics {
        if self.state == EvasiveState::Cruising && rng.r#gen::<f64>() < self.maneuver_probability {
            let (min, max) = EVASIVE_MANEUVER_SECS;
            self.state = EvasiveState::Maneuvering {
                remaining_s: rng.gen_range(min..=max),
            };
        }

        let maneuvering = match &mut self.state {
            EvasiveState::Maneuvering { remaining_s } if *remaining_s > 0.0 => {
                *remaining_s -= delta_time;
                true
            }
            _ => false,
        };

        let (heading, altitude, speed) = if maneuvering {
            let heading_change = symmetric(rng, self.max_heading_change_deg);
            let altitude_change = symmetric(rng, self.max_altitude_change_m);
            (
                normalize_heading(current.heading_deg + heading_change),
                (current.altitude_m + altitude_change * delta_time).max(0.0),
                self.base_speed_ms * EVASIVE_SPEED_BOOST,
            )
        } else {
            // Expired maneuvers fall back to cruising on the held heading/altitude
            self.state = EvasiveState::Cruising;
            (current.heading_deg, current.altitude_m, self.base_speed_ms)
        };

        let (lat, lon) = destination(current.lat, current.lon, heading, speed * delta_time);

        Kinematics {
            lat,
            lon,
            altitude_m: altitude,
            heading_deg: heading,
            speed_ms: speed,
        }
    }
}
