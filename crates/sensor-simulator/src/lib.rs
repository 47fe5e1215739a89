//! # Sensor Simulator
//!
//! Time-stepped simulation of moving entities observed by a heterogeneous
//! sensor network.
//!
//! ## Features
//!
//! - Great-circle geometry and coordinate noise
//! - Waypoint, patrol, random-walk, formation and evasive movement
//! - Radar, ADS-B, EO/IR camera and acoustic detection models
//! - Blocking and async run loops with cooperative shutdown
//! - YAML scenario documents

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod engine;
pub mod entity;
pub mod error;
pub mod geo;
pub mod movement;
pub mod scenario;
pub mod sensors;

pub use engine::{EngineSettings, EngineStatus, SimulationEngine, StopHandle, TickReport};
pub use entity::Entity;
pub use error::{ConfigError, Result, SensorError, SimulationError};
pub use movement::{Kinematics, MovementPattern};
pub use scenario::ScenarioConfig;
pub use sensors::{Sensor, SensorModel, SensorPlatform};
