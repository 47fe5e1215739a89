//! # Lattice Bridge
//!
//! Publishing collaborator for the sensor simulator: formats detections as
//! Lattice entities and delivers them with retries and batching.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SimulationEngine                          │
//! │          (Publisher / MetricsSink trait objects)             │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │    LatticePublisher     │   │      MetricsCollector        │
//! │ (retry, backoff, batch) │   │  (per-sensor counters)       │
//! └─────────────────────────┘   └──────────────────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Transport trait                          │
//! │    HttpTransport (REST worker)  |  MockTransport (no key)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lattice_bridge::{LatticeConfig, LatticePublisher, MockTransport};
//!
//! let config = LatticeConfig::from_env();
//! let publisher = LatticePublisher::new(MockTransport::new(), config.publisher);
//! engine = engine.with_publisher(Box::new(publisher));
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod transport;

pub use config::{LatticeConfig, PublisherConfig};
pub use entity::{LatticeEntity, LatticeMotion, LatticePosition};
pub use error::{LatticeError, Result};
pub use metrics::{MetricsCollector, MetricsSummary, SensorMetrics};
pub use publisher::LatticePublisher;
pub use transport::{HttpTransport, MockTransport, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
