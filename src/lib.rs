//! geosource - Switchable positioning sources with timeout arbitration
//!
//! This library provides position and satellite update streams from
//! pluggable backend sources, with a coordination layer that enforces
//! single-request deadlines, watches continuous updates for staleness,
//! and lets the active source be swapped at runtime without disturbing
//! subscribers.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides the facade:
//!
//! ```ignore
//! use geosource::service::PositioningService;
//! use geosource::source::SourceConfig;
//! use std::time::Duration;
//!
//! let service = PositioningService::with_default_source(&SourceConfig::new());
//! let mut events = service.subscribe();
//!
//! service.set_update_interval(Duration::from_secs(1));
//! service.start();
//!
//! while let Ok(event) = events.recv().await {
//!     // PositionUpdated, SatellitesInViewUpdated, ...
//! }
//! ```
//!
//! Lower layers are usable on their own: [`source`] defines the backend
//! contract and built-in sources, [`coordinator`] the timeout state
//! machine, and [`satellites`] the snapshot-diffing satellite model.

pub mod coordinator;
pub mod logging;
pub mod position;
pub mod satellites;
pub mod service;
pub mod source;

/// Version of the geosource library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
