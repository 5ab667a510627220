//! Common types for Tether: errors, events, resource sources, telemetry

#![deny(missing_docs)]

pub mod error;
pub mod events;
pub mod sources;
pub mod telemetry;

pub use error::{Error, RefKind};
pub use events::{pod_object_ref, EventSink};
pub use sources::{ResourceSource, SourceError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The distinguished namespace whose master services are always projected
/// into every pod's environment
pub const MASTER_SERVICE_NAMESPACE: &str = "default";

/// Names of the master services (currently the singleton `kubernetes`);
/// these stay visible even when a pod disables service links
pub const MASTER_SERVICES: &[&str] = &["kubernetes"];
