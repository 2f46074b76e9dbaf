//! fleet-core — shared types for the H-Store EC2 fleet tooling.
//!
//! Holds the typed configuration, the instance snapshot types, the
//! topology planner, the error taxonomy, and the two collaborator traits
//! (`CloudProvider`, `RemoteExecutor`) that every other crate is written
//! against.

pub mod config;
pub mod error;
pub mod properties;
pub mod provider;
pub mod remote;
pub mod topology;
pub mod types;

pub use config::FleetConfig;
pub use error::{FleetError, FleetResult};
pub use properties::PropertiesFile;
pub use provider::{CloudProvider, LaunchSpec};
pub use remote::RemoteExecutor;
pub use topology::{Topology, plan};
pub use types::*;
