//! fleet-provision — reconcile a tagged EC2 fleet into an H-Store cluster.
//!
//! `start_cluster` chains the pieces in dependency order:
//!
//! ```text
//! Topology::from_config ─▶ Inventory::query ─▶ ensure_capacity ─▶ order_head_first ─▶ bootstrap
//!                                                 │
//!                                                 └─ ReadinessProber for every start/launch
//! ```
//!
//! Nothing is cached between operations. Each entry point re-queries the
//! provider, and roles are persisted only as provider tags, so every
//! operation is safe to re-run against a partially modified fleet.

pub mod bootstrap;
pub mod fleet;
pub mod inventory;
pub mod lifecycle;
pub mod roles;

pub use fleet::{ClusterReport, Fleet};
pub use inventory::Inventory;
pub use lifecycle::{CapacityPlan, CapacityReport, HeadPlan, plan_capacity};
pub use roles::{assign_roles, find_head, order_head_first};
