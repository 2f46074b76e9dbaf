//! fleet-health — readiness probing for fleet instances.
//!
//! An instance is only handed to role assignment or benchmark placement
//! once it has cleared both readiness phases:
//!
//! ```text
//! Pending ──(provider reports running)──▶ Running ──(TCP connect ok)──▶ Reachable
//!    │                                      │
//!    └──────────── budget exhausted ────────┴──────────▶ Failed
//! ```
//!
//! Both phases are bounded loops built on [`retry::retry_bounded`]. The
//! cloud-status phase polls every 5s up to 6 times; the reachability
//! phase tries a bare TCP connection to the administrative port with a
//! 10s timeout, up to 5 times, 10s apart.

pub mod checker;
pub mod prober;
pub mod retry;

pub use checker::{NetworkProbe, ProbeResult, TcpProbe};
pub use prober::{ReadinessConfig, ReadinessProber, ReadinessState};
pub use retry::{RetryPolicy, retry_bounded};
