//! fleet-bench — run H-Store benchmarks on a reconciled fleet.
//!
//! `place` maps the head-first running set onto `host:site:partitions`
//! descriptors and a client pool. `BenchmarkDriver` writes the two
//! properties files, triggers the run, and pulls back trace artifacts.

pub mod driver;
pub mod placement;

pub use driver::{BenchmarkDriver, BenchmarkOutcome, BenchmarkRequest, ConfChanges, DEFAULT_PROJECTS};
pub use placement::{BenchmarkPlacement, SitePlacement, partition_ranges, place};
