//! Topology planner.
//!
//! Turns the partition/site/host ratios into concrete instance counts:
//!
//! ```text
//! site_count = ceil(partitions / partitions_per_site)
//! host_count = ceil(site_count / sites_per_host)
//! ```

use serde::{Deserialize, Serialize};

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};

/// Desired cluster shape derived from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub host_count: u32,
    pub site_count: u32,
    pub partition_count: u32,
    pub client_count: u32,
    pub partitions_per_site: u32,
    pub sites_per_host: u32,
}

impl Topology {
    /// Plan the topology for the `[site]` and `[client]` groups.
    pub fn from_config(config: &FleetConfig) -> FleetResult<Self> {
        plan(
            config.site.partitions,
            config.site.partitions_per_site,
            config.site.sites_per_host,
            config.client.count,
        )
    }

    /// Instances needed to host every site plus the client pool.
    pub fn required_instances(&self) -> usize {
        self.host_count as usize + self.client_count as usize
    }
}

/// Compute host, site, partition, and client counts.
///
/// Pure and deterministic. Fails if any ratio is zero.
pub fn plan(
    partition_count: u32,
    partitions_per_site: u32,
    sites_per_host: u32,
    client_count: u32,
) -> FleetResult<Topology> {
    if partition_count == 0 {
        return Err(FleetError::config("site.partitions must be positive"));
    }
    if partitions_per_site == 0 {
        return Err(FleetError::config("site.partitions_per_site must be positive"));
    }
    if sites_per_host == 0 {
        return Err(FleetError::config("site.sites_per_host must be positive"));
    }

    let site_count = partition_count.div_ceil(partitions_per_site);
    let host_count = site_count.div_ceil(sites_per_host);

    Ok(Topology {
        host_count,
        site_count,
        partition_count,
        client_count,
        partitions_per_site,
        sites_per_host,
    })
}
