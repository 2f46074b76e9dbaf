//! Benchmark placement: sites and partitions onto running instances.

use fleet_core::{CloudInstance, FleetError, FleetResult, Topology};

/// One database site and the partitions it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePlacement {
    /// Private address of the hosting instance.
    pub host: String,
    pub site_id: u32,
    pub first_partition: u32,
    /// Inclusive.
    pub last_partition: u32,
}

impl SitePlacement {
    /// `address:siteId:first[-last]`, with the range omitted for a
    /// single partition.
    pub fn descriptor(&self) -> String {
        if self.first_partition == self.last_partition {
            format!("{}:{}:{}", self.host, self.site_id, self.first_partition)
        } else {
            format!(
                "{}:{}:{}-{}",
                self.host, self.site_id, self.first_partition, self.last_partition
            )
        }
    }

    pub fn width(&self) -> u32 {
        self.last_partition - self.first_partition + 1
    }
}

/// Where every site and benchmark client runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkPlacement {
    /// Private address of the coordinator (the head).
    pub coordinator: String,
    pub sites: Vec<SitePlacement>,
    /// Private addresses of the client pool.
    pub clients: Vec<String>,
}

impl BenchmarkPlacement {
    /// Comma-joined site descriptors.
    pub fn hosts_arg(&self) -> String {
        self.sites
            .iter()
            .map(SitePlacement::descriptor)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn clients_arg(&self) -> String {
        self.clients.join(",")
    }

    /// Total partitions placed.
    pub fn partition_count(&self) -> u32 {
        self.sites.iter().map(SitePlacement::width).sum()
    }
}

/// Contiguous inclusive ranges of width `per_site` covering
/// `[0, partition_count)`. The last range may be narrower.
pub fn partition_ranges(partition_count: u32, per_site: u32) -> Vec<(u32, u32)> {
    if per_site == 0 {
        return Vec::new();
    }
    (0..partition_count)
        .step_by(per_site as usize)
        .map(|first| (first, partition_count.min(first + per_site) - 1))
        .collect()
}

/// Place sites on the first `host_count` instances of the head-first
/// `running` list; every instance after them joins the client pool.
pub fn place(running: &[CloudInstance], topology: &Topology) -> FleetResult<BenchmarkPlacement> {
    let needed = topology.required_instances();
    if running.len() < needed {
        return Err(FleetError::Capacity {
            needed,
            available: running.len(),
        });
    }

    let address = |inst: &CloudInstance| {
        inst.private_host()
            .map(str::to_string)
            .ok_or_else(|| FleetError::Provider(format!("instance {} has no private address", inst.label())))
    };

    let hosts = &running[..topology.host_count as usize];
    let mut sites = Vec::with_capacity(topology.site_count as usize);
    for (site_id, (first, last)) in partition_ranges(topology.partition_count, topology.partitions_per_site)
        .into_iter()
        .enumerate()
    {
        let site_id = site_id as u32;
        let inst = &hosts[(site_id / topology.sites_per_host) as usize];
        sites.push(SitePlacement {
            host: address(inst)?,
            site_id,
            first_partition: first,
            last_partition: last,
        });
    }

    let coordinator = address(&running[0])?;
    let clients = running[hosts.len()..]
        .iter()
        .map(address)
        .collect::<FleetResult<Vec<_>>>()?;

    Ok(BenchmarkPlacement {
        coordinator,
        sites,
        clients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{InstanceState, plan};

    fn running(n: usize) -> Vec<CloudInstance> {
        (0..n)
            .map(|i| CloudInstance {
                id: format!("i-{i}"),
                name: Some(format!("hstore-{i:02}")),
                role: None,
                state: InstanceState::Running,
                instance_type: "m1.xlarge".to_string(),
                public_address: Some(format!("ec2-{i}.amazonaws.com")),
                private_address: Some(format!("10.0.0.{i}")),
            })
            .collect()
    }

    #[test]
    fn ranges_for_uneven_split() {
        assert_eq!(partition_ranges(10, 4), vec![(0, 3), (4, 7), (8, 9)]);
        assert_eq!(partition_ranges(4, 4), vec![(0, 3)]);
        assert_eq!(partition_ranges(3, 1), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn ranges_are_exhaustive() {
        for partitions in 1..=40 {
            for per_site in 1..=9 {
                let ranges = partition_ranges(partitions, per_site);
                let width: u32 = ranges.iter().map(|(a, b)| b - a + 1).sum();
                assert_eq!(width, partitions, "({partitions}, {per_site})");
                assert_eq!(ranges[0].0, 0);
                for pair in ranges.windows(2) {
                    assert_eq!(pair[0].1 + 1, pair[1].0);
                }
                let expected_sites = partitions.div_ceil(per_site);
                assert_eq!(ranges.len() as u32, expected_sites);
            }
        }
    }

    #[test]
    fn ten_partitions_over_three_sites() {
        let topology = plan(10, 4, 1, 1).unwrap();
        let placement = place(&running(4), &topology).unwrap();
        assert_eq!(placement.hosts_arg(), "10.0.0.0:0:0-3,10.0.0.1:1:4-7,10.0.0.2:2:8-9");
        assert_eq!(placement.clients, vec!["10.0.0.3"]);
        assert_eq!(placement.coordinator, "10.0.0.0");
        assert_eq!(placement.partition_count(), 10);
    }

    #[test]
    fn several_sites_share_a_host() {
        let topology = plan(6, 2, 2, 0).unwrap();
        let placement = place(&running(2), &topology).unwrap();
        assert_eq!(
            placement.hosts_arg(),
            "10.0.0.0:0:0-1,10.0.0.0:1:2-3,10.0.0.1:2:4-5"
        );
        assert!(placement.clients.is_empty());
    }

    #[test]
    fn single_partition_sites_omit_range() {
        let topology = plan(2, 1, 1, 0).unwrap();
        let placement = place(&running(2), &topology).unwrap();
        assert_eq!(placement.hosts_arg(), "10.0.0.0:0:0,10.0.0.1:1:1");
    }

    #[test]
    fn surplus_instances_join_client_pool() {
        let topology = plan(4, 4, 1, 1).unwrap();
        let placement = place(&running(3), &topology).unwrap();
        assert_eq!(placement.clients_arg(), "10.0.0.1,10.0.0.2");
    }

    #[test]
    fn too_few_instances_is_capacity_error() {
        let topology = plan(16, 4, 1, 1).unwrap();
        match place(&running(3), &topology) {
            Err(FleetError::Capacity { needed, available }) => {
                assert_eq!(needed, 5);
                assert_eq!(available, 3);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
    }

    #[test]
    fn placement_width_matches_partition_count_for_many_topologies() {
        for partitions in 1..=24 {
            for per_site in 1..=5 {
                for per_host in 1..=3 {
                    let topology = plan(partitions, per_site, per_host, 0).unwrap();
                    let placement = place(&running(topology.host_count as usize), &topology).unwrap();
                    assert_eq!(placement.partition_count(), partitions);
                    assert_eq!(placement.sites.len() as u32, topology.site_count);
                }
            }
        }
    }
}
