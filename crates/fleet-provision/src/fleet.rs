//! The fleet context and its top-level operations.

use tracing::info;

use fleet_core::{
    CloudInstance, CloudProvider, FleetConfig, FleetError, FleetResult, InstanceId, InstanceState,
    RemoteExecutor, Topology,
};
use fleet_health::{NetworkProbe, ReadinessConfig, ReadinessProber, TcpProbe};

use crate::inventory::Inventory;
use crate::roles::order_head_first;

/// Configuration plus the collaborators every operation runs against.
///
/// Holds no fleet state of its own. Each operation re-queries the
/// provider.
pub struct Fleet<'a, P, R, N = TcpProbe> {
    config: &'a FleetConfig,
    provider: &'a P,
    remote: &'a R,
    prober: ReadinessProber<N>,
}

impl<'a, P, R> Fleet<'a, P, R, TcpProbe> {
    /// Create a fleet that probes reachability over TCP with the
    /// configured budgets.
    pub fn new(config: &'a FleetConfig, provider: &'a P, remote: &'a R) -> Self {
        Self {
            config,
            provider,
            remote,
            prober: ReadinessProber::new(ReadinessConfig::from_config(&config.ec2)),
        }
    }
}

impl<'a, P, R, N> Fleet<'a, P, R, N> {
    pub fn with_prober(config: &'a FleetConfig, provider: &'a P, remote: &'a R, prober: ReadinessProber<N>) -> Self {
        Self {
            config,
            provider,
            remote,
            prober,
        }
    }

    pub fn config(&self) -> &'a FleetConfig {
        self.config
    }

    pub fn provider(&self) -> &'a P {
        self.provider
    }

    pub fn remote(&self) -> &'a R {
        self.remote
    }

    pub fn prober(&self) -> &ReadinessProber<N> {
        &self.prober
    }
}

/// Result of `start_cluster`.
#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub topology: Topology,
    /// Running instances, head first.
    pub instances: Vec<CloudInstance>,
    pub started: Vec<InstanceId>,
    pub head_was_online: bool,
}

impl ClusterReport {
    pub fn head(&self) -> Option<&CloudInstance> {
        self.instances.first()
    }
}

impl<P: CloudProvider, R: RemoteExecutor, N: NetworkProbe> Fleet<'_, P, R, N> {
    /// Bring the cluster up: security group, capacity, then bootstrap the
    /// head followed by every client.
    pub async fn start_cluster(&self) -> FleetResult<ClusterReport> {
        let ec2 = &self.config.ec2;
        if self
            .provider
            .ensure_security_group(&ec2.security_group, ec2.ssh_port)
            .await?
        {
            info!(group = %ec2.security_group, "created security group");
        }

        let topology = Topology::from_config(self.config)?;
        info!(
            hosts = topology.host_count,
            sites = topology.site_count,
            partitions = topology.partition_count,
            clients = topology.client_count,
            "planned topology"
        );

        let capacity = self.ensure_capacity(topology.required_instances()).await?;
        let instances = order_head_first(capacity.running.clone(), &capacity.head_id);
        let Some((head, clients)) = instances.split_first() else {
            return Err(FleetError::config("no running instances after reconciliation"));
        };

        self.setup_env(head).await?;
        self.setup_head(head, !capacity.head_was_online).await?;

        for client in clients {
            self.setup_env(client).await?;
            let reboot = capacity.newly_started(&client.id) && !capacity.head_was_online;
            self.setup_client(client, head, reboot).await?;
        }

        info!(instances = instances.len(), head = %head.label(), "cluster is up");
        Ok(ClusterReport {
            topology,
            instances,
            started: capacity.started,
            head_was_online: capacity.head_was_online,
        })
    }

    /// Stop (or terminate) every running cluster instance and wait for
    /// the provider to confirm. Returns how many were affected.
    pub async fn stop_cluster(&self, terminate: bool) -> FleetResult<usize> {
        let inventory = Inventory::query(self.provider, &self.config.ec2.name_prefix).await?;
        if inventory.running.is_empty() {
            info!("no running instances to stop");
            return Ok(0);
        }

        let target = if terminate {
            InstanceState::Terminated
        } else {
            InstanceState::Stopped
        };
        for inst in &inventory.running {
            info!(instance = %inst.label(), %target, "shutting down instance");
            if terminate {
                self.provider.terminate_instance(&inst.id).await?;
            } else {
                self.provider.stop_instance(&inst.id).await?;
            }
        }
        for inst in &inventory.running {
            self.prober.wait_for_state(self.provider, inst, target).await?;
        }

        info!(count = inventory.running.len(), %target, "cluster shut down");
        Ok(inventory.running.len())
    }

    /// `uname -a` from every running instance.
    pub async fn get_env(&self) -> FleetResult<Vec<(String, String)>> {
        let inventory = Inventory::query(self.provider, &self.config.ec2.name_prefix).await?;
        let mut out = Vec::with_capacity(inventory.running.len());
        for inst in &inventory.running {
            let host = remote_host(inst)?;
            let output = self.remote.run(host, "uname -a").await?;
            out.push((host.to_string(), output.trim().to_string()));
        }
        Ok(out)
    }
}

/// Address remote commands are sent to.
pub(crate) fn remote_host(inst: &CloudInstance) -> FleetResult<&str> {
    inst.public_host()
        .ok_or_else(|| FleetError::Provider(format!("instance {} has no address", inst.label())))
}
