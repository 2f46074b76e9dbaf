//! Readiness prober: blocks until an instance is running and reachable.

use std::time::Duration;

use tracing::{debug, info, warn};

use fleet_core::config::Ec2Config;
use fleet_core::{CloudInstance, CloudProvider, FleetError, FleetResult, InstanceState};

use crate::checker::{NetworkProbe, ProbeResult, TcpProbe};
use crate::retry::{RetryPolicy, retry_bounded};

/// Per-instance readiness phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Waiting for the provider to report `running`.
    Pending,
    /// Provider reports `running`; network probe in progress.
    Running,
    /// A network probe succeeded.
    Reachable,
    /// A retry budget was exhausted in either phase.
    Failed,
}

/// Budgets for both readiness phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub status: RetryPolicy,
    pub reachability: RetryPolicy,
    pub admin_port: u16,
}

impl ReadinessConfig {
    pub fn from_config(ec2: &Ec2Config) -> Self {
        Self {
            status: RetryPolicy::new(
                ec2.status_poll_attempts,
                Duration::from_secs(ec2.status_poll_interval_secs),
            ),
            reachability: RetryPolicy::new(ec2.probe_attempts, Duration::from_secs(ec2.probe_interval_secs))
                .with_attempt_timeout(Duration::from_secs(ec2.probe_timeout_secs)),
            admin_port: ec2.ssh_port,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self::from_config(&Ec2Config::default())
    }
}

/// Drives instances through `Pending → Running → Reachable`.
#[derive(Debug, Clone)]
pub struct ReadinessProber<N = TcpProbe> {
    config: ReadinessConfig,
    network: N,
}

impl ReadinessProber<TcpProbe> {
    pub fn new(config: ReadinessConfig) -> Self {
        Self {
            config,
            network: TcpProbe,
        }
    }
}

impl<N: NetworkProbe> ReadinessProber<N> {
    /// Create a prober with a custom network check.
    pub fn with_probe(config: ReadinessConfig, network: N) -> Self {
        Self { config, network }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Both phases: cloud-reported `running`, then network-reachable.
    ///
    /// Returns the `running` snapshot, which carries the addresses the
    /// provider assigned during boot.
    pub async fn wait_until_ready<P: CloudProvider>(
        &self,
        provider: &P,
        instance: &CloudInstance,
    ) -> FleetResult<CloudInstance> {
        let mut state = ReadinessState::Pending;
        debug!(instance = %instance.label(), ?state, "readiness wait starting");

        let running = match self.wait_for_state(provider, instance, InstanceState::Running).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                state = ReadinessState::Failed;
                warn!(instance = %instance.label(), ?state, error = %e, "instance never reached running");
                return Err(e);
            }
        };
        state = ReadinessState::Running;
        debug!(instance = %running.label(), ?state, "provider reports running");

        if let Err(e) = self.wait_until_reachable(&running).await {
            state = ReadinessState::Failed;
            warn!(instance = %running.label(), ?state, error = %e, "instance never became reachable");
            return Err(e);
        }
        state = ReadinessState::Reachable;
        info!(instance = %running.label(), ?state, "instance is ready");

        Ok(running)
    }

    /// Poll the provider until the instance reports `target`.
    pub async fn wait_for_state<P: CloudProvider>(
        &self,
        provider: &P,
        instance: &CloudInstance,
        target: InstanceState,
    ) -> FleetResult<CloudInstance> {
        let id = instance.id.as_str();
        retry_bounded(
            &self.config.status,
            |attempt| async move {
                match provider.describe_instance(id).await? {
                    Some(snapshot) if snapshot.state == target => Ok::<_, FleetError>(Some(snapshot)),
                    Some(snapshot) => {
                        debug!(instance = %id, attempt, current = %snapshot.state, %target, "waiting for state");
                        Ok(None)
                    }
                    // Terminated instances eventually drop out of listings.
                    None if target == InstanceState::Terminated => Ok(Some(CloudInstance {
                        state: InstanceState::Terminated,
                        ..instance.clone()
                    })),
                    None => Err(FleetError::Provider(format!("instance {id} disappeared"))),
                }
            },
            || FleetError::ProvisioningTimeout {
                instance: instance.label().to_string(),
                state: target,
            },
        )
        .await
    }

    /// Probe the administrative port until a connection succeeds.
    pub async fn wait_until_reachable(&self, instance: &CloudInstance) -> FleetResult<()> {
        let host = instance
            .public_host()
            .ok_or_else(|| FleetError::Provider(format!("instance {} has no address", instance.id)))?;
        let port = self.config.admin_port;
        let timeout = self
            .config
            .reachability
            .attempt_timeout
            .unwrap_or(Duration::from_secs(10));

        info!(
            instance = %instance.label(),
            %host,
            tries = self.config.reachability.max_attempts,
            "testing whether instance is reachable"
        );

        retry_bounded(
            &self.config.reachability,
            |attempt| async move {
                match self.network.probe(host, port, timeout).await {
                    ProbeResult::Reachable => Ok::<_, FleetError>(Some(())),
                    ProbeResult::Failed => {
                        debug!(%host, port, attempt, "not reachable yet");
                        Ok(None)
                    }
                }
            },
            || FleetError::ReachabilityTimeout {
                host: host.to_string(),
            },
        )
        .await
    }
}
