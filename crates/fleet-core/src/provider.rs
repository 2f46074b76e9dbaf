//! Cloud provider collaborator.
//!
//! The fleet never talks to a provider API directly. Everything goes
//! through this trait so reconciliation can be driven against an
//! in-memory fake in tests.

use crate::config::Ec2Config;
use crate::error::FleetResult;
use crate::types::{CloudInstance, InstanceTags};

/// Parameters for a batch launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    pub instance_type: String,
    pub keypair: String,
    pub security_group: String,
    pub placement: String,
}

impl LaunchSpec {
    pub fn from_config(ec2: &Ec2Config) -> Self {
        Self {
            image: ec2.ami.clone(),
            instance_type: ec2.instance_type.clone(),
            keypair: ec2.keypair.clone(),
            security_group: ec2.security_group.clone(),
            placement: ec2.placement.clone(),
        }
    }
}

/// Operations the fleet needs from a cloud provider.
///
/// Every query returns fresh snapshots; implementations must not cache.
#[allow(async_fn_in_trait)]
pub trait CloudProvider {
    /// Every instance visible to the account, in any state.
    async fn list_instances(&self) -> FleetResult<Vec<CloudInstance>>;

    /// Current snapshot of one instance, or `None` if the provider no
    /// longer knows it.
    async fn describe_instance(&self, id: &str) -> FleetResult<Option<CloudInstance>>;

    async fn start_instance(&self, id: &str) -> FleetResult<()>;

    async fn stop_instance(&self, id: &str) -> FleetResult<()>;

    async fn terminate_instance(&self, id: &str) -> FleetResult<()>;

    /// Change the machine type of a stopped instance.
    async fn modify_instance_type(&self, id: &str, instance_type: &str) -> FleetResult<()>;

    /// Launch `count` instances in a single call.
    async fn launch_instances(&self, spec: &LaunchSpec, count: u32) -> FleetResult<Vec<CloudInstance>>;

    async fn apply_tags(&self, id: &str, tags: &InstanceTags) -> FleetResult<()>;

    /// Create the security group if it does not exist. Returns `true` if
    /// it was created.
    async fn ensure_security_group(&self, name: &str, admin_port: u16) -> FleetResult<bool>;
}
