//! Inventory reconciler: the live view of the fleet.

use tracing::debug;

use fleet_core::{CloudInstance, CloudProvider, FleetResult, InstanceState};

/// Cluster instances as the provider reports them right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Every non-terminated instance following the naming convention.
    pub all: Vec<CloudInstance>,
    /// The subset of `all` that is running.
    pub running: Vec<CloudInstance>,
    /// Highest sequence number in use, terminated instances included.
    pub max_sequence: Option<u32>,
}

impl Inventory {
    /// Query the provider and classify cluster instances.
    pub async fn query<P: CloudProvider>(provider: &P, prefix: &str) -> FleetResult<Self> {
        let instances = provider.list_instances().await?;
        let inventory = Self::from_instances(instances, prefix);
        debug!(
            all = inventory.all.len(),
            running = inventory.running.len(),
            "inventory queried"
        );
        Ok(inventory)
    }

    /// Classify a provider listing. Instances outside the `<prefix>-`
    /// naming convention are ignored.
    pub fn from_instances(instances: Vec<CloudInstance>, prefix: &str) -> Self {
        let ours: Vec<CloudInstance> = instances
            .into_iter()
            .filter(|i| i.matches_prefix(prefix))
            .collect();

        // Terminated instances keep their name tag for a while, so their
        // sequence numbers stay reserved.
        let max_sequence = ours.iter().filter_map(|i| i.sequence(prefix)).max();

        let all: Vec<CloudInstance> = ours
            .into_iter()
            .filter(|i| i.state != InstanceState::Terminated)
            .collect();
        let running = all.iter().filter(|i| i.is_running()).cloned().collect();

        Self {
            all,
            running,
            max_sequence,
        }
    }

    /// Stopped instances that can be restarted, in inventory order.
    pub fn stopped(&self) -> impl Iterator<Item = &CloudInstance> {
        self.all.iter().filter(|i| i.state == InstanceState::Stopped)
    }

    /// Sequence number for the next launched instance.
    pub fn next_sequence(&self) -> u32 {
        self.max_sequence.map_or(0, |n| n + 1)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.iter().any(|i| i.id == id)
    }
}
