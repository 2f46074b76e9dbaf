//! Instance lifecycle manager: close the gap between required and
//! running capacity.
//!
//! Planning is pure: `plan_capacity` looks at an inventory snapshot and
//! decides what to restart, launch, and retag. `Fleet::ensure_capacity`
//! then executes the plan against the provider and blocks on the
//! readiness prober for every instance it touched.

use tracing::{debug, info, warn};

use fleet_core::{
    CloudInstance, CloudProvider, FleetError, FleetResult, InstanceId, InstanceState, InstanceTags,
    LaunchSpec, RemoteExecutor, Role, instance_name,
};
use fleet_health::NetworkProbe;

use crate::fleet::Fleet;
use crate::inventory::Inventory;
use crate::roles::find_head;

/// How the head role will be held once the plan has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadPlan {
    /// A running instance already carries the tag.
    Running(InstanceId),
    /// A stopped head-tagged instance is restarted.
    Restart(InstanceId),
    /// The first instance of the launch batch is tagged head.
    Launch,
}

/// Actions needed to bring the fleet up to the required size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityPlan {
    pub head: HeadPlan,
    /// Stopped instances to start, head first.
    pub restart: Vec<CloudInstance>,
    /// Tags for each instance of the single launch batch.
    pub launch: Vec<InstanceTags>,
    /// Head-tagged instances that lose the role.
    pub demote: Vec<CloudInstance>,
}

impl CapacityPlan {
    pub fn is_noop(&self) -> bool {
        self.restart.is_empty() && self.launch.is_empty() && self.demote.is_empty()
    }
}

/// Decide which instances to restart and how many to launch.
///
/// `needed = max(0, required - running)`. The head is settled first: a
/// running head is kept, a stopped head is restarted and consumes one
/// unit, and with no usable head one unit is reserved for a launched
/// head even when the running count already satisfies `required`.
/// Stopped instances are preferred over launches for the rest.
pub fn plan_capacity(inventory: &Inventory, required: usize, prefix: &str) -> CapacityPlan {
    let mut needed = required.saturating_sub(inventory.running.len());

    // Only running or stopped instances can hold the role; a head caught
    // mid-transition is demoted and replaced.
    let candidates: Vec<CloudInstance> = inventory
        .all
        .iter()
        .filter(|i| matches!(i.state, InstanceState::Running | InstanceState::Stopped))
        .cloned()
        .collect();
    let chosen = find_head(&candidates).cloned();

    let mut restart = Vec::new();
    let mut reserve = 0;
    let head = match &chosen {
        Some(h) if h.is_running() => HeadPlan::Running(h.id.clone()),
        Some(h) => {
            restart.push(h.clone());
            needed = needed.saturating_sub(1);
            HeadPlan::Restart(h.id.clone())
        }
        None => {
            needed = needed.max(1);
            reserve = 1;
            HeadPlan::Launch
        }
    };

    let demote = inventory
        .all
        .iter()
        .filter(|i| i.is_head() && chosen.as_ref().is_none_or(|h| h.id != i.id))
        .cloned()
        .collect();

    for inst in inventory.stopped() {
        if needed <= reserve {
            break;
        }
        if chosen.as_ref().is_some_and(|h| h.id == inst.id) {
            continue;
        }
        restart.push(inst.clone());
        needed -= 1;
    }

    let first = inventory.next_sequence();
    let launch = (0..needed)
        .map(|i| InstanceTags {
            name: instance_name(prefix, first + i as u32),
            role: if i == 0 && head == HeadPlan::Launch {
                Role::Head
            } else {
                Role::Client
            },
        })
        .collect();

    CapacityPlan {
        head,
        restart,
        launch,
        demote,
    }
}

/// Outcome of `ensure_capacity`.
#[derive(Debug, Clone)]
pub struct CapacityReport {
    /// Every running cluster instance, re-queried after readiness.
    pub running: Vec<CloudInstance>,
    /// Instances started or launched by this call.
    pub started: Vec<InstanceId>,
    pub head_id: InstanceId,
    /// Whether the head was already running before this call.
    pub head_was_online: bool,
}

impl CapacityReport {
    pub fn newly_started(&self, id: &str) -> bool {
        self.started.iter().any(|s| s == id)
    }
}

impl<P: CloudProvider, R: RemoteExecutor, N: NetworkProbe> Fleet<'_, P, R, N> {
    /// Make at least `required` cluster instances run, exactly one of
    /// them tagged head.
    ///
    /// Returns only after every started or launched instance has passed
    /// both readiness phases. Instances started before a failure are left
    /// running.
    pub async fn ensure_capacity(&self, required: usize) -> FleetResult<CapacityReport> {
        let ec2 = &self.config().ec2;
        let inventory = Inventory::query(self.provider(), &ec2.name_prefix).await?;
        let plan = plan_capacity(&inventory, required, &ec2.name_prefix);
        let head_was_online = matches!(plan.head, HeadPlan::Running(_));

        info!(
            all = inventory.all.len(),
            running = inventory.running.len(),
            required,
            restart = plan.restart.len(),
            launch = plan.launch.len(),
            head = ?plan.head,
            "capacity plan"
        );

        for inst in &plan.demote {
            warn!(instance = %inst.label(), "demoting extra head-tagged instance");
            let tags = InstanceTags {
                name: inst.label().to_string(),
                role: Role::Client,
            };
            self.provider().apply_tags(&inst.id, &tags).await?;
        }

        let mut started = Vec::new();

        for inst in &plan.restart {
            if inst.instance_type != ec2.instance_type {
                info!(
                    instance = %inst.label(),
                    from = %inst.instance_type,
                    to = %ec2.instance_type,
                    "switching instance type"
                );
                self.provider()
                    .modify_instance_type(&inst.id, &ec2.instance_type)
                    .await?;
            }
            info!(instance = %inst.label(), "restarting stopped instance");
            self.provider().start_instance(&inst.id).await?;
        }
        for inst in &plan.restart {
            self.prober().wait_until_ready(self.provider(), inst).await?;
            started.push(inst.id.clone());
        }

        if !plan.launch.is_empty() {
            let count = plan.launch.len();
            info!(count, first = %plan.launch[0].name, "launching new instances");
            let spec = LaunchSpec::from_config(ec2);
            let launched = self.provider().launch_instances(&spec, count as u32).await?;
            if launched.len() != count {
                return Err(FleetError::Provider(format!(
                    "requested {count} instances but the provider launched {}",
                    launched.len()
                )));
            }
            for (inst, tags) in launched.iter().zip(&plan.launch) {
                debug!(instance = %inst.id, name = %tags.name, role = %tags.role, "tagging");
                self.provider().apply_tags(&inst.id, tags).await?;
            }
            for inst in &launched {
                self.prober().wait_until_ready(self.provider(), inst).await?;
                started.push(inst.id.clone());
            }
        }

        if !started.is_empty() && !ec2.settle().is_zero() {
            debug!(secs = ec2.settle_secs, "letting started instances settle");
            tokio::time::sleep(ec2.settle()).await;
        }

        let running = Inventory::query(self.provider(), &ec2.name_prefix).await?.running;
        let head_id = running
            .iter()
            .find(|i| i.is_head())
            .map(|i| i.id.clone())
            .ok_or_else(|| FleetError::config("unable to establish a running head instance"))?;

        if running.len() < required {
            return Err(FleetError::Capacity {
                needed: required,
                available: running.len(),
            });
        }

        info!(running = running.len(), started = started.len(), head = %head_id, "capacity ensured");
        Ok(CapacityReport {
            running,
            started,
            head_id,
            head_was_online,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(id: &str, seq: u32, role: Option<Role>, state: InstanceState) -> CloudInstance {
        CloudInstance {
            id: id.to_string(),
            name: Some(instance_name("hstore", seq)),
            role,
            state,
            instance_type: "m1.xlarge".to_string(),
            public_address: None,
            private_address: None,
        }
    }

    fn inventory(instances: Vec<CloudInstance>) -> Inventory {
        Inventory::from_instances(instances, "hstore")
    }

    fn ids(v: &[CloudInstance]) -> Vec<&str> {
        v.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn empty_fleet_launches_everything_with_one_head() {
        let plan = plan_capacity(&inventory(Vec::new()), 3, "hstore");
        assert_eq!(plan.head, HeadPlan::Launch);
        assert!(plan.restart.is_empty());
        assert_eq!(plan.launch.len(), 3);
        assert_eq!(plan.launch[0].role, Role::Head);
        assert_eq!(plan.launch[0].name, "hstore-00");
        assert!(plan.launch[1..].iter().all(|t| t.role == Role::Client));
        assert_eq!(plan.launch[2].name, "hstore-02");
    }

    #[test]
    fn satisfied_fleet_with_running_head_is_noop() {
        let inv = inventory(vec![
            inst("a", 0, Some(Role::Head), InstanceState::Running),
            inst("b", 1, Some(Role::Client), InstanceState::Running),
        ]);
        let plan = plan_capacity(&inv, 2, "hstore");
        assert!(plan.is_noop());
        assert_eq!(plan.head, HeadPlan::Running("a".to_string()));
    }

    #[test]
    fn stopped_head_restarts_even_when_capacity_is_met() {
        let inv = inventory(vec![
            inst("a", 0, Some(Role::Client), InstanceState::Running),
            inst("b", 1, Some(Role::Client), InstanceState::Running),
            inst("h", 2, Some(Role::Head), InstanceState::Stopped),
        ]);
        let plan = plan_capacity(&inv, 2, "hstore");
        assert_eq!(plan.head, HeadPlan::Restart("h".to_string()));
        assert_eq!(ids(&plan.restart), vec!["h"]);
        assert!(plan.launch.is_empty());
    }

    #[test]
    fn stopped_head_restarts_before_other_stopped_instances() {
        let inv = inventory(vec![
            inst("c", 0, Some(Role::Client), InstanceState::Stopped),
            inst("h", 1, Some(Role::Head), InstanceState::Stopped),
            inst("d", 2, Some(Role::Client), InstanceState::Stopped),
        ]);
        let plan = plan_capacity(&inv, 2, "hstore");
        assert_eq!(ids(&plan.restart), vec!["h", "c"]);
        assert!(plan.launch.is_empty());
    }

    #[test]
    fn missing_head_reserves_one_launch() {
        let inv = inventory(vec![
            inst("a", 0, Some(Role::Client), InstanceState::Stopped),
            inst("b", 1, Some(Role::Client), InstanceState::Stopped),
            inst("c", 2, Some(Role::Client), InstanceState::Stopped),
        ]);
        let plan = plan_capacity(&inv, 3, "hstore");
        assert_eq!(ids(&plan.restart), vec!["a", "b"]);
        assert_eq!(plan.launch.len(), 1);
        assert_eq!(plan.launch[0].role, Role::Head);
        assert_eq!(plan.launch[0].name, "hstore-03");
    }

    #[test]
    fn missing_head_with_capacity_met_still_launches_a_head() {
        let inv = inventory(vec![inst("a", 0, None, InstanceState::Running)]);
        let plan = plan_capacity(&inv, 1, "hstore");
        assert_eq!(plan.head, HeadPlan::Launch);
        assert_eq!(plan.launch.len(), 1);
        assert_eq!(plan.launch[0].role, Role::Head);
    }

    #[test]
    fn restart_preferred_over_launch() {
        let inv = inventory(vec![
            inst("h", 0, Some(Role::Head), InstanceState::Running),
            inst("s", 1, Some(Role::Client), InstanceState::Stopped),
        ]);
        let plan = plan_capacity(&inv, 3, "hstore");
        assert_eq!(ids(&plan.restart), vec!["s"]);
        assert_eq!(plan.launch.len(), 1);
        assert_eq!(plan.launch[0].role, Role::Client);
        assert_eq!(plan.launch[0].name, "hstore-02");
    }

    #[test]
    fn extra_heads_are_demoted() {
        let inv = inventory(vec![
            inst("h1", 0, Some(Role::Head), InstanceState::Stopped),
            inst("h2", 1, Some(Role::Head), InstanceState::Running),
            inst("h3", 2, Some(Role::Head), InstanceState::Stopped),
        ]);
        let plan = plan_capacity(&inv, 1, "hstore");
        assert_eq!(plan.head, HeadPlan::Running("h2".to_string()));
        assert_eq!(ids(&plan.demote), vec!["h1", "h3"]);
    }

    #[test]
    fn pending_head_is_replaced() {
        let inv = inventory(vec![inst("p", 0, Some(Role::Head), InstanceState::Pending)]);
        let plan = plan_capacity(&inv, 1, "hstore");
        assert_eq!(plan.head, HeadPlan::Launch);
        assert_eq!(ids(&plan.demote), vec!["p"]);
        assert_eq!(plan.launch[0].name, "hstore-01");
    }
}
