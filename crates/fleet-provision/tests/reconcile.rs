//! Reconciliation scenarios against the in-memory provider.

use fleet_core::{FleetConfig, FleetError, InstanceState, Role};
use fleet_health::ReadinessProber;
use fleet_provision::{Fleet, find_head};
use fleet_test_utils::{
    FakeCloud, FakeRemote, ProviderCall, RemoteCall, ScriptedProbe, fast_config, fast_readiness,
};

fn fleet<'a>(
    config: &'a FleetConfig,
    cloud: &'a FakeCloud,
    remote: &'a FakeRemote,
    probe: ScriptedProbe,
) -> Fleet<'a, FakeCloud, FakeRemote, ScriptedProbe> {
    Fleet::with_prober(config, cloud, remote, ReadinessProber::with_probe(fast_readiness(), probe))
}

fn ubuntu() -> FakeRemote {
    let remote = FakeRemote::new();
    remote.respond("DISTRIB_CODENAME", "DISTRIB_CODENAME=lucid\n");
    remote
}

/// One database host and `clients` client instances.
fn small_config(clients: u32) -> FleetConfig {
    let mut config = fast_config();
    config.site.partitions = 4;
    config.site.partitions_per_site = 4;
    config.site.sites_per_host = 1;
    config.client.count = clients;
    config
}

fn host_of(cloud: &FakeCloud, id: &str) -> String {
    cloud.instance(id).unwrap().public_address.unwrap()
}

#[tokio::test]
async fn empty_fleet_launches_full_cluster_in_one_batch() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.start_cluster().await.unwrap();

    // 16 partitions / 4 per site / 1 site per host = 4 hosts, plus 1 client.
    assert_eq!(report.topology.host_count, 4);
    assert_eq!(report.instances.len(), 5);
    assert_eq!(cloud.launch_calls(), 1);
    assert_eq!(cloud.launched_instances(), 5);
    assert_eq!(cloud.start_calls(), 0);
    assert!(!report.head_was_online);

    let head = report.head().unwrap();
    assert!(head.is_head());
    assert_eq!(cloud.running_heads().len(), 1);
    assert!(cloud.calls().contains(&ProviderCall::SecurityGroup("hstore".to_string())));

    let mut names: Vec<_> = cloud.instances().into_iter().filter_map(|i| i.name).collect();
    names.sort();
    assert_eq!(names, vec!["hstore-00", "hstore-01", "hstore-02", "hstore-03", "hstore-04"]);
}

#[tokio::test]
async fn second_reconciliation_issues_no_starts_or_launches() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    fleet.ensure_capacity(5).await.unwrap();
    cloud.clear_calls();

    let report = fleet.ensure_capacity(5).await.unwrap();
    assert_eq!(report.running.len(), 5);
    assert!(report.started.is_empty());
    assert!(report.head_was_online);
    assert_eq!(cloud.start_calls(), 0);
    assert_eq!(cloud.launch_calls(), 0);
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn exactly_one_head_regardless_of_stopped_heads() {
    for stopped_heads in 0..=3 {
        let config = fast_config();
        let cloud = FakeCloud::new();
        let remote = ubuntu();
        cloud.add_instance("hstore-00", Some(Role::Client), InstanceState::Running);
        cloud.add_instance("hstore-01", Some(Role::Client), InstanceState::Running);
        for n in 0..stopped_heads {
            cloud.add_instance(&format!("hstore-1{n}"), Some(Role::Head), InstanceState::Stopped);
        }
        let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

        let report = fleet.ensure_capacity(3).await.unwrap();

        assert_eq!(cloud.running_heads().len(), 1, "stopped heads: {stopped_heads}");
        assert_eq!(report.running.iter().filter(|i| i.is_head()).count(), 1);
        let all_heads = cloud.instances().into_iter().filter(|i| i.is_head()).count();
        assert_eq!(all_heads, 1, "extra heads must be demoted ({stopped_heads})");
    }
}

#[tokio::test]
async fn restart_preferred_over_launch() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    let stopped = cloud.add_instance("hstore-01", Some(Role::Client), InstanceState::Stopped);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.ensure_capacity(3).await.unwrap();

    assert_eq!(cloud.start_calls(), 1);
    assert_eq!(cloud.launch_calls(), 1);
    assert_eq!(cloud.launched_instances(), 1);
    assert!(cloud.calls().contains(&ProviderCall::Start(stopped.id.clone())));
    assert!(report.newly_started(&stopped.id));
    assert_eq!(report.running.len(), 3);
}

#[tokio::test]
async fn stopped_instance_is_retyped_before_start() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    let small = cloud.add_instance_with_type("hstore-01", None, InstanceState::Stopped, "m1.small");
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    fleet.ensure_capacity(2).await.unwrap();

    let calls = cloud.calls();
    let retype = calls
        .iter()
        .position(|c| *c == ProviderCall::ModifyType(small.id.clone(), "m1.xlarge".to_string()))
        .expect("instance type changed");
    let start = calls
        .iter()
        .position(|c| *c == ProviderCall::Start(small.id.clone()))
        .expect("instance started");
    assert!(retype < start);
    assert_eq!(cloud.instance(&small.id).unwrap().instance_type, "m1.xlarge");
}

#[tokio::test]
async fn matching_type_is_not_retyped() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Stopped);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    fleet.ensure_capacity(1).await.unwrap();

    assert!(!cloud.calls().iter().any(|c| matches!(c, ProviderCall::ModifyType(..))));
    assert_eq!(cloud.start_calls(), 1);
}

#[tokio::test]
async fn launched_names_continue_past_highest_sequence() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    cloud.add_instance("hstore-05", Some(Role::Client), InstanceState::Terminated);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    fleet.ensure_capacity(3).await.unwrap();

    let tagged: Vec<String> = cloud
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ProviderCall::Tag(_, tags) => Some(tags.name),
            _ => None,
        })
        .collect();
    assert_eq!(tagged, vec!["hstore-06", "hstore-07"]);
}

#[tokio::test]
async fn other_fleets_are_ignored() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    cloud.add_instance("webserver-00", Some(Role::Head), InstanceState::Running);
    cloud.add_instance("webserver-01", None, InstanceState::Stopped);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.ensure_capacity(1).await.unwrap();

    assert_eq!(cloud.start_calls(), 0);
    assert_eq!(cloud.launched_instances(), 1);
    assert_eq!(report.running.len(), 1);
    assert_eq!(report.running[0].name.as_deref(), Some("hstore-00"));
}

#[tokio::test]
async fn fresh_cluster_reboots_every_client() {
    let config = small_config(2);
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.start_cluster().await.unwrap();

    let head = report.head().unwrap();
    let head_host = host_of(&cloud, &head.id);
    assert!(remote.ran(&head_host, "exportfs -a"));
    assert!(remote.ran(&head_host, "ant build"));
    assert!(!remote.reboots().contains(&head_host));

    let clients: Vec<String> = report.instances[1..].iter().map(|i| host_of(&cloud, &i.id)).collect();
    assert_eq!(clients.len(), 2);
    let mut reboots = remote.reboots();
    reboots.sort();
    let mut expected = clients.clone();
    expected.sort();
    assert_eq!(reboots, expected);
}

#[tokio::test]
async fn online_head_skips_export_and_reboots() {
    let config = small_config(2);
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let head = cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    cloud.add_instance("hstore-01", Some(Role::Client), InstanceState::Running);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.start_cluster().await.unwrap();

    assert!(report.head_was_online);
    assert_eq!(report.started.len(), 1);
    assert_eq!(report.head().unwrap().id, head.id);
    let head_host = host_of(&cloud, &head.id);
    assert!(!remote.ran(&head_host, "exportfs"));
    assert!(remote.ran(&head_host, "svn update"));
    // Newly launched client joins an online head without a reboot.
    assert!(remote.reboots().is_empty());
}

#[tokio::test]
async fn already_running_clients_are_not_rebooted_for_new_head() {
    let config = small_config(1);
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let old = cloud.add_instance("hstore-00", Some(Role::Client), InstanceState::Running);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.start_cluster().await.unwrap();

    assert!(!report.head_was_online);
    assert_ne!(report.head().unwrap().id, old.id);
    assert!(remote.reboots().is_empty());
}

#[tokio::test]
async fn clients_point_at_head_private_address() {
    let config = small_config(1);
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.start_cluster().await.unwrap();
    let head_private = report.head().unwrap().private_address.clone().unwrap();
    let client_host = host_of(&cloud, &report.instances[1].id);

    let hosts_file = remote
        .calls_for(&client_host)
        .into_iter()
        .filter_map(|c| match c {
            RemoteCall::Write { path, .. } => remote.file(&client_host, &path),
            _ => None,
        })
        .find(|contents| contents.contains("hstore-nfs"))
        .expect("hosts file written");
    assert!(hosts_file.contains(&format!("{head_private} hstore-nfs")));

    let auto_master = remote.file(&client_host, "/etc/auto.master").unwrap();
    assert_eq!(auto_master, "/home/ubuntu/hstore /etc/auto.hstore\n");
}

#[tokio::test]
async fn node_environment_is_idempotent() {
    let config = small_config(0);
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let report = fleet.start_cluster().await.unwrap();
    let head = report.head().unwrap().clone();
    fleet.setup_env(&head).await.unwrap();

    let host = host_of(&cloud, &head.id);
    let sources = remote.file(&host, "/etc/apt/sources.list").unwrap();
    assert_eq!(sources.lines().count(), 2);
    assert!(sources.contains("deb http://archive.canonical.com/ubuntu lucid partner"));

    let bashrc = remote.file(&host, ".bashrc").unwrap();
    assert_eq!(bashrc.matches("alias hh=").count(), 1);
    assert!(bashrc.contains("alias hh=\"cd $HOME/hstore/partitioning-branch\""));
}

#[tokio::test]
async fn missing_key_files_are_copied() {
    let config = small_config(0);
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    remote.fail_on("test -f /home/ubuntu/.ssh/id_dsa");
    let inst = cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    fleet.setup_env(&inst).await.unwrap();

    let puts: Vec<String> = remote
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RemoteCall::Put { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    // `id_dsa` and `id_dsa.pub` both match the failing check.
    assert_eq!(puts, vec!["/home/ubuntu/.ssh/id_dsa.pub", "/home/ubuntu/.ssh/id_dsa"]);
}

#[tokio::test]
async fn boot_timeout_surfaces_provisioning_error() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    cloud.set_boot_polls(10);
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let err = fleet.ensure_capacity(2).await.unwrap_err();
    match err {
        FleetError::ProvisioningTimeout { state, .. } => assert_eq!(state, InstanceState::Running),
        other => panic!("unexpected error: {other}"),
    }
    // Launched instances are left in place.
    assert_eq!(cloud.instances().len(), 2);
}

#[tokio::test]
async fn unreachable_instance_surfaces_reachability_error() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::never());

    let err = fleet.ensure_capacity(1).await.unwrap_err();
    assert!(matches!(err, FleetError::ReachabilityTimeout { .. }));
}

#[tokio::test]
async fn stop_cluster_stops_every_running_instance() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    cloud.add_instance("hstore-01", Some(Role::Client), InstanceState::Running);
    cloud.add_instance("hstore-02", Some(Role::Client), InstanceState::Stopped);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    assert_eq!(fleet.stop_cluster(false).await.unwrap(), 2);
    assert!(cloud.instances().iter().all(|i| i.state == InstanceState::Stopped));
    assert_eq!(fleet.stop_cluster(false).await.unwrap(), 0);
}

#[tokio::test]
async fn terminate_waits_for_terminated_state() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    let a = cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    assert_eq!(fleet.stop_cluster(true).await.unwrap(), 1);
    assert_eq!(cloud.instance(&a.id).unwrap().state, InstanceState::Terminated);
    assert!(cloud.calls().contains(&ProviderCall::Terminate(a.id.clone())));
}

#[tokio::test]
async fn get_env_reports_each_running_host() {
    let config = fast_config();
    let cloud = FakeCloud::new();
    let remote = ubuntu();
    remote.respond("uname -a", "Linux ip-10-0-0-1 2.6.32-312-ec2 x86_64\n");
    let a = cloud.add_instance("hstore-00", Some(Role::Head), InstanceState::Running);
    cloud.add_instance("hstore-01", None, InstanceState::Stopped);
    let fleet = fleet(&config, &cloud, &remote, ScriptedProbe::always());

    let env = fleet.get_env().await.unwrap();
    assert_eq!(env.len(), 1);
    assert_eq!(env[0].0, host_of(&cloud, &a.id));
    assert_eq!(env[0].1, "Linux ip-10-0-0-1 2.6.32-312-ec2 x86_64");
}

#[test]
fn find_head_ignores_list_position() {
    let cloud = FakeCloud::new();
    cloud.add_instance("hstore-00", Some(Role::Client), InstanceState::Running);
    let head = cloud.add_instance("hstore-01", Some(Role::Head), InstanceState::Running);
    assert_eq!(find_head(&cloud.instances()).unwrap().id, head.id);
}
