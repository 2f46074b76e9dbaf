//! Benchmark driver: configure, run, and collect a benchmark.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use fleet_core::config::{PROPERTY_PREFIXES, last_segment};
use fleet_core::properties::update_conf;
use fleet_core::remote::shell_quote;
use fleet_core::{
    CloudInstance, CloudProvider, FleetConfig, FleetError, FleetResult, RemoteExecutor, Topology,
};
use fleet_health::{NetworkProbe, TcpProbe};
use fleet_provision::{Fleet, Inventory, find_head, order_head_first};

use crate::placement::{BenchmarkPlacement, place};

/// Projects run by `benchmark_suite` when none are named.
pub const DEFAULT_PROJECTS: [&str; 4] = ["tpcc", "tm1", "airline", "auctionmark"];

const GLOBAL_PROPERTIES: &str = "properties/default.properties";

/// One `execBenchmark` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchmarkRequest {
    pub project: String,
    /// Configuration keys to strip from the properties files.
    pub removals: Vec<String>,
    /// Ask the benchmark for JSON output.
    pub json: bool,
    /// Capture workload traces and copy the combined trace back.
    pub trace: bool,
    /// Refresh the checkout (without building) before running.
    pub update: bool,
}

impl BenchmarkRequest {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkOutcome {
    pub project: String,
    pub placement: BenchmarkPlacement,
    /// Everything the run printed.
    pub output: String,
    /// Local path of the retrieved trace archive.
    pub trace_artifact: Option<PathBuf>,
}

/// Upserts and removals for both properties files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfChanges {
    pub global_updates: BTreeMap<String, String>,
    pub global_removals: BTreeSet<String>,
    pub project_updates: BTreeMap<String, String>,
    pub project_removals: BTreeSet<String>,
}

impl ConfChanges {
    /// Split configuration and removal keys between the global and the
    /// per-project file.
    ///
    /// Keys outside the property prefixes are ignored. `benchmark.*`
    /// keys lose their prefix. Removing a key that is also being written
    /// is a configuration error.
    pub fn build(config: &FleetConfig, removals: &[String]) -> FleetResult<Self> {
        let mut changes = ConfChanges {
            global_updates: config.hstore_properties(),
            project_updates: config.benchmark_properties(),
            ..Self::default()
        };

        for key in removals {
            let prefix = key.split('.').next().unwrap_or_default();
            if !PROPERTY_PREFIXES.contains(&prefix) {
                debug!(%key, "ignoring removal outside property prefixes");
                continue;
            }
            if prefix == "benchmark" {
                let short = last_segment(key);
                if changes.project_updates.contains_key(short) {
                    return Err(FleetError::config(format!(
                        "cannot remove '{key}': it is also being written"
                    )));
                }
                changes.project_removals.insert(short.to_string());
            } else {
                if changes.global_updates.contains_key(key) {
                    return Err(FleetError::config(format!(
                        "cannot remove '{key}': it is also being written"
                    )));
                }
                changes.global_removals.insert(key.clone());
            }
        }
        Ok(changes)
    }
}

/// Runs benchmarks against the fleet's current running set.
pub struct BenchmarkDriver<'f, 'a, P, R, N = TcpProbe> {
    fleet: &'f Fleet<'a, P, R, N>,
}

impl<'f, 'a, P, R, N> BenchmarkDriver<'f, 'a, P, R, N>
where
    P: CloudProvider,
    R: RemoteExecutor,
    N: NetworkProbe,
{
    pub fn new(fleet: &'f Fleet<'a, P, R, N>) -> Self {
        Self { fleet }
    }

    fn config(&self) -> &'a FleetConfig {
        self.fleet.config()
    }

    /// Running cluster instances, head first. Fails with a capacity error
    /// before looking for a head.
    async fn running(&self, topology: &Topology) -> FleetResult<Vec<CloudInstance>> {
        let inventory = Inventory::query(self.fleet.provider(), &self.config().ec2.name_prefix).await?;
        let needed = topology.required_instances();
        if inventory.running.len() < needed {
            return Err(FleetError::Capacity {
                needed,
                available: inventory.running.len(),
            });
        }
        let head_id = find_head(&inventory.running)
            .map(|h| h.id.clone())
            .ok_or_else(|| FleetError::config("no running head instance; start the cluster first"))?;
        Ok(order_head_first(inventory.running, &head_id))
    }

    /// Write the global and per-project properties files.
    pub async fn write_conf(&self, project: &str, removals: &[String]) -> FleetResult<()> {
        let topology = Topology::from_config(self.config())?;
        let running = self.running(&topology).await?;
        let target = run_target(&running, &topology);
        self.write_conf_on(host(target)?, project, removals).await
    }

    async fn write_conf_on(&self, host: &str, project: &str, removals: &[String]) -> FleetResult<()> {
        if project.is_empty() {
            return Err(FleetError::config("benchmark project must not be empty"));
        }
        let changes = ConfChanges::build(self.config(), removals)?;
        let code_dir = self.config().hstore.code_dir();
        let remote = self.fleet.remote();

        update_conf(
            remote,
            host,
            &format!("{code_dir}/{GLOBAL_PROPERTIES}"),
            &changes.global_updates,
            &changes.global_removals,
            false,
        )
        .await?;
        update_conf(
            remote,
            host,
            &format!("{code_dir}/properties/benchmarks/{project}.properties"),
            &changes.project_updates,
            &changes.project_removals,
            false,
        )
        .await
    }

    /// Place, configure, and run one benchmark.
    pub async fn exec_benchmark(&self, request: &BenchmarkRequest) -> FleetResult<BenchmarkOutcome> {
        let config = self.config();
        let topology = Topology::from_config(config)?;
        let running = self.running(&topology).await?;
        let placement = place(&running, &topology)?;

        let target = run_target(&running, &topology);
        let host = host(target)?;
        let project = request.project.as_str();
        info!(%project, %host, sites = placement.sites.len(), clients = placement.clients.len(), "running benchmark");

        self.write_conf_on(host, project, &request.removals).await?;

        if request.update {
            self.fleet.deploy_software(target, false).await?;
        }

        let trace = request.trace.then(|| {
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            format!("traces/{project}-{epoch}")
        });
        let options = benchmark_options(config, &placement, request, trace.as_deref());
        debug!(?options, "benchmark options");

        let code_dir = config.hstore.code_dir();
        let remote = self.fleet.remote();
        let output = remote
            .run(
                host,
                &format!(
                    "cd {code_dir} && ant {} hstore-prepare hstore-benchmark {}",
                    config.hstore.exec_prefix,
                    define_args(&options)
                ),
            )
            .await?;
        if output.trim().is_empty() {
            return Err(FleetError::MissingOutput(format!(
                "benchmark '{project}' on {host} produced no output"
            )));
        }

        let trace_artifact = match trace {
            Some(trace) => Some(self.collect_trace(host, project, &trace).await?),
            None => None,
        };

        info!(%project, "benchmark finished");
        Ok(BenchmarkOutcome {
            project: request.project.clone(),
            placement,
            output,
            trace_artifact,
        })
    }

    /// Combine the run's workload traces and copy the archive back.
    async fn collect_trace(&self, host: &str, project: &str, trace: &str) -> FleetResult<PathBuf> {
        let config = self.config();
        let combined = format!("/tmp/hstore/workloads/{project}.trace");
        let mut options = BTreeMap::new();
        options.insert("project".to_string(), project.to_string());
        options.insert("volt.server.memory".to_string(), "5000".to_string());
        options.insert("output".to_string(), combined.clone());
        options.insert("workload".to_string(), format!("{trace}*"));

        info!(%project, output = %combined, "combining workload traces");
        let remote = self.fleet.remote();
        remote
            .run(
                host,
                &format!(
                    "cd {} && ant workload-combine {}",
                    config.hstore.code_dir(),
                    define_args(&options)
                ),
            )
            .await?;

        let archive = format!("{combined}.gz");
        let local = config.hstore.trace_dir.join(format!("{project}.trace.gz"));
        remote.get(host, &archive, &local).await?;
        info!(file = %local.display(), "retrieved trace archive");
        Ok(local)
    }

    /// Run every project in order, stopping at the first failure.
    pub async fn benchmark_suite(&self, projects: &[String]) -> FleetResult<Vec<BenchmarkOutcome>> {
        let projects: Vec<String> = if projects.is_empty() {
            DEFAULT_PROJECTS.iter().map(|p| p.to_string()).collect()
        } else {
            projects.to_vec()
        };
        let mut outcomes = Vec::with_capacity(projects.len());
        for project in projects {
            outcomes.push(self.exec_benchmark(&BenchmarkRequest::new(project)).await?);
        }
        Ok(outcomes)
    }
}

/// `-D` overrides for the benchmark run.
pub fn benchmark_options(
    config: &FleetConfig,
    placement: &BenchmarkPlacement,
    request: &BenchmarkRequest,
    trace: Option<&str>,
) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();
    options.insert("coordinator.host".to_string(), placement.coordinator.clone());
    options.insert("client.host".to_string(), placement.clients_arg());
    options.insert("client.count".to_string(), config.client.count.to_string());
    options.insert(
        "client.processesperclient".to_string(),
        config.client.processesperclient.to_string(),
    );
    options.insert(
        "benchmark.warehouses".to_string(),
        placement.partition_count().to_string(),
    );
    options.insert("project".to_string(), request.project.clone());
    options.insert("hosts".to_string(), placement.hosts_arg());
    if request.json {
        options.insert("jsonoutput".to_string(), "true".to_string());
    }
    if let Some(trace) = trace {
        options.insert("trace".to_string(), trace.to_string());
    }
    options
}

fn define_args(options: &BTreeMap<String, String>) -> String {
    options
        .iter()
        .map(|(k, v)| shell_quote(&format!("-D{k}={v}")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// First client-pool instance, or the head when the pool is empty.
fn run_target<'r>(running: &'r [CloudInstance], topology: &Topology) -> &'r CloudInstance {
    running
        .get(topology.host_count as usize)
        .unwrap_or_else(|| &running[0])
}

fn host(inst: &CloudInstance) -> FleetResult<&str> {
    inst.public_host()
        .ok_or_else(|| FleetError::Provider(format!("instance {} has no address", inst.label())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removals_split_by_prefix() {
        let config = FleetConfig::default();
        let removals = vec![
            "site.memory".to_string(),
            "benchmark.loadthreads".to_string(),
            "ec2.type".to_string(),
            "global.temp_dir".to_string(),
        ];
        let changes = ConfChanges::build(&config, &removals).unwrap();
        assert_eq!(changes.global_removals, BTreeSet::from(["site.memory".to_string()]));
        assert_eq!(changes.project_removals, BTreeSet::from(["loadthreads".to_string()]));
        assert_eq!(changes.global_updates.get("client.count").map(String::as_str), Some("1"));
    }

    #[test]
    fn removing_a_written_key_is_rejected() {
        let config = FleetConfig::default();
        let err = ConfChanges::build(&config, &["client.count".to_string()]).unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }

    #[test]
    fn removing_a_written_benchmark_key_is_rejected() {
        let config: FleetConfig = "[benchmark]\nwarehouses = 8\n".parse().unwrap();
        let err = ConfChanges::build(&config, &["benchmark.warehouses".to_string()]).unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }

    #[test]
    fn define_args_are_shell_safe() {
        let mut options = BTreeMap::new();
        options.insert("hosts".to_string(), "10.0.0.1:0:0-3,10.0.0.2:1:4-7".to_string());
        options.insert("workload".to_string(), "traces/tpcc-1*".to_string());
        assert_eq!(
            define_args(&options),
            "-Dhosts=10.0.0.1:0:0-3,10.0.0.2:1:4-7 '-Dworkload=traces/tpcc-1*'"
        );
    }
}
