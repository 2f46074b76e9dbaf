//! fleet.toml configuration parser.
//!
//! One group per recognized prefix. Every group falls back to built-in
//! defaults, so an empty file (or no file at all) describes the stock
//! 16-partition cluster. The `site`, `client`, `coordinator`, and
//! `benchmark` groups also carry arbitrary extra keys that are pushed
//! verbatim into the H-Store properties files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, FleetResult};
use crate::topology::plan;

/// Every prefix accepted in `group.key` overrides.
pub const PREFIXES: [&str; 6] = ["site", "coordinator", "client", "benchmark", "ec2", "hstore"];

/// Prefixes whose keys are written to the H-Store properties files.
pub const PROPERTY_PREFIXES: [&str; 4] = ["site", "coordinator", "client", "benchmark"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub site: SiteConfig,
    pub coordinator: PassthroughConfig,
    pub client: ClientConfig,
    pub benchmark: PassthroughConfig,
    pub ec2: Ec2Config,
    pub hstore: HstoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub partitions: u32,
    pub sites_per_host: u32,
    pub partitions_per_site: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            partitions: 16,
            sites_per_host: 1,
            partitions_per_site: 4,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub count: u32,
    pub processesperclient: u32,
    pub txnrate: i64,
    pub scalefactor: u32,
    pub blocking: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            count: 1,
            processesperclient: 2,
            txnrate: -1,
            scalefactor: 10,
            blocking: false,
            extra: BTreeMap::new(),
        }
    }
}

/// A group with no typed keys of its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassthroughConfig {
    #[serde(flatten)]
    pub values: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ec2Config {
    pub instance_type: String,
    pub ami: String,
    pub security_group: String,
    pub keypair: String,
    pub region: String,
    /// Availability zone new instances are launched into.
    pub placement: String,
    /// Instances are named `<name_prefix>-<seq>`.
    pub name_prefix: String,
    pub ssh_user: String,
    pub ssh_key: String,
    pub ssh_port: u16,
    pub status_poll_interval_secs: u64,
    pub status_poll_attempts: u32,
    pub probe_timeout_secs: u64,
    pub probe_interval_secs: u64,
    pub probe_attempts: u32,
    /// Pause after a batch of instances comes up.
    pub settle_secs: u64,
    /// Pause between issuing a reboot and probing the instance again.
    pub reboot_wait_secs: u64,
}

impl Default for Ec2Config {
    fn default() -> Self {
        Self {
            instance_type: "m1.xlarge".to_string(),
            ami: "ami-63be790a".to_string(),
            security_group: "hstore".to_string(),
            keypair: "hstore".to_string(),
            region: "us-east-1".to_string(),
            placement: "us-east-1b".to_string(),
            name_prefix: "hstore".to_string(),
            ssh_user: "ubuntu".to_string(),
            ssh_key: "~/.ssh/hstore.pem".to_string(),
            ssh_port: 22,
            status_poll_interval_secs: 5,
            status_poll_attempts: 6,
            probe_timeout_secs: 10,
            probe_interval_secs: 10,
            probe_attempts: 5,
            settle_secs: 20,
            reboot_wait_secs: 10,
        }
    }
}

impl Ec2Config {
    /// The private key path with a leading `~/` expanded.
    pub fn ssh_key_path(&self) -> PathBuf {
        expand_home(&self.ssh_key)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn reboot_wait(&self) -> Duration {
        Duration::from_secs(self.reboot_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HstoreConfig {
    pub svn: String,
    pub svn_options: String,
    /// Run `ant clean-all` before every build.
    pub clean: bool,
    pub exec_prefix: String,
    /// Local directory that receives retrieved trace artifacts.
    pub trace_dir: PathBuf,
}

impl Default for HstoreConfig {
    fn default() -> Self {
        Self {
            svn: "https://database.cs.brown.edu/svn/hstore/branches/partitioning-branch".to_string(),
            svn_options: "--trust-server-cert --non-interactive --ignore-externals".to_string(),
            clean: false,
            exec_prefix: "compile".to_string(),
            trace_dir: PathBuf::from("."),
        }
    }
}

impl HstoreConfig {
    /// Name of the checkout directory (last path segment of the svn URL).
    pub fn checkout_name(&self) -> &str {
        self.svn
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("hstore")
    }

    /// Checkout directory relative to the remote user's home.
    pub fn code_dir(&self) -> String {
        format!("hstore/{}", self.checkout_name())
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn to_toml_string(&self) -> FleetResult<String> {
        toml::to_string_pretty(self).map_err(|e| FleetError::config(e.to_string()))
    }

    /// Reject ratios and budgets no operation could run with.
    pub fn validate(&self) -> FleetResult<()> {
        plan(
            self.site.partitions,
            self.site.partitions_per_site,
            self.site.sites_per_host,
            self.client.count,
        )?;
        if self.ec2.name_prefix.is_empty() {
            return Err(FleetError::config("ec2.name_prefix must not be empty"));
        }
        if self.ec2.status_poll_attempts == 0 || self.ec2.probe_attempts == 0 {
            return Err(FleetError::config("retry attempts must be positive"));
        }
        Ok(())
    }

    /// Apply `group.key=value` overrides and re-validate.
    ///
    /// Values are typed by re-deserializing the whole configuration, so a
    /// non-numeric `site.partitions` is rejected here rather than later.
    pub fn with_overrides(&self, overrides: &[(String, String)]) -> FleetResult<Self> {
        let mut root = toml::Value::try_from(self).map_err(|e| FleetError::config(e.to_string()))?;

        for (key, raw) in overrides {
            let (group, field) = key
                .split_once('.')
                .ok_or_else(|| FleetError::config(format!("override '{key}' has no prefix")))?;
            if !PREFIXES.contains(&group) {
                return Err(FleetError::config(format!("unknown configuration prefix '{group}'")));
            }
            let table = root
                .as_table_mut()
                .and_then(|t| t.get_mut(group))
                .and_then(|g| g.as_table_mut())
                .ok_or_else(|| FleetError::config(format!("missing configuration group '{group}'")))?;

            let value = match table.get(field) {
                Some(toml::Value::String(_)) => toml::Value::String(raw.clone()),
                _ => parse_scalar(raw),
            };
            table.insert(field.to_string(), value);
        }

        let config: FleetConfig = root
            .try_into()
            .map_err(|e: toml::de::Error| FleetError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Properties destined for `properties/default.properties`.
    ///
    /// Keys keep their full `group.key` form.
    pub fn hstore_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();

        props.insert("site.partitions".to_string(), self.site.partitions.to_string());
        props.insert("site.sites_per_host".to_string(), self.site.sites_per_host.to_string());
        props.insert(
            "site.partitions_per_site".to_string(),
            self.site.partitions_per_site.to_string(),
        );
        for (k, v) in &self.site.extra {
            props.insert(format!("site.{k}"), render_value(v));
        }

        props.insert("client.count".to_string(), self.client.count.to_string());
        props.insert(
            "client.processesperclient".to_string(),
            self.client.processesperclient.to_string(),
        );
        props.insert("client.txnrate".to_string(), self.client.txnrate.to_string());
        props.insert("client.scalefactor".to_string(), self.client.scalefactor.to_string());
        props.insert("client.blocking".to_string(), self.client.blocking.to_string());
        for (k, v) in &self.client.extra {
            props.insert(format!("client.{k}"), render_value(v));
        }

        for (k, v) in &self.coordinator.values {
            props.insert(format!("coordinator.{k}"), render_value(v));
        }
        props
    }

    /// Properties destined for `properties/benchmarks/<project>.properties`.
    ///
    /// Keys are stripped down to their last dotted segment.
    pub fn benchmark_properties(&self) -> BTreeMap<String, String> {
        self.benchmark
            .values
            .iter()
            .map(|(k, v)| (last_segment(k).to_string(), render_value(v)))
            .collect()
    }
}

impl std::str::FromStr for FleetConfig {
    type Err = FleetError;

    fn from_str(s: &str) -> FleetResult<Self> {
        let config: FleetConfig = toml::from_str(s).map_err(|e| FleetError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Final segment of a dotted key (`benchmark.warehouses` → `warehouses`).
pub fn last_segment(key: &str) -> &str {
    key.rsplit('.').next().unwrap_or(key)
}

/// Render a TOML value the way it should appear in a properties file.
pub fn render_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
