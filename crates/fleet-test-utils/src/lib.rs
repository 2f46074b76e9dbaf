//! In-memory collaborators for fleet tests.
//!
//! `FakeCloud` behaves like a tiny provider: started instances pass
//! through `pending` before `running`, launches get sequential ids and
//! addresses, and every mutating call is recorded so tests can assert on
//! exactly what reconciliation asked for. `FakeRemote` records commands
//! and keeps remote files in a map.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_core::config::FleetConfig;
use fleet_core::{
    CloudInstance, CloudProvider, FleetError, FleetResult, InstanceState, InstanceTags, LaunchSpec,
    RemoteExecutor, Role,
};
use fleet_health::{NetworkProbe, ProbeResult, ReadinessConfig, RetryPolicy};

// ── Cloud ──────────────────────────────────────────────────────────

/// A mutating call received by `FakeCloud`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Start(String),
    Stop(String),
    Terminate(String),
    ModifyType(String, String),
    Launch(u32),
    Tag(String, InstanceTags),
    SecurityGroup(String),
}

#[derive(Default)]
struct CloudState {
    instances: Vec<CloudInstance>,
    calls: Vec<ProviderCall>,
    next_id: u32,
    boot_polls: u32,
    booting: HashMap<String, u32>,
    security_groups: HashSet<String>,
}

impl CloudState {
    fn alloc_id(&mut self) -> u32 {
        let n = self.next_id;
        self.next_id += 1;
        n
    }

    fn find_mut(&mut self, id: &str) -> FleetResult<&mut CloudInstance> {
        self.instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| FleetError::Provider(format!("unknown instance {id}")))
    }
}

#[derive(Clone, Default)]
pub struct FakeCloud {
    inner: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `pending` polls a started instance reports before
    /// turning `running`.
    pub fn set_boot_polls(&self, polls: u32) {
        self.inner.lock().unwrap().boot_polls = polls;
    }

    /// Seed an existing instance with the default machine type.
    pub fn add_instance(&self, name: &str, role: Option<Role>, state: InstanceState) -> CloudInstance {
        self.add_instance_with_type(name, role, state, "m1.xlarge")
    }

    pub fn add_instance_with_type(
        &self,
        name: &str,
        role: Option<Role>,
        state: InstanceState,
        instance_type: &str,
    ) -> CloudInstance {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.alloc_id();
        let inst = CloudInstance {
            id: format!("i-{n:04}"),
            name: Some(name.to_string()),
            role,
            state,
            instance_type: instance_type.to_string(),
            public_address: Some(format!("ec2-{n}.compute-1.amazonaws.com")),
            private_address: Some(format!("ip-10-0-0-{n}.ec2.internal")),
        };
        inner.instances.push(inst.clone());
        inst
    }

    /// Drop an instance from listings entirely.
    pub fn forget(&self, id: &str) {
        self.inner.lock().unwrap().instances.retain(|i| i.id != id);
    }

    pub fn instance(&self, id: &str) -> Option<CloudInstance> {
        self.inner.lock().unwrap().instances.iter().find(|i| i.id == id).cloned()
    }

    pub fn instances(&self) -> Vec<CloudInstance> {
        self.inner.lock().unwrap().instances.clone()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn start_calls(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ProviderCall::Start(_))).count()
    }

    /// Total instances requested across all launch calls.
    pub fn launched_instances(&self) -> u32 {
        self.calls()
            .iter()
            .map(|c| match c {
                ProviderCall::Launch(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn launch_calls(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ProviderCall::Launch(_))).count()
    }

    /// Running instances carrying the `head` role tag.
    pub fn running_heads(&self) -> Vec<CloudInstance> {
        self.instances()
            .into_iter()
            .filter(|i| i.is_running() && i.is_head())
            .collect()
    }
}

impl CloudProvider for FakeCloud {
    async fn list_instances(&self) -> FleetResult<Vec<CloudInstance>> {
        Ok(self.instances())
    }

    async fn describe_instance(&self, id: &str) -> FleetResult<Option<CloudInstance>> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let Some(inst) = inner.instances.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        if inst.state == InstanceState::Pending {
            match inner.booting.get_mut(id) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    return Ok(Some(inst.clone()));
                }
                _ => inst.state = InstanceState::Running,
            }
        }
        Ok(Some(inst.clone()))
    }

    async fn start_instance(&self, id: &str) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Start(id.to_string()));
        let polls = inner.boot_polls;
        inner.find_mut(id)?.state = InstanceState::Pending;
        inner.booting.insert(id.to_string(), polls);
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Stop(id.to_string()));
        inner.find_mut(id)?.state = InstanceState::Stopped;
        Ok(())
    }

    async fn terminate_instance(&self, id: &str) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Terminate(id.to_string()));
        inner.find_mut(id)?.state = InstanceState::Terminated;
        Ok(())
    }

    async fn modify_instance_type(&self, id: &str, instance_type: &str) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(ProviderCall::ModifyType(id.to_string(), instance_type.to_string()));
        let inst = inner.find_mut(id)?;
        if inst.state != InstanceState::Stopped {
            return Err(FleetError::Provider(format!("{id} must be stopped to change its type")));
        }
        inst.instance_type = instance_type.to_string();
        Ok(())
    }

    async fn launch_instances(&self, spec: &LaunchSpec, count: u32) -> FleetResult<Vec<CloudInstance>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Launch(count));
        let polls = inner.boot_polls;
        let mut launched = Vec::new();
        for _ in 0..count {
            let n = inner.alloc_id();
            let inst = CloudInstance {
                id: format!("i-{n:04}"),
                name: None,
                role: None,
                state: InstanceState::Pending,
                instance_type: spec.instance_type.clone(),
                public_address: Some(format!("ec2-{n}.compute-1.amazonaws.com")),
                private_address: Some(format!("ip-10-0-0-{n}.ec2.internal")),
            };
            inner.booting.insert(inst.id.clone(), polls);
            inner.instances.push(inst.clone());
            launched.push(inst);
        }
        Ok(launched)
    }

    async fn apply_tags(&self, id: &str, tags: &InstanceTags) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ProviderCall::Tag(id.to_string(), tags.clone()));
        let inst = inner.find_mut(id)?;
        inst.name = Some(tags.name.clone());
        inst.role = Some(tags.role);
        Ok(())
    }

    async fn ensure_security_group(&self, name: &str, _admin_port: u16) -> FleetResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.security_groups.contains(name) {
            return Ok(false);
        }
        inner.calls.push(ProviderCall::SecurityGroup(name.to_string()));
        inner.security_groups.insert(name.to_string());
        Ok(true)
    }
}

// ── Remote ─────────────────────────────────────────────────────────

/// A call received by `FakeRemote`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Run { host: String, command: String },
    Sudo { host: String, command: String },
    Write { host: String, path: String },
    Put { host: String, path: String },
    Get { host: String, path: String, local: PathBuf },
    Reboot { host: String },
}

impl RemoteCall {
    pub fn host(&self) -> &str {
        match self {
            RemoteCall::Run { host, .. }
            | RemoteCall::Sudo { host, .. }
            | RemoteCall::Write { host, .. }
            | RemoteCall::Put { host, .. }
            | RemoteCall::Get { host, .. }
            | RemoteCall::Reboot { host } => host,
        }
    }

    /// Command text for `Run`/`Sudo`, empty otherwise.
    pub fn command(&self) -> &str {
        match self {
            RemoteCall::Run { command, .. } | RemoteCall::Sudo { command, .. } => command,
            _ => "",
        }
    }
}

#[derive(Default)]
struct RemoteState {
    calls: Vec<RemoteCall>,
    files: HashMap<(String, String), String>,
    failures: Vec<String>,
    responses: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any command containing `pattern` fails.
    pub fn fail_on(&self, pattern: &str) {
        self.inner.lock().unwrap().failures.push(pattern.to_string());
    }

    /// Any command containing `pattern` prints `output`.
    pub fn respond(&self, pattern: &str, output: &str) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .push((pattern.to_string(), output.to_string()));
    }

    pub fn set_file(&self, host: &str, path: &str, contents: &str) {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert((host.to_string(), path.to_string()), contents.to_string());
    }

    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, host: &str) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(|c| c.host() == host).collect()
    }

    /// Whether any command sent to `host` contains `needle`.
    pub fn ran(&self, host: &str, needle: &str) -> bool {
        self.calls_for(host).iter().any(|c| c.command().contains(needle))
    }

    pub fn reboots(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Reboot { host } => Some(host),
                _ => None,
            })
            .collect()
    }

    fn exec(&self, call: RemoteCall) -> FleetResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let host = call.host().to_string();
        let command = call.command().to_string();
        inner.calls.push(call);
        if inner.failures.iter().any(|p| command.contains(p.as_str())) {
            return Err(FleetError::remote(&host, format!("command failed: {command}")));
        }
        Ok(inner
            .responses
            .iter()
            .find(|(p, _)| command.contains(p.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

impl RemoteExecutor for FakeRemote {
    async fn run(&self, host: &str, command: &str) -> FleetResult<String> {
        self.exec(RemoteCall::Run {
            host: host.to_string(),
            command: command.to_string(),
        })
    }

    async fn sudo(&self, host: &str, command: &str) -> FleetResult<String> {
        self.exec(RemoteCall::Sudo {
            host: host.to_string(),
            command: command.to_string(),
        })
    }

    async fn write_file(&self, host: &str, remote_path: &str, contents: &str) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RemoteCall::Write {
            host: host.to_string(),
            path: remote_path.to_string(),
        });
        inner
            .files
            .insert((host.to_string(), remote_path.to_string()), contents.to_string());
        Ok(())
    }

    async fn put(&self, host: &str, _local: &Path, remote_path: &str, _mode: Option<u32>) -> FleetResult<()> {
        self.inner.lock().unwrap().calls.push(RemoteCall::Put {
            host: host.to_string(),
            path: remote_path.to_string(),
        });
        Ok(())
    }

    async fn get(&self, host: &str, remote_path: &str, local: &Path) -> FleetResult<()> {
        self.inner.lock().unwrap().calls.push(RemoteCall::Get {
            host: host.to_string(),
            path: remote_path.to_string(),
            local: local.to_path_buf(),
        });
        Ok(())
    }

    async fn reboot(&self, host: &str) -> FleetResult<()> {
        self.inner.lock().unwrap().calls.push(RemoteCall::Reboot {
            host: host.to_string(),
        });
        Ok(())
    }

    async fn read_file(&self, host: &str, remote_path: &str) -> FleetResult<String> {
        Ok(self.file(host, remote_path).unwrap_or_default())
    }

    async fn append_line(&self, host: &str, remote_path: &str, line: &str, _use_sudo: bool) -> FleetResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = (host.to_string(), remote_path.to_string());
        let file = inner.files.entry(key).or_default();
        if !file.lines().any(|l| l == line) {
            if !file.is_empty() && !file.ends_with('\n') {
                file.push('\n');
            }
            file.push_str(line);
            file.push('\n');
        }
        Ok(())
    }
}

// ── Probing ────────────────────────────────────────────────────────

/// Network probe that fails a fixed number of times, then succeeds.
#[derive(Clone)]
pub struct ScriptedProbe {
    failures_before_success: Option<usize>,
    attempts: Arc<Mutex<usize>>,
}

impl ScriptedProbe {
    pub fn always() -> Self {
        Self::after_failures(0)
    }

    pub fn never() -> Self {
        Self {
            failures_before_success: None,
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    pub fn after_failures(n: usize) -> Self {
        Self {
            failures_before_success: Some(n),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl NetworkProbe for ScriptedProbe {
    async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> ProbeResult {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        match self.failures_before_success {
            Some(n) if *attempts > n => ProbeResult::Reachable,
            _ => ProbeResult::Failed,
        }
    }
}

/// Readiness budgets shrunk to milliseconds.
pub fn fast_readiness() -> ReadinessConfig {
    ReadinessConfig {
        status: RetryPolicy::new(3, Duration::from_millis(1)),
        reachability: RetryPolicy::new(3, Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_millis(50)),
        admin_port: 22,
    }
}

/// Default configuration with every fixed pause removed.
pub fn fast_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.ec2.settle_secs = 0;
    config.ec2.reboot_wait_secs = 0;
    config
}
