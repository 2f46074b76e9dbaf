//! `aws ec2` subprocess driver.

use tokio::process::Command;
use tracing::{debug, info};

use fleet_core::config::Ec2Config;
use fleet_core::{CloudInstance, CloudProvider, FleetError, FleetResult, InstanceTags, LaunchSpec};

use crate::parse::{parse_describe_instances, parse_run_instances};

/// Provider that drives the `aws` command-line client.
///
/// Credentials come from the client's own configuration (environment,
/// profile, or instance role).
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: String,
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            program: "aws".to_string(),
            region: region.into(),
        }
    }

    pub fn from_config(ec2: &Ec2Config) -> Self {
        Self::new(&ec2.region)
    }

    /// Use a different client binary (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Full argument vector for an `ec2` subcommand.
    pub fn command_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec!["ec2".to_string()];
        full.extend(args.iter().cloned());
        full.extend([
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
        ]);
        full
    }

    /// Run an `ec2` subcommand and return its stdout.
    async fn ec2(&self, args: Vec<String>) -> FleetResult<String> {
        let full = self.command_args(&args);
        debug!(program = %self.program, args = ?full, "running aws");

        let output = Command::new(&self.program)
            .args(&full)
            .output()
            .await
            .map_err(|e| FleetError::Provider(format!("failed to execute {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::Provider(format!(
                "aws ec2 {} failed (exit code: {}): {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Arguments for `create-tags`.
pub fn tag_args(id: &str, tags: &InstanceTags) -> Vec<String> {
    let mut args = vec![
        "create-tags".to_string(),
        "--resources".to_string(),
        id.to_string(),
        "--tags".to_string(),
    ];
    args.extend(
        tags.pairs()
            .into_iter()
            .map(|(key, value)| format!("Key={key},Value={value}")),
    );
    args
}

/// Arguments for a `run-instances` batch.
pub fn launch_args(spec: &LaunchSpec, count: u32) -> Vec<String> {
    vec![
        "run-instances".to_string(),
        "--image-id".to_string(),
        spec.image.clone(),
        "--instance-type".to_string(),
        spec.instance_type.clone(),
        "--key-name".to_string(),
        spec.keypair.clone(),
        "--security-groups".to_string(),
        spec.security_group.clone(),
        "--placement".to_string(),
        format!("AvailabilityZone={}", spec.placement),
        "--count".to_string(),
        count.to_string(),
    ]
}

fn id_args(subcommand: &str, id: &str) -> Vec<String> {
    vec![subcommand.to_string(), "--instance-ids".to_string(), id.to_string()]
}

impl CloudProvider for AwsCli {
    async fn list_instances(&self) -> FleetResult<Vec<CloudInstance>> {
        let json = self.ec2(vec!["describe-instances".to_string()]).await?;
        parse_describe_instances(&json)
    }

    async fn describe_instance(&self, id: &str) -> FleetResult<Option<CloudInstance>> {
        match self.ec2(id_args("describe-instances", id)).await {
            Ok(json) => Ok(parse_describe_instances(&json)?.into_iter().next()),
            Err(FleetError::Provider(msg)) if msg.contains("InvalidInstanceID.NotFound") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn start_instance(&self, id: &str) -> FleetResult<()> {
        self.ec2(id_args("start-instances", id)).await.map(drop)
    }

    async fn stop_instance(&self, id: &str) -> FleetResult<()> {
        self.ec2(id_args("stop-instances", id)).await.map(drop)
    }

    async fn terminate_instance(&self, id: &str) -> FleetResult<()> {
        self.ec2(id_args("terminate-instances", id)).await.map(drop)
    }

    async fn modify_instance_type(&self, id: &str, instance_type: &str) -> FleetResult<()> {
        self.ec2(vec![
            "modify-instance-attribute".to_string(),
            "--instance-id".to_string(),
            id.to_string(),
            "--instance-type".to_string(),
            format!("Value={instance_type}"),
        ])
        .await
        .map(drop)
    }

    async fn launch_instances(&self, spec: &LaunchSpec, count: u32) -> FleetResult<Vec<CloudInstance>> {
        info!(count, image = %spec.image, instance_type = %spec.instance_type, "launching instances");
        let json = self.ec2(launch_args(spec, count)).await?;
        parse_run_instances(&json)
    }

    async fn apply_tags(&self, id: &str, tags: &InstanceTags) -> FleetResult<()> {
        self.ec2(tag_args(id, tags)).await.map(drop)
    }

    async fn ensure_security_group(&self, name: &str, admin_port: u16) -> FleetResult<bool> {
        let exists = self
            .ec2(vec![
                "describe-security-groups".to_string(),
                "--group-names".to_string(),
                name.to_string(),
            ])
            .await;
        match exists {
            Ok(_) => return Ok(false),
            Err(FleetError::Provider(msg)) if msg.contains("InvalidGroup.NotFound") => {}
            Err(e) => return Err(e),
        }

        info!(group = %name, admin_port, "creating security group");
        self.ec2(vec![
            "create-security-group".to_string(),
            "--group-name".to_string(),
            name.to_string(),
            "--description".to_string(),
            "H-Store cluster".to_string(),
        ])
        .await?;
        // Members talk to each other on any port.
        self.ec2(vec![
            "authorize-security-group-ingress".to_string(),
            "--group-name".to_string(),
            name.to_string(),
            "--source-group".to_string(),
            name.to_string(),
        ])
        .await?;
        self.ec2(vec![
            "authorize-security-group-ingress".to_string(),
            "--group-name".to_string(),
            name.to_string(),
            "--protocol".to_string(),
            "tcp".to_string(),
            "--port".to_string(),
            admin_port.to_string(),
            "--cidr".to_string(),
            "0.0.0.0/0".to_string(),
        ])
        .await?;
        Ok(true)
    }
}
