//! SSH subprocess executor.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use fleet_core::config::Ec2Config;
use fleet_core::remote::shell_quote;
use fleet_core::{FleetError, FleetResult, RemoteExecutor};

/// Exit status `ssh` reports when the connection itself fails or drops.
const SSH_CONNECTION_LOST: i32 = 255;

/// Connection settings shared by every `ssh`/`scp` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub user: String,
    pub key: PathBuf,
    pub port: u16,
    pub connect_timeout_secs: u64,
}

impl SshOptions {
    pub fn from_config(ec2: &Ec2Config) -> Self {
        Self {
            user: ec2.ssh_user.clone(),
            key: ec2.ssh_key_path(),
            port: ec2.ssh_port,
            connect_timeout_secs: ec2.probe_timeout_secs,
        }
    }

    /// Flags common to both clients. `port_flag` is `-p` for ssh and
    /// `-P` for scp.
    fn common_args(&self, port_flag: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key.display().to_string(),
            port_flag.to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{host}", self.user)
    }

    /// `ssh` arguments that run `command` on `host`.
    pub fn ssh_args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = self.common_args("-p");
        args.push(self.target(host));
        args.push(command.to_string());
        args
    }

    /// `scp` arguments that copy `local` to `host:remote_path`.
    pub fn scp_put_args(&self, host: &str, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = self.common_args("-P");
        args.push(local.display().to_string());
        args.push(format!("{}:{remote_path}", self.target(host)));
        args
    }

    /// `scp` arguments that copy `host:remote_path` to `local`.
    pub fn scp_get_args(&self, host: &str, remote_path: &str, local: &Path) -> Vec<String> {
        let mut args = self.common_args("-P");
        args.push(format!("{}:{remote_path}", self.target(host)));
        args.push(local.display().to_string());
        args
    }
}

/// Runs commands through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn from_config(ec2: &Ec2Config) -> Self {
        Self::new(SshOptions::from_config(ec2))
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    async fn spawn(&self, program: &str, args: Vec<String>, stdin: Option<&str>) -> FleetResult<Output> {
        debug!(%program, ?args, "spawning");
        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // Dropping the pipe closes it so the remote side sees EOF.
            drop(pipe);
        }
        Ok(child.wait_with_output().await?)
    }

    fn check(host: &str, what: &str, output: Output) -> FleetResult<String> {
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(FleetError::remote(
            host,
            format!(
                "{what} exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        ))
    }

    async fn ssh(&self, host: &str, command: &str, stdin: Option<&str>) -> FleetResult<Output> {
        self.spawn("ssh", self.options.ssh_args(host, command), stdin).await
    }
}

impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> FleetResult<String> {
        let output = self.ssh(host, command, None).await?;
        Self::check(host, command, output)
    }

    async fn sudo(&self, host: &str, command: &str) -> FleetResult<String> {
        self.run(host, &sudo_command(command)).await
    }

    async fn write_file(&self, host: &str, remote_path: &str, contents: &str) -> FleetResult<()> {
        let command = format!("cat > {}", shell_quote(remote_path));
        let output = self.ssh(host, &command, Some(contents)).await?;
        Self::check(host, &command, output).map(drop)
    }

    async fn put(&self, host: &str, local: &Path, remote_path: &str, mode: Option<u32>) -> FleetResult<()> {
        debug!(%host, local = %local.display(), remote = %remote_path, "copying file to host");
        let output = self
            .spawn("scp", self.options.scp_put_args(host, local, remote_path), None)
            .await?;
        Self::check(host, "scp", output)?;
        if let Some(mode) = mode {
            self.run(host, &format!("chmod {mode:o} {}", shell_quote(remote_path)))
                .await?;
        }
        Ok(())
    }

    async fn get(&self, host: &str, remote_path: &str, local: &Path) -> FleetResult<()> {
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output = self
            .spawn("scp", self.options.scp_get_args(host, remote_path, local), None)
            .await?;
        Self::check(host, "scp", output).map(drop)
    }

    async fn reboot(&self, host: &str) -> FleetResult<()> {
        info!(%host, "issuing reboot");
        let output = self.ssh(host, &sudo_command("reboot"), None).await?;
        // The host may close the connection before ssh sees an exit status.
        if output.status.code() == Some(SSH_CONNECTION_LOST) {
            debug!(%host, "connection dropped during reboot");
            return Ok(());
        }
        Self::check(host, "reboot", output).map(drop)
    }
}

/// Wrap `command` so it runs under a root shell.
pub fn sudo_command(command: &str) -> String {
    format!("sudo bash -c {}", shell_quote(command))
}
