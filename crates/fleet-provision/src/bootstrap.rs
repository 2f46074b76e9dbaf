//! Node bootstrap: base environment, shared-storage head, and clients.
//!
//! Every step is idempotent on re-run. Lines are appended only when
//! absent, directories and checkouts are created only when missing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use fleet_core::properties::update_conf;
use fleet_core::remote::shell_quote;
use fleet_core::{CloudInstance, CloudProvider, FleetError, FleetResult, InstanceTags, RemoteExecutor, Role};
use fleet_health::NetworkProbe;

use crate::fleet::{Fleet, remote_host};

/// Installed on every node.
pub const BASE_PACKAGES: &[&str] = &[
    "subversion",
    "gcc",
    "g++",
    "sun-java6-jdk",
    "valgrind",
    "ant",
    "htop",
    "realpath",
    "unison",
];

pub const HEAD_PACKAGES: &[&str] = &["nfs-kernel-server"];

pub const CLIENT_PACKAGES: &[&str] = &["autofs"];

/// Host alias clients use to reach the head's export.
pub const NFS_HOST_ALIAS: &str = "hstore-nfs";

const SITE_LOG_DIR: &str = "/tmp/hstore/logs/sites";

impl<P: CloudProvider, R: RemoteExecutor, N: NetworkProbe> Fleet<'_, P, R, N> {
    /// Packages, apt sources, operator keys, and shell aliases.
    pub async fn setup_env(&self, inst: &CloudInstance) -> FleetResult<()> {
        let host = remote_host(inst)?;
        let remote = self.remote();
        info!(instance = %inst.label(), "setting up node environment");

        let release = remote.run(host, "grep DISTRIB_CODENAME /etc/lsb-release").await?;
        let codename = release
            .split('=')
            .nth(1)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| FleetError::remote(host, "unable to determine release codename"))?;

        for kind in ["deb", "deb-src"] {
            let line = format!("{kind} http://archive.canonical.com/ubuntu {codename} partner");
            remote.append_line(host, "/etc/apt/sources.list", &line, true).await?;
        }
        remote.sudo(host, "apt-get update").await?;
        remote
            .sudo(
                host,
                "echo sun-java6-jre shared/accepted-sun-dlj-v1-1 select true | /usr/bin/debconf-set-selections",
            )
            .await?;
        remote
            .sudo(host, &format!("apt-get --yes install {}", BASE_PACKAGES.join(" ")))
            .await?;

        self.install_keys(host).await?;

        let aliases = self.shell_aliases();
        update_conf(remote, host, ".bashrc", &aliases, &BTreeSet::new(), true).await
    }

    /// Copy the operator key pair into `~/.ssh` where it is missing.
    async fn install_keys(&self, host: &str) -> FleetResult<()> {
        let ec2 = &self.config().ec2;
        let key = ec2.ssh_key_path();
        let mut public = key.clone().into_os_string();
        public.push(".pub");
        let public = std::path::PathBuf::from(public);

        let ssh_dir = format!("/home/{}/.ssh", ec2.ssh_user);
        let files = [
            (&public, format!("{ssh_dir}/authorized_keys")),
            (&public, format!("{ssh_dir}/id_dsa.pub")),
            (&key, format!("{ssh_dir}/id_dsa")),
        ];
        for (local, remote_path) in files {
            if self
                .remote()
                .succeeds(host, &format!("test -f {}", shell_quote(&remote_path)))
                .await
            {
                continue;
            }
            debug!(%host, file = %remote_path, "installing key file");
            self.remote().put(host, local, &remote_path, Some(0o600)).await?;
        }
        Ok(())
    }

    fn shell_aliases(&self) -> BTreeMap<String, String> {
        let code_dir = format!("$HOME/{}", self.config().hstore.code_dir());
        let log_dir = self
            .config()
            .site
            .extra
            .get("log_dir")
            .and_then(|v| v.as_str())
            .unwrap_or(SITE_LOG_DIR)
            .to_string();
        [
            ("hh", format!("cd {code_dir}")),
            ("hl", format!("cd {log_dir}")),
            ("rmf", "rm -rf".to_string()),
            ("la", "ls -lh".to_string()),
            ("h", "history".to_string()),
            ("top", "htop".to_string()),
        ]
        .into_iter()
        .map(|(name, cmd)| (format!("alias {name}"), format!("\"{cmd}\"")))
        .collect()
    }

    /// Bootstrap the head: shared-storage export when `initialize_export`
    /// is set, then deploy and build the software.
    pub async fn setup_head(&self, inst: &CloudInstance, initialize_export: bool) -> FleetResult<()> {
        let host = remote_host(inst)?;
        let remote = self.remote();

        if initialize_export {
            info!(instance = %inst.label(), "initializing shared storage on head");
            let export_dir = self.export_dir();
            if !remote.succeeds(host, &format!("test -d {export_dir}")).await {
                remote.run(host, &format!("mkdir {export_dir}")).await?;
            }
            remote
                .sudo(host, &format!("apt-get --yes install {}", HEAD_PACKAGES.join(" ")))
                .await?;
            remote
                .append_line(
                    host,
                    "/etc/exports",
                    &format!("{export_dir} *(rw,async,no_subtree_check)"),
                    true,
                )
                .await?;
            remote.sudo(host, "exportfs -a").await?;
            remote.sudo(host, "/etc/init.d/portmap start").await?;
            remote.sudo(host, "/etc/init.d/nfs-kernel-server start").await?;

            let tags = InstanceTags {
                name: inst.label().to_string(),
                role: Role::Head,
            };
            self.provider().apply_tags(&inst.id, &tags).await?;
        } else {
            debug!(instance = %inst.label(), "head already online, skipping export setup");
        }

        self.deploy_software(inst, true).await
    }

    /// Check out (or update) the source tree on `inst`, optionally
    /// building it.
    pub async fn deploy_software(&self, inst: &CloudInstance, build: bool) -> FleetResult<()> {
        let host = remote_host(inst)?;
        let remote = self.remote();
        let hstore = &self.config().hstore;
        let checkout = hstore.checkout_name();
        let code_dir = hstore.code_dir();

        if !remote.succeeds(host, &format!("test -d {code_dir}")).await {
            info!(%host, svn = %hstore.svn, "checking out source tree");
            remote
                .run(
                    host,
                    &format!("cd hstore && svn checkout {} {} {checkout}", hstore.svn_options, hstore.svn),
                )
                .await?;
        }
        remote
            .run(host, &format!("cd {code_dir} && svn update {}", hstore.svn_options))
            .await?;

        if build {
            debug!(%host, "building from source");
            if hstore.clean {
                remote.run(host, &format!("cd {code_dir} && ant clean-all")).await?;
            }
            remote.run(host, &format!("cd {code_dir} && ant build")).await?;
        }
        Ok(())
    }

    /// Point `inst` at the head's export, rebooting it when `reboot` is
    /// set and waiting for it to come back.
    pub async fn setup_client(&self, inst: &CloudInstance, head: &CloudInstance, reboot: bool) -> FleetResult<()> {
        let host = remote_host(inst)?;
        let remote = self.remote();
        let head_address = head
            .private_host()
            .ok_or_else(|| FleetError::Provider(format!("head {} has no private address", head.label())))?;
        info!(instance = %inst.label(), head = %head_address, "setting up client");

        remote
            .replace_or_append_line(
                host,
                "/etc/hosts",
                NFS_HOST_ALIAS,
                &format!("{head_address} {NFS_HOST_ALIAS}"),
                true,
            )
            .await?;
        remote
            .sudo(host, &format!("apt-get --yes install {}", CLIENT_PACKAGES.join(" ")))
            .await?;

        let export_dir = self.export_dir();
        remote
            .append_line(host, "/etc/auto.master", &format!("{export_dir} /etc/auto.hstore"), true)
            .await?;
        remote
            .append_line(
                host,
                "/etc/auto.hstore",
                &format!("* {NFS_HOST_ALIAS}:{export_dir}/&"),
                true,
            )
            .await?;
        remote.sudo(host, "/etc/init.d/autofs start").await?;

        if reboot {
            info!(instance = %inst.label(), "rebooting client");
            remote.reboot(host).await?;
            tokio::time::sleep(self.config().ec2.reboot_wait()).await;
            self.prober().wait_until_ready(self.provider(), inst).await?;
        }

        // The mount is automatic, so entering the checkout proves it works.
        remote
            .run(host, &format!("cd {}", self.config().hstore.code_dir()))
            .await?;
        info!(instance = %inst.label(), "client is online");
        Ok(())
    }

    fn export_dir(&self) -> String {
        format!("/home/{}/hstore", self.config().ec2.ssh_user)
    }
}
