//! Remote executor collaborator.
//!
//! Runs commands on cluster hosts. The provided methods build the
//! idempotent line-editing helpers out of `run`/`sudo`, so a backend only
//! has to supply transport.

use std::path::Path;

use crate::error::FleetResult;

#[allow(async_fn_in_trait)]
pub trait RemoteExecutor {
    /// Run a command as the login user and return its stdout.
    async fn run(&self, host: &str, command: &str) -> FleetResult<String>;

    /// Run a command as root and return its stdout.
    async fn sudo(&self, host: &str, command: &str) -> FleetResult<String>;

    /// Replace `remote_path` with `contents`.
    async fn write_file(&self, host: &str, remote_path: &str, contents: &str) -> FleetResult<()>;

    /// Copy a local file to the host, optionally setting its mode.
    async fn put(&self, host: &str, local: &Path, remote_path: &str, mode: Option<u32>) -> FleetResult<()>;

    /// Copy a file from the host to the local machine.
    async fn get(&self, host: &str, remote_path: &str, local: &Path) -> FleetResult<()>;

    /// Reboot the host. Returns once the reboot has been issued.
    async fn reboot(&self, host: &str) -> FleetResult<()>;

    /// Best-effort check: `true` iff the command exits zero.
    async fn succeeds(&self, host: &str, command: &str) -> bool {
        self.run(host, command).await.is_ok()
    }

    /// Contents of a remote text file; a missing file reads as empty.
    async fn read_file(&self, host: &str, remote_path: &str) -> FleetResult<String> {
        self.run(host, &read_file_command(remote_path)).await
    }

    /// Append `line` unless the file already contains it verbatim.
    async fn append_line(&self, host: &str, remote_path: &str, line: &str, use_sudo: bool) -> FleetResult<()> {
        let path = shell_quote(remote_path);
        let quoted = shell_quote(line);
        let command = format!("grep -qxF -- {quoted} {path} 2>/dev/null || echo {quoted} >> {path}");
        if use_sudo {
            self.sudo(host, &command).await?;
        } else {
            self.run(host, &command).await?;
        }
        Ok(())
    }

    /// Replace every line containing `marker` with `line`, or append
    /// `line` if no line contains it.
    async fn replace_or_append_line(
        &self,
        host: &str,
        remote_path: &str,
        marker: &str,
        line: &str,
        use_sudo: bool,
    ) -> FleetResult<()> {
        let current = self.read_file(host, remote_path).await?;
        let mut replaced = false;
        let mut lines: Vec<&str> = Vec::new();
        for existing in current.lines() {
            if existing.contains(marker) {
                if !replaced {
                    lines.push(line);
                    replaced = true;
                }
            } else {
                lines.push(existing);
            }
        }
        if !replaced {
            lines.push(line);
        }
        let mut contents = lines.join("\n");
        contents.push('\n');

        if use_sudo {
            let tmp = format!("/tmp/.fleet-{}", remote_path.replace('/', "_"));
            self.write_file(host, &tmp, &contents).await?;
            self.sudo(host, &format!("cp {} {}", shell_quote(&tmp), shell_quote(remote_path)))
                .await?;
            Ok(())
        } else {
            self.write_file(host, remote_path, &contents).await
        }
    }
}

/// Prints the file if it exists. A missing file exits zero with no
/// output; a failing `cat` keeps its non-zero status.
pub fn read_file_command(remote_path: &str) -> String {
    let path = shell_quote(remote_path);
    format!("if [ -f {path} ]; then cat {path}; fi")
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
