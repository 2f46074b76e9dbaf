//! fleet-ssh — `RemoteExecutor` backed by the OpenSSH `ssh`/`scp` clients.

pub mod executor;

pub use executor::{SshExecutor, SshOptions};
