pub mod bench;
pub mod cluster;
pub mod plan;

use std::path::Path;

use anyhow::Context;
use fleet_core::FleetConfig;
use tracing::debug;

/// Used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "fleet.toml";

/// Load the configuration file (or defaults) and apply `--set` overrides.
pub fn load_config(path: Option<&Path>, overrides: &[(String, String)]) -> anyhow::Result<FleetConfig> {
    let base = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            debug!(file = DEFAULT_CONFIG_FILE, "using default configuration file");
            FleetConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load {DEFAULT_CONFIG_FILE}"))?
        }
        None => FleetConfig::default(),
    };
    if overrides.is_empty() {
        return Ok(base);
    }
    Ok(base.with_overrides(overrides)?)
}

/// Parse a `KEY=VALUE` pair for `--set`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("coordinator.args=-Xmx=2g").unwrap(),
            ("coordinator.args".to_string(), "-Xmx=2g".to_string())
        );
        assert!(parse_key_val("site.partitions").is_err());
        assert!(parse_key_val("=4").is_err());
    }

    #[test]
    fn file_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[site]\npartitions = 8\n\n[ec2]\nregion = \"eu-west-1\"").unwrap();

        let overrides = vec![("client.count".to_string(), "3".to_string())];
        let config = load_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.site.partitions, 8);
        assert_eq!(config.ec2.region, "eu-west-1");
        assert_eq!(config.client.count, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/fleet.toml")), &[]).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fleet.toml"));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[site]\npartitions = 8").unwrap();
        let overrides = vec![("site.partitions_per_site".to_string(), "0".to_string())];
        assert!(load_config(Some(file.path()), &overrides).is_err());
    }
}
