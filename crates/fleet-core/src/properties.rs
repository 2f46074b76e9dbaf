//! Flat `key = value` properties files.
//!
//! An upsert replaces the line whose key matches, or appends a new line
//! if none does. A removal blanks every line matching `key\s*=.*` rather
//! than deleting it, so line numbers in the remote file stay stable.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::{debug, info};

use crate::error::FleetResult;
use crate::remote::RemoteExecutor;

/// In-memory view of a properties file, one entry per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesFile {
    lines: Vec<String>,
    /// Write `key=value` instead of `key = value`.
    compact: bool,
}

impl PropertiesFile {
    pub fn parse(contents: &str, compact: bool) -> Self {
        Self {
            lines: contents.lines().map(str::to_string).collect(),
            compact,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Current value of `key`, if a line defines it.
    pub fn get(&self, key: &str) -> Option<&str> {
        let pattern = key_pattern(key);
        self.lines
            .iter()
            .find(|l| pattern.is_match(l))
            .and_then(|l| l.split_once('='))
            .map(|(_, v)| v.trim())
    }

    /// Number of lines defining `key`.
    pub fn count(&self, key: &str) -> usize {
        let pattern = key_pattern(key);
        self.lines.iter().filter(|l| pattern.is_match(l)).count()
    }

    /// Replace the line defining `key` in place, or append one.
    ///
    /// Returns `true` if an existing line was replaced.
    pub fn upsert(&mut self, key: &str, value: &str) -> bool {
        let line = if self.compact {
            format!("{key}={value}")
        } else {
            format!("{key} = {value}")
        };
        let pattern = key_pattern(key);
        match self.lines.iter_mut().find(|l| pattern.is_match(l)) {
            Some(existing) => {
                *existing = line;
                true
            }
            None => {
                self.lines.push(line);
                false
            }
        }
    }

    /// Blank every line defining `key`. Returns the number blanked.
    pub fn remove(&mut self, key: &str) -> usize {
        let pattern = key_pattern(key);
        let mut removed = 0;
        for line in self.lines.iter_mut().filter(|l| pattern.is_match(l)) {
            line.clear();
            removed += 1;
        }
        removed
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn key_pattern(key: &str) -> Regex {
    // The key is escaped, so the pattern is always valid.
    Regex::new(&format!(r"^\s*{}\s*=", regex::escape(key))).unwrap()
}

/// Apply upserts and removals to a remote properties file.
pub async fn update_conf<R: RemoteExecutor>(
    remote: &R,
    host: &str,
    path: &str,
    updates: &BTreeMap<String, String>,
    removals: &BTreeSet<String>,
    compact: bool,
) -> FleetResult<()> {
    info!(
        file = %path,
        updates = updates.len(),
        removals = removals.len(),
        "updating configuration file"
    );

    let current = remote.read_file(host, path).await?;
    let mut file = PropertiesFile::parse(&current, compact);

    for (key, value) in updates {
        if file.upsert(key, value) {
            debug!(%key, %value, file = %path, "updated property");
        } else {
            debug!(%key, %value, file = %path, "added property");
        }
    }
    for key in removals {
        if file.remove(key) > 0 {
            debug!(%key, file = %path, "removed property");
        }
    }

    remote.write_file(host, path, &file.render()).await
}
