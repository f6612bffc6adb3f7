// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image configuration carried alongside LLB states.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A container image healthcheck.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// The test command, exec form (`["CMD", …]` or `["NONE"]`).
    pub test: Vec<String>,
    /// Seconds between checks.
    pub interval_secs: u64,
    /// Seconds before a check is considered failed.
    pub timeout_secs: u64,
    /// Grace period during container start, seconds.
    pub start_period_secs: u64,
    /// Seconds between checks during the start period.
    pub start_interval_secs: u64,
    /// Failures tolerated before unhealthy.
    pub retries: i64,
}

/// The configuration of an image under construction.
///
/// Mirrors the OCI image config fields the interpreter can influence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Environment variables, `K=V` form, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Default command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    /// Entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    /// User.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Exposed ports (`80/tcp`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_ports: Vec<String>,
    /// Volume mount points.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Default shell for shell-form commands.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shell: Vec<String>,
    /// Healthcheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
}

impl ImageConfig {
    /// Set or replace an environment variable, preserving declaration order
    /// for new names.
    pub fn set_env(&mut self, name: &str, value: &str) {
        let prefix = format!("{name}=");
        for entry in &mut self.env {
            if entry.starts_with(&prefix) {
                *entry = format!("{name}={value}");
                return;
            }
        }
        self.env.push(format!("{name}={value}"));
    }

    /// Look up an environment variable.
    #[must_use]
    pub fn get_env(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}=");
        self.env
            .iter()
            .find(|e| e.starts_with(&prefix))
            .map(|e| &e[prefix.len()..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_env_replaces_in_place() {
        let mut config = ImageConfig::default();
        config.set_env("A", "1");
        config.set_env("B", "2");
        config.set_env("A", "3");
        assert_eq!(config.env, vec!["A=3", "B=2"]);
        assert_eq!(config.get_env("A"), Some("3"));
        assert_eq!(config.get_env("C"), None);
    }

    #[test]
    fn serde_round_trip() {
        let mut config = ImageConfig::default();
        config.set_env("PATH", "/usr/bin");
        config.cmd = vec!["/bin/sh".to_string()];
        config.labels.insert("k".to_string(), "v".to_string());
        let json = serde_json::to_string(&config).expect("serialize");
        let back: ImageConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }
}
