//! Scheduler configuration.

use serde::{Deserialize, Serialize};

const fn default_enabled() -> bool {
    true
}

/// Interval-trigger poll period.
const fn default_tick_seconds() -> u64 {
    60
}

/// Must exceed the slowest expected run, or two instances may run one task.
const fn default_lock_ttl_seconds() -> u64 {
    1800
}

fn default_lock_prefix() -> String {
    "sync_task_scheduler:lock:".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,

    /// Prepended to the task id to form the lock key.
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,

    /// Lock owner identity. Defaults to `hostname:pid`.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_seconds: default_tick_seconds(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            lock_prefix: default_lock_prefix(),
            instance_id: None,
        }
    }
}

impl SchedulerConfig {
    /// Configured instance id, or `hostname:pid`.
    #[must_use]
    pub fn resolved_instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
            format!("{host}:{}", std::process::id())
        })
    }

    #[must_use]
    pub fn lock_key(&self, task_id: &str) -> String {
        format!("{}{task_id}", self.lock_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.tick_seconds, 60);
        assert_eq!(config.lock_ttl_seconds, 1800);
        assert_eq!(config.lock_key("stk-1"), "sync_task_scheduler:lock:stk-1");
    }

    #[test]
    fn explicit_instance_id_wins() {
        let config = SchedulerConfig {
            instance_id: Some("node-a".into()),
            ..Default::default()
        };
        assert_eq!(config.resolved_instance_id(), "node-a");
        let generated = SchedulerConfig::default().resolved_instance_id();
        assert!(generated.ends_with(&format!(":{}", std::process::id())));
    }
}
