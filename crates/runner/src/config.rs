use std::path::Path;
use std::time::Duration;

use sandbox::{LimitPolicy, NetworkPosture, parse_seconds};
use sandbox_proc::{SupervisorConfig, UnsupportedMode};
use serde::Deserialize;

use crate::error::{CliError, CliResult};

pub(crate) const DEFAULT_CPU_SECS: f64 = 2.0;
pub(crate) const DEFAULT_MEMORY_MB: u64 = 256;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Unrestricted,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnsupported {
    Downgrade,
    Fail,
}

/// Limits and supervisor knobs, as read from YAML or collected from flags.
///
/// Every field is optional so a file and the command line can be layered;
/// unset fields fall back to defaults in [`RunConfig::into_settings`].
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Seconds of CPU time.
    pub cpu_time_limit: Option<f64>,
    /// Megabytes of resident memory.
    pub memory_limit: Option<u64>,
    /// Seconds of wall-clock time.
    pub wall_clock_timeout: Option<f64>,
    pub network: Option<Network>,
    pub output_cap_bytes: Option<usize>,
    pub grace_period_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub on_unsupported: Option<OnUnsupported>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub policy: LimitPolicy,
    pub supervisor: SupervisorConfig,
}

/// Load a run config from a YAML file.
pub async fn load(path: &Path) -> CliResult<RunConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))
}

impl RunConfig {
    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(self, overrides: RunConfig) -> RunConfig {
        RunConfig {
            cpu_time_limit: overrides.cpu_time_limit.or(self.cpu_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            wall_clock_timeout: overrides.wall_clock_timeout.or(self.wall_clock_timeout),
            network: overrides.network.or(self.network),
            output_cap_bytes: overrides.output_cap_bytes.or(self.output_cap_bytes),
            grace_period_ms: overrides.grace_period_ms.or(self.grace_period_ms),
            tick_interval_ms: overrides.tick_interval_ms.or(self.tick_interval_ms),
            on_unsupported: overrides.on_unsupported.or(self.on_unsupported),
        }
    }

    /// Resolve into a validated policy and supervisor config.
    pub fn into_settings(self) -> CliResult<Settings> {
        let cpu = parse_seconds(
            "cpu_time_limit",
            self.cpu_time_limit.unwrap_or(DEFAULT_CPU_SECS),
        )?;
        let memory_mb = self.memory_limit.unwrap_or(DEFAULT_MEMORY_MB);
        let memory = memory_mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
            sandbox::SandboxError::InvalidPolicy(format!("memory_limit {memory_mb} MB overflows"))
        })?;

        let mut policy = LimitPolicy::default()
            .with_cpu_time_limit(cpu)
            .with_memory_limit(memory);
        if let Some(secs) = self.wall_clock_timeout {
            policy = policy.with_wall_clock_timeout(parse_seconds("wall_clock_timeout", secs)?);
        }
        if self.network == Some(Network::Disabled) {
            policy = policy.with_network(NetworkPosture::Disabled);
        }
        if let Some(cap) = self.output_cap_bytes {
            policy = policy.with_output_cap(cap);
        }
        policy.validate()?;

        let mut supervisor = SupervisorConfig::default();
        if let Some(ms) = self.grace_period_ms {
            supervisor.grace_period = Duration::from_millis(ms);
        }
        if let Some(ms) = self.tick_interval_ms {
            if ms == 0 {
                return Err(CliError::Config("tick_interval_ms must be positive".into()));
            }
            supervisor.tick_interval = Duration::from_millis(ms);
        }
        if self.on_unsupported == Some(OnUnsupported::Fail) {
            supervisor.on_unsupported = UnsupportedMode::Fail;
        }

        Ok(Settings { policy, supervisor })
    }
}

#[cfg(test)]
mod tests {
    use sandbox::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
cpu_time_limit: 1.5
memory_limit: 64
wall_clock_timeout: 10
network: disabled
output_cap_bytes: 4096
grace_period_ms: 200
tick_interval_ms: 20
on_unsupported: fail
"#;
        let path = dir.path().join("sandbox.yaml");
        tokio::fs::write(&path, yaml).await.unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config.cpu_time_limit, Some(1.5));
        assert_eq!(config.network, Some(Network::Disabled));

        let settings = config.into_settings().unwrap();
        assert_eq!(
            settings.policy.cpu_time_limit,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(settings.policy.memory_limit, Some(64 * BYTES_PER_MB));
        assert_eq!(
            settings.policy.wall_clock_timeout,
            Some(Duration::from_secs(10))
        );
        assert_eq!(settings.policy.network, NetworkPosture::Disabled);
        assert_eq!(settings.policy.output_cap_bytes, 4096);
        assert_eq!(settings.supervisor.grace_period, Duration::from_millis(200));
        assert_eq!(settings.supervisor.tick_interval, Duration::from_millis(20));
        assert_eq!(settings.supervisor.on_unsupported, UnsupportedMode::Fail);
    }

    #[tokio::test]
    async fn load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.yaml");
        tokio::fs::write(&path, "cpu_limit: 3\n").await.unwrap();

        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, CliError::Config(_)), "got: {err}");
    }

    #[tokio::test]
    async fn load_fails_on_missing_file() {
        let err = load(Path::new("/nonexistent/sandbox.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read"), "got: {err}");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let settings = RunConfig::default().into_settings().unwrap();
        assert_eq!(settings.policy.cpu_time_limit, Some(Duration::from_secs(2)));
        assert_eq!(
            settings.policy.memory_limit,
            Some(DEFAULT_MEMORY_MB * BYTES_PER_MB)
        );
        assert_eq!(settings.policy.wall_clock_timeout, None);
        assert_eq!(settings.policy.network, NetworkPosture::Unrestricted);
        assert_eq!(settings.supervisor.on_unsupported, UnsupportedMode::Downgrade);
    }

    #[test]
    fn flags_override_file() {
        let file = RunConfig {
            cpu_time_limit: Some(5.0),
            memory_limit: Some(128),
            network: Some(Network::Disabled),
            ..RunConfig::default()
        };
        let flags = RunConfig {
            cpu_time_limit: Some(1.0),
            ..RunConfig::default()
        };

        let merged = file.merge(flags);
        assert_eq!(merged.cpu_time_limit, Some(1.0));
        assert_eq!(merged.memory_limit, Some(128));
        assert_eq!(merged.network, Some(Network::Disabled));
    }

    #[test]
    fn rejects_bad_seconds() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = RunConfig {
                wall_clock_timeout: Some(bad),
                ..RunConfig::default()
            };
            match config.into_settings() {
                Err(CliError::Sandbox(e)) => assert_eq!(e.kind(), ErrorKind::InvalidPolicy),
                other => panic!("{bad}: expected InvalidPolicy, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_zero_memory_and_overflow() {
        for mb in [0, u64::MAX] {
            let config = RunConfig {
                memory_limit: Some(mb),
                ..RunConfig::default()
            };
            assert!(config.into_settings().is_err(), "{mb} MB accepted");
        }
    }

    #[test]
    fn rejects_zero_tick() {
        let config = RunConfig {
            tick_interval_ms: Some(0),
            ..RunConfig::default()
        };
        assert!(matches!(config.into_settings(), Err(CliError::Config(_))));
    }
}
