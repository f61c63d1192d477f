//! Application configuration.
//!
//! Layered with figment: built-in defaults, then the TOML config file, then
//! `CFGSNAP_*` environment variables, then CLI overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::core::notifications::NotificationConfig;
use crate::core::retry::RetryPolicy;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "cfgsnap.toml";
pub const CONFIG_PATH_ENV: &str = "CFGSNAP_CONFIG";
const ENV_PREFIX: &str = "CFGSNAP_";

/// Command used to pull a running configuration for one platform.
///
/// Arguments may contain `{host}`, `{port}`, `{username}`, `{id}` and
/// `{platform}` placeholders. `{port}` falls back to 22.
///
/// The device password, if any, reaches the child through the
/// `CFGSNAP_DEVICE_PASSWORD` and `SSHPASS` environment variables. The
/// built-in `ios`, `eos`, ... templates run ssh with `BatchMode=yes` and so
/// need key-based authentication; the `<platform>-password` variants wrap
/// ssh in `sshpass -e` for devices that only accept a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl PlatformCommand {
    /// Key-based ssh. Never prompts.
    fn ssh(show_command: &str) -> Self {
        Self {
            program: "ssh".to_string(),
            args: ["-o", "BatchMode=yes", "-p", "{port}", "{username}@{host}", show_command]
                .map(String::from)
                .to_vec(),
        }
    }

    /// Password ssh through `sshpass -e`, which reads `SSHPASS`.
    fn sshpass(show_command: &str) -> Self {
        Self {
            program: "sshpass".to_string(),
            args: [
                "-e",
                "ssh",
                "-o",
                "PubkeyAuthentication=no",
                "-o",
                "NumberOfPasswordPrompts=1",
                "-p",
                "{port}",
                "{username}@{host}",
                show_command,
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backup_directory: PathBuf,
    /// Where run summaries go. Defaults to `<backup_directory>/summaries`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_directory: Option<PathBuf>,
    pub inventory_path: PathBuf,
    /// Ceiling on concurrent backup jobs.
    pub max_workers: usize,
    /// Extra attempts for transient fetch failures.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    /// fsync artifacts and summaries before reporting success.
    pub sync_files: bool,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub notifications: NotificationConfig,
    pub platforms: HashMap<String, PlatformCommand>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let platforms = [
            ("ios", "show running-config"),
            ("iosxe", "show running-config"),
            ("nxos", "show running-config"),
            ("eos", "show running-config"),
            ("junos", "show configuration | display set"),
        ]
        .into_iter()
        .flat_map(|(platform, show)| {
            [
                (platform.to_string(), PlatformCommand::ssh(show)),
                (format!("{}-password", platform), PlatformCommand::sshpass(show)),
            ]
        })
        .collect();

        Self {
            backup_directory: PathBuf::from("/home/backup"),
            summary_directory: None,
            inventory_path: PathBuf::from("inventory.toml"),
            max_workers: 8,
            retry_attempts: 0,
            retry_backoff_ms: 500,
            fetch_timeout_secs: 60,
            sync_files: true,
            simulation: false,
            verbose: false,
            json_logs: false,
            log_file: None,
            notifications: NotificationConfig::default(),
            platforms,
        }
    }
}

impl AppConfig {
    /// Load using the config file named by `CFGSNAP_CONFIG`, or `cfgsnap.toml`.
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self, ConfigError> {
        Self::load(None, overrides)
    }

    /// Load with an explicit config file. A missing file is not an error;
    /// defaults and environment still apply.
    pub fn load<T: Serialize>(
        config_file: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, ConfigError> {
        let path = config_file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.backup_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                key: "backup_directory",
                message: "must not be empty".to_string(),
            });
        }
        for (platform, command) in &self.platforms {
            if command.program.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "platforms",
                    message: format!("platform '{}' has an empty program", platform),
                });
            }
        }
        Ok(())
    }

    pub fn summary_dir(&self) -> PathBuf {
        self.summary_directory
            .clone()
            .unwrap_or_else(|| self.backup_directory.join("summaries"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_attempts: self.retry_attempts,
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Render as a TOML document suitable for a config file.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
