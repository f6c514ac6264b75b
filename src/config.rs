//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::trust::{AutoSaveSchedule, FirstContactPolicy};

/// Process settings derived from defaults, `warden.toml`, and `WARDEN_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "WARDEN",
    discovery(
        app_name = "warden",
        env_var = "WARDEN_CONFIG_PATH",
        config_file_name = "warden.toml",
        dotfile_name = ".warden.toml",
        project_file_name = "warden.toml"
    )
)]
pub struct WardenConfig {
    /// Location of the credential and host-key file.
    #[ortho_config(default = "ssh-auth.json".to_owned())]
    pub trust_store_path: String,
    /// What to do with an unknown host key: `ACCEPT`, `REJECT` or `CONFIRM`.
    #[ortho_config(default = "CONFIRM".to_owned())]
    pub first_connection_policy: String,
    /// Seconds an operator has to answer a host key prompt.
    #[ortho_config(default = 300)]
    pub confirmation_timeout_secs: u64,
    /// Milliseconds between state polls.
    #[ortho_config(default = 5000)]
    pub watch_interval_ms: u64,
    /// Seconds before the first background save check.
    #[ortho_config(default = 60)]
    pub autosave_initial_delay_secs: u64,
    /// Seconds between background save checks.
    #[ortho_config(default = 10)]
    pub autosave_period_secs: u64,
    /// Retry bound embedders pass to `InstanceInventory::discover` and
    /// `InstanceInventory::perform`. The CLI makes no provider calls.
    #[ortho_config(default = 3)]
    pub retry_count: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn guidance(&self) -> String {
        format!(
            "{}: set {} or add {} to warden.toml",
            self.description, self.env_var, self.toml_key
        )
    }
}

const TRUST_STORE_PATH: FieldMetadata = FieldMetadata::new(
    "trust store path",
    "WARDEN_TRUST_STORE_PATH",
    "trust_store_path",
);
const FIRST_CONNECTION_POLICY: FieldMetadata = FieldMetadata::new(
    "first connection policy",
    "WARDEN_FIRST_CONNECTION_POLICY",
    "first_connection_policy",
);
const WATCH_INTERVAL: FieldMetadata = FieldMetadata::new(
    "watch interval",
    "WARDEN_WATCH_INTERVAL_MS",
    "watch_interval_ms",
);
const AUTOSAVE_PERIOD: FieldMetadata = FieldMetadata::new(
    "autosave period",
    "WARDEN_AUTOSAVE_PERIOD_SECS",
    "autosave_period_secs",
);

impl WardenConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("warden")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for empty values,
    /// [`ConfigError::InvalidPolicy`] for unknown policy names, and
    /// [`ConfigError::InvalidValue`] for zero intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trust_store_path.trim().is_empty() {
            return Err(ConfigError::MissingField(TRUST_STORE_PATH.guidance()));
        }
        self.policy()?;
        if self.watch_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "must be greater than zero; {}",
                WATCH_INTERVAL.guidance()
            )));
        }
        if self.autosave_period_secs == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "must be greater than zero; {}",
                AUTOSAVE_PERIOD.guidance()
            )));
        }
        Ok(())
    }

    /// Parses the configured first connection policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPolicy`] for unknown names, including an
    /// empty value.
    pub fn policy(&self) -> Result<FirstContactPolicy, ConfigError> {
        self.first_connection_policy
            .parse()
            .map_err(|err: crate::trust::PolicyError| {
                ConfigError::InvalidPolicy(format!("{err}; {}", FIRST_CONNECTION_POLICY.guidance()))
            })
    }

    /// Trust store location.
    #[must_use]
    pub fn trust_store_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.trust_store_path.trim())
    }

    /// Host key prompt timeout.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Polling interval for state watches.
    #[must_use]
    pub const fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    /// Background save cadence.
    #[must_use]
    pub const fn autosave_schedule(&self) -> AutoSaveSchedule {
        AutoSaveSchedule {
            initial_delay: Duration::from_secs(self.autosave_initial_delay_secs),
            period: Duration::from_secs(self.autosave_period_secs),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates the first connection policy is not recognised.
    #[error("invalid first connection policy: {0}")]
    InvalidPolicy(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
