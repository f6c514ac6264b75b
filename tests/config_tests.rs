//! Tests for configuration validation and loading.

use std::time::Duration;

use rstest::*;
use warden::config::{ConfigError, WardenConfig};
use warden::test_support::EnvGuard;
use warden::trust::FirstContactPolicy;

#[fixture]
fn valid_config() -> WardenConfig {
    WardenConfig {
        trust_store_path: String::from("state/ssh-auth.json"),
        first_connection_policy: String::from("CONFIRM"),
        confirmation_timeout_secs: 300,
        watch_interval_ms: 5000,
        autosave_initial_delay_secs: 60,
        autosave_period_secs: 10,
        retry_count: 3,
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: WardenConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
    assert_eq!(valid_config.policy(), Ok(FirstContactPolicy::Confirm));
    assert_eq!(valid_config.watch_interval(), Duration::from_millis(5000));
    assert_eq!(valid_config.confirmation_timeout(), Duration::from_secs(300));

    let schedule = valid_config.autosave_schedule();
    assert_eq!(schedule.initial_delay, Duration::from_secs(60));
    assert_eq!(schedule.period, Duration::from_secs(10));
}

/// Validation errors name the environment variable and TOML key that feed
/// the offending field.
#[rstest]
#[case::store_path(
    |cfg: &mut WardenConfig| cfg.trust_store_path = String::from("  "),
    "WARDEN_TRUST_STORE_PATH",
    "trust_store_path"
)]
#[case::policy(
    |cfg: &mut WardenConfig| cfg.first_connection_policy = String::from("MAYBE"),
    "WARDEN_FIRST_CONNECTION_POLICY",
    "first_connection_policy"
)]
#[case::empty_policy(
    |cfg: &mut WardenConfig| cfg.first_connection_policy.clear(),
    "WARDEN_FIRST_CONNECTION_POLICY",
    "first_connection_policy"
)]
#[case::watch_interval(
    |cfg: &mut WardenConfig| cfg.watch_interval_ms = 0,
    "WARDEN_WATCH_INTERVAL_MS",
    "watch_interval_ms"
)]
#[case::autosave_period(
    |cfg: &mut WardenConfig| cfg.autosave_period_secs = 0,
    "WARDEN_AUTOSAVE_PERIOD_SECS",
    "autosave_period_secs"
)]
fn validation_errors_are_actionable(
    valid_config: WardenConfig,
    #[case] mutate: fn(&mut WardenConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let Err(error) = cfg.validate() else {
        panic!("validation should fail");
    };
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("warden.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn unknown_policy_is_reported_as_invalid_policy(valid_config: WardenConfig) {
    let cfg = WardenConfig {
        first_connection_policy: String::from("trust-everyone"),
        ..valid_config
    };

    let Err(ConfigError::InvalidPolicy(message)) = cfg.validate() else {
        panic!("expected InvalidPolicy error");
    };
    assert!(message.contains("trust-everyone"), "{message}");
}

#[rstest]
#[case("accept", FirstContactPolicy::Accept)]
#[case("Reject", FirstContactPolicy::Reject)]
#[case("CONFIRM", FirstContactPolicy::Confirm)]
fn policy_names_are_case_insensitive(
    valid_config: WardenConfig,
    #[case] name: &str,
    #[case] expected: FirstContactPolicy,
) {
    let cfg = WardenConfig {
        first_connection_policy: name.to_owned(),
        ..valid_config
    };

    assert_eq!(cfg.policy(), Ok(expected));
}

#[rstest]
fn trust_store_path_is_trimmed(valid_config: WardenConfig) {
    let cfg = WardenConfig {
        trust_store_path: String::from("  /var/lib/warden/ssh-auth.json \n"),
        ..valid_config
    };

    assert_eq!(cfg.trust_store_path().as_str(), "/var/lib/warden/ssh-auth.json");
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("WARDEN_FIRST_CONNECTION_POLICY", "ACCEPT"),
        ("WARDEN_WATCH_INTERVAL_MS", "250"),
        ("WARDEN_TRUST_STORE_PATH", "/tmp/warden-env/ssh-auth.json"),
    ])
    .await;

    let cfg = WardenConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from env: {err}"));

    assert_eq!(cfg.policy(), Ok(FirstContactPolicy::Accept));
    assert_eq!(cfg.watch_interval(), Duration::from_millis(250));
    assert_eq!(cfg.trust_store_path().as_str(), "/tmp/warden-env/ssh-auth.json");
    assert_eq!(cfg.autosave_period_secs, 10);
    assert_eq!(cfg.retry_count, 3);
}
