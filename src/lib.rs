//! Core library for the Warden instance access toolkit.
//!
//! The crate keeps trust-on-first-use host keys and login credentials for
//! cloud compute instances, retries flaky provider calls, and watches
//! instance lifecycle states so automation can react when a machine reaches
//! a state of interest.

pub mod compute;
pub mod config;
pub mod logging;
pub mod registry;
pub mod retry;
pub mod test_support;
pub mod trust;
pub mod watcher;

pub use compute::{
    ComputeApi, ComputeError, InstanceAction, InstanceHandle, InstanceInventory, LifecycleState,
};
pub use config::{ConfigError, WardenConfig};
pub use registry::{ComponentRegistry, RegistryError, ScriptInfo, ScriptLoggerFactory};
pub use retry::{RetryError, Retryer, RetryerBuilder};
pub use trust::{
    AutoSave, FirstContactPolicy, HostKey, HostKeyVerifier, TrustPolicyEvaluator, TrustStore,
};
pub use watcher::{StateChangeEvent, StateWatcher, WatchError, WatchHandle};
