//! Polling of instance lifecycle states with change callbacks.
//!
//! Each [`StateWatcher::watch`] call starts one polling task. Every interval
//! the task queries each watched instance and fires the callback when the
//! instance is in a target state it was not in at the previous poll. An
//! instance seen for the first time has no previous state, so an instance
//! already in a target state fires on the first poll.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::compute::{ComputeApi, InstanceHandle, LifecycleState};

/// Default polling interval.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(5000);

/// Errors raised when a watch cannot be started.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WatchError {
    /// No instance was given.
    #[error("no instances to watch")]
    NoResources,
    /// No target state was given.
    #[error("target lifecycle states are required")]
    NoTargetStates,
    /// The interval was zero.
    #[error("watch interval must be greater than zero")]
    ZeroInterval,
}

/// A qualifying lifecycle transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateChangeEvent {
    /// Instance that changed.
    pub instance: InstanceHandle,
    /// State recorded at the previous poll; `None` on first observation.
    pub previous: Option<LifecycleState>,
    /// State observed now.
    pub current: LifecycleState,
}

/// Error a callback may return; it is logged and otherwise ignored.
pub type CallbackError = Box<dyn StdError + Send + Sync>;

/// Receives [`StateChangeEvent`]s from a watch.
pub trait StateCallback: Send + Sync + 'static {
    /// Handles one transition.
    ///
    /// # Errors
    ///
    /// Any error is logged by the watcher; polling continues.
    fn on_change(&self, event: &StateChangeEvent) -> Result<(), CallbackError>;
}

impl<F> StateCallback for F
where
    F: Fn(&StateChangeEvent) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    fn on_change(&self, event: &StateChangeEvent) -> Result<(), CallbackError> {
        self(event)
    }
}

/// Starts polling loops against a compute API.
#[derive(Clone)]
pub struct StateWatcher {
    api: Arc<dyn ComputeApi>,
}

impl fmt::Debug for StateWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateWatcher").finish_non_exhaustive()
    }
}

impl StateWatcher {
    /// Creates a watcher querying `api`.
    #[must_use]
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }

    /// Polls `resources` every `interval` and calls `callback` when one of
    /// them enters a state in `targets`. Duplicate instances are watched
    /// once.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] when there is nothing to watch, no target
    /// state, or a zero interval.
    pub fn watch(
        &self,
        resources: impl IntoIterator<Item = InstanceHandle>,
        targets: impl IntoIterator<Item = LifecycleState>,
        interval: Duration,
        callback: impl StateCallback,
    ) -> Result<WatchHandle, WatchError> {
        let watched: BTreeMap<String, InstanceHandle> = resources
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();
        let target_states: HashSet<LifecycleState> = targets.into_iter().collect();
        if watched.is_empty() {
            return Err(WatchError::NoResources);
        }
        if target_states.is_empty() {
            return Err(WatchError::NoTargetStates);
        }
        if interval.is_zero() {
            return Err(WatchError::ZeroInterval);
        }

        tracing::info!(
            instances = watched.len(),
            ?interval,
            "starting state watch"
        );
        let token = CancellationToken::new();
        let poller = Poller {
            api: Arc::clone(&self.api),
            resources: watched.into_values().collect(),
            targets: target_states,
            interval,
            callback: Box::new(callback),
            last_seen: HashMap::new(),
            token: token.clone(),
        };
        let task = tokio::spawn(poller.run());
        Ok(WatchHandle {
            token,
            task: Some(task),
        })
    }
}

/// Controls a running watch.
///
/// Dropping the handle cancels the watch.
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stops the watch. No callback fires once the loop observes the signal.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once [`WatchHandle::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` when the polling task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancels the watch and waits for the polling task to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "state watch ended abnormally");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Poller {
    api: Arc<dyn ComputeApi>,
    resources: Vec<InstanceHandle>,
    targets: HashSet<LifecycleState>,
    interval: Duration,
    callback: Box<dyn StateCallback>,
    last_seen: HashMap<String, LifecycleState>,
    token: CancellationToken,
}

impl Poller {
    async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.token.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            if !self.poll_once().await {
                break;
            }
        }
        tracing::debug!("state watch stopped");
    }

    /// Returns `false` when the loop must stop.
    async fn poll_once(&mut self) -> bool {
        for instance in &self.resources {
            if self.token.is_cancelled() {
                return false;
            }
            let queried = tokio::select! {
                () = self.token.cancelled() => return false,
                result = self.api.instance_state(instance) => result,
            };
            let current = match queried {
                Ok(state) => state,
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(instance_id = %instance.id, "state query cancelled");
                    return false;
                }
                Err(err) => {
                    tracing::error!(instance_id = %instance.id, error = %err, "failed to query instance state");
                    continue;
                }
            };
            if self.token.is_cancelled() {
                return false;
            }

            let previous = self.last_seen.insert(instance.id.clone(), current);
            if self.targets.contains(&current) && previous != Some(current) {
                let event = StateChangeEvent {
                    instance: instance.clone(),
                    previous,
                    current,
                };
                dispatch(self.callback.as_ref(), &event);
            }
        }
        true
    }
}

fn dispatch(callback: &dyn StateCallback, event: &StateChangeEvent) {
    tracing::debug!(
        instance_id = %event.instance.id,
        previous = ?event.previous,
        current = %event.current,
        "instance state changed"
    );
    match catch_unwind(AssertUnwindSafe(|| callback.on_change(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(instance_id = %event.instance.id, error = %err, "state callback failed");
        }
        Err(_) => {
            tracing::error!(instance_id = %event.instance.id, "state callback panicked");
        }
    }
}

#[cfg(test)]
mod tests;
