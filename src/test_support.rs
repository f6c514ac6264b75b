//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::compute::{
    ComputeApi, ComputeError, ComputeFuture, InstanceAction, InstanceHandle, LifecycleState,
};
use crate::trust::{ConfirmationChannel, ConfirmationPrompt};

#[derive(Debug, Default)]
struct ScriptedComputeState {
    listings: VecDeque<Result<Vec<InstanceHandle>, ComputeError>>,
    listing_calls: usize,
    states: HashMap<String, VecDeque<Result<LifecycleState, ComputeError>>>,
    state_calls: HashMap<String, usize>,
    actions: VecDeque<Result<LifecycleState, ComputeError>>,
    action_calls: Vec<(String, InstanceAction)>,
}

/// Compute API double that replays pre-seeded responses in FIFO order.
///
/// State responses are queued per instance. The last queued state response
/// is sticky: once an instance's queue holds a single entry, every further
/// query returns it again, which keeps polling loops fed indefinitely.
#[derive(Clone, Debug, Default)]
pub struct ScriptedComputeApi {
    inner: Arc<Mutex<ScriptedComputeState>>,
}

impl ScriptedComputeApi {
    /// Creates a double with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ScriptedComputeState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Queues a successful instance listing.
    pub fn push_listing(&self, instances: Vec<InstanceHandle>) {
        self.with_state(|state| state.listings.push_back(Ok(instances)));
    }

    /// Queues a failed instance listing.
    pub fn push_listing_error(&self, error: ComputeError) {
        self.with_state(|state| state.listings.push_back(Err(error)));
    }

    /// Number of listing requests received so far.
    #[must_use]
    pub fn listing_calls(&self) -> usize {
        self.with_state(|state| state.listing_calls)
    }

    /// Queues lifecycle states reported for `instance_id`, in order.
    pub fn push_states(
        &self,
        instance_id: &str,
        states: impl IntoIterator<Item = LifecycleState>,
    ) {
        self.with_state(|state| {
            state
                .states
                .entry(instance_id.to_owned())
                .or_default()
                .extend(states.into_iter().map(Ok));
        });
    }

    /// Queues a failed state query for `instance_id`.
    pub fn push_state_error(&self, instance_id: &str, error: ComputeError) {
        self.with_state(|state| {
            state
                .states
                .entry(instance_id.to_owned())
                .or_default()
                .push_back(Err(error));
        });
    }

    /// Number of state queries received for `instance_id`.
    #[must_use]
    pub fn state_calls(&self, instance_id: &str) -> usize {
        self.with_state(|state| state.state_calls.get(instance_id).copied().unwrap_or(0))
    }

    /// Queues the state returned by the next lifecycle action.
    pub fn push_action_result(&self, result: LifecycleState) {
        self.with_state(|state| state.actions.push_back(Ok(result)));
    }

    /// Queues a failed lifecycle action.
    pub fn push_action_error(&self, error: ComputeError) {
        self.with_state(|state| state.actions.push_back(Err(error)));
    }

    /// Number of lifecycle actions received so far.
    #[must_use]
    pub fn action_calls(&self) -> usize {
        self.with_state(|state| state.action_calls.len())
    }

    /// Lifecycle actions received so far, as `(instance id, action)` pairs.
    #[must_use]
    pub fn actions(&self) -> Vec<(String, InstanceAction)> {
        self.with_state(|state| state.action_calls.clone())
    }
}

fn unscripted(what: &str) -> ComputeError {
    ComputeError::Provider {
        message: format!("no scripted {what} response available"),
    }
}

impl ComputeApi for ScriptedComputeApi {
    fn list_instances<'a>(&'a self, _account: &'a str) -> ComputeFuture<'a, Vec<InstanceHandle>> {
        let response = self.with_state(|state| {
            state.listing_calls += 1;
            state
                .listings
                .pop_front()
                .unwrap_or_else(|| Err(unscripted("listing")))
        });
        Box::pin(async move { response })
    }

    fn instance_state<'a>(
        &'a self,
        instance: &'a InstanceHandle,
    ) -> ComputeFuture<'a, LifecycleState> {
        let response = self.with_state(|state| {
            *state.state_calls.entry(instance.id.clone()).or_insert(0) += 1;
            let Some(queue) = state.states.get_mut(&instance.id) else {
                return Err(ComputeError::NotFound {
                    instance_id: instance.id.clone(),
                });
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap_or_else(|| Err(unscripted("state")))
            } else {
                queue.front().cloned().unwrap_or_else(|| Err(unscripted("state")))
            }
        });
        Box::pin(async move { response })
    }

    fn perform_action<'a>(
        &'a self,
        instance: &'a InstanceHandle,
        action: InstanceAction,
    ) -> ComputeFuture<'a, LifecycleState> {
        let response = self.with_state(|state| {
            state.action_calls.push((instance.id.clone(), action));
            state
                .actions
                .pop_front()
                .unwrap_or_else(|| Err(unscripted("action")))
        });
        Box::pin(async move { response })
    }
}

/// Confirmation channel that replays scripted answers and records prompts.
///
/// Once the scripted answers run out, every further prompt is declined.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConfirmation {
    answers: Arc<Mutex<VecDeque<io::Result<bool>>>>,
    prompts: Arc<Mutex<Vec<ConfirmationPrompt>>>,
}

impl ScriptedConfirmation {
    /// Creates a channel with no scripted answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel answering the given decisions in order.
    #[must_use]
    pub fn answering(answers: impl IntoIterator<Item = bool>) -> Self {
        let channel = Self::new();
        for answer in answers {
            channel.push_answer(answer);
        }
        channel
    }

    /// Queues an operator decision.
    pub fn push_answer(&self, accepted: bool) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(accepted));
    }

    /// Queues a failure to read the operator's answer.
    pub fn push_failure(&self, kind: io::ErrorKind) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(io::Error::from(kind)));
    }

    /// Prompts shown so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<ConfirmationPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConfirmationChannel for ScriptedConfirmation {
    fn confirm(&self, prompt: &ConfirmationPrompt) -> io::Result<bool> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(false))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
