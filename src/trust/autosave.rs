//! Background flushing of a dirty trust store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::{TrustStore, TrustStoreError};

/// When the background task checks the dirty flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AutoSaveSchedule {
    /// Delay before the first check.
    pub initial_delay: Duration,
    /// Interval between later checks.
    pub period: Duration,
}

impl Default for AutoSaveSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            period: Duration::from_secs(10),
        }
    }
}

/// Handle to the task that periodically saves a dirty [`TrustStore`].
///
/// Dropping the handle stops the task without a final flush; call
/// [`AutoSave::close`] on shutdown instead.
#[derive(Debug)]
pub struct AutoSave {
    store: Arc<TrustStore>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AutoSave {
    /// Starts the background task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(store: Arc<TrustStore>, schedule: AutoSaveSchedule) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&store), schedule, token.clone()));
        Self {
            store,
            token,
            task: Some(task),
        }
    }

    /// Stops the background task, then saves outstanding changes.
    ///
    /// # Errors
    ///
    /// Returns the error of the final save.
    pub async fn close(mut self) -> Result<(), TrustStoreError> {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "autosave task ended abnormally");
        }
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.flush_if_dirty()).await {
            Ok(result) => result.map(|_| ()),
            Err(err) => {
                tracing::warn!(error = %err, "final credential save did not complete");
                Ok(())
            }
        }
    }
}

impl Drop for AutoSave {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(store: Arc<TrustStore>, schedule: AutoSaveSchedule, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + schedule.initial_delay, schedule.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let flushing = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || flushing.flush_if_dirty()).await {
            Ok(Ok(true)) => tracing::debug!(path = %store.path(), "autosaved credentials"),
            Ok(Ok(false)) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "autosave failed; waiting for the next change");
            }
            Err(err) => tracing::warn!(error = %err, "autosave task did not complete"),
        }
    }
}
