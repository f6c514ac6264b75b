//! Small dedicated worker pool for retried operations.

use std::fmt;
use std::future::Future;
use std::io;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use super::RetryError;

const MAX_WORKERS: usize = 4;
const WORKER_KEEP_ALIVE: Duration = Duration::from_secs(10);
const WORKER_THREAD_NAME: &str = "retryer";

/// Returns the default pool size: half the available cores, clamped to
/// `1..=4`.
#[must_use]
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    (cores >> 1).clamp(1, MAX_WORKERS)
}

/// Runs retry loops on a bounded set of worker threads.
///
/// The queue is unbounded; submissions never block. Each submitted loop runs
/// its attempts strictly one after the other, while independent loops run in
/// parallel across the workers.
#[derive(Debug)]
pub struct RetryExecutor {
    handle: Handle,
    runtime: Option<Runtime>,
    workers: usize,
}

impl RetryExecutor {
    /// Creates an executor sized by [`default_worker_count`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the worker threads cannot be started.
    pub fn new() -> io::Result<Self> {
        Self::with_workers(default_worker_count())
    }

    /// Creates an executor with `workers` threads (at least one).
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the worker threads cannot be started.
    pub fn with_workers(workers: usize) -> io::Result<Self> {
        let worker_count = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_count)
            .thread_name(WORKER_THREAD_NAME)
            .thread_keep_alive(WORKER_KEEP_ALIVE)
            .enable_time()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            workers: worker_count,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    pub(super) fn submit<T, E, F>(&self, future: F) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        E: fmt::Debug + fmt::Display + Send + 'static,
        F: Future<Output = Result<T, RetryError<E>>> + Send + 'static,
    {
        RetryHandle {
            inner: self.handle.spawn(future),
        }
    }

    pub(super) fn block_on_submitted<T, E, F>(
        &self,
        future: F,
        wait: Option<Duration>,
    ) -> Result<T, RetryError<E>>
    where
        T: Send + 'static,
        E: fmt::Debug + fmt::Display + Send + 'static,
        F: Future<Output = Result<T, RetryError<E>>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        let handle = self.submit(future);
        self.handle.spawn(async move {
            sender.send(handle.await).ok();
        });

        let received = match wait {
            Some(limit) => receiver.recv_timeout(limit),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(RetryError::WaitTimedOut {
                waited: wait.unwrap_or_default(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(RetryError::Cancelled { cause: None }),
        }
    }
}

impl Drop for RetryExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Handle to a retry loop running on a [`RetryExecutor`].
///
/// Awaiting the handle yields the loop's result. Dropping it detaches the
/// loop, which keeps running to completion.
#[derive(Debug)]
pub struct RetryHandle<T, E>
where
    E: fmt::Debug + fmt::Display,
{
    inner: JoinHandle<Result<T, RetryError<E>>>,
}

impl<T, E> RetryHandle<T, E>
where
    E: fmt::Debug + fmt::Display,
{
    /// Cancels the loop; awaiting the handle then yields
    /// [`RetryError::Cancelled`].
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Returns `true` once the loop has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T, E> Future for RetryHandle<T, E>
where
    E: fmt::Debug + fmt::Display,
{
    type Output = Result<T, RetryError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(RetryError::Cancelled { cause: None }),
            Err(err) => Err(RetryError::Panicked {
                message: err.to_string(),
            }),
        })
    }
}
