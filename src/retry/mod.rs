//! Bounded retries for fallible remote operations.
//!
//! A [`Retryer`] drives a task through at most `retries + 1` attempts. After
//! each attempt the returned value is checked by every configured
//! [`ResultValidator`]; a rejected value is retried exactly like an error.
//! Errors and rejections are first offered to the [`ErrorClassifier`], which
//! may stop the loop early or flag the failure as a cancellation. Between
//! attempts the [`DelayStrategy`] decides how long to pause.
//!
//! Tasks can run on the caller's runtime ([`Retryer::run`]), on a small
//! dedicated worker pool ([`Retryer::spawn`]), or synchronously from a
//! non-async thread ([`Retryer::execute`]).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

mod delay;
mod executor;
mod validator;

pub use delay::{DelayStrategy, EXPONENTIAL_BASE_MS, ExponentialBackoff, FixedDelay};
pub use executor::{RetryExecutor, RetryHandle, default_worker_count};
pub use validator::{
    AlwaysRetry, ErrorAction, ErrorClassifier, FnClassifier, FnValidator, Rejection,
    RequireNonEmpty, RequireSome, ResultValidator,
};

/// Boxed future produced by one attempt of a retryable task.
pub type TaskFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

type TaskFn<T, E> = dyn Fn() -> TaskFuture<T, E> + Send + Sync;

type RejectionFn = dyn Fn(&Rejection) -> ErrorAction + Send + Sync;

/// Why a single attempt did not produce an acceptable result.
#[derive(Debug, Error)]
pub enum AttemptFailure<E>
where
    E: fmt::Debug + fmt::Display,
{
    /// The task itself returned an error.
    #[error("{0}")]
    Failed(E),
    /// The task succeeded but a validator rejected the value.
    #[error(transparent)]
    Rejected(Rejection),
}

/// Errors surfaced by the retry engine.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: fmt::Debug + fmt::Display,
{
    /// Every permitted attempt failed.
    #[error("failure after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts executed.
        attempts: u32,
        /// Failure observed on the final attempt.
        last: AttemptFailure<E>,
    },
    /// The error classifier stopped retrying.
    #[error("retry aborted after {attempts} attempts: {last}")]
    Aborted {
        /// Number of attempts executed.
        attempts: u32,
        /// Failure that stopped the loop.
        last: AttemptFailure<E>,
    },
    /// The operation was cancelled; no further attempts were made.
    #[error("retry cancelled")]
    Cancelled {
        /// Error that carried the cancellation signal, when there was one.
        cause: Option<E>,
    },
    /// A waiting caller gave up before the operation finished.
    #[error("gave up waiting for the retried operation after {waited:?}")]
    WaitTimedOut {
        /// How long the caller waited.
        waited: Duration,
    },
    /// The task panicked on the worker pool.
    #[error("retried task panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl<E: fmt::Debug + fmt::Display> RetryError<E> {
    /// Returns `true` when the error represents a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the failure that ended the retry loop, if any.
    #[must_use]
    pub const fn last_failure(&self) -> Option<&AttemptFailure<E>> {
        match self {
            Self::Exhausted { last, .. } | Self::Aborted { last, .. } => Some(last),
            Self::Cancelled { .. } | Self::WaitTimedOut { .. } | Self::Panicked { .. } => None,
        }
    }
}

/// Executes a fallible task with bounded retries.
pub struct Retryer<T, E> {
    task: Arc<TaskFn<T, E>>,
    retries: u32,
    delay: Arc<dyn DelayStrategy>,
    validators: Vec<Arc<dyn ResultValidator<T>>>,
    classifier: Arc<dyn ErrorClassifier<E>>,
    rejection_classifier: Option<Arc<RejectionFn>>,
    cancellation: Option<CancellationToken>,
}

impl<T, E> Clone for Retryer<T, E> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            retries: self.retries,
            delay: Arc::clone(&self.delay),
            validators: self.validators.clone(),
            classifier: Arc::clone(&self.classifier),
            rejection_classifier: self.rejection_classifier.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Retryer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryer")
            .field("retries", &self.retries)
            .field("validators", &self.validators.len())
            .field("cancellable", &self.cancellation.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, E> Retryer<T, E>
where
    T: Send + 'static,
    E: fmt::Debug + fmt::Display + Send + 'static,
{
    /// Starts building a retryer for `task`.
    ///
    /// Defaults: no retries, no delay, no validators, and every error
    /// classified as retryable.
    pub fn builder<F, Fut>(task: F) -> RetryerBuilder<T, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        RetryerBuilder::new(task)
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Runs the retry loop on the current async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Exhausted`] once every attempt failed,
    /// [`RetryError::Aborted`] when the classifier stops the loop, and
    /// [`RetryError::Cancelled`] when a cancellation is observed.
    pub async fn run(&self) -> Result<T, RetryError<E>> {
        let mut attempt: u32 = 0;
        loop {
            if self.is_cancelled() {
                return Err(RetryError::Cancelled { cause: None });
            }

            let failure = match (self.task)().await {
                Ok(value) => match self.validate(&value) {
                    Ok(()) => return Ok(value),
                    Err(rejection) => match self.classify_rejection(&rejection) {
                        ErrorAction::Cancel => {
                            return Err(RetryError::Cancelled { cause: None });
                        }
                        ErrorAction::Stop => {
                            return Err(RetryError::Aborted {
                                attempts: attempt.saturating_add(1),
                                last: AttemptFailure::Rejected(rejection),
                            });
                        }
                        ErrorAction::Retry => AttemptFailure::Rejected(rejection),
                    },
                },
                Err(error) => match self.classifier.classify(&error) {
                    ErrorAction::Cancel => {
                        return Err(RetryError::Cancelled { cause: Some(error) });
                    }
                    ErrorAction::Stop => {
                        return Err(RetryError::Aborted {
                            attempts: attempt.saturating_add(1),
                            last: AttemptFailure::Failed(error),
                        });
                    }
                    ErrorAction::Retry => AttemptFailure::Failed(error),
                },
            };

            if attempt >= self.retries {
                return Err(RetryError::Exhausted {
                    attempts: attempt.saturating_add(1),
                    last: failure,
                });
            }

            tracing::debug!(attempt, error = %failure, "attempt failed; retrying");
            let pause = self.delay.delay(attempt);
            if !pause.is_zero() && !self.pause(pause).await {
                return Err(RetryError::Cancelled { cause: None });
            }
            attempt += 1;
        }
    }

    /// Submits the retry loop to `executor` and returns a handle to the
    /// eventual result.
    pub fn spawn(&self, executor: &RetryExecutor) -> RetryHandle<T, E> {
        let retryer = self.clone();
        executor.submit(async move { retryer.run().await })
    }

    /// Runs the retry loop on `executor` and blocks the calling thread until
    /// it completes.
    ///
    /// Must be called from a thread that is not driving an async runtime.
    ///
    /// # Errors
    ///
    /// Propagates every error of [`Retryer::run`]; returns
    /// [`RetryError::Cancelled`] when the executor shuts down first.
    pub fn execute(&self, executor: &RetryExecutor) -> Result<T, RetryError<E>> {
        let retryer = self.clone();
        executor.block_on_submitted(async move { retryer.run().await }, None)
    }

    /// Like [`Retryer::execute`] but gives up waiting after `wait`.
    ///
    /// Giving up does not cancel the background attempts; they finish
    /// detached and their result is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::WaitTimedOut`] when `wait` elapses first, and
    /// otherwise behaves like [`Retryer::execute`].
    pub fn execute_within(
        &self,
        executor: &RetryExecutor,
        wait: Duration,
    ) -> Result<T, RetryError<E>> {
        let retryer = self.clone();
        executor.block_on_submitted(async move { retryer.run().await }, Some(wait))
    }

    fn validate(&self, value: &T) -> Result<(), Rejection> {
        self.validators
            .iter()
            .try_for_each(|validator| validator.check(value))
    }

    fn classify_rejection(&self, rejection: &Rejection) -> ErrorAction {
        self.rejection_classifier.as_ref().map_or_else(
            || self.classifier.classify_rejection(rejection),
            |classify| classify(rejection),
        )
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleeps for `pause`; returns `false` when cancelled while waiting.
    async fn pause(&self, pause: Duration) -> bool {
        match self.cancellation.as_ref() {
            Some(token) => tokio::select! {
                () = token.cancelled() => false,
                () = tokio::time::sleep(pause) => true,
            },
            None => {
                tokio::time::sleep(pause).await;
                true
            }
        }
    }
}

/// Builder for [`Retryer`].
pub struct RetryerBuilder<T, E> {
    task: Arc<TaskFn<T, E>>,
    retries: u32,
    delay: Arc<dyn DelayStrategy>,
    validators: Vec<Arc<dyn ResultValidator<T>>>,
    classifier: Arc<dyn ErrorClassifier<E>>,
    rejection_classifier: Option<Arc<RejectionFn>>,
    cancellation: Option<CancellationToken>,
}

impl<T, E> RetryerBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn new<F, Fut>(task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let boxed: Arc<TaskFn<T, E>> = Arc::new(move || -> TaskFuture<T, E> { Box::pin(task()) });
        Self {
            task: boxed,
            retries: 0,
            delay: Arc::new(FixedDelay::none()),
            validators: Vec::new(),
            classifier: Arc::new(AlwaysRetry),
            rejection_classifier: None,
            cancellation: None,
        }
    }

    /// Sets the maximum number of retries; total attempts are `retries + 1`.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the delay strategy used between attempts.
    #[must_use]
    pub fn delay(mut self, strategy: impl DelayStrategy + 'static) -> Self {
        self.delay = Arc::new(strategy);
        self
    }

    /// Adds a result validator.
    #[must_use]
    pub fn validator(mut self, validator: impl ResultValidator<T> + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Adds a closure validator.
    #[must_use]
    pub fn check<F>(self, check: F) -> Self
    where
        F: Fn(&T) -> Result<(), Rejection> + Send + Sync + 'static,
    {
        self.validator(FnValidator::new(check))
    }

    /// Sets the error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: impl ErrorClassifier<E> + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Sets a closure error classifier.
    #[must_use]
    pub fn classify<F>(self, classify: F) -> Self
    where
        F: Fn(&E) -> ErrorAction + Send + Sync + 'static,
    {
        self.classifier(FnClassifier::new(classify))
    }

    /// Sets a closure consulted when a validator rejects a result, taking
    /// precedence over [`ErrorClassifier::classify_rejection`].
    #[must_use]
    pub fn classify_rejection<F>(mut self, classify: F) -> Self
    where
        F: Fn(&Rejection) -> ErrorAction + Send + Sync + 'static,
    {
        self.rejection_classifier = Some(Arc::new(classify));
        self
    }

    /// Cancels the loop (before an attempt or during a delay) once `token`
    /// fires.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> Retryer<T, E> {
        Retryer {
            task: self.task,
            retries: self.retries,
            delay: self.delay,
            validators: self.validators,
            classifier: self.classifier,
            rejection_classifier: self.rejection_classifier,
            cancellation: self.cancellation,
        }
    }
}

impl<U, E> RetryerBuilder<Option<U>, E>
where
    U: Send + 'static,
    E: Send + 'static,
{
    /// Retries while the task returns `None`.
    #[must_use]
    pub fn retry_if_none(self) -> Self {
        self.validator(RequireSome)
    }
}

impl<U, E> RetryerBuilder<Vec<U>, E>
where
    U: Send + 'static,
    E: Send + 'static,
{
    /// Retries while the task returns an empty list.
    #[must_use]
    pub fn retry_if_empty(self) -> Self {
        self.validator(RequireNonEmpty)
    }
}
