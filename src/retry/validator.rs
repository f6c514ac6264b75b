//! Result validators and error classifiers consulted between attempts.
//!
//! A validator inspects a value that a task returned successfully. When it
//! rejects the value the attempt counts as failed and is retried exactly like
//! a task error.

use thiserror::Error;

/// Raised by a [`ResultValidator`] when a returned value is unacceptable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("result rejected: {message}")]
pub struct Rejection {
    /// Human-readable reason for the rejection.
    pub message: String,
}

impl Rejection {
    /// Creates a rejection with the given reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Decides whether a successful result should still be treated as a failure.
pub trait ResultValidator<T>: Send + Sync {
    /// Checks `result`.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when the result must be retried.
    fn check(&self, result: &T) -> Result<(), Rejection>;
}

/// Rejects `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequireSome;

impl<U> ResultValidator<Option<U>> for RequireSome {
    fn check(&self, result: &Option<U>) -> Result<(), Rejection> {
        if result.is_some() {
            Ok(())
        } else {
            Err(Rejection::new("the execution result is empty"))
        }
    }
}

/// Rejects empty collections and strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequireNonEmpty;

impl<U> ResultValidator<Vec<U>> for RequireNonEmpty {
    fn check(&self, result: &Vec<U>) -> Result<(), Rejection> {
        if result.is_empty() {
            Err(Rejection::new("the execution result has no elements"))
        } else {
            Ok(())
        }
    }
}

impl ResultValidator<String> for RequireNonEmpty {
    fn check(&self, result: &String) -> Result<(), Rejection> {
        if result.is_empty() {
            Err(Rejection::new("the execution result is an empty string"))
        } else {
            Ok(())
        }
    }
}

/// Adapts a closure into a [`ResultValidator`].
pub struct FnValidator<F>(F);

impl<F> FnValidator<F> {
    /// Wraps `check`.
    pub const fn new(check: F) -> Self {
        Self(check)
    }
}

impl<T, F> ResultValidator<T> for FnValidator<F>
where
    F: Fn(&T) -> Result<(), Rejection> + Send + Sync,
{
    fn check(&self, result: &T) -> Result<(), Rejection> {
        (self.0)(result)
    }
}

/// Outcome of classifying a task error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorAction {
    /// Keep retrying while the retry budget lasts.
    Retry,
    /// Stop now and surface the error.
    Stop,
    /// The error is a cancellation signal; stop without wrapping it as
    /// exhaustion.
    Cancel,
}

/// Classifies failed attempts to decide whether another one is worthwhile.
pub trait ErrorClassifier<E>: Send + Sync {
    /// Returns the action to take after `error`.
    fn classify(&self, error: &E) -> ErrorAction;

    /// Returns the action to take after a validator rejected a result.
    /// Rejections are retried unless overridden.
    fn classify_rejection(&self, _rejection: &Rejection) -> ErrorAction {
        ErrorAction::Retry
    }
}

/// Default classifier: every error is retryable.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRetry;

impl<E> ErrorClassifier<E> for AlwaysRetry {
    fn classify(&self, _error: &E) -> ErrorAction {
        ErrorAction::Retry
    }
}

/// Adapts a closure into an [`ErrorClassifier`].
pub struct FnClassifier<F>(F);

impl<F> FnClassifier<F> {
    /// Wraps `classify`.
    pub const fn new(classify: F) -> Self {
        Self(classify)
    }
}

impl<E, F> ErrorClassifier<E> for FnClassifier<F>
where
    F: Fn(&E) -> ErrorAction + Send + Sync,
{
    fn classify(&self, error: &E) -> ErrorAction {
        (self.0)(error)
    }
}
