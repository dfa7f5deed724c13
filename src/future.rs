//! Async handle over a pending driver result.
//!
//! A [`CqlFuture`] moves from pending to exactly one terminal state
//! (succeeded, failed or cancelled). Its producer side is a [`Promise`].
//! Continuations can be attached before or after settlement; each runs once
//! on the executor it was attached with, and continuations attached before
//! settlement are dispatched in attachment order.
//!
//! # Example
//!
//! ```
//! use cqlexec::future::{CqlFuture, DirectExecutor};
//!
//! let (future, promise) = CqlFuture::<i64>::pending();
//! let doubled = future.transform(DirectExecutor, |n| Ok(n * 2));
//!
//! promise.complete(21);
//! assert_eq!(doubled.get().unwrap(), 42);
//! ```

use crate::error::{CqlError, QueryError};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use tracing::trace;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for continuations.
pub trait Executor: Send + Sync {
    /// Run `task`, now or later, on some thread.
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs continuations inline on the thread that settles or attaches.
///
/// For template dispatches that is usually a runtime worker, so
/// continuations should not block there.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

/// Runs continuations on the runtime's blocking pool.
impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.spawn_blocking(task);
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        (**self).execute(task);
    }
}

/// Observable state of an async handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

struct Inner {
    continuations: VecDeque<(Arc<dyn Executor>, Task)>,
    wakers: Vec<Waker>,
    cancel_hook: Option<Task>,
}

struct Shared<T> {
    outcome: OnceLock<Result<T, CqlError>>,
    inner: Mutex<Inner>,
    signal: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the outcome. Returns false if already settled.
    fn settle(&self, outcome: Result<T, CqlError>) -> bool {
        let cancelled = matches!(outcome, Err(CqlError::Query(QueryError::Cancelled)));

        let mut inner = self.lock();
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        let continuations = std::mem::take(&mut inner.continuations);
        let wakers = std::mem::take(&mut inner.wakers);
        let hook = inner.cancel_hook.take();
        drop(inner);

        self.signal.notify_all();
        trace!(
            cancelled,
            continuations = continuations.len(),
            "Async handle settled"
        );

        if cancelled {
            if let Some(hook) = hook {
                hook();
            }
        }
        for (executor, task) in continuations {
            executor.execute(task);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Handle to the eventual outcome of an operation.
///
/// Clones observe the same outcome.
pub struct CqlFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CqlFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for CqlFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CqlFuture")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> CqlFuture<T> {
    pub fn state(&self) -> FutureState {
        match self.shared.outcome.get() {
            None => FutureState::Pending,
            Some(Ok(_)) => FutureState::Succeeded,
            Some(Err(CqlError::Query(QueryError::Cancelled))) => FutureState::Cancelled,
            Some(Err(_)) => FutureState::Failed,
        }
    }

    /// Whether the handle reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// The outcome, if settled. Never blocks.
    pub fn outcome(&self) -> Option<&Result<T, CqlError>> {
        self.shared.outcome.get()
    }
}

impl<T: Send + Sync + 'static> CqlFuture<T> {
    /// Create a pending handle and the promise that settles it.
    pub fn pending() -> (CqlFuture<T>, Promise<T>) {
        let shared = Arc::new(Shared {
            outcome: OnceLock::new(),
            inner: Mutex::new(Inner {
                continuations: VecDeque::new(),
                wakers: Vec::new(),
                cancel_hook: None,
            }),
            signal: Condvar::new(),
        });
        (
            CqlFuture {
                shared: Arc::clone(&shared),
            },
            Promise {
                shared: Some(shared),
            },
        )
    }

    /// Create an already succeeded handle.
    pub fn ready(value: T) -> Self {
        let (future, promise) = Self::pending();
        promise.complete(value);
        future
    }

    /// Create an already failed handle.
    pub fn failed(error: impl Into<CqlError>) -> Self {
        let (future, promise) = Self::pending();
        promise.fail(error);
        future
    }

    /// Block until settled.
    pub fn wait(&self) {
        let mut inner = self.shared.lock();
        while self.shared.outcome.get().is_none() {
            inner = self
                .shared
                .signal
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until settled or `timeout` elapses. Returns whether it settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.shared.outcome.get().is_some() {
            return true;
        }
        // A bound past the clock's range is no bound at all.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut inner = self.shared.lock();
        while self.shared.outcome.get().is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .shared
                .signal
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Attach a continuation that receives the outcome.
    pub fn on_complete<E, F>(&self, executor: E, f: F)
    where
        E: Executor + 'static,
        F: FnOnce(&Result<T, CqlError>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let task: Task = Box::new(move || {
            if let Some(outcome) = shared.outcome.get() {
                f(outcome);
            }
        });
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let mut inner = self.shared.lock();
        if self.shared.outcome.get().is_none() {
            inner.continuations.push_back((executor, task));
            return;
        }
        drop(inner);
        executor.execute(task);
    }

    /// Attach a continuation that runs only on success.
    pub fn on_success<E, F>(&self, executor: E, f: F)
    where
        E: Executor + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete(executor, move |outcome| {
            if let Ok(value) = outcome {
                f(value);
            }
        });
    }

    /// Attach a continuation that runs only on failure or cancellation.
    pub fn on_failure<E, F>(&self, executor: E, f: F)
    where
        E: Executor + 'static,
        F: FnOnce(&CqlError) + Send + 'static,
    {
        self.on_complete(executor, move |outcome| {
            if let Err(error) = outcome {
                f(error);
            }
        });
    }

    /// Attach a success and a failure continuation as one callback.
    pub fn add_callback<E, S, F>(&self, executor: E, on_success: S, on_failure: F)
    where
        E: Executor + 'static,
        S: FnOnce(&T) + Send + 'static,
        F: FnOnce(&CqlError) + Send + 'static,
    {
        self.on_complete(executor, move |outcome| match outcome {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        });
    }

    /// Derive a handle whose value is `f` applied to this handle's value.
    ///
    /// `f` runs on `executor`. Failures and cancellation of this handle
    /// settle the derived handle with the same error; cancelling the
    /// derived handle cancels this one.
    pub fn transform<U, E, F>(&self, executor: E, f: F) -> CqlFuture<U>
    where
        U: Send + Sync + 'static,
        E: Executor + 'static,
        F: FnOnce(&T) -> Result<U, CqlError> + Send + 'static,
    {
        let (derived, promise) = CqlFuture::<U>::pending();

        let source = self.clone();
        derived.set_cancel_hook(move || {
            source.cancel();
        });

        self.on_complete(executor, move |outcome| {
            let mapped = match outcome {
                Ok(value) => f(value),
                Err(error) => Err(error.clone()),
            };
            promise.settle(mapped);
        });
        derived
    }

    /// Cancel the operation.
    ///
    /// Returns false if the handle had already settled. On success the
    /// cancel hook runs, which aborts the driver call best-effort.
    pub fn cancel(&self) -> bool {
        self.shared.settle(Err(QueryError::Cancelled.into()))
    }

    /// Install the action run when this handle is cancelled.
    ///
    /// If the handle is already cancelled, the hook runs immediately.
    pub fn set_cancel_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.lock();
        match self.state() {
            FutureState::Pending => inner.cancel_hook = Some(Box::new(hook)),
            FutureState::Cancelled => {
                drop(inner);
                hook();
            }
            FutureState::Succeeded | FutureState::Failed => {}
        }
    }

    fn settled(&self) -> Result<&T, CqlError> {
        match self.shared.outcome.get() {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(error.clone()),
            None => Err(QueryError::InvalidState("handle has not settled".to_string()).into()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CqlFuture<T> {
    /// Block until settled and return the outcome. Repeatable.
    pub fn get(&self) -> Result<T, CqlError> {
        self.wait();
        self.settled().cloned()
    }

    /// Block at most `timeout` for the outcome.
    ///
    /// # Errors
    /// Returns `QueryError::Timeout` if the handle is still pending; the
    /// operation itself keeps running.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, CqlError> {
        if !self.wait_timeout(timeout) {
            return Err(QueryError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        self.settled().cloned()
    }
}

impl<T: Clone + Send + Sync + 'static> Future for CqlFuture<T> {
    type Output = Result<T, CqlError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_done() {
            return Poll::Ready(self.settled().cloned());
        }

        let mut inner = self.shared.lock();
        if self.shared.outcome.get().is_some() {
            drop(inner);
            return Poll::Ready(self.settled().cloned());
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Producer side of a [`CqlFuture`].
///
/// Dropping an unsettled promise fails the handle with
/// `QueryError::Abandoned`.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    /// Settle with `outcome`. Returns false if the handle already settled.
    pub fn settle(mut self, outcome: Result<T, CqlError>) -> bool {
        match self.shared.take() {
            Some(shared) => shared.settle(outcome),
            None => false,
        }
    }

    pub fn complete(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(self, error: impl Into<CqlError>) -> bool {
        self.settle(Err(error.into()))
    }

    /// Whether the consumer cancelled the handle.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.shared.as_ref().and_then(|s| s.outcome.get()),
            Some(Err(CqlError::Query(QueryError::Cancelled)))
        )
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Err(QueryError::Abandoned.into()));
        }
    }
}
