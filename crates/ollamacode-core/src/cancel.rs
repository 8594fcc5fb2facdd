use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Why a token ended up cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `cancel()` was called explicitly.
    Killed,
    /// The deadline attached at construction passed.
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    cause: Mutex<Option<CancelCause>>,
    signal: Condvar,
    deadline: Option<Instant>,
}

/// Shared cooperative cancellation flag with an optional deadline.
///
/// Clones share state. The first cause to be observed sticks: once a token is
/// `Killed` it never reports `DeadlineExceeded` and vice versa.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new token in the "not cancelled" state.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a token that cancels itself with `DeadlineExceeded` after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cause: Mutex::new(None),
                signal: Condvar::new(),
                deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Signal cancellation. No-op if the token already holds a cause.
    pub fn cancel(&self) {
        let mut cause = self
            .inner
            .cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cause.is_none() {
            *cause = Some(CancelCause::Killed);
        }
        self.inner.signal.notify_all();
    }

    /// Check whether cancellation has been requested or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// The cause held by the token, latching the deadline if it has elapsed.
    pub fn cause(&self) -> Option<CancelCause> {
        let mut cause = self
            .inner
            .cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.latch_deadline(&mut cause);
        *cause
    }

    /// Block for up to `timeout` or until the token is cancelled.
    /// Returns true when the token is cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let mut cause = self
            .inner
            .cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            self.latch_deadline(&mut cause);
            if cause.is_some() {
                return true;
            }
            let now = Instant::now();
            let mut remaining = timeout.saturating_sub(now.duration_since(started));
            if remaining.is_zero() {
                return false;
            }
            if let Some(deadline) = self.inner.deadline {
                remaining = remaining.min(deadline.saturating_duration_since(now));
            }
            let (guard, _) = self
                .inner
                .signal
                .wait_timeout(cause, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            cause = guard;
        }
    }

    fn latch_deadline(&self, cause: &mut Option<CancelCause>) {
        if cause.is_none()
            && let Some(deadline) = self.inner.deadline
            && Instant::now() >= deadline
        {
            *cause = Some(CancelCause::DeadlineExceeded);
            self.inner.signal.notify_all();
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
