use crate::error::ReconcileError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation signal for one reconciliation call.
#[derive(Clone, Debug)]
pub struct Context {
    deadline: Instant,
    cancel: watch::Receiver<bool>,
}

/// Triggers cancellation of every [`Context`] derived from it.
#[derive(Debug)]
pub struct Canceller(watch::Sender<bool>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Context {
    pub fn with_deadline(deadline: Instant) -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline,
                cancel: rx,
            },
            Canceller(tx),
        )
    }

    pub fn with_timeout(timeout: Duration) -> (Self, Canceller) {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that is never cancelled, expiring after `timeout`.
    pub fn detached(timeout: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        // a dropped sender keeps the last value, so `false` sticks
        drop(tx);
        Self {
            deadline: Instant::now() + timeout,
            cancel: rx,
        }
    }

    /// Same cancellation, deadline capped at `timeout` from now. Never
    /// extends the current deadline.
    pub fn narrowed(&self, timeout: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + timeout),
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<(), ReconcileError> {
        if self.is_cancelled() {
            Err(ReconcileError::Cancelled)
        } else if self.is_expired() {
            Err(ReconcileError::Timeout { last: None })
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is signalled. Pending forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Race a remote call against the deadline and cancellation.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ReconcileError::Cancelled),
            result = tokio::time::timeout_at(self.deadline, fut) => {
                result.map_err(|_| ReconcileError::Timeout { last: None })
            }
        }
    }

    /// Sleep until `until` (capped at the deadline), aborting on cancellation.
    pub async fn sleep_until(&self, until: Instant) -> Result<(), ReconcileError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ReconcileError::Cancelled),
            _ = tokio::time::sleep_until(until.min(self.deadline)) => Ok(()),
        }
    }
}
