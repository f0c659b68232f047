//! Turns asynchronous remote mutations into a synchronous confirmation.

use crate::client::RemoteApi;
use crate::context::Context;
use crate::error::{ApiError, ReconcileError};
use crate::identity::Identity;
use crate::model::{RemoteState, Status};
use crate::schema::{AsyncDescriptor, PollPolicy, ResourceDescriptor};
use std::time::Duration;
use tokio::time::Instant;

/// A mutation whose effect is confirmed by polling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncOperation {
    pub id: Identity,
    pub terminal: Status,
    pub poll: PollPolicy,
    /// Upper bound on the wait, on top of the caller's deadline.
    pub timeout: Duration,
}

impl AsyncOperation {
    pub fn new(id: Identity, terminal: Status, poll: PollPolicy, timeout: Duration) -> Self {
        Self {
            id,
            terminal,
            poll,
            timeout,
        }
    }

    pub(crate) fn from_descriptor(
        id: Identity,
        descriptor: &ResourceDescriptor,
        wait: &AsyncDescriptor,
    ) -> Self {
        Self::new(id, wait.terminal.clone(), wait.poll, descriptor.timeout)
    }

    /// Wait for the resource to be gone.
    pub(crate) fn deletion(id: Identity, descriptor: &ResourceDescriptor, wait: &AsyncDescriptor) -> Self {
        Self::new(id, Status::Absent, wait.poll, descriptor.timeout)
    }
}

/// Poll until `op.terminal` is observed.
///
/// The first poll happens immediately. Polling stops on an explicit error
/// status (non-retryable [`ReconcileError::RemoteFailure`]), on a
/// non-transient API error, when the deadline elapses
/// ([`ReconcileError::Timeout`]) or when the context is cancelled.
/// Transient API errors are retried at the next tick.
pub async fn wait<A>(
    api: &A,
    descriptor: &ResourceDescriptor,
    op: &AsyncOperation,
    ctx: &Context,
) -> Result<RemoteState, ReconcileError>
where
    A: RemoteApi + ?Sized,
{
    let ctx = ctx.narrowed(op.timeout);
    let mut interval = op.poll.interval;
    let mut last: Option<Status> = None;
    let mut polls = 0u32;

    loop {
        ctx.check().map_err(|err| with_last(err, &last))?;
        polls += 1;

        let response = ctx
            .run(api.get(descriptor, &op.id))
            .await
            .map_err(|err| with_last(err, &last))?;

        match response {
            Ok(state) if state.status == op.terminal => {
                log::debug!("{} reached {:?} after {polls} poll(s)", op.id, op.terminal);
                return Ok(state);
            }
            Ok(state) => {
                if let Status::Error(reason) = &state.status {
                    log::warn!("{} failed while waiting for {:?}: {reason}", op.id, op.terminal);
                    return Err(ReconcileError::RemoteFailure {
                        status: state.status.clone(),
                        reason: reason.clone(),
                    });
                }
                log::debug!(
                    "{} is {:?}, waiting for {:?}, next poll in {}",
                    op.id,
                    state.status,
                    op.terminal,
                    humantime::format_duration(interval)
                );
                last = Some(state.status);
            }
            Err(ApiError::NotFound) if op.terminal == Status::Absent => {
                log::debug!("{} is gone after {polls} poll(s)", op.id);
                return Ok(RemoteState::absent());
            }
            Err(ApiError::NotFound) => {
                // a fresh resource may not be visible yet
                log::debug!("{} not visible yet", op.id);
            }
            Err(err) if err.is_transient() => {
                log::info!("Transient error polling {}: {err}", op.id);
            }
            Err(err) => return Err(err.into()),
        }

        ctx.check().map_err(|err| with_last(err, &last))?;
        ctx.sleep_until(Instant::now() + interval)
            .await
            .map_err(|err| with_last(err, &last))?;
        interval = op.poll.next(interval);
    }
}

fn with_last(err: ReconcileError, last: &Option<Status>) -> ReconcileError {
    match err {
        ReconcileError::Timeout { last: None } => ReconcileError::Timeout { last: last.clone() },
        err => err,
    }
}
