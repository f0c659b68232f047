use crate::identity::Identity;
use crate::model::Status;

/// Errors reported by a remote API client.
///
/// `NotFound` is a structured signal, not a failure: the reconciler turns it
/// into [`crate::model::ReadOutcome::Absent`] or a successful delete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error("conflict: {reason}")]
    Conflict { reason: String },
    #[error("rate limited")]
    RateLimited,
    #[error("transport error: {reason}")]
    Transport { reason: String },
    #[error("not authorized: {reason}")]
    Auth { reason: String },
    #[error("malformed response: {reason}")]
    Malformed { reason: String },
}

impl ApiError {
    /// Transient failures the waiter's poll loop keeps retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    RateLimited,
    Transport,
    Auth,
    Timeout,
    Cancelled,
    RemoteFailure,
    NotFound,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },
    #[error("conflict: {reason}")]
    Conflict { reason: String },
    #[error("rate limited by remote API")]
    RateLimited,
    #[error("transport error: {reason}")]
    Transport { reason: String },
    #[error("not authorized: {reason}")]
    Auth { reason: String },
    #[error("deadline elapsed while waiting (last status: {last:?})")]
    Timeout { last: Option<Status> },
    #[error("operation cancelled")]
    Cancelled,
    #[error("remote reported failure status {status:?}: {reason}")]
    RemoteFailure { status: Status, reason: String },
    #[error("cannot import nonexistent resource {id}")]
    ImportNonexistent { id: Identity },
    #[error("invalid resource id {raw:?}")]
    InvalidId { raw: String },
    #[error("invalid resource spec: {reason}")]
    InvalidSpec { reason: String },
    #[error("resource {id} disappeared during the last operation")]
    Vanished { id: Identity },
    #[error("resource not found")]
    NotFound,
    #[error("resource {id} was created but could not be confirmed: {source}")]
    Incomplete {
        id: Identity,
        #[source]
        source: Box<ReconcileError>,
    },
    #[error("malformed remote response: {reason}")]
    Malformed { reason: String },
}

impl ReconcileError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationFailed { .. } | Self::InvalidId { .. } | Self::InvalidSpec { .. } => {
                ErrorCategory::Validation
            }
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::RateLimited => ErrorCategory::RateLimited,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Auth { .. } => ErrorCategory::Auth,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::RemoteFailure { .. } => ErrorCategory::RemoteFailure,
            Self::ImportNonexistent { .. } | Self::Vanished { .. } | Self::NotFound => {
                ErrorCategory::NotFound
            }
            Self::Incomplete { source, .. } => source.category(),
            Self::Malformed { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may retry the same operation after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimited | ErrorCategory::Transport
        )
    }

    /// The identity a partially successful creation left behind, if any.
    pub fn assigned_identity(&self) -> Option<&Identity> {
        match self {
            Self::Incomplete { id, .. } => Some(id),
            _ => None,
        }
    }

    pub(crate) fn incomplete(id: Identity, source: ReconcileError) -> Self {
        Self::Incomplete {
            id,
            source: Box::new(source),
        }
    }
}

impl From<ApiError> for ReconcileError {
    /// Maps a remote error onto the same category.
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound => Self::NotFound,
            ApiError::Validation { reason } => Self::ValidationFailed { reason },
            ApiError::Conflict { reason } => Self::Conflict { reason },
            ApiError::RateLimited => Self::RateLimited,
            ApiError::Transport { reason } => Self::Transport { reason },
            ApiError::Auth { reason } => Self::Auth { reason },
            ApiError::Malformed { reason } => Self::Malformed { reason },
        }
    }
}
