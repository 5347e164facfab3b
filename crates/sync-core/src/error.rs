use crate::backstop::BackstopError;
use crate::content::ContentError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the sync provider and panel sessions.
///
/// Conflicts are not errors at this level: a stale save comes back as
/// `SaveOutcome::Conflict`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot canonicalize content: {0}")]
    Content(#[from] ContentError),

    #[error(transparent)]
    Backstop(#[from] BackstopError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("sync engine has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
