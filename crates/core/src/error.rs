//! Error taxonomy shared by every Ferry crate.

use std::time::Duration;

/// Raised by the locator when a group/version/kind has no registered handler.
/// Never retried: it means the manifest or the registry is wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("no handler {handler} registered for group {group:?} version {version:?}")]
    UnknownGroupVersion { handler: String, group: String, version: String },
    #[error("handler {handler} does not serve kind {kind} (verb kind {verb_kind})")]
    UnknownKind { handler: String, kind: String, verb_kind: String },
}

/// Outcome classes reported by a resource store call (create/patch/replace/read/delete).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("version conflict: {0}")]
    VersionConflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation rejected: {0}")]
    ValidationRejected(String),
    #[error("transport: {0}")]
    Transport(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool { matches!(self, StoreError::AlreadyExists(_)) }
    pub fn is_conflict(&self) -> bool { matches!(self, StoreError::VersionConflict(_)) }
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }
}

#[derive(Debug, thiserror::Error)]
pub enum FerryError {
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Document is missing identity fields (apiVersion, kind, metadata.name).
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    /// Manifest could not be parsed or exceeded a size budget.
    #[error("manifest: {0}")]
    Manifest(String),
    #[error("Tried client side merge {attempts} times and did not succeed")]
    RetryExhausted { attempts: u32 },
    #[error("timeout ({timeout:?}) reached while waiting for {what} (last phase: {last_phase:?})")]
    PollTimeout { what: String, timeout: Duration, last_phase: Option<String> },
    #[error("got into {phase} phase while waiting for {target} ({message:?})")]
    TerminalPhaseObserved { phase: String, target: String, message: Option<String> },
}

impl FerryError {
    pub fn store(&self) -> Option<&StoreError> {
        match self {
            FerryError::Store(e) => Some(e),
            _ => None,
        }
    }
}

pub type FerryResult<T> = Result<T, FerryError>;
