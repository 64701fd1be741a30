#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid database name {0:?}")]
    InvalidName(String),
    #[error("invalid object store name {0:?}")]
    InvalidStoreName(String),
    #[error("version must be a positive integer, got {0}")]
    InvalidVersion(u32),
    #[error("requested version {requested} is less than the existing version {current}")]
    Version { requested: u32, current: u32 },
    #[error("upgrade of {name:?} to version {version} blocked by {open} open connection(s)")]
    Blocked {
        name: String,
        version: u32,
        open: usize,
    },
    #[error("database connection is closed")]
    Closed,
    #[error("object store {0:?} not found")]
    NotFound(String),
    #[error("object store {0:?} already exists")]
    Constraint(String),
    #[error("transaction is read-only")]
    ReadOnly,
    #[error("transaction was aborted")]
    Aborted,
    #[error("data error: {0}")]
    Data(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("join error: {0}")]
    Join(String),
}

impl StoreError {
    /// Store classification of the failure, in the vocabulary of browser
    /// object-store exceptions.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidName(_)
            | StoreError::InvalidStoreName(_)
            | StoreError::InvalidVersion(_) => "TypeError",
            StoreError::Version { .. } => "VersionError",
            StoreError::Blocked { .. } => "BlockedError",
            StoreError::Closed => "InvalidStateError",
            StoreError::NotFound(_) => "NotFoundError",
            StoreError::Constraint(_) => "ConstraintError",
            StoreError::ReadOnly => "ReadOnlyError",
            StoreError::Aborted => "AbortError",
            StoreError::Data(_) => "DataError",
            StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::Join(_) => "UnknownError",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, StoreError::Blocked { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::OperationInterrupted) => StoreError::Aborted,
            _ => StoreError::Sqlite(err),
        }
    }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}
