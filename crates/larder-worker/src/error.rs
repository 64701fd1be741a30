use std::time::Duration;

use larder_protocol::{ErrorCode, Event};
use larder_store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("database is blocked by another open connection: {0}")]
    Blocked(StoreError),
    #[error("inventory calculation exceeded {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("inventory calculation cancelled")]
    Cancelled,
    #[error("an inventory calculation is already running")]
    InProgress,
    #[error(transparent)]
    Store(StoreError),
    #[error("scan task failed: {0}")]
    Join(String),
}

impl From<StoreError> for WorkerError {
    fn from(err: StoreError) -> Self {
        if err.is_blocked() {
            WorkerError::Blocked(err)
        } else {
            WorkerError::Store(err)
        }
    }
}

impl WorkerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkerError::Blocked(_) => ErrorCode::DatabaseBlockedByOtherTab,
            WorkerError::Timeout(_) => ErrorCode::CalculationTimeout,
            WorkerError::Cancelled => ErrorCode::CalculationCancelled,
            WorkerError::InProgress => ErrorCode::ScanInProgress,
            WorkerError::Store(err) => ErrorCode::Store(err.code().to_string()),
            WorkerError::Join(_) => ErrorCode::Store("UnknownError".to_string()),
        }
    }

    pub fn to_event(&self) -> Event {
        Event::error(self.code(), self.to_string())
    }
}
