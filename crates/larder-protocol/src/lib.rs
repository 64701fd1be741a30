//! Message types exchanged between an invoking controller and the inventory
//! worker. Both directions travel as JSON objects tagged by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire names of every message kind. Keep inbound and outbound separated.
pub mod kinds {
    // Inbound
    pub const CALCULATE_STATS: &str = "CALCULATE_STATS";
    pub const CLEANUP: &str = "CLEANUP";
    pub const CANCEL: &str = "CANCEL";

    // Outbound
    pub const PROGRESS: &str = "PROGRESS";
    pub const STATS_RESULT: &str = "STATS_RESULT";
    pub const ERROR: &str = "ERROR";
    pub const CLEANUP_COMPLETE: &str = "CLEANUP_COMPLETE";
}

/// Command posted to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    CalculateStats,
    Cleanup,
    Cancel,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CalculateStats => kinds::CALCULATE_STATS,
            Command::Cleanup => kinds::CLEANUP,
            Command::Cancel => kinds::CANCEL,
        }
    }

    /// Decode a raw message. Returns `None` for anything that is not a known
    /// command; the channel carries untyped JSON so this is not an error.
    pub fn from_message(message: &Value) -> Option<Self> {
        serde_json::from_value(message.clone()).ok()
    }

    /// Best-effort extraction of the `type` tag, for diagnostics.
    pub fn kind_of(message: &Value) -> Option<&str> {
        message.get("type").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub processed: u64,
    pub current_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPayload {
    pub inventory_value: f64,
    pub total_processed: u64,
}

/// Machine-readable failure classification.
///
/// Worker-level failures have fixed codes; store failures carry the store's
/// own classification through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ErrorCode {
    DatabaseBlockedByOtherTab,
    CalculationTimeout,
    CalculationCancelled,
    ScanInProgress,
    Store(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::DatabaseBlockedByOtherTab => "DATABASE_BLOCKED_BY_OTHER_TAB",
            ErrorCode::CalculationTimeout => "CALCULATION_TIMEOUT",
            ErrorCode::CalculationCancelled => "CALCULATION_CANCELLED",
            ErrorCode::ScanInProgress => "SCAN_IN_PROGRESS",
            ErrorCode::Store(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "DATABASE_BLOCKED_BY_OTHER_TAB" => ErrorCode::DatabaseBlockedByOtherTab,
            "CALCULATION_TIMEOUT" => ErrorCode::CalculationTimeout,
            "CALCULATION_CANCELLED" => ErrorCode::CalculationCancelled,
            "SCAN_IN_PROGRESS" => ErrorCode::ScanInProgress,
            _ => ErrorCode::Store(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: ErrorCode,
}

/// Message posted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub enum Event {
    Progress(ProgressPayload),
    StatsResult(StatsPayload),
    Error(ErrorPayload),
    CleanupComplete,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Progress(_) => kinds::PROGRESS,
            Event::StatsResult(_) => kinds::STATS_RESULT,
            Event::Error(_) => kinds::ERROR,
            Event::CleanupComplete => kinds::CLEANUP_COMPLETE,
        }
    }

    /// True for messages that end a request (everything except progress).
    pub fn is_final(&self) -> bool {
        !matches!(self, Event::Progress(_))
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Event::Error(ErrorPayload {
            message: message.into(),
            code,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        let kind = event.kind().to_string();
        match event {
            Event::Progress(p) => WireEvent {
                kind,
                success: None,
                payload: serde_json::to_value(p).ok(),
                error: None,
            },
            Event::StatsResult(s) => WireEvent {
                kind,
                success: Some(true),
                payload: serde_json::to_value(s).ok(),
                error: None,
            },
            Event::Error(e) => WireEvent {
                kind,
                success: Some(false),
                payload: None,
                error: Some(e),
            },
            Event::CleanupComplete => WireEvent {
                kind,
                success: Some(true),
                payload: None,
                error: None,
            },
        }
    }
}

impl TryFrom<WireEvent> for Event {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, String> {
        fn payload<T: serde::de::DeserializeOwned>(
            kind: &str,
            value: Option<Value>,
        ) -> Result<T, String> {
            let value = value.ok_or_else(|| format!("{kind} message without payload"))?;
            serde_json::from_value(value).map_err(|e| format!("{kind} payload: {e}"))
        }

        match wire.kind.as_str() {
            kinds::PROGRESS => Ok(Event::Progress(payload(kinds::PROGRESS, wire.payload)?)),
            kinds::STATS_RESULT => Ok(Event::StatsResult(payload(
                kinds::STATS_RESULT,
                wire.payload,
            )?)),
            kinds::ERROR => wire
                .error
                .map(Event::Error)
                .ok_or_else(|| "ERROR message without error body".to_string()),
            kinds::CLEANUP_COMPLETE => Ok(Event::CleanupComplete),
            other => Err(format!("unknown event type {other:?}")),
        }
    }
}
