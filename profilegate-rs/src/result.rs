//! Write-once outcome sink for a mutation

use serde::Serialize;
use std::sync::OnceLock;

/// Why a mutation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Duplicate,
    Denied,
    ValidationFailed,
    PluginMissing,
    StaleState,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::Duplicate => "duplicate",
            FailureKind::Denied => "denied",
            FailureKind::ValidationFailed => "validation_failed",
            FailureKind::PluginMissing => "plugin_missing",
            FailureKind::StaleState => "stale_state",
            FailureKind::Internal => "internal",
        }
    }

    /// HTTP status an outer API layer reports for this failure
    pub fn http_status(&self) -> u16 {
        match self {
            FailureKind::NotFound => 404,
            FailureKind::Duplicate => 422,
            FailureKind::ValidationFailed => 422,
            FailureKind::Denied => 403,
            FailureKind::PluginMissing => 422,
            FailureKind::StaleState => 412,
            FailureKind::Internal => 500,
        }
    }
}

/// The recorded outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { message: String },
    Failure { kind: FailureKind, message: String },
}

/// Sink handed to a command and read back by the caller
///
/// The first write wins; later writes are ignored and reported as `false`.
#[derive(Debug, Default)]
pub struct OperationResult {
    outcome: OnceLock<Outcome>,
}

impl OperationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_success(&self, message: impl Into<String>) -> bool {
        self.write(Outcome::Success {
            message: message.into(),
        })
    }

    pub fn set_failure(&self, kind: FailureKind, message: impl Into<String>) -> bool {
        self.write(Outcome::Failure {
            kind,
            message: message.into(),
        })
    }

    fn write(&self, outcome: Outcome) -> bool {
        let written = self.outcome.set(outcome).is_ok();
        if !written {
            tracing::trace!("Operation result already recorded");
        }
        written
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    pub fn is_set(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome.get(), Some(Outcome::Success { .. }))
    }

    pub fn message(&self) -> Option<&str> {
        match self.outcome.get()? {
            Outcome::Success { message } | Outcome::Failure { message, .. } => Some(message),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome.get()? {
            Outcome::Failure { kind, .. } => Some(*kind),
            Outcome::Success { .. } => None,
        }
    }

    /// 200 for success, the failure's status otherwise, `None` if unset
    pub fn http_status(&self) -> Option<u16> {
        match self.outcome.get()? {
            Outcome::Success { .. } => Some(200),
            Outcome::Failure { kind, .. } => Some(kind.http_status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let result = OperationResult::new();
        assert!(!result.is_set());

        assert!(result.set_failure(FailureKind::NotFound, "gone"));
        assert!(!result.set_success("ok"));

        assert!(!result.is_success());
        assert_eq!(result.message(), Some("gone"));
        assert_eq!(result.failure_kind(), Some(FailureKind::NotFound));
        assert_eq!(result.http_status(), Some(404));
    }

    #[test]
    fn test_success() {
        let result = OperationResult::new();
        result.set_success("done");
        assert!(result.is_success());
        assert_eq!(result.failure_kind(), None);
        assert_eq!(result.http_status(), Some(200));
    }

    #[test]
    fn test_outcome_json() {
        let result = OperationResult::new();
        result.set_failure(FailureKind::StaleState, "stale");
        let json = serde_json::to_value(result.outcome().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "failure", "kind": "stale_state", "message": "stale"})
        );
    }
}
