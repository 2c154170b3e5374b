//! Audit trail for configuration mutations
//!
//! Commands and the service emit one [`AuditEvent`] per outcome: applied
//! mutations, rejections, rule denials, connection checks and validator
//! installs. Embedders pick where they go by handing an [`AuditSink`] to the
//! engine.

use profilegate_api::{ConnectionStatus, ValidatorManifest};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProfileCreated,
    ProfileUpdated,
    ProfileDeleted,
    /// A mutation failed a precondition or validation
    MutationRejected,
    /// The rule evaluator refused the principal
    AccessDenied,
    ConnectionVerified,
    ValidatorRegistered,
}

/// Event-specific payload, tagged by `type` in the JSON form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Mutation {
        plugin_id: String,
        /// Document fingerprint after the mutation
        fingerprint: String,
    },
    Rejection {
        plugin_id: String,
        failure: String,
        reason: String,
    },
    Connection {
        plugin_id: String,
        status: ConnectionStatus,
        message: String,
    },
    Installed {
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

/// One line of the audit trail
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339, millisecond precision, UTC
    pub recorded_at: String,
    pub event_type: AuditEventType,
    /// Profile name, or plugin id for validator installs
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, subject: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            recorded_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event_type,
            subject: subject.into(),
            kind: None,
            principal: None,
            details,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for audit events
///
/// Recording must not block for long: sinks are called while a command
/// reports its outcome.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Appends events as JSON lines
#[derive(Debug)]
pub struct FileAuditSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open `path` for appending, creating parent directories as needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, &event)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}

/// Keeps events in memory; used by tests and embedders that ship events
/// elsewhere themselves
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

// ============================================================================
// Event constructors
// ============================================================================

pub fn profile_mutated(
    event_type: AuditEventType,
    kind: &str,
    name: &str,
    plugin_id: &str,
    fingerprint: &str,
) -> AuditEvent {
    let details = AuditDetails::Mutation {
        plugin_id: plugin_id.to_string(),
        fingerprint: fingerprint.to_string(),
    };
    AuditEvent::new(event_type, name, details).with_kind(kind)
}

/// A mutation that never reached the document
pub fn mutation_rejected(
    kind: &str,
    name: &str,
    plugin_id: &str,
    failure: &str,
    reason: &str,
) -> AuditEvent {
    let details = AuditDetails::Rejection {
        plugin_id: plugin_id.to_string(),
        failure: failure.to_string(),
        reason: reason.to_string(),
    };
    AuditEvent::new(AuditEventType::MutationRejected, name, details).with_kind(kind)
}

pub fn access_denied(kind: &str, name: &str, plugin_id: &str, reason: &str) -> AuditEvent {
    let details = AuditDetails::Rejection {
        plugin_id: plugin_id.to_string(),
        failure: "denied".to_string(),
        reason: reason.to_string(),
    };
    AuditEvent::new(AuditEventType::AccessDenied, name, details).with_kind(kind)
}

pub fn connection_verified(
    kind: &str,
    name: &str,
    plugin_id: &str,
    status: ConnectionStatus,
    message: &str,
) -> AuditEvent {
    let details = AuditDetails::Connection {
        plugin_id: plugin_id.to_string(),
        status,
        message: message.to_string(),
    };
    AuditEvent::new(AuditEventType::ConnectionVerified, name, details).with_kind(kind)
}

/// A validator installed into the registry, from `source` when loaded off disk
pub fn validator_registered(manifest: &ValidatorManifest, source: Option<&Path>) -> AuditEvent {
    let details = AuditDetails::Installed {
        source: source.map(Path::to_path_buf),
        version: manifest.version.clone(),
    };
    AuditEvent::new(AuditEventType::ValidatorRegistered, manifest.plugin_id.clone(), details)
}
