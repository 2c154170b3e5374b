//! profilegate-api: Shared types for the profilegate validator protocol
//!
//! This crate defines the protocol between the host and a guest validator
//! (usually a Wasm plugin). Communication uses MessagePack serialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Flattened profile properties as sent to a validator (key → plain value)
pub type PropertyMap = BTreeMap<String, String>;

/// Manifest returned by a validator's `plugin_manifest()` function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorManifest {
    /// API version for compatibility
    pub api_version: u32,

    /// Plugin identifier profiles refer to (e.g., "cd.go.ldap")
    pub plugin_id: String,

    /// Short description of what this validator governs
    pub about: String,

    /// Plugin version (semver)
    #[serde(default)]
    pub version: Option<String>,

    /// Plugin author
    #[serde(default)]
    pub author: Option<String>,
}

impl ValidatorManifest {
    /// Create a manifest for the current API version
    pub fn new(plugin_id: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION,
            plugin_id: plugin_id.into(),
            about: about.into(),
            version: None,
            author: None,
        }
    }

    /// Add version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add author
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// A single field-level error reported by a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Property key the error belongs to
    pub key: String,

    /// Human-readable message
    pub message: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Ordered collection of errors from one validation attempt
///
/// An empty result means validation passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create an empty (passing) result
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error, keeping report order
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Builder-style variant of [`add_error`](Self::add_error)
    pub fn with_error(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.add_error(ValidationError::new(key, message));
        self
    }

    /// True when no errors were reported
    pub fn is_successful(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Messages in report order
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

impl FromIterator<ValidationError> for ValidationResult {
    fn from_iter<I: IntoIterator<Item = ValidationError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ValidationResult {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Outcome of a connection check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    /// The plugin reached the backing service
    Success,
    /// The supplied properties did not pass validation
    ValidationFailed,
    /// The check ran but the connection could not be established
    Failure,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Success => "success",
            ConnectionStatus::ValidationFailed => "validation-failed",
            ConnectionStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `plugin_verify_connection`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConnectionResponse {
    pub status: ConnectionStatus,

    pub message: String,

    /// Field errors, populated for [`ConnectionStatus::ValidationFailed`]
    #[serde(rename = "errors", default)]
    pub validation_result: ValidationResult,
}

impl VerifyConnectionResponse {
    pub fn new(
        status: ConnectionStatus,
        message: impl Into<String>,
        validation_result: ValidationResult,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            validation_result,
        }
    }

    /// Successful connection check
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ConnectionStatus::Success, message, ValidationResult::new())
    }

    /// Connection check that failed without field errors
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(ConnectionStatus::Failure, message, ValidationResult::new())
    }

    /// Connection check rejected because of field errors
    pub fn validation_failed(message: impl Into<String>, result: ValidationResult) -> Self {
        Self::new(ConnectionStatus::ValidationFailed, message, result)
    }
}
