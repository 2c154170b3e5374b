//! Two-phase mutation commands
//!
//! A [`ProfileCommand`] first checks a proposed create, update or delete
//! against a read-only document ([`ProfileCommand::is_valid`]) and, only if
//! that passed, applies it ([`ProfileCommand::update`]). A failed check can
//! be repeated; the outcome is written once to the command's
//! [`OperationResult`] and the audit sink when the command finishes.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use profilegate::{ConfigDocument, OperationResult, Profile, ProfileCommand, ProfileKind};
//! use profilegate_host::{FnValidator, ValidationResult, ValidatorManifest, ValidatorRegistry};
//!
//! let registry = ValidatorRegistry::new();
//! registry.register(FnValidator::new(ValidatorManifest::new("file", "File"), |_| {
//!     ValidationResult::new()
//! }));
//!
//! let result = Arc::new(OperationResult::new());
//! let mut command = ProfileCommand::for_create(
//!     ProfileKind::SecretConfig,
//!     Profile::new("local", "file"),
//!     Arc::new(registry),
//!     result.clone(),
//! );
//!
//! let mut document = ConfigDocument::new();
//! assert!(command.is_valid(&document).unwrap());
//! command.update(&mut document).unwrap();
//! assert!(result.is_success());
//! ```

use crate::document::{ConfigDocument, DocumentError, Fingerprint};
use crate::profile::{Profile, ProfileKind, NAME_KEY, PLUGIN_ID_KEY};
use crate::result::{FailureKind, OperationResult};
use crate::rules::{Action, Principal, RuleContext, RuleDecision, RuleEvaluator};
use profilegate_host::audit::{self, AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use profilegate_host::{ExtensionGateway, GatewayError};
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort a command
///
/// Validation failures are not errors: they are attached to the profile and
/// reported through `is_valid` returning `false`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{kind} with id '{name}' was not found!")]
    NotFound { kind: ProfileKind, name: String },

    #[error("{kind} with id '{name}' already exists.")]
    Duplicate { kind: ProfileKind, name: String },

    #[error("Access denied to {} '{name}': {reason}", .kind.label())]
    Denied {
        kind: ProfileKind,
        name: String,
        reason: String,
    },

    #[error("Plugin with id '{plugin_id}' is not found.")]
    PluginMissing { plugin_id: String },

    #[error("Someone has modified the configuration for {} '{name}'. Please update your copy of the config with the changes and try again.", .kind.label())]
    StaleState {
        kind: ProfileKind,
        name: String,
        expected: Fingerprint,
        actual: Fingerprint,
    },

    #[error("Cannot {operation} a command in state {state:?}")]
    IllegalState {
        state: CommandState,
        operation: &'static str,
    },

    #[error("Validator '{plugin_id}' failed: {source}")]
    Gateway {
        plugin_id: String,
        #[source]
        source: GatewayError,
    },

    #[error("{message}")]
    ValidationFailed {
        failure: FailureKind,
        message: String,
    },

    #[error(transparent)]
    Document(DocumentError),
}

impl CommandError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CommandError::NotFound { .. } => FailureKind::NotFound,
            CommandError::Duplicate { .. } => FailureKind::Duplicate,
            CommandError::Denied { .. } => FailureKind::Denied,
            CommandError::PluginMissing { .. } => FailureKind::PluginMissing,
            CommandError::StaleState { .. } => FailureKind::StaleState,
            CommandError::ValidationFailed { failure, .. } => *failure,
            CommandError::IllegalState { .. }
            | CommandError::Gateway { .. }
            | CommandError::Document(_) => FailureKind::Internal,
        }
    }
}

impl From<DocumentError> for CommandError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::NotFound { kind, name } => CommandError::NotFound { kind, name },
            DocumentError::Duplicate { kind, name } => CommandError::Duplicate { kind, name },
            other => CommandError::Document(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    Update,
    Delete,
}

impl CommandKind {
    fn past_tense(&self) -> &'static str {
        match self {
            CommandKind::Create => "created",
            CommandKind::Update => "updated",
            CommandKind::Delete => "deleted",
        }
    }

    fn audit_event(&self) -> AuditEventType {
        match self {
            CommandKind::Create => AuditEventType::ProfileCreated,
            CommandKind::Update => AuditEventType::ProfileUpdated,
            CommandKind::Delete => AuditEventType::ProfileDeleted,
        }
    }
}

/// Lifecycle of a command
///
/// `Created -> Validated -> Applied`. A failed check moves to `Invalid`,
/// from which `is_valid` may run again; `reject` or `update` then closes the
/// command as `Rejected`. `Rejected` and `Applied` are final, and only they
/// write the result sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Validated,
    Invalid,
    Rejected,
    Applied,
}

impl CommandState {
    pub fn is_final(&self) -> bool {
        matches!(self, CommandState::Rejected | CommandState::Applied)
    }
}

struct Authorization {
    evaluator: Arc<dyn RuleEvaluator>,
    principal: Principal,
}

/// A create, update or delete of one profile
pub struct ProfileCommand {
    command: CommandKind,
    kind: ProfileKind,
    profile: Profile,
    gateway: Arc<dyn ExtensionGateway>,
    result: Arc<OperationResult>,
    authorization: Option<Authorization>,
    expected_fingerprint: Option<Fingerprint>,
    audit: Arc<dyn AuditSink>,
    state: CommandState,
    duplicate: bool,
}

impl ProfileCommand {
    fn new(
        command: CommandKind,
        kind: ProfileKind,
        profile: Profile,
        gateway: Arc<dyn ExtensionGateway>,
        result: Arc<OperationResult>,
    ) -> Self {
        Self {
            command,
            kind,
            profile,
            gateway,
            result,
            authorization: None,
            expected_fingerprint: None,
            audit: Arc::new(NullAuditSink::new()),
            state: CommandState::Created,
            duplicate: false,
        }
    }

    pub fn for_create(
        kind: ProfileKind,
        profile: Profile,
        gateway: Arc<dyn ExtensionGateway>,
        result: Arc<OperationResult>,
    ) -> Self {
        Self::new(CommandKind::Create, kind, profile, gateway, result)
    }

    pub fn for_update(
        kind: ProfileKind,
        profile: Profile,
        gateway: Arc<dyn ExtensionGateway>,
        result: Arc<OperationResult>,
    ) -> Self {
        Self::new(CommandKind::Update, kind, profile, gateway, result)
    }

    pub fn for_delete(
        kind: ProfileKind,
        profile: Profile,
        gateway: Arc<dyn ExtensionGateway>,
        result: Arc<OperationResult>,
    ) -> Self {
        Self::new(CommandKind::Delete, kind, profile, gateway, result)
    }

    /// Fingerprint the caller last saw; the mutation is refused if the
    /// document no longer matches it
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.expected_fingerprint = Some(fingerprint);
        self
    }

    /// Evaluate profile rules for `principal`
    pub fn with_authorization(
        mut self,
        evaluator: Arc<dyn RuleEvaluator>,
        principal: Principal,
    ) -> Self {
        self.authorization = Some(Authorization {
            evaluator,
            principal,
        });
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.command
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// The candidate profile, with any errors from the last check attached
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn into_profile(self) -> Profile {
        self.profile
    }

    pub fn result(&self) -> &Arc<OperationResult> {
        &self.result
    }

    // ========================================================================
    // Phase one
    // ========================================================================

    /// Check the command against `document` without modifying it
    ///
    /// Returns `Ok(false)` when the profile failed validation; the errors are
    /// attached to the profile and nothing is reported yet. Precondition
    /// failures (not found, denied, plugin missing) are returned as errors,
    /// reported to the result sink and end the command.
    pub fn is_valid(&mut self, document: &ConfigDocument) -> Result<bool, CommandError> {
        if self.state.is_final() {
            return Err(CommandError::IllegalState {
                state: self.state,
                operation: "validate",
            });
        }

        self.profile.clear_errors();
        self.duplicate = false;
        match self.check(document) {
            Ok(true) => {
                self.state = CommandState::Validated;
                tracing::debug!(
                    kind = self.kind.as_str(),
                    name = %self.profile.name(),
                    command = ?self.command,
                    "Command validated"
                );
                Ok(true)
            }
            Ok(false) => {
                self.state = CommandState::Invalid;
                tracing::debug!(
                    kind = self.kind.as_str(),
                    name = %self.profile.name(),
                    errors = self.profile.all_errors().len(),
                    "Command failed validation"
                );
                Ok(false)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn check(&mut self, document: &ConfigDocument) -> Result<bool, CommandError> {
        let name = self.profile.name().to_string();

        let stored = match self.command {
            CommandKind::Create => {
                if document.contains(self.kind, &name) {
                    self.duplicate = true;
                    let message = CommandError::Duplicate {
                        kind: self.kind,
                        name: name.clone(),
                    }
                    .to_string();
                    self.profile.add_error(NAME_KEY, message);
                }
                None
            }
            CommandKind::Update | CommandKind::Delete => Some(
                document
                    .find(self.kind, &name)
                    .ok_or_else(|| CommandError::NotFound {
                        kind: self.kind,
                        name: name.clone(),
                    })?,
            ),
        };

        // new profiles bring their own rules, existing ones are guarded by
        // what is stored
        let rules = match stored {
            Some(existing) => existing.rules(),
            None => self.profile.rules(),
        };
        if let Some(auth) = &self.authorization {
            if !rules.is_empty() {
                let ctx = RuleContext {
                    principal: &auth.principal,
                    rules,
                    action: Action::Administer,
                    profile: &name,
                };
                if let RuleDecision::Deny(reason) = auth.evaluator.check(&ctx) {
                    return Err(CommandError::Denied {
                        kind: self.kind,
                        name,
                        reason,
                    });
                }
            }
        }

        if self.command == CommandKind::Delete {
            // the outgoing profile's fields are irrelevant, and an
            // uninstalled plugin must not block removing its profiles
            return Ok(!self.profile.has_errors());
        }

        if let Some(existing) = stored {
            if existing.plugin_id() != self.profile.plugin_id() {
                let message = format!(
                    "Plugin id cannot be changed from '{}' to '{}'.",
                    existing.plugin_id(),
                    self.profile.plugin_id()
                );
                self.profile.add_error(PLUGIN_ID_KEY, message);
            }
        }

        self.profile.validate_structure();

        let plugin_id = self.profile.plugin_id().to_string();
        let properties = self.profile.configuration_as_map(true);
        let result = self
            .gateway
            .validate(&plugin_id, &properties)
            .map_err(|source| match source {
                GatewayError::PluginNotFound(plugin_id) => CommandError::PluginMissing { plugin_id },
                source => CommandError::Gateway {
                    plugin_id: plugin_id.clone(),
                    source,
                },
            })?;
        self.profile.merge_errors(&result);

        Ok(!self.profile.has_errors())
    }

    fn validation_failure(&self) -> CommandError {
        let message = format!(
            "Validations failed for {} '{}'. Error(s): [{}]. Please correct and resubmit.",
            self.kind.label(),
            self.profile.name(),
            self.profile.all_errors().join(", ")
        );
        let failure = if self.duplicate {
            FailureKind::Duplicate
        } else {
            FailureKind::ValidationFailed
        };
        CommandError::ValidationFailed { failure, message }
    }

    /// Close a command whose last check failed, reporting the validation
    /// failure to the result sink
    pub fn reject(&mut self) -> Result<(), CommandError> {
        if self.state != CommandState::Invalid {
            return Err(CommandError::IllegalState {
                state: self.state,
                operation: "reject",
            });
        }
        let err = self.validation_failure();
        self.fail(err);
        Ok(())
    }

    // ========================================================================
    // Phase two
    // ========================================================================

    /// Apply the checked mutation to `document`
    ///
    /// Only applies after `is_valid` returned `true`. After a failed check it
    /// leaves the document alone and reports the validation failure, like
    /// [`reject`](Self::reject). On any error the document is left exactly as
    /// it was.
    pub fn update(&mut self, document: &mut ConfigDocument) -> Result<(), CommandError> {
        if self.state == CommandState::Invalid {
            let err = self.validation_failure();
            return Err(self.fail(err));
        }
        if self.state != CommandState::Validated {
            return Err(CommandError::IllegalState {
                state: self.state,
                operation: "apply",
            });
        }

        if let Some(expected) = self.expected_fingerprint.clone() {
            let actual = document.fingerprint().map_err(|e| self.fail(e.into()))?;
            if actual != expected {
                let err = CommandError::StaleState {
                    kind: self.kind,
                    name: self.profile.name().to_string(),
                    expected,
                    actual,
                };
                return Err(self.fail(err));
            }
        }

        let name = self.profile.name().to_string();
        let applied = match self.command {
            CommandKind::Create => document.insert(self.kind, self.profile.clone()),
            CommandKind::Update => document
                .replace(self.kind, &name, self.profile.clone())
                .map(drop),
            CommandKind::Delete => document.remove(self.kind, &name).map(drop),
        };
        if let Err(err) = applied {
            return Err(self.fail(err.into()));
        }

        self.state = CommandState::Applied;
        let fingerprint = match document.fingerprint() {
            Ok(fp) => fp.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fingerprint updated document");
                String::new()
            }
        };

        let message = format!(
            "The {} '{}' was {} successfully.",
            self.kind.label(),
            name,
            self.command.past_tense()
        );
        self.result.set_success(message);
        self.record(audit::profile_mutated(
            self.command.audit_event(),
            self.kind.as_str(),
            &name,
            self.profile.plugin_id(),
            &fingerprint,
        ));
        tracing::info!(
            kind = self.kind.as_str(),
            name = %name,
            plugin_id = %self.profile.plugin_id(),
            "Profile {}",
            self.command.past_tense()
        );
        Ok(())
    }

    // ========================================================================
    // Outcome reporting
    // ========================================================================

    fn fail(&mut self, err: CommandError) -> CommandError {
        self.state = CommandState::Rejected;
        if let CommandError::Denied { reason, .. } = &err {
            self.record(audit::access_denied(
                self.kind.as_str(),
                self.profile.name(),
                self.profile.plugin_id(),
                reason,
            ));
        }
        self.report(err.failure_kind(), &err.to_string());
        err
    }

    fn report(&self, failure: FailureKind, message: &str) {
        self.result.set_failure(failure, message);
        self.record(audit::mutation_rejected(
            self.kind.as_str(),
            self.profile.name(),
            self.profile.plugin_id(),
            failure.as_str(),
            message,
        ));
        tracing::warn!(
            kind = self.kind.as_str(),
            name = %self.profile.name(),
            failure = failure.as_str(),
            "{}",
            message
        );
    }

    fn record(&self, event: AuditEvent) {
        let event = match &self.authorization {
            Some(auth) => event.with_principal(auth.principal.name.clone()),
            None => event,
        };
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(error = %e, "Failed to record audit event");
        }
    }
}

impl std::fmt::Debug for ProfileCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCommand")
            .field("command", &self.command)
            .field("kind", &self.kind)
            .field("profile", &self.profile.name())
            .field("state", &self.state)
            .finish()
    }
}
