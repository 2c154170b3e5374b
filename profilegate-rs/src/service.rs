//! Profile service: the entry point an API layer calls
//!
//! Wraps a [`ConfigStore`] with the gateway, rule evaluator and audit sink
//! every command needs, and implements connection verification.

use crate::command::{CommandError, ProfileCommand};
use crate::document::{ConfigStore, DocumentError, Fingerprint};
use crate::profile::{Profile, ProfileKind};
use crate::result::OperationResult;
use crate::rules::{Principal, RuleEvaluator};
use profilegate_host::audit::{self, AuditSink, NullAuditSink};
use profilegate_host::{ConnectionStatus, ExtensionGateway, GatewayError, VerifyConnectionResponse};
use std::sync::Arc;

/// What a mutation call hands back
#[derive(Debug)]
pub struct MutationOutcome {
    /// The submitted profile with any validation errors attached
    pub profile: Profile,
    pub result: Arc<OperationResult>,
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Create, update, delete and connection checks for plugin profiles
pub struct ProfileService {
    store: ConfigStore,
    gateway: Arc<dyn ExtensionGateway>,
    rules: Option<Arc<dyn RuleEvaluator>>,
    audit: Arc<dyn AuditSink>,
}

impl ProfileService {
    pub fn new(store: ConfigStore, gateway: Arc<dyn ExtensionGateway>) -> Self {
        Self {
            store,
            gateway,
            rules: None,
            audit: Arc::new(NullAuditSink::new()),
        }
    }

    pub fn with_rules(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.rules = Some(evaluator);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn find(&self, kind: ProfileKind, name: &str) -> Option<Profile> {
        self.store.read(|doc| doc.find(kind, name).cloned())
    }

    pub fn list(&self, kind: ProfileKind) -> Vec<Profile> {
        self.store.read(|doc| doc.profiles(kind).to_vec())
    }

    pub fn fingerprint(&self) -> Result<Fingerprint, DocumentError> {
        self.store.fingerprint()
    }

    pub fn create(&self, principal: &Principal, kind: ProfileKind, profile: Profile) -> MutationOutcome {
        let result = Arc::new(OperationResult::new());
        let command = ProfileCommand::for_create(kind, profile, self.gateway.clone(), result);
        self.run(principal, command)
    }

    /// Replace a stored profile
    ///
    /// With `fingerprint` set, the update is refused if the document changed
    /// since the caller read it.
    pub fn update(
        &self,
        principal: &Principal,
        kind: ProfileKind,
        profile: Profile,
        fingerprint: Option<Fingerprint>,
    ) -> MutationOutcome {
        let result = Arc::new(OperationResult::new());
        let mut command = ProfileCommand::for_update(kind, profile, self.gateway.clone(), result);
        if let Some(fingerprint) = fingerprint {
            command = command.with_fingerprint(fingerprint);
        }
        self.run(principal, command)
    }

    pub fn delete(&self, principal: &Principal, kind: ProfileKind, name: &str) -> MutationOutcome {
        let result = Arc::new(OperationResult::new());
        // the stored copy carries the plugin id for audit and logging
        let profile = self
            .find(kind, name)
            .unwrap_or_else(|| Profile::new(name, ""));
        let command = ProfileCommand::for_delete(kind, profile, self.gateway.clone(), result);
        self.run(principal, command)
    }

    fn run(&self, principal: &Principal, command: ProfileCommand) -> MutationOutcome {
        let mut command = command.with_audit(self.audit.clone());
        if let Some(evaluator) = &self.rules {
            command = command.with_authorization(evaluator.clone(), principal.clone());
        }

        // every failure is already recorded in the result sink
        if let Err(e) = self.store.execute(&mut command) {
            tracing::debug!(error = %e, "Command did not apply");
        }

        let result = command.result().clone();
        MutationOutcome {
            profile: command.into_profile(),
            result,
        }
    }

    /// Ask the profile's plugin to check connectivity
    ///
    /// A missing plugin is reported as a `failure` response rather than an
    /// error. On `validation-failed` the reported errors are merged onto the
    /// profile. Any other gateway fault is returned as an error.
    pub fn verify_connection(
        &self,
        kind: ProfileKind,
        profile: &mut Profile,
    ) -> Result<VerifyConnectionResponse, CommandError> {
        profile.clear_errors();
        let plugin_id = profile.plugin_id().to_string();

        let response = match self
            .gateway
            .verify_connection(&plugin_id, &profile.configuration_as_map(true))
        {
            Ok(response) => response,
            Err(GatewayError::PluginNotFound(_)) => {
                tracing::warn!(plugin_id = %plugin_id, "Connection check for missing plugin");
                VerifyConnectionResponse::failure(format!(
                    "Unable to verify connection, missing plugin: {}",
                    plugin_id
                ))
            }
            Err(source) => {
                tracing::error!(plugin_id = %plugin_id, error = %source, "Connection check failed");
                return Err(CommandError::Gateway { plugin_id, source });
            }
        };

        if response.status == ConnectionStatus::ValidationFailed {
            profile.merge_errors(&response.validation_result);
        }

        let event = audit::connection_verified(
            kind.as_str(),
            profile.name(),
            &plugin_id,
            response.status,
            &response.message,
        );
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(error = %e, "Failed to record audit event");
        }
        tracing::info!(
            kind = kind.as_str(),
            name = %profile.name(),
            status = %response.status,
            "Connection verified"
        );

        Ok(response)
    }
}

impl std::fmt::Debug for ProfileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService")
            .field("store", &self.store)
            .field("rules", &self.rules.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::FailureKind;
    use profilegate_host::audit::{AuditEventType, MemoryAuditSink};
    use profilegate_host::{FnValidator, ValidationResult, ValidatorManifest, ValidatorRegistry};

    fn service() -> (ProfileService, Arc<MemoryAuditSink>) {
        let registry = ValidatorRegistry::new();
        registry.register(
            FnValidator::new(ValidatorManifest::new("file", "File"), |_| ValidationResult::new())
                .with_verify(|_| VerifyConnectionResponse::success("Connection ok")),
        );
        let audit = Arc::new(MemoryAuditSink::new());
        let service =
            ProfileService::new(ConfigStore::default(), Arc::new(registry)).with_audit(audit.clone());
        (service, audit)
    }

    #[test]
    fn test_create_update_delete() {
        let (service, audit) = service();
        let admin = Principal::new("admin");
        let kind = ProfileKind::SecretConfig;

        let created = service.create(&admin, kind, Profile::new("local", "file"));
        assert!(created.is_success());

        let fingerprint = service.fingerprint().unwrap();
        let updated = service.update(
            &admin,
            kind,
            Profile::new("local", "file").with_property("k", "v"),
            Some(fingerprint),
        );
        assert!(updated.is_success());
        assert_eq!(service.find(kind, "local").unwrap().properties().len(), 1);

        let deleted = service.delete(&admin, kind, "local");
        assert!(deleted.is_success());
        assert!(service.list(kind).is_empty());

        assert_eq!(audit.find_by_type(AuditEventType::ProfileCreated).len(), 1);
        assert_eq!(audit.find_by_type(AuditEventType::ProfileUpdated).len(), 1);
        assert_eq!(audit.find_by_type(AuditEventType::ProfileDeleted).len(), 1);
    }

    #[test]
    fn test_delete_missing() {
        let (service, _) = service();
        let outcome = service.delete(&Principal::new("admin"), ProfileKind::SecretConfig, "nope");

        assert_eq!(outcome.result.failure_kind(), Some(FailureKind::NotFound));
        assert_eq!(
            outcome.result.message(),
            Some("Secret config with id 'nope' was not found!")
        );
    }

    #[test]
    fn test_verify_connection_success_passthrough() {
        let (service, audit) = service();
        let mut profile = Profile::new("local", "file");

        let response = service
            .verify_connection(ProfileKind::SecretConfig, &mut profile)
            .unwrap();

        assert_eq!(response.status, ConnectionStatus::Success);
        assert_eq!(response.message, "Connection ok");
        assert_eq!(audit.find_by_type(AuditEventType::ConnectionVerified).len(), 1);
    }
}
