//! Service-level tests: connection checks and rule enforcement

use profilegate::{
    CommandError, ConfigDocument, ConfigStore, DirectiveRuleEvaluator, FailureKind, Principal,
    Profile, ProfileKind, ProfileService, Rule,
};
use profilegate_host::audit::{AuditEventType, MemoryAuditSink};
use profilegate_host::{
    ConnectionStatus, ExtensionGateway, FnValidator, GatewayError, LoaderError, PropertyMap,
    ValidationResult, ValidatorManifest, ValidatorRegistry, VerifyConnectionResponse,
};
use std::sync::Arc;

fn ldap_validator() -> FnValidator {
    FnValidator::new(ValidatorManifest::new("cd.go.ldap", "LDAP"), |props| {
        match props.get("Url") {
            Some(url) if url.starts_with("ldap") => ValidationResult::new(),
            _ => ValidationResult::new().with_error("Url", "Url must be an ldap url"),
        }
    })
    .with_verify(|props| {
        if props.get("Password").map(String::as_str) == Some("secret") {
            VerifyConnectionResponse::success("Connection ok")
        } else {
            VerifyConnectionResponse::validation_failed(
                "Validation failed",
                ValidationResult::new()
                    .with_error("Password", "Bind failed")
                    .with_error("ManagerDN", "Unknown manager"),
            )
        }
    })
}

fn service_with(registry: ValidatorRegistry) -> (ProfileService, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let service = ProfileService::new(ConfigStore::default(), Arc::new(registry))
        .with_rules(Arc::new(
            DirectiveRuleEvaluator::new().with_super_admin_role("admins"),
        ))
        .with_audit(audit.clone());
    (service, audit)
}

#[test]
fn test_verify_connection_missing_plugin() {
    let (service, audit) = service_with(ValidatorRegistry::new());
    let mut profile = Profile::new("ldap", "cd.go.ldap");

    let response = service
        .verify_connection(ProfileKind::SecurityAuthConfig, &mut profile)
        .unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({
            "status": "failure",
            "message": "Unable to verify connection, missing plugin: cd.go.ldap",
            "errors": []
        })
    );
    assert!(!profile.has_errors());
    assert_eq!(audit.find_by_type(AuditEventType::ConnectionVerified).len(), 1);
}

#[test]
fn test_verify_connection_merges_validation_errors() {
    let registry = ValidatorRegistry::new();
    registry.register(ldap_validator());
    let (service, _) = service_with(registry);

    let mut profile = Profile::new("ldap", "cd.go.ldap")
        .with_property("Url", "ldap://example.com")
        .with_secure_property("Password", "wrong");

    let response = service
        .verify_connection(ProfileKind::SecurityAuthConfig, &mut profile)
        .unwrap();

    assert_eq!(response.status, ConnectionStatus::ValidationFailed);
    assert_eq!(profile.property("Password").unwrap().errors(), ["Bind failed"]);
    assert_eq!(profile.errors().len(), 1);
    assert_eq!(profile.errors()[0].key, "ManagerDN");

    // secure values reach the plugin
    profile.set_property("Password", "secret");
    let response = service
        .verify_connection(ProfileKind::SecurityAuthConfig, &mut profile)
        .unwrap();
    assert_eq!(response.status, ConnectionStatus::Success);
    assert!(!profile.has_errors());
}

struct BrokenGateway;

impl ExtensionGateway for BrokenGateway {
    fn validate(&self, plugin_id: &str, _: &PropertyMap) -> Result<ValidationResult, GatewayError> {
        Err(GatewayError::Invocation {
            plugin_id: plugin_id.to_string(),
            source: LoaderError::FuelExhausted,
        })
    }

    fn verify_connection(
        &self,
        plugin_id: &str,
        _: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError> {
        Err(GatewayError::Invocation {
            plugin_id: plugin_id.to_string(),
            source: LoaderError::FuelExhausted,
        })
    }
}

#[test]
fn test_gateway_faults_are_not_downgraded() {
    let service = ProfileService::new(ConfigStore::default(), Arc::new(BrokenGateway));
    let mut profile = Profile::new("ldap", "cd.go.ldap");

    assert!(matches!(
        service.verify_connection(ProfileKind::SecurityAuthConfig, &mut profile),
        Err(CommandError::Gateway { .. })
    ));

    let outcome = service.create(&Principal::new("admin"), ProfileKind::SecurityAuthConfig, profile);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::Internal));
    assert_eq!(outcome.result.http_status(), Some(500));
}

#[test]
fn test_create_with_missing_plugin_is_a_precondition_failure() {
    let (service, audit) = service_with(ValidatorRegistry::new());

    let outcome = service.create(
        &Principal::new("admin"),
        ProfileKind::SecurityAuthConfig,
        Profile::new("ldap", "cd.go.ldap"),
    );

    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::PluginMissing));
    assert_eq!(
        outcome.result.message(),
        Some("Plugin with id 'cd.go.ldap' is not found.")
    );
    assert!(service.list(ProfileKind::SecurityAuthConfig).is_empty());
    assert_eq!(audit.find_by_type(AuditEventType::MutationRejected).len(), 1);
}

#[test]
fn test_stored_rules_guard_updates_and_deletes() {
    let registry = ValidatorRegistry::new();
    registry.register(ldap_validator());
    let (service, audit) = service_with(registry);
    let kind = ProfileKind::SecurityAuthConfig;

    let guarded = Profile::new("ldap", "cd.go.ldap")
        .with_property("Url", "ldap://example.com")
        .with_rule(Rule::allow("administer", "role", "ops-*"));

    let alice = Principal::new("alice").with_role("ops-team");
    let bob = Principal::new("bob").with_role("dev");
    let root = Principal::new("root").with_role("admins");

    assert!(service.create(&alice, kind, guarded.clone()).is_success());

    // bob submits a copy without rules; the stored rules still apply
    let unguarded = Profile::new("ldap", "cd.go.ldap").with_property("Url", "ldap://evil.example.com");
    let denied = service.update(&bob, kind, unguarded, None);
    assert_eq!(denied.result.failure_kind(), Some(FailureKind::Denied));
    assert_eq!(denied.result.http_status(), Some(403));
    assert_eq!(audit.find_by_type(AuditEventType::AccessDenied).len(), 1);

    let denied = service.delete(&bob, kind, "ldap");
    assert_eq!(denied.result.failure_kind(), Some(FailureKind::Denied));
    assert!(service.find(kind, "ldap").is_some());

    assert!(service.delete(&root, kind, "ldap").is_success());
    assert!(service.find(kind, "ldap").is_none());
}

#[test]
fn test_validation_errors_come_back_on_the_profile() {
    let registry = ValidatorRegistry::new();
    registry.register(ldap_validator());
    let (service, _) = service_with(registry);

    let outcome = service.create(
        &Principal::new("alice"),
        ProfileKind::SecurityAuthConfig,
        Profile::new("ldap", "cd.go.ldap").with_property("Url", "http://example.com"),
    );

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.profile.property("Url").unwrap().errors(),
        ["Url must be an ldap url"]
    );
    assert_eq!(outcome.result.http_status(), Some(422));
}

#[test]
fn test_document_loaded_from_json() {
    let json = r#"{
        "profiles": {
            "secret_config": [
                {"name": "vault", "plugin_id": "hashicorp", "properties": [
                    {"key": "Token", "value": "s.abc", "secure": true}
                ]}
            ]
        },
        "other": {"server": {"port": 8153}}
    }"#;
    let document = ConfigDocument::from_json(json).unwrap();
    let service = ProfileService::new(ConfigStore::new(document), Arc::new(ValidatorRegistry::new()));

    let vault = service.find(ProfileKind::SecretConfig, "vault").unwrap();
    assert!(vault.property("Token").unwrap().secure);
    assert_eq!(vault.configuration_as_map(false)["Token"], "****");
    assert_eq!(service.store().snapshot().other()["server"]["port"], 8153);
}
