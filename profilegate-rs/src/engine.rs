//! Engine bootstrap: wires settings, validators, audit and the profile
//! service together.

use crate::document::{ConfigDocument, ConfigStore};
use crate::rules::DirectiveRuleEvaluator;
use crate::service::ProfileService;
use crate::settings::{EngineSettings, SettingsError};
use profilegate_host::audit::{self, AuditError, AuditSink, FileAuditSink, NullAuditSink};
use profilegate_host::{
    LoaderError, ProfileValidator, ValidatorLoader, ValidatorRegistry, ValidatorScanner,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to create validator loader: {0}")]
    Loader(#[from] LoaderError),

    #[error("Failed to open audit log: {0}")]
    Audit(#[from] AuditError),
}

pub struct Engine {
    settings: EngineSettings,
    registry: ValidatorRegistry,
    audit: Arc<dyn AuditSink>,
    service: ProfileService,
}

impl Engine {
    /// Start with an empty document
    pub fn from_settings(settings: EngineSettings) -> Result<Self, EngineError> {
        Self::with_document(settings, ConfigDocument::new())
    }

    pub fn with_document(
        settings: EngineSettings,
        document: ConfigDocument,
    ) -> Result<Self, EngineError> {
        let audit: Arc<dyn AuditSink> = match &settings.audit_log {
            Some(path) => Arc::new(FileAuditSink::new(path)?),
            None => Arc::new(NullAuditSink::new()),
        };

        let registry = ValidatorRegistry::new();
        let loader = ValidatorLoader::with_fuel(settings.validator_fuel)?;
        let scanner = ValidatorScanner::with_loader(loader);

        // missing default directories are normal, only scan what exists
        let dirs = settings.plugin_dirs.iter().filter(|d| d.is_dir());
        let discovered = scanner.scan_directories(dirs);
        for (path, error) in &discovered.failures {
            tracing::warn!(path = %path.display(), error = %error, "Validator not loaded");
        }
        for (path, manifest) in discovered.register_all(&registry) {
            record(audit.as_ref(), audit::validator_registered(&manifest, Some(&path)));
        }

        let mut rules = DirectiveRuleEvaluator::new();
        if let Some(role) = &settings.super_admin_role {
            rules = rules.with_super_admin_role(role.clone());
        }

        let service = ProfileService::new(ConfigStore::new(document), Arc::new(registry.clone()))
            .with_rules(Arc::new(rules))
            .with_audit(audit.clone());

        tracing::info!(
            validators = registry.len(),
            audit = settings.audit_log.is_some(),
            "Engine started"
        );

        Ok(Self {
            settings,
            registry,
            audit,
            service,
        })
    }

    /// Install an in-process validator
    pub fn register_validator(&self, validator: impl ProfileValidator + 'static) -> String {
        let manifest = validator.manifest().clone();
        let plugin_id = self.registry.register(validator);
        record(self.audit.as_ref(), audit::validator_registered(&manifest, None));
        plugin_id
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn service(&self) -> &ProfileService {
        &self.service
    }

    pub fn flush_audit(&self) -> Result<(), AuditError> {
        self.audit.flush()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.audit.flush() {
            tracing::warn!(error = %e, "Failed to flush audit log");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("service", &self.service)
            .finish()
    }
}

fn record(sink: &dyn AuditSink, event: audit::AuditEvent) {
    if let Err(e) = sink.record(event) {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}
