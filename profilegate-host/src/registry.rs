//! Validator registry
//!
//! Thread-safe map from plugin id to installed validator. The registry is the
//! host's [`ExtensionGateway`].

use crate::gateway::{ExtensionGateway, GatewayError, ProfileValidator};
use crate::loader::{LoaderError, ValidatorLoader, WasmValidator};
use profilegate_api::{PropertyMap, ValidationResult, ValidatorManifest, VerifyConnectionResponse};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// A thread-safe registry of installed validators
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ProfileValidator>>>>,
}

impl ValidatorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator under its manifest's plugin id
    ///
    /// Replaces any validator already registered for that id.
    pub fn register(&self, validator: impl ProfileValidator + 'static) -> String {
        self.register_arc(Arc::new(validator))
    }

    /// Register a shared validator
    pub fn register_arc(&self, validator: Arc<dyn ProfileValidator>) -> String {
        let plugin_id = validator.plugin_id().to_string();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.insert(plugin_id.clone(), validator).is_some() {
            tracing::info!(plugin_id = %plugin_id, "Validator replaced");
        } else {
            tracing::info!(plugin_id = %plugin_id, "Validator registered");
        }
        plugin_id
    }

    /// Load a Wasm validator from a file and register it
    pub fn load_plugin(
        &self,
        loader: &ValidatorLoader,
        path: impl AsRef<Path>,
    ) -> Result<String, LoaderError> {
        let path = path.as_ref();
        let wasm_bytes = std::fs::read(path).map_err(|e| {
            LoaderError::MemoryAccess(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        let loaded = loader.load(&wasm_bytes)?;
        let plugin_id = self.register(WasmValidator::new(loaded));
        tracing::info!(plugin_id = %plugin_id, path = %path.display(), "Validator loaded");
        Ok(plugin_id)
    }

    /// Remove a validator by plugin id
    pub fn unregister(&self, plugin_id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.remove(plugin_id).is_some();
        if removed {
            tracing::info!(plugin_id = %plugin_id, "Validator unregistered");
        }
        removed
    }

    /// Check if a validator is installed
    pub fn has_plugin(&self, plugin_id: &str) -> bool {
        self.read().contains_key(plugin_id)
    }

    /// Sorted list of installed plugin ids
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Manifest of an installed validator
    pub fn get_manifest(&self, plugin_id: &str) -> Option<ValidatorManifest> {
        self.read().get(plugin_id).map(|v| v.manifest().clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn ProfileValidator>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, plugin_id: &str) -> Result<Arc<dyn ProfileValidator>, GatewayError> {
        // Clone out so the registry lock is not held across the guest call
        self.read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| GatewayError::PluginNotFound(plugin_id.to_string()))
    }
}

impl ExtensionGateway for ValidatorRegistry {
    fn validate(
        &self,
        plugin_id: &str,
        properties: &PropertyMap,
    ) -> Result<ValidationResult, GatewayError> {
        let validator = self.lookup(plugin_id)?;
        let result = validator.validate(properties)?;
        tracing::debug!(plugin_id = %plugin_id, errors = result.len(), "Validation completed");
        Ok(result)
    }

    fn verify_connection(
        &self,
        plugin_id: &str,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError> {
        let validator = self.lookup(plugin_id)?;
        validator.verify_connection(properties)
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("plugins", &self.plugin_ids())
            .finish()
    }
}
