//! Extension gateway: routes a plugin id to an installed validator
//!
//! The engine only talks to [`ExtensionGateway`]. [`ProfileValidator`] is the
//! seam for one installed validator, whether it runs in-process or inside a
//! Wasm sandbox (see [`crate::loader::WasmValidator`]).

use crate::LoaderError;
use profilegate_api::{PropertyMap, ValidationResult, ValidatorManifest, VerifyConnectionResponse};
use thiserror::Error;

/// Errors raised while dispatching to a validator
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No validator is installed for the plugin id
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin {plugin_id} failed: {source}")]
    Invocation {
        plugin_id: String,
        #[source]
        source: LoaderError,
    },
}

impl GatewayError {
    /// True for the "plugin missing" condition
    pub fn is_plugin_not_found(&self) -> bool {
        matches!(self, GatewayError::PluginNotFound(_))
    }
}

/// One installed validator
///
/// Implementations must not have side effects on configuration; `validate`
/// is a pure check.
///
/// # Example
///
/// ```rust
/// use profilegate_host::gateway::{GatewayError, ProfileValidator};
/// use profilegate_host::{PropertyMap, ValidationResult, ValidatorManifest, VerifyConnectionResponse};
///
/// struct AcceptAll(ValidatorManifest);
///
/// impl ProfileValidator for AcceptAll {
///     fn manifest(&self) -> &ValidatorManifest {
///         &self.0
///     }
///
///     fn validate(&self, _properties: &PropertyMap) -> Result<ValidationResult, GatewayError> {
///         Ok(ValidationResult::new())
///     }
///
///     fn verify_connection(
///         &self,
///         _properties: &PropertyMap,
///     ) -> Result<VerifyConnectionResponse, GatewayError> {
///         Ok(VerifyConnectionResponse::success("Connection check passed"))
///     }
/// }
/// ```
pub trait ProfileValidator: Send + Sync {
    /// Manifest describing the plugin id this validator answers for
    fn manifest(&self) -> &ValidatorManifest;

    /// Validate flattened profile properties
    fn validate(&self, properties: &PropertyMap) -> Result<ValidationResult, GatewayError>;

    /// Check connectivity with the given properties
    fn verify_connection(
        &self,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError>;

    /// Plugin id shortcut
    fn plugin_id(&self) -> &str {
        &self.manifest().plugin_id
    }
}

/// Dispatch by plugin id
pub trait ExtensionGateway: Send + Sync {
    /// Validate `properties` with the validator registered as `plugin_id`
    ///
    /// Returns [`GatewayError::PluginNotFound`] if none is installed.
    fn validate(
        &self,
        plugin_id: &str,
        properties: &PropertyMap,
    ) -> Result<ValidationResult, GatewayError>;

    /// Verify connectivity through the validator registered as `plugin_id`
    fn verify_connection(
        &self,
        plugin_id: &str,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError>;
}

impl<G: ExtensionGateway + ?Sized> ExtensionGateway for std::sync::Arc<G> {
    fn validate(
        &self,
        plugin_id: &str,
        properties: &PropertyMap,
    ) -> Result<ValidationResult, GatewayError> {
        (**self).validate(plugin_id, properties)
    }

    fn verify_connection(
        &self,
        plugin_id: &str,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError> {
        (**self).verify_connection(plugin_id, properties)
    }
}

type ValidateFn = dyn Fn(&PropertyMap) -> ValidationResult + Send + Sync;
type VerifyFn = dyn Fn(&PropertyMap) -> VerifyConnectionResponse + Send + Sync;

/// In-process validator built from closures
///
/// Useful for built-in profile types and for tests.
pub struct FnValidator {
    manifest: ValidatorManifest,
    validate: Box<ValidateFn>,
    verify: Option<Box<VerifyFn>>,
}

impl FnValidator {
    pub fn new(
        manifest: ValidatorManifest,
        validate: impl Fn(&PropertyMap) -> ValidationResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            manifest,
            validate: Box::new(validate),
            verify: None,
        }
    }

    /// Attach a connection check
    pub fn with_verify(
        mut self,
        verify: impl Fn(&PropertyMap) -> VerifyConnectionResponse + Send + Sync + 'static,
    ) -> Self {
        self.verify = Some(Box::new(verify));
        self
    }
}

impl ProfileValidator for FnValidator {
    fn manifest(&self) -> &ValidatorManifest {
        &self.manifest
    }

    fn validate(&self, properties: &PropertyMap) -> Result<ValidationResult, GatewayError> {
        Ok((self.validate)(properties))
    }

    fn verify_connection(
        &self,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError> {
        match &self.verify {
            Some(verify) => Ok(verify(properties)),
            None => Ok(VerifyConnectionResponse::failure(format!(
                "Plugin {} does not support connection checks",
                self.manifest.plugin_id
            ))),
        }
    }
}

impl std::fmt::Debug for FnValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnValidator")
            .field("plugin_id", &self.manifest.plugin_id)
            .field("verify", &self.verify.is_some())
            .finish()
    }
}
