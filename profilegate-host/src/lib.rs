//! profilegate-host: validator host runtime for profilegate
//!
//! This crate resolves plugin ids to installed validators, loads Wasm
//! validators and records audit events.

pub mod audit;
pub mod discovery;
pub mod gateway;
pub mod loader;
pub mod registry;

pub use discovery::{default_plugin_dirs, DiscoveryError, DiscoveryResult, ValidatorScanner};
pub use gateway::{ExtensionGateway, FnValidator, GatewayError, ProfileValidator};
pub use loader::{LoadedValidator, LoaderError, ValidatorInstance, ValidatorLoader, WasmValidator};
pub use profilegate_api::{
    ConnectionStatus, PropertyMap, ValidationError, ValidationResult, ValidatorManifest,
    VerifyConnectionResponse, API_VERSION,
};
pub use registry::ValidatorRegistry;
