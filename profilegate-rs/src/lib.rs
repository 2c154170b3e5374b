//! # profilegate: plugin-validated configuration mutations
//!
//! Creates, updates and deletes plugin-governed configuration profiles
//! (secret configs, security auth configs) inside a shared configuration
//! document. Each mutation is a two-phase [`ProfileCommand`]: a read-only
//! check that asks the profile's plugin to validate it, then an atomic apply.
//!
//! ## Core Principles
//!
//! - **Nothing half-applied**: a rejected command leaves the document untouched
//! - **Errors where they belong**: plugin errors are attached to the property
//!   they name, or to the profile when no property matches
//! - **Optimistic concurrency**: updates can carry the document fingerprint
//!   the caller last saw
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use profilegate::{Engine, EngineSettings, Principal, Profile, ProfileKind};
//!
//! let engine = Engine::from_settings(EngineSettings::default_for_app("profilegate")?)?;
//!
//! let outcome = engine.service().create(
//!     &Principal::new("admin"),
//!     ProfileKind::SecurityAuthConfig,
//!     Profile::new("ldap", "cd.go.ldap").with_property("Url", "ldaps://ldap.example.com"),
//! );
//!
//! if !outcome.is_success() {
//!     eprintln!("{}", outcome.result.message().unwrap_or_default());
//! }
//! ```

pub mod command;
pub mod document;
pub mod engine;
pub mod profile;
pub mod result;
pub mod rules;
pub mod service;
pub mod settings;
pub mod tracing_support;

pub use command::{CommandError, CommandKind, CommandState, ProfileCommand};
pub use document::{ConfigDocument, ConfigStore, DocumentError, Fingerprint};
pub use engine::{Engine, EngineError};
pub use profile::{ConfigurationProperty, Profile, ProfileKind};
pub use result::{FailureKind, OperationResult, Outcome};
pub use rules::{
    Action, Directive, DirectiveRuleEvaluator, Principal, Rule, RuleContext, RuleDecision,
    RuleEvaluator, TrustAllRules,
};
pub use service::{MutationOutcome, ProfileService};
pub use settings::{EngineSettings, LogSettings, SettingsError};

#[cfg(feature = "subscriber")]
pub use tracing_support::{init_subscriber, init_subscriber_with_config};
pub use tracing_support::{TracingConfig, TracingFormat};

// Re-export the plugin-facing types engine users need
pub use profilegate_host::{
    ConnectionStatus, ExtensionGateway, PropertyMap, ValidationError, ValidationResult,
    VerifyConnectionResponse,
};
