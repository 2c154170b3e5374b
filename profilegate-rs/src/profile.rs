//! Plugin-governed configuration profiles.
//!
//! A [`Profile`] is a named, ordered bag of key/value properties plus the id
//! of the plugin that validates it. Validation errors are transient: they are
//! attached to properties (or to the profile when no property matches) and
//! are never serialized into the document.

use profilegate_api::{PropertyMap, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rules::Rule;

/// Longest accepted profile name.
pub const MAX_NAME_LENGTH: usize = 255;

/// Profile key for errors that concern the profile name.
pub const NAME_KEY: &str = "name";

/// Profile key for errors that concern the plugin id.
pub const PLUGIN_ID_KEY: &str = "pluginId";

/// Shown in place of secure values in display maps.
pub const MASKED_VALUE: &str = "****";

/// Which profile collection of the document a profile lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Secret store configuration.
    SecretConfig,
    /// Authorization provider configuration.
    SecurityAuthConfig,
}

impl ProfileKind {
    /// Stable identifier, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::SecretConfig => "secret_config",
            ProfileKind::SecurityAuthConfig => "security_auth_config",
        }
    }

    /// Lower-case label used inside sentences.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileKind::SecretConfig => "secret config",
            ProfileKind::SecurityAuthConfig => "security auth config",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileKind::SecretConfig => f.write_str("Secret config"),
            ProfileKind::SecurityAuthConfig => f.write_str("Security auth config"),
        }
    }
}

/// One `(key, value, errors)` entry of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationProperty {
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// Secure values are left out of display maps.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secure: bool,
    #[serde(skip)]
    errors: Vec<String>,
}

impl ConfigurationProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secure: false,
            errors: Vec::new(),
        }
    }

    pub fn secure(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            secure: true,
            ..Self::new(key, value)
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A named, plugin-validated configuration profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    name: String,
    plugin_id: String,
    #[serde(default)]
    properties: Vec<ConfigurationProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rules: Vec<Rule>,
    /// Errors with no matching property.
    #[serde(skip)]
    errors: Vec<ValidationError>,
}

impl Profile {
    pub fn new(name: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_id: plugin_id.into(),
            properties: Vec::new(),
            rules: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Builder-style [`set_property`](Self::set_property).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(ConfigurationProperty::new(key, value));
        self
    }

    /// Builder-style property whose value is secret.
    pub fn with_secure_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(ConfigurationProperty::secure(key, value));
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn properties(&self) -> &[ConfigurationProperty] {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&ConfigurationProperty> {
        self.properties.iter().find(|p| p.key == key)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Set a plain property, replacing the value of an existing key in place.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(ConfigurationProperty::new(key, value));
    }

    fn set(&mut self, property: ConfigurationProperty) {
        match self.properties.iter_mut().find(|p| p.key == property.key) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Flatten properties to a key/value map.
    ///
    /// With `include_secure` this is the map handed to a validator. Without
    /// it, secure values are replaced by [`MASKED_VALUE`] for display.
    pub fn configuration_as_map(&self, include_secure: bool) -> PropertyMap {
        self.properties
            .iter()
            .map(|p| {
                let value = if p.secure && !include_secure {
                    MASKED_VALUE.to_string()
                } else {
                    p.value.clone()
                };
                (p.key.clone(), value)
            })
            .collect()
    }

    /// Profile-level errors (those that matched no property).
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Attach an error at profile level.
    pub fn add_error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::new(key, message));
    }

    /// Drop every error attached by a previous validation pass.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
        for property in &mut self.properties {
            property.errors.clear();
        }
    }

    /// Attach each reported error to the property with the same key, or to
    /// the profile itself when there is none.
    pub fn merge_errors(&mut self, result: &ValidationResult) {
        for error in result.errors() {
            match self.properties.iter_mut().find(|p| p.key == error.key) {
                Some(property) => property.add_error(error.message.clone()),
                None => self.errors.push(error.clone()),
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.properties.iter().any(ConfigurationProperty::has_errors)
    }

    /// Every attached message: property errors in property order, then
    /// profile-level errors in report order.
    pub fn all_errors(&self) -> Vec<String> {
        self.properties
            .iter()
            .flat_map(|p| p.errors.iter().cloned())
            .chain(self.errors.iter().map(|e| e.message.clone()))
            .collect()
    }

    /// Local checks that do not need a plugin: name format and plugin id.
    pub fn validate_structure(&mut self) {
        if !is_valid_name(&self.name) {
            let message = format!(
                "Invalid id '{}'. This must be alphanumeric and can contain underscores, hyphens and periods (however, it cannot start with a period). The maximum allowed length is {} characters.",
                self.name, MAX_NAME_LENGTH
            );
            self.add_error(NAME_KEY, message);
        }
        if self.plugin_id.trim().is_empty() {
            self.add_error(PLUGIN_ID_KEY, "Plugin id cannot be blank.");
        }
    }

    /// Digest of this profile's stored content.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, self)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

fn is_valid_name(name: &str) -> bool {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if allowed(first) => {
            name.len() <= MAX_NAME_LENGTH && chars.all(|c| allowed(c) || c == '.')
        }
        _ => false,
    }
}
