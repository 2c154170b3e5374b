//! The configuration document and its shared store
//!
//! [`ConfigDocument`] holds one ordered profile collection per
//! [`ProfileKind`] next to unrelated configuration that mutations must
//! leave untouched. [`ConfigStore`] wraps a document in a lock so a
//! command's check runs under a read guard and its mutation under one
//! write guard.

use crate::command::{CommandError, ProfileCommand};
use crate::profile::{Profile, ProfileKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by direct document edits
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{kind} with id '{name}' was not found!")]
    NotFound { kind: ProfileKind, name: String },

    #[error("{kind} with id '{name}' already exists.")]
    Duplicate { kind: ProfileKind, name: String },

    #[error("Failed to serialize configuration: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Digest of a document's serialized state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The persisted configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    profiles: BTreeMap<ProfileKind, Vec<Profile>>,
    /// Everything else the document carries
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    other: serde_json::Map<String, serde_json::Value>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Profiles of one kind, in document order
    pub fn profiles(&self, kind: ProfileKind) -> &[Profile] {
        self.profiles.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, kind: ProfileKind, name: &str) -> Option<&Profile> {
        self.profiles(kind).iter().find(|p| p.name() == name)
    }

    pub fn contains(&self, kind: ProfileKind, name: &str) -> bool {
        self.find(kind, name).is_some()
    }

    /// Append a profile; names are unique within a kind
    pub fn insert(&mut self, kind: ProfileKind, profile: Profile) -> Result<(), DocumentError> {
        if self.contains(kind, profile.name()) {
            return Err(DocumentError::Duplicate {
                kind,
                name: profile.name().to_string(),
            });
        }
        self.profiles.entry(kind).or_default().push(profile);
        Ok(())
    }

    /// Replace the profile called `name` in place, returning the old one
    pub fn replace(
        &mut self,
        kind: ProfileKind,
        name: &str,
        profile: Profile,
    ) -> Result<Profile, DocumentError> {
        if profile.name() != name && self.contains(kind, profile.name()) {
            return Err(DocumentError::Duplicate {
                kind,
                name: profile.name().to_string(),
            });
        }
        let slot = self
            .profiles
            .get_mut(&kind)
            .and_then(|profiles| profiles.iter_mut().find(|p| p.name() == name))
            .ok_or_else(|| not_found(kind, name))?;
        Ok(std::mem::replace(slot, profile))
    }

    pub fn remove(&mut self, kind: ProfileKind, name: &str) -> Result<Profile, DocumentError> {
        let profiles = self
            .profiles
            .get_mut(&kind)
            .ok_or_else(|| not_found(kind, name))?;
        let index = profiles
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| not_found(kind, name))?;
        Ok(profiles.remove(index))
    }

    pub fn other(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.other
    }

    pub fn set_other(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.other.insert(key.into(), value);
    }

    /// Digest of the full serialized document
    ///
    /// Transient validation errors are not part of the serialized form, so
    /// validating a profile never changes the fingerprint.
    pub fn fingerprint(&self) -> Result<Fingerprint, DocumentError> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, self)?;
        Ok(Fingerprint(hasher.finalize().to_hex().to_string()))
    }
}

fn not_found(kind: ProfileKind, name: &str) -> DocumentError {
    DocumentError::NotFound {
        kind,
        name: name.to_string(),
    }
}

/// A shared, lock-protected configuration document
#[derive(Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<ConfigDocument>>,
}

impl ConfigStore {
    pub fn new(document: ConfigDocument) -> Self {
        Self {
            inner: Arc::new(RwLock::new(document)),
        }
    }

    /// Clone of the current document
    pub fn snapshot(&self) -> ConfigDocument {
        self.read(ConfigDocument::clone)
    }

    pub fn fingerprint(&self) -> Result<Fingerprint, DocumentError> {
        self.read(ConfigDocument::fingerprint)
    }

    /// Run `f` against the document under a read guard
    pub fn read<R>(&self, f: impl FnOnce(&ConfigDocument) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Check and apply a command
    ///
    /// Returns `Ok(false)` when the command was rejected by validation. The
    /// write guard is only taken for commands that passed their check; the
    /// mutation itself runs entirely under it.
    pub fn execute(&self, command: &mut ProfileCommand) -> Result<bool, CommandError> {
        let valid = {
            let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            command.is_valid(&guard)?
        };
        if !valid {
            command.reject()?;
            return Ok(false);
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        command.update(&mut guard)?;
        Ok(true)
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|doc| {
            f.debug_struct("ConfigStore")
                .field("profiles", &doc.profiles.values().map(Vec::len).sum::<usize>())
                .finish()
        })
    }
}
