//! profilegate-sdk: SDK for writing Wasm validator plugins
//!
//! A validator decides whether a profile's properties are acceptable and,
//! optionally, whether they can reach the service they describe.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use profilegate_sdk::prelude::*;
//!
//! struct LdapValidator;
//!
//! impl Validator for LdapValidator {
//!     fn manifest() -> ValidatorManifest {
//!         ValidatorManifest::new("cd.go.ldap", "LDAP authorization").version("1.0.0")
//!     }
//!
//!     fn validate(properties: PropertyMap) -> ValidationResult {
//!         require(&properties, &["Url", "SearchBases"])
//!     }
//! }
//!
//! export_validator!(LdapValidator);
//! ```

use std::alloc::{alloc, dealloc, Layout};

// Re-export everything from profilegate-api
pub use profilegate_api::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{export_validator, memory, require, Validator};
    pub use profilegate_api::{
        ConnectionStatus, PropertyMap, ValidationError, ValidationResult, ValidatorManifest,
        VerifyConnectionResponse, API_VERSION,
    };
}

/// Trait that validator plugins implement
pub trait Validator {
    /// Returns the manifest naming the plugin id this validator answers for
    fn manifest() -> ValidatorManifest;

    /// Checks the flattened properties of a profile
    fn validate(properties: PropertyMap) -> ValidationResult;

    /// Checks connectivity using the given properties
    ///
    /// Validators that cannot check connectivity keep the default, which
    /// validates first and reports a failure otherwise.
    fn verify_connection(properties: PropertyMap) -> VerifyConnectionResponse {
        let result = Self::validate(properties);
        if result.is_successful() {
            VerifyConnectionResponse::failure("Connection check is not supported by this plugin")
        } else {
            VerifyConnectionResponse::validation_failed("Validation failed", result)
        }
    }
}

/// Reports `"<key> must not be blank"` for every listed key that is missing
/// or empty.
pub fn require(properties: &PropertyMap, keys: &[&str]) -> ValidationResult {
    keys.iter()
        .filter(|key| {
            properties
                .get(**key)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .map(|key| ValidationError::new(*key, format!("{} must not be blank", key)))
        .collect()
}

/// Memory utilities for Wasm plugin development
pub mod memory {
    use super::*;

    /// Allocate memory in the Wasm linear memory
    #[inline]
    pub fn plugin_alloc(size: i32) -> i32 {
        if size <= 0 {
            return 0;
        }
        match Layout::from_size_align(size as usize, 1) {
            Ok(layout) => unsafe { alloc(layout) as i32 },
            Err(_) => 0,
        }
    }

    /// Deallocate memory in the Wasm linear memory
    ///
    /// # Safety
    /// The ptr must have been allocated by `plugin_alloc` with the same size.
    #[inline]
    pub fn plugin_dealloc(ptr: i32, size: i32) {
        if ptr == 0 || size <= 0 {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(size as usize, 1) {
            unsafe { dealloc(ptr as *mut u8, layout) }
        }
    }

    /// Pack a pointer and length into a single i64 value
    ///
    /// wasm32-unknown-unknown has no multi-value returns, so the host
    /// unpacks `(ptr << 32) | len`.
    #[inline]
    pub fn pack_ptr_len(ptr: i32, len: i32) -> i64 {
        ((ptr as i64) << 32) | (len as i64 & 0xFFFFFFFF)
    }

    /// Serialize data and return it as an allocated buffer
    pub fn serialize_and_return<T: serde::Serialize>(data: &T) -> i64 {
        let bytes = rmp_serde::to_vec(data).unwrap_or_default();
        let len = bytes.len() as i32;
        let ptr = plugin_alloc(len);

        if ptr != 0 && len > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, len as usize);
            }
        }

        pack_ptr_len(ptr, len)
    }

    /// Deserialize data from a raw pointer and length
    ///
    /// # Safety
    /// The pointer must be valid and point to `len` bytes of valid MessagePack data.
    pub unsafe fn deserialize_from_ptr<T: serde::de::DeserializeOwned>(
        ptr: i32,
        len: i32,
    ) -> Option<T> {
        if ptr == 0 || len <= 0 {
            return None;
        }
        let slice = std::slice::from_raw_parts(ptr as *const u8, len as usize);
        rmp_serde::from_slice(slice).ok()
    }
}

/// Macro to export all functions the host expects from a validator
///
/// Generates `plugin_manifest`, `plugin_validate`, `plugin_verify_connection`,
/// `plugin_alloc` and `plugin_dealloc`.
#[macro_export]
macro_rules! export_validator {
    ($validator:ty) => {
        #[no_mangle]
        pub extern "C" fn plugin_manifest() -> i64 {
            let manifest = <$validator as $crate::Validator>::manifest();
            $crate::memory::serialize_and_return(&manifest)
        }

        #[no_mangle]
        pub extern "C" fn plugin_validate(props_ptr: i32, props_len: i32) -> i64 {
            let properties: $crate::PropertyMap = unsafe {
                $crate::memory::deserialize_from_ptr(props_ptr, props_len).unwrap_or_default()
            };
            let result = <$validator as $crate::Validator>::validate(properties);
            $crate::memory::serialize_and_return(&result)
        }

        #[no_mangle]
        pub extern "C" fn plugin_verify_connection(props_ptr: i32, props_len: i32) -> i64 {
            let properties: $crate::PropertyMap = unsafe {
                $crate::memory::deserialize_from_ptr(props_ptr, props_len).unwrap_or_default()
            };
            let response = <$validator as $crate::Validator>::verify_connection(properties);
            $crate::memory::serialize_and_return(&response)
        }

        #[no_mangle]
        pub extern "C" fn plugin_alloc(size: i32) -> i32 {
            $crate::memory::plugin_alloc(size)
        }

        #[no_mangle]
        pub extern "C" fn plugin_dealloc(ptr: i32, size: i32) {
            $crate::memory::plugin_dealloc(ptr, size)
        }
    };
}
