//! Validator loader using wasmtime
//!
//! Loads Wasm validator plugins and runs them with a fuel budget.

use crate::gateway::{GatewayError, ProfileValidator};
use profilegate_api::{
    PropertyMap, ValidationResult, ValidatorManifest, VerifyConnectionResponse, API_VERSION,
};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use wasmtime::*;

/// Fuel granted to every guest call
pub const DEFAULT_FUEL: u64 = 10_000_000;

/// Errors that can occur while loading or calling a validator
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Engine creation failed: {0}")]
    EngineCreation(#[source] anyhow::Error),

    #[error("Module compilation failed: {0}")]
    ModuleCompilation(#[source] anyhow::Error),

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function call failed: {function} - {source}")]
    FunctionCall {
        function: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("API version mismatch: expected {expected}, got {actual}")]
    ApiVersionMismatch { expected: u32, actual: u32 },

    #[error("Serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    #[error("Memory access error: {0}")]
    MemoryAccess(String),

    #[error("Fuel exhausted (CPU limit exceeded)")]
    FuelExhausted,
}

/// Validator loader with a wasmtime engine
pub struct ValidatorLoader {
    engine: Engine,
    fuel: u64,
}

/// A loaded validator ready for calls
pub struct LoadedValidator {
    pub manifest: ValidatorManifest,

    pub instance: ValidatorInstance,
}

/// Validator instance bound to its own store
pub struct ValidatorInstance {
    store: Store<()>,
    instance: Instance,
    memory: Memory,
    alloc_fn: TypedFunc<i32, i32>,
    dealloc_fn: TypedFunc<(i32, i32), ()>,
    fuel: u64,
}

/// Unpack ptr and len from a packed i64
#[inline]
fn unpack_ptr_len(packed: i64) -> (i32, i32) {
    let ptr = (packed >> 32) as i32;
    let len = (packed & 0xFFFFFFFF) as i32;
    (ptr, len)
}

fn call_error(function: &'static str, error: anyhow::Error) -> LoaderError {
    if matches!(error.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        LoaderError::FuelExhausted
    } else {
        LoaderError::FunctionCall {
            function,
            source: error,
        }
    }
}

impl ValidatorLoader {
    /// Create a new loader with the default fuel budget
    pub fn new() -> Result<Self, LoaderError> {
        Self::with_fuel(DEFAULT_FUEL)
    }

    /// Create a loader granting `fuel` units to each guest call
    pub fn with_fuel(fuel: u64) -> Result<Self, LoaderError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.wasm_memory64(false);

        let engine = Engine::new(&config).map_err(LoaderError::EngineCreation)?;

        Ok(Self { engine, fuel })
    }

    /// Load a validator from Wasm bytes (or WAT text)
    pub fn load(&self, wasm_bytes: &[u8]) -> Result<LoadedValidator, LoaderError> {
        let module =
            Module::new(&self.engine, wasm_bytes).map_err(LoaderError::ModuleCompilation)?;

        let mut store = Store::new(&self.engine, ());
        store
            .set_fuel(self.fuel)
            .map_err(LoaderError::EngineCreation)?;

        // No host imports: validators are pure functions of their input
        let linker = Linker::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(LoaderError::Instantiation)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| LoaderError::FunctionNotFound("memory".to_string()))?;

        let alloc_fn = instance
            .get_typed_func::<i32, i32>(&mut store, "plugin_alloc")
            .map_err(|_| LoaderError::FunctionNotFound("plugin_alloc".to_string()))?;

        let dealloc_fn = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, "plugin_dealloc")
            .map_err(|_| LoaderError::FunctionNotFound("plugin_dealloc".to_string()))?;

        let manifest_fn = instance
            .get_typed_func::<(), i64>(&mut store, "plugin_manifest")
            .map_err(|_| LoaderError::FunctionNotFound("plugin_manifest".to_string()))?;

        let packed = manifest_fn
            .call(&mut store, ())
            .map_err(|e| call_error("plugin_manifest", e))?;
        let (ptr, len) = unpack_ptr_len(packed);

        let manifest_bytes = read_memory(&store, &memory, ptr, len)?;
        let manifest: ValidatorManifest =
            rmp_serde::from_slice(&manifest_bytes).map_err(LoaderError::Deserialization)?;

        if manifest.api_version != API_VERSION {
            return Err(LoaderError::ApiVersionMismatch {
                expected: API_VERSION,
                actual: manifest.api_version,
            });
        }

        dealloc_fn
            .call(&mut store, (ptr, len))
            .map_err(|e| call_error("plugin_dealloc", e))?;

        tracing::debug!(plugin_id = %manifest.plugin_id, "Validator module loaded");

        Ok(LoadedValidator {
            manifest,
            instance: ValidatorInstance {
                store,
                instance,
                memory,
                alloc_fn,
                dealloc_fn,
                fuel: self.fuel,
            },
        })
    }
}

fn read_memory(
    store: &Store<()>,
    memory: &Memory,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, LoaderError> {
    let data = memory.data(store);
    let (ptr, len) = (ptr as u32 as usize, len as u32 as usize);
    match ptr.checked_add(len) {
        Some(end) if end <= data.len() => Ok(data[ptr..end].to_vec()),
        _ => Err(LoaderError::MemoryAccess(format!(
            "Out of bounds: ptr={}, len={}, memory_size={}",
            ptr,
            len,
            data.len()
        ))),
    }
}

impl ValidatorInstance {
    /// Run `plugin_validate` over the flattened properties
    pub fn validate(&mut self, properties: &PropertyMap) -> Result<ValidationResult, LoaderError> {
        self.call("plugin_validate", properties)
    }

    /// Run `plugin_verify_connection` over the flattened properties
    pub fn verify_connection(
        &mut self,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, LoaderError> {
        self.call("plugin_verify_connection", properties)
    }

    fn call<T: DeserializeOwned>(
        &mut self,
        function: &'static str,
        properties: &PropertyMap,
    ) -> Result<T, LoaderError> {
        let input = rmp_serde::to_vec(properties).map_err(LoaderError::Serialization)?;
        let input_len = i32::try_from(input.len()).map_err(|_| {
            LoaderError::MemoryAccess(format!("Input of {} bytes exceeds guest memory", input.len()))
        })?;

        // Each call gets a fresh budget
        self.store
            .set_fuel(self.fuel)
            .map_err(LoaderError::EngineCreation)?;

        let input_ptr = self
            .alloc_fn
            .call(&mut self.store, input_len)
            .map_err(|e| call_error("plugin_alloc", e))?;

        let packed = self.invoke(function, input_ptr, input_len, &input);
        self.free(input_ptr, input_len);
        let (output_ptr, output_len) = unpack_ptr_len(packed?);

        let output = read_memory(&self.store, &self.memory, output_ptr, output_len)?;
        self.free(output_ptr, output_len);
        rmp_serde::from_slice(&output).map_err(LoaderError::Deserialization)
    }

    fn invoke(
        &mut self,
        function: &'static str,
        input_ptr: i32,
        input_len: i32,
        input: &[u8],
    ) -> Result<i64, LoaderError> {
        self.memory
            .write(&mut self.store, input_ptr as u32 as usize, input)
            .map_err(|e| LoaderError::MemoryAccess(format!("Failed to write input: {}", e)))?;

        let func = self
            .instance
            .get_typed_func::<(i32, i32), i64>(&mut self.store, function)
            .map_err(|_| LoaderError::FunctionNotFound(function.to_string()))?;

        func.call(&mut self.store, (input_ptr, input_len))
            .map_err(|e| call_error(function, e))
    }

    fn free(&mut self, ptr: i32, len: i32) {
        // a trapped call may have used up the budget
        if let Err(e) = self.store.set_fuel(self.fuel) {
            tracing::warn!(error = %e, "Failed to refuel validator store");
        }
        if let Err(e) = self.dealloc_fn.call(&mut self.store, (ptr, len)) {
            tracing::warn!(error = %e, "plugin_dealloc failed");
        }
    }
}

/// [`ProfileValidator`] backed by a Wasm instance
///
/// Guest calls need `&mut` access to the store, so calls are serialized
/// through a mutex.
pub struct WasmValidator {
    manifest: ValidatorManifest,
    instance: Mutex<ValidatorInstance>,
}

impl WasmValidator {
    pub fn new(loaded: LoadedValidator) -> Self {
        Self {
            manifest: loaded.manifest,
            instance: Mutex::new(loaded.instance),
        }
    }

    fn invocation(&self, source: LoaderError) -> GatewayError {
        GatewayError::Invocation {
            plugin_id: self.manifest.plugin_id.clone(),
            source,
        }
    }
}

impl From<LoadedValidator> for WasmValidator {
    fn from(loaded: LoadedValidator) -> Self {
        Self::new(loaded)
    }
}

impl ProfileValidator for WasmValidator {
    fn manifest(&self) -> &ValidatorManifest {
        &self.manifest
    }

    fn validate(&self, properties: &PropertyMap) -> Result<ValidationResult, GatewayError> {
        let mut instance = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        instance
            .validate(properties)
            .map_err(|e| self.invocation(e))
    }

    fn verify_connection(
        &self,
        properties: &PropertyMap,
    ) -> Result<VerifyConnectionResponse, GatewayError> {
        let mut instance = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        instance
            .verify_connection(properties)
            .map_err(|e| self.invocation(e))
    }
}

impl std::fmt::Debug for WasmValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmValidator")
            .field("plugin_id", &self.manifest.plugin_id)
            .finish_non_exhaustive()
    }
}
