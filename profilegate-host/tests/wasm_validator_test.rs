//! Integration tests for loading and calling Wasm validators
//!
//! The modules are written in WAT and answer with fixed MessagePack payloads
//! stored in data segments.

use profilegate_host::{
    ExtensionGateway, GatewayError, LoaderError, PropertyMap, ValidatorLoader, ValidatorRegistry,
    ValidatorScanner, WasmValidator,
};

// manifest  @1024: [1, "wat", "wat", nil, nil]
// validate  @2048: [["path", "required"]]
// packed return values are (ptr << 32) | len
const WAT_VALIDATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 1024) "\95\01\a3wat\a3wat\c0\c0")
  (data (i32.const 2048) "\91\92\a4path\a8required")
  (func (export "plugin_alloc") (param i32) (result i32) i32.const 4096)
  (func (export "plugin_dealloc") (param i32 i32))
  (func (export "plugin_manifest") (result i64) i64.const 4398046511116)
  (func (export "plugin_validate") (param i32 i32) (result i64) i64.const 8796093022224)
  (func (export "plugin_verify_connection") (param i32 i32) (result i64) i64.const 8796093022224)
)
"#;

const WAT_SPINNING_VALIDATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 1024) "\95\01\a4spin\a4spin\c0\c0")
  (func (export "plugin_alloc") (param i32) (result i32) i32.const 4096)
  (func (export "plugin_dealloc") (param i32 i32))
  (func (export "plugin_manifest") (result i64) i64.const 4398046511118)
  (func (export "plugin_validate") (param i32 i32) (result i64)
    (loop $forever (br $forever))
    unreachable)
  (func (export "plugin_verify_connection") (param i32 i32) (result i64) i64.const 0)
)
"#;

// plugin_alloc traps while an earlier input buffer is still live
const WAT_TRAPPING_VALIDATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 1024) "\95\01\a4trap\a4trap\c0\c0")
  (global $live (mut i32) (i32.const 0))
  (func (export "plugin_alloc") (param i32) (result i32)
    global.get $live
    if
      unreachable
    end
    i32.const 1
    global.set $live
    i32.const 4096)
  (func (export "plugin_dealloc") (param i32 i32)
    i32.const 0
    global.set $live)
  (func (export "plugin_manifest") (result i64) i64.const 4398046511118)
  (func (export "plugin_validate") (param i32 i32) (result i64) unreachable)
  (func (export "plugin_verify_connection") (param i32 i32) (result i64) unreachable)
)
"#;

const WAT_FUTURE_API: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 1024) "\95\02\a3new\a3new\c0\c0")
  (func (export "plugin_alloc") (param i32) (result i32) i32.const 4096)
  (func (export "plugin_dealloc") (param i32 i32))
  (func (export "plugin_manifest") (result i64) i64.const 4398046511116)
)
"#;

fn props(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_load_wat_validator_manifest() {
    let loader = ValidatorLoader::new().expect("Failed to create loader");
    let loaded = loader
        .load(WAT_VALIDATOR.as_bytes())
        .expect("Failed to load validator");

    assert_eq!(loaded.manifest.plugin_id, "wat");
    assert_eq!(loaded.manifest.about, "wat");
    assert_eq!(loaded.manifest.version, None);
}

#[test]
fn test_validate_decodes_errors() {
    let loader = ValidatorLoader::new().unwrap();
    let mut loaded = loader.load(WAT_VALIDATOR.as_bytes()).unwrap();

    let result = loaded
        .instance
        .validate(&props(&[("path", "")]))
        .expect("Validation call failed");

    assert_eq!(result.len(), 1);
    assert_eq!(result.errors()[0].key, "path");
    assert_eq!(result.errors()[0].message, "required");
}

#[test]
fn test_multiple_calls_reuse_instance() {
    let loader = ValidatorLoader::new().unwrap();
    let validator = WasmValidator::new(loader.load(WAT_VALIDATOR.as_bytes()).unwrap());
    let registry = ValidatorRegistry::new();
    registry.register(validator);

    for value in ["a", "b", "c"] {
        let result = registry.validate("wat", &props(&[("path", value)])).unwrap();
        assert_eq!(result.messages(), vec!["required"]);
    }
}

#[test]
fn test_fuel_exhaustion_is_reported() {
    let loader = ValidatorLoader::with_fuel(10_000).unwrap();
    let registry = ValidatorRegistry::new();
    registry.register(WasmValidator::new(
        loader.load(WAT_SPINNING_VALIDATOR.as_bytes()).unwrap(),
    ));

    match registry.validate("spin", &PropertyMap::new()) {
        Err(GatewayError::Invocation { plugin_id, source }) => {
            assert_eq!(plugin_id, "spin");
            assert!(matches!(source, LoaderError::FuelExhausted));
        }
        other => panic!("Expected fuel exhaustion, got {:?}", other),
    }
}

#[test]
fn test_api_version_mismatch() {
    let loader = ValidatorLoader::new().unwrap();

    match loader.load(WAT_FUTURE_API.as_bytes()) {
        Err(LoaderError::ApiVersionMismatch { expected, actual }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        Err(other) => panic!("Expected ApiVersionMismatch, got {:?}", other),
        Ok(_) => panic!("Expected ApiVersionMismatch, got a validator"),
    }
}

#[test]
fn test_scanner_registers_discovered_validators() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("wat.wasm"), WAT_VALIDATOR).unwrap();

    let scanner = ValidatorScanner::new().unwrap();
    let result = scanner.scan_directory(temp.path()).unwrap();
    assert!(result.is_success());

    let registry = ValidatorRegistry::new();
    let installed = result.register_all(&registry);

    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].1.plugin_id, "wat");
    assert!(registry.has_plugin("wat"));
}

#[test]
fn test_registry_load_plugin_from_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("wat.wasm");
    std::fs::write(&path, WAT_VALIDATOR).unwrap();

    let loader = ValidatorLoader::new().unwrap();
    let registry = ValidatorRegistry::new();
    let plugin_id = registry.load_plugin(&loader, &path).unwrap();

    assert_eq!(plugin_id, "wat");
    assert_eq!(registry.plugin_ids(), vec!["wat"]);
}

#[test]
fn test_trapped_call_frees_input() {
    let loader = ValidatorLoader::new().unwrap();
    let mut loaded = loader.load(WAT_TRAPPING_VALIDATOR.as_bytes()).unwrap();
    assert_eq!(loaded.manifest.plugin_id, "trap");

    for _ in 0..3 {
        match loaded.instance.validate(&props(&[("path", "/tmp")])) {
            Err(LoaderError::FunctionCall { function, .. }) => {
                assert_eq!(function, "plugin_validate")
            }
            other => panic!("Expected a trap in plugin_validate, got {:?}", other),
        }
    }
}
