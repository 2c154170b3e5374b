//! Loading `.wasm` validators from plugin directories

use crate::loader::{LoadedValidator, LoaderError, ValidatorLoader};
use crate::registry::ValidatorRegistry;
use crate::WasmValidator;
use profilegate_api::ValidatorManifest;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to list {dir}: {source}")]
    ListDirectory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load validator {path}: {source}")]
    LoadValidator {
        path: PathBuf,
        #[source]
        source: LoaderError,
    },
}

/// What a scan found: loaded validators and the paths that could not be used
#[derive(Default)]
pub struct DiscoveryResult {
    pub validators: Vec<(PathBuf, LoadedValidator)>,
    pub failures: Vec<(PathBuf, DiscoveryError)>,
}

impl DiscoveryResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, other: DiscoveryResult) {
        self.validators.extend(other.validators);
        self.failures.extend(other.failures);
    }

    /// Install every loaded validator, returning the manifests in scan order
    ///
    /// A later validator with the same plugin id replaces an earlier one.
    pub fn register_all(self, registry: &ValidatorRegistry) -> Vec<(PathBuf, ValidatorManifest)> {
        self.validators
            .into_iter()
            .map(|(path, loaded)| {
                let manifest = loaded.manifest.clone();
                registry.register(WasmValidator::new(loaded));
                tracing::info!(plugin_id = %manifest.plugin_id, path = %path.display(), "Validator discovered");
                (path, manifest)
            })
            .collect()
    }
}

/// Scans plugin directories with a shared loader
pub struct ValidatorScanner {
    loader: ValidatorLoader,
}

impl ValidatorScanner {
    pub fn new() -> Result<Self, LoaderError> {
        Ok(Self::with_loader(ValidatorLoader::new()?))
    }

    pub fn with_loader(loader: ValidatorLoader) -> Self {
        Self { loader }
    }

    /// Load every `.wasm` file directly inside `dir`, in file name order
    ///
    /// Files that fail to read or load are collected as failures; only an
    /// unusable `dir` is an error.
    pub fn scan_directory(&self, dir: impl AsRef<Path>) -> Result<DiscoveryResult, DiscoveryError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DiscoveryError::NotADirectory(dir.to_path_buf()));
        }
        let list_error = |source: std::io::Error| DiscoveryError::ListDirectory {
            dir: dir.to_path_buf(),
            source,
        };

        let mut result = DiscoveryResult::default();
        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(list_error)? {
            match entry {
                Ok(entry) if is_wasm(&entry.path()) => candidates.push(entry.path()),
                Ok(_) => {}
                Err(source) => result.failures.push((dir.to_path_buf(), list_error(source))),
            }
        }
        candidates.sort();

        for path in candidates {
            match self.load(&path) {
                Ok(loaded) => result.validators.push((path, loaded)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping validator");
                    result.failures.push((path, e));
                }
            }
        }
        Ok(result)
    }

    /// Scan each directory in turn; an unusable directory becomes a failure
    pub fn scan_directories(
        &self,
        dirs: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> DiscoveryResult {
        let mut all = DiscoveryResult::default();
        for dir in dirs {
            match self.scan_directory(&dir) {
                Ok(found) => all.absorb(found),
                Err(e) => all.failures.push((dir.as_ref().to_path_buf(), e)),
            }
        }
        all
    }

    fn load(&self, path: &Path) -> Result<LoadedValidator, DiscoveryError> {
        let bytes = std::fs::read(path).map_err(|source| DiscoveryError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.loader
            .load(&bytes)
            .map_err(|source| DiscoveryError::LoadValidator {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn is_wasm(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "wasm")
}

/// Per-user data directory for `app_name`, then `./plugins`
pub fn default_plugin_dirs(app_name: &str) -> Vec<PathBuf> {
    dirs::data_local_dir()
        .map(|data| data.join(app_name).join("plugins"))
        .into_iter()
        .chain(std::iter::once(PathBuf::from("plugins")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_empty_directory() {
        let temp = TempDir::new().unwrap();
        let scanner = ValidatorScanner::new().unwrap();

        let result = scanner.scan_directory(temp.path()).unwrap();
        assert!(result.validators.is_empty());
        assert!(result.is_success());
    }

    #[test]
    fn test_scan_rejects_missing_directory() {
        let scanner = ValidatorScanner::new().unwrap();

        assert!(matches!(
            scanner.scan_directory("/nonexistent/path/to/plugins"),
            Err(DiscoveryError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_scan_only_considers_wasm_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("readme.txt"), "Hello").unwrap();
        fs::write(temp.path().join("settings.json"), "{}").unwrap();
        fs::create_dir(temp.path().join("nested.wasm")).unwrap();

        let scanner = ValidatorScanner::new().unwrap();
        let result = scanner.scan_directory(temp.path()).unwrap();

        assert!(result.validators.is_empty());
        assert!(result.is_success());
    }

    #[test]
    fn test_scan_collects_broken_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("broken.wasm"), b"\0asm garbage").unwrap();

        let scanner = ValidatorScanner::new().unwrap();
        let result = scanner.scan_directory(temp.path()).unwrap();

        assert!(!result.is_success());
        assert!(result.failures[0].0.ends_with("broken.wasm"));
        assert!(matches!(
            result.failures[0].1,
            DiscoveryError::LoadValidator { .. }
        ));
    }

    #[test]
    fn test_scan_directories_reports_missing_dir() {
        let temp = TempDir::new().unwrap();
        let scanner = ValidatorScanner::new().unwrap();

        let result = scanner.scan_directories([temp.path().to_path_buf(), PathBuf::from("/nope")]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].0, PathBuf::from("/nope"));
    }

    #[test]
    fn test_default_plugin_dirs_end_with_local_dir() {
        let dirs = default_plugin_dirs("profilegate");
        assert_eq!(dirs.last(), Some(&PathBuf::from("plugins")));
    }
}
