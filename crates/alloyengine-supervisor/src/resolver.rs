//! Engine binary discovery

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SupervisorError};

/// Environment variable naming the engine binary explicitly
pub const BINARY_ENV_VAR: &str = "ALLOY_BINARY";

/// Default engine binary name, without platform suffix
pub const DEFAULT_BINARY_NAME: &str = "alloy";

/// Locates the engine binary
pub trait BinaryResolver: Send + Sync {
    /// Return the binary path or a configuration error listing what was tried
    fn resolve(&self) -> Result<PathBuf>;
}

/// Search order: `$ALLOY_BINARY`, `<exe dir>/../build/alloy`, then `$PATH`
#[derive(Debug, Clone)]
pub struct DefaultResolver {
    binary_name: String,
}

impl DefaultResolver {
    /// Resolver for the default `alloy` binary
    pub fn new() -> Self {
        Self::with_binary_name(DEFAULT_BINARY_NAME)
    }

    /// Resolver for a differently named engine binary
    pub fn with_binary_name(name: impl Into<String>) -> Self {
        Self {
            binary_name: name.into(),
        }
    }

    fn file_name(&self) -> String {
        format!("{}{}", self.binary_name, env::consts::EXE_SUFFIX)
    }
}

impl Default for DefaultResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryResolver for DefaultResolver {
    fn resolve(&self) -> Result<PathBuf> {
        let mut tried = Vec::new();

        if let Some(path) = env::var_os(BINARY_ENV_VAR).filter(|v| !v.is_empty()) {
            let path = PathBuf::from(path);
            if path.is_file() {
                debug!(path = %path.display(), "Resolved engine binary from {}", BINARY_ENV_VAR);
                return Ok(path);
            }
            tried.push(path.display().to_string());
        }

        let exe = env::current_exe().map_err(|e| {
            SupervisorError::Configuration(format!("failed to get executable path: {e}"))
        })?;
        if let Some(root) = exe.parent().and_then(Path::parent) {
            let build_path = root.join("build").join(self.file_name());
            if build_path.is_file() {
                debug!(path = %build_path.display(), "Resolved engine binary from build directory");
                return Ok(build_path);
            }
            tried.push(build_path.display().to_string());
        }

        match which::which(&self.binary_name) {
            Ok(path) => {
                debug!(path = %path.display(), "Resolved engine binary from PATH");
                Ok(path)
            }
            Err(_) => {
                tried.push(format!("$PATH/{}", self.file_name()));
                Err(SupervisorError::Configuration(format!(
                    "{} binary not found. Tried: {}. Set {} to specify the path",
                    self.binary_name,
                    tried.join(", "),
                    BINARY_ENV_VAR
                )))
            }
        }
    }
}

/// Fixed engine path, checked for existence on resolve
#[derive(Debug, Clone)]
pub struct StaticResolver {
    path: PathBuf,
}

impl StaticResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BinaryResolver for StaticResolver {
    fn resolve(&self) -> Result<PathBuf> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(SupervisorError::Configuration(format!(
                "engine binary not found at {}",
                self.path.display()
            )))
        }
    }
}
