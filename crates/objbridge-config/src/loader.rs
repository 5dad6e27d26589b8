//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::file::{BridgeFile, OpenMode};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_FILE: &str = "objbridge.toml";

const DEFAULT_OBJC_LIBRARY: &str = "/usr/lib/libobjc.A.dylib";
const DEFAULT_SYSTEM_LIBRARY: &str = "/usr/lib/libSystem.B.dylib";
const DEFAULT_FRAMEWORK_ROOT: &str = "/System/Library/Frameworks";
const DEFAULT_BLOCK_MARKER: &str = "_NSConcreteMallocBlock";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Built-in defaults - lowest priority
/// 2. Global config (~/.objbridge/config.toml)
/// 3. Project config (./objbridge.toml) - overrides global
/// 4. Environment variables (OBJBRIDGE_*) - highest priority
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Fully resolved bridge configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub objc_library: PathBuf,
    pub objc_mode: OpenMode,
    pub system_library: PathBuf,
    pub system_mode: OpenMode,
    /// Data symbol in the system library tagging heap closures
    pub block_marker_symbol: String,
    pub framework_root: PathBuf,
    pub framework_mode: OpenMode,
    /// Project file the configuration came from, if any
    pub project_file: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            objc_library: PathBuf::from(DEFAULT_OBJC_LIBRARY),
            objc_mode: OpenMode::Now,
            system_library: PathBuf::from(DEFAULT_SYSTEM_LIBRARY),
            system_mode: OpenMode::Lazy,
            block_marker_symbol: DEFAULT_BLOCK_MARKER.to_string(),
            framework_root: PathBuf::from(DEFAULT_FRAMEWORK_ROOT),
            framework_mode: OpenMode::Lazy,
            project_file: None,
        }
    }
}

impl BridgeConfig {
    /// Apply a parsed file on top of this configuration
    pub fn apply(&mut self, file: &BridgeFile) {
        if let Some(runtime) = &file.runtime {
            if let Some(path) = &runtime.objc_library {
                self.objc_library = path.clone();
            }
            if let Some(mode) = runtime.objc_mode {
                self.objc_mode = mode;
            }
            if let Some(path) = &runtime.system_library {
                self.system_library = path.clone();
            }
            if let Some(mode) = runtime.system_mode {
                self.system_mode = mode;
            }
            if let Some(symbol) = &runtime.block_marker_symbol {
                self.block_marker_symbol = symbol.clone();
            }
        }
        if let Some(frameworks) = &file.frameworks {
            if let Some(root) = &frameworks.root {
                self.framework_root = root.clone();
            }
            if let Some(mode) = frameworks.mode {
                self.framework_mode = mode;
            }
        }
    }

    /// Conventional location of a framework binary:
    /// `<root>/<Name>.framework/<Name>`
    pub fn framework_path(&self, name: &str) -> PathBuf {
        self.framework_root
            .join(format!("{}.framework", name))
            .join(name)
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find objbridge.toml, merges it over the
    /// global config if one exists, then applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<BridgeConfig> {
        let (project_file, project) = self.find_project_config(start_dir)?;
        let mut merged = self.load_global_config().unwrap_or_default();
        merged.merge(&project);

        let mut config = BridgeConfig::default();
        config.apply(&merged);
        config.project_file = project_file;
        self.apply_env_overrides(config)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<BridgeConfig> {
        let project = BridgeFile::load_from_file(config_path)?;
        let mut merged = self.load_global_config().unwrap_or_default();
        merged.merge(&project);

        let mut config = BridgeConfig::default();
        config.apply(&merged);
        config.project_file = Some(config_path.to_path_buf());
        self.apply_env_overrides(config)
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(&self, start_dir: &Path) -> ConfigResult<(Option<PathBuf>, BridgeFile)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let file = BridgeFile::load_from_file(&config_path)?;
                return Ok((Some(config_path), file));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, BridgeFile::default())),
            }
        }
    }

    /// Load global configuration from ~/.objbridge/config.toml
    fn load_global_config(&mut self) -> ConfigResult<BridgeFile> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = Self::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(BridgeFile::default());
        }

        BridgeFile::load_from_file(&path)
    }

    /// Apply environment variable overrides
    ///
    /// Recognized: OBJBRIDGE_OBJC_LIBRARY, OBJBRIDGE_SYSTEM_LIBRARY,
    /// OBJBRIDGE_FRAMEWORK_ROOT, OBJBRIDGE_FRAMEWORK_MODE
    fn apply_env_overrides(&self, mut config: BridgeConfig) -> ConfigResult<BridgeConfig> {
        if let Some(path) = env_path("OBJBRIDGE_OBJC_LIBRARY")? {
            config.objc_library = path;
        }
        if let Some(path) = env_path("OBJBRIDGE_SYSTEM_LIBRARY")? {
            config.system_library = path;
        }
        if let Some(path) = env_path("OBJBRIDGE_FRAMEWORK_ROOT")? {
            config.framework_root = path;
        }
        if let Ok(mode) = env::var("OBJBRIDGE_FRAMEWORK_MODE") {
            config.framework_mode = mode.parse().map_err(|_| ConfigError::InvalidValue {
                field: "OBJBRIDGE_FRAMEWORK_MODE".to_string(),
                reason: format!("must be 'lazy' or 'now', got '{}'", mode),
            })?;
        }
        Ok(config)
    }

    /// Get the global config file path (~/.objbridge/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".objbridge").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_path(var: &str) -> ConfigResult<Option<PathBuf>> {
    match env::var_os(var) {
        Some(value) if value.is_empty() => Err(ConfigError::InvalidValue {
            field: var.to_string(),
            reason: "path must not be empty".to_string(),
        }),
        Some(value) => Ok(Some(PathBuf::from(value))),
        None => Ok(None),
    }
}
