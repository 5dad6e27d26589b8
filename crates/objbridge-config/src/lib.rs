//! objbridge configuration
//!
//! Decides where the bridge finds the foreign runtime and how it opens it:
//! - Runtime library (`libobjc`) path and binding mode
//! - System library path, binding mode and closure marker symbol
//! - Framework search root and binding mode
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config (~/.objbridge/config.toml)
//! 3. Project config (./objbridge.toml, searched upwards)
//! 4. Environment variables (OBJBRIDGE_*)
//!
//! # Example
//!
//! ```no_run
//! use objbridge_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("runtime at {}", config.objc_library.display());
//! ```

pub mod file;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use file::{BridgeFile, FrameworksSection, OpenMode, RuntimeSection};
pub use loader::{BridgeConfig, ConfigLoader};
