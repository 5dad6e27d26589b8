//! Configuration file schema (objbridge.toml / ~/.objbridge/config.toml)
//!
//! Every field is optional so a file only has to mention what it overrides.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Symbol binding mode used when opening a dynamic library.
///
/// Mirrors the dynamic linker's lazy and immediate binding modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Resolve function symbols on first use
    #[default]
    Lazy,
    /// Resolve every symbol before `open` returns
    Now,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Lazy => "lazy",
            OpenMode::Now => "now",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lazy" => Ok(OpenMode::Lazy),
            "now" => Ok(OpenMode::Now),
            other => Err(ConfigError::InvalidValue {
                field: "mode".to_string(),
                reason: format!("must be 'lazy' or 'now', got '{}'", other),
            }),
        }
    }
}

/// Parsed configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeFile {
    /// Runtime and system library settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeSection>,

    /// Framework lookup settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frameworks: Option<FrameworksSection>,
}

/// `[runtime]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    /// Path of the object runtime library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objc_library: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub objc_mode: Option<OpenMode>,

    /// Path of the system library exporting the closure marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_library: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_mode: Option<OpenMode>,

    /// Data symbol whose address tags heap closures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_marker_symbol: Option<String>,
}

/// `[frameworks]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FrameworksSection {
    /// Directory containing `<Name>.framework` bundles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<OpenMode>,
}

impl BridgeFile {
    /// Load a configuration file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let file = Self::parse(&content).map_err(|e| match e {
            ConfigError::TomlParseError { error, .. } => ConfigError::TomlParseError {
                file: path.to_path_buf(),
                error,
            },
            other => other,
        })?;
        Ok(file)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let file: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: PathBuf::new(),
            error: e,
        })?;

        file.validate()?;
        Ok(file)
    }

    /// Reject values that can never open a library
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(runtime) = &self.runtime {
            validate_path("runtime.objc_library", runtime.objc_library.as_deref())?;
            validate_path("runtime.system_library", runtime.system_library.as_deref())?;
            if let Some(symbol) = &runtime.block_marker_symbol {
                if symbol.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "runtime.block_marker_symbol".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
        }
        if let Some(frameworks) = &self.frameworks {
            validate_path("frameworks.root", frameworks.root.as_deref())?;
        }
        Ok(())
    }

    /// Merge another file into this one
    /// Other file takes precedence for non-None values
    pub fn merge(&mut self, other: &BridgeFile) {
        if let Some(theirs) = &other.runtime {
            let ours = self.runtime.get_or_insert_with(Default::default);
            merge_opt(&mut ours.objc_library, &theirs.objc_library);
            merge_opt(&mut ours.objc_mode, &theirs.objc_mode);
            merge_opt(&mut ours.system_library, &theirs.system_library);
            merge_opt(&mut ours.system_mode, &theirs.system_mode);
            merge_opt(&mut ours.block_marker_symbol, &theirs.block_marker_symbol);
        }
        if let Some(theirs) = &other.frameworks {
            let ours = self.frameworks.get_or_insert_with(Default::default);
            merge_opt(&mut ours.root, &theirs.root);
            merge_opt(&mut ours.mode, &theirs.mode);
        }
    }
}

fn merge_opt<T: Clone>(ours: &mut Option<T>, theirs: &Option<T>) {
    if theirs.is_some() {
        ours.clone_from(theirs);
    }
}

fn validate_path(field: &str, path: Option<&Path>) -> ConfigResult<()> {
    match path {
        Some(p) if p.as_os_str().is_empty() => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "path must not be empty".to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_file() {
        let file = BridgeFile::parse("").unwrap();
        assert_eq!(file, BridgeFile::default());
    }

    #[test]
    fn test_parse_runtime_section() {
        let toml = r#"
[runtime]
objc_library = "/opt/objc/libobjc.so"
objc_mode = "now"
system_mode = "lazy"
"#;
        let file = BridgeFile::parse(toml).unwrap();
        let runtime = file.runtime.unwrap();
        assert_eq!(
            runtime.objc_library,
            Some(PathBuf::from("/opt/objc/libobjc.so"))
        );
        assert_eq!(runtime.objc_mode, Some(OpenMode::Now));
        assert_eq!(runtime.system_mode, Some(OpenMode::Lazy));
        assert!(runtime.system_library.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[runtime]
objc_libary = "/typo"
"#;
        assert!(matches!(
            BridgeFile::parse(toml),
            Err(ConfigError::TomlParseError { .. })
        ));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let toml = r#"
[frameworks]
mode = "eager"
"#;
        assert!(BridgeFile::parse(toml).is_err());
    }

    #[test]
    fn test_empty_path_rejected() {
        let toml = r#"
[frameworks]
root = ""
"#;
        assert!(matches!(
            BridgeFile::parse(toml),
            Err(ConfigError::InvalidValue { field, .. }) if field == "frameworks.root"
        ));
    }

    #[test]
    fn test_empty_marker_symbol_rejected() {
        let toml = r#"
[runtime]
block_marker_symbol = "  "
"#;
        assert!(BridgeFile::parse(toml).is_err());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = BridgeFile::parse(
            r#"
[runtime]
objc_library = "/a/libobjc.dylib"
system_library = "/a/libSystem.dylib"
"#,
        )
        .unwrap();
        let overlay = BridgeFile::parse(
            r#"
[runtime]
objc_library = "/b/libobjc.dylib"

[frameworks]
mode = "now"
"#,
        )
        .unwrap();

        base.merge(&overlay);
        let runtime = base.runtime.as_ref().unwrap();
        assert_eq!(
            runtime.objc_library,
            Some(PathBuf::from("/b/libobjc.dylib"))
        );
        assert_eq!(
            runtime.system_library,
            Some(PathBuf::from("/a/libSystem.dylib"))
        );
        assert_eq!(base.frameworks.unwrap().mode, Some(OpenMode::Now));
    }

    #[test]
    fn test_open_mode_from_str() {
        assert_eq!("NOW".parse::<OpenMode>().unwrap(), OpenMode::Now);
        assert_eq!("lazy".parse::<OpenMode>().unwrap(), OpenMode::Lazy);
        assert!("global".parse::<OpenMode>().is_err());
    }
}
