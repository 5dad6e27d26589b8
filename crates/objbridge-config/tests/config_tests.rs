//! Configuration loading and precedence tests

use objbridge_config::{BridgeConfig, ConfigError, ConfigLoader, OpenMode};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("objbridge.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_when_no_config_exists() {
    let temp_dir = TempDir::new().unwrap();

    let mut loader = ConfigLoader::new();
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.project_file, None);
    assert_eq!(config.objc_library, BridgeConfig::default().objc_library);
}

#[test]
#[serial]
fn test_load_full_project_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(
        temp_dir.path(),
        r#"
[runtime]
objc_library = "/opt/gnustep/libobjc.so.4"
objc_mode = "lazy"
system_library = "libc.so.6"
system_mode = "now"
block_marker_symbol = "_NSConcreteGlobalBlock"

[frameworks]
root = "/Library/Frameworks"
mode = "now"
"#,
    );

    let mut loader = ConfigLoader::new();
    let config = loader.load_from_file(&path).unwrap();

    assert_eq!(
        config,
        BridgeConfig {
            objc_library: PathBuf::from("/opt/gnustep/libobjc.so.4"),
            objc_mode: OpenMode::Lazy,
            system_library: PathBuf::from("libc.so.6"),
            system_mode: OpenMode::Now,
            block_marker_symbol: "_NSConcreteGlobalBlock".to_string(),
            framework_root: PathBuf::from("/Library/Frameworks"),
            framework_mode: OpenMode::Now,
            project_file: Some(path),
        }
    );
}

#[test]
#[serial]
fn test_load_from_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut loader = ConfigLoader::new();
    let result = loader.load_from_file(&temp_dir.path().join("missing.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
#[serial]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[runtime\nobjc_library = 1");

    let mut loader = ConfigLoader::new();
    match loader.load_from_file(&path) {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("expected TomlParseError, got {:?}", other),
    }
}

// ============================================================================
// Environment Override Tests
// ============================================================================

#[rstest]
#[case("OBJBRIDGE_OBJC_LIBRARY", "/env/libobjc.dylib")]
#[case("OBJBRIDGE_SYSTEM_LIBRARY", "/env/libSystem.dylib")]
#[case("OBJBRIDGE_FRAMEWORK_ROOT", "/env/Frameworks")]
#[serial]
fn test_env_path_overrides(#[case] var: &str, #[case] value: &str) {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[runtime]
objc_library = "/file/libobjc.dylib"
system_library = "/file/libSystem.dylib"

[frameworks]
root = "/file/Frameworks"
"#,
    );

    env::set_var(var, value);
    let mut loader = ConfigLoader::new();
    let config = loader.load_from_directory(temp_dir.path());
    env::remove_var(var);
    let config = config.unwrap();

    let actual = match var {
        "OBJBRIDGE_OBJC_LIBRARY" => config.objc_library,
        "OBJBRIDGE_SYSTEM_LIBRARY" => config.system_library,
        _ => config.framework_root,
    };
    assert_eq!(actual, PathBuf::from(value));
}

#[test]
#[serial]
fn test_empty_env_path_rejected() {
    let temp_dir = TempDir::new().unwrap();

    env::set_var("OBJBRIDGE_OBJC_LIBRARY", "");
    let mut loader = ConfigLoader::new();
    let result = loader.load_from_directory(temp_dir.path());
    env::remove_var("OBJBRIDGE_OBJC_LIBRARY");

    let err = result.unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"Invalid value for 'OBJBRIDGE_OBJC_LIBRARY': path must not be empty");
}
