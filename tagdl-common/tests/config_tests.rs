//! Unit tests for bootstrap configuration
//!
//! Covers:
//! - Missing TOML files do not prevent startup
//! - Root folder resolution priority (CLI > ENV > TOML > default)
//! - Directory layout creation
//!
//! Tests that touch TAGDL_ROOT_FOLDER are marked #[serial] so they never race
//! on the process environment.

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tagdl_common::config::{
    load_toml_config, CompiledDefaults, LoggingConfig, RootFolderInitializer, RootFolderResolver,
    TomlConfig, ROOT_FOLDER_ENV,
};
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.root_folder.to_string_lossy().contains("tagdl"));
}

#[test]
#[serial]
fn test_resolver_cli_arg_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/tagdl-env-folder");

    let resolver = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/tagdl-cli-folder")));
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/tagdl-cli-folder"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_env_var_beats_toml() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("test-module.toml");
    std::fs::write(&toml_path, "root_folder = \"/tmp/tagdl-toml-folder\"\n").unwrap();

    env::set_var(ROOT_FOLDER_ENV, "/tmp/tagdl-env-folder");
    let resolver = RootFolderResolver::new("test-module").with_config_file(Some(toml_path));
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/tagdl-env-folder"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_reads_toml_root_folder() {
    env::remove_var(ROOT_FOLDER_ENV);

    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("test-module.toml");
    std::fs::write(
        &toml_path,
        "root_folder = \"/tmp/tagdl-toml-folder\"\nport = 1234\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let resolver = RootFolderResolver::new("test-module").with_config_file(Some(toml_path));
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/tagdl-toml-folder"));
}

#[test]
#[serial]
fn test_resolver_missing_toml_falls_back_to_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let temp_dir = TempDir::new().unwrap();
    let resolver = RootFolderResolver::new("test-module")
        .with_config_file(Some(temp_dir.path().join("does-not-exist.toml")));

    assert_eq!(
        resolver.resolve(),
        CompiledDefaults::for_current_platform().root_folder
    );
}

#[test]
fn test_load_toml_missing_file_is_none() {
    let temp_dir = TempDir::new().unwrap();
    let loaded: Option<TomlConfig> =
        load_toml_config(&temp_dir.path().join("missing.toml")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_load_toml_malformed_file_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("broken.toml");
    std::fs::write(&toml_path, "root_folder = [unclosed").unwrap();

    let result = load_toml_config::<TomlConfig>(&toml_path);
    assert!(matches!(result, Err(tagdl_common::Error::Config(_))));
}

#[test]
fn test_logging_defaults_when_section_absent() {
    let parsed: TomlConfig = toml::from_str("root_folder = \"/music\"").unwrap();
    assert_eq!(parsed.logging, LoggingConfig::default());
    assert_eq!(parsed.logging.level, "info");
}

#[test]
fn test_initializer_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("root");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert!(initializer.temp_dir().is_dir());
    assert!(initializer.artifacts_dir().is_dir());

    // Idempotent
    initializer.ensure_directory_exists().unwrap();
}
