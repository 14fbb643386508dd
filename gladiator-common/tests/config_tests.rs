//! Tests for configuration loading and result root resolution
//!
//! Tests touching GLADIATOR_RESULT_ROOT or GLADIATOR_CONFIG are marked
//! #[serial] so environment mutations do not race.

use gladiator_common::config::{
    default_result_root, ResultRootInitializer, ResultRootResolver, TomlConfig, CONFIG_FILE_ENV,
    RESULT_ROOT_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_toml_defaults_apply_to_empty_file() {
    let config: TomlConfig = toml::from_str("").unwrap();

    assert_eq!(config.port, 5780);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.pipeline.poll_interval_ms, 1000);
    assert_eq!(config.pipeline.housekeeping_interval_secs, 5);
    assert!(config.result_root.is_none());
    assert_eq!(config.tools.tpp_bin, PathBuf::from("/opt/tpp/bin"));
    assert_eq!(config.tools.wine_prefix, PathBuf::from("/wineprefix64"));
}

#[test]
fn test_partial_tools_table_keeps_other_defaults() {
    let config: TomlConfig = toml::from_str(
        r#"
        port = 6000

        [tools]
        comet = "/usr/local/bin/comet"
        "#,
    )
    .unwrap();

    assert_eq!(config.port, 6000);
    assert_eq!(config.tools.comet, PathBuf::from("/usr/local/bin/comet"));
    assert_eq!(config.tools.tandem, PathBuf::from("/opt/tandem/tandem"));
    assert_eq!(
        config.tools.thermo_raw_parser_exe(),
        PathBuf::from("/opt/ThermoRawFileParser/ThermoRawFileParser.exe")
    );
    assert_eq!(
        config.tools.thermo_raw_parser_archive(),
        PathBuf::from("/root/ThermoRawFileParser.zip")
    );
}

#[test]
fn test_write_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.result_root = Some(PathBuf::from("/srv/results"));
    config.logging.level = "debug".to_string();
    config.write(&path).unwrap();

    let loaded = TomlConfig::load(&path).unwrap();
    assert_eq!(loaded.result_root, Some(PathBuf::from("/srv/results")));
    assert_eq!(loaded.logging.level, "debug");
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(TomlConfig::load(&path).is_err());
}

#[test]
#[serial]
fn test_malformed_config_falls_back_to_defaults() {
    env::remove_var(CONFIG_FILE_ENV);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[[[").unwrap();

    let config = TomlConfig::load_or_default(Some(&path));
    assert_eq!(config.port, 5780);
}

#[test]
#[serial]
fn test_config_env_var_is_used() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = 7001").unwrap();

    env::set_var(CONFIG_FILE_ENV, &path);
    let config = TomlConfig::load_or_default(None);
    env::remove_var(CONFIG_FILE_ENV);

    assert_eq!(config.port, 7001);
}

#[test]
#[serial]
fn test_resolver_priority_order() {
    env::remove_var(RESULT_ROOT_ENV);

    let mut toml = TomlConfig::default();
    toml.result_root = Some(PathBuf::from("/from/toml"));

    // Nothing configured
    assert_eq!(ResultRootResolver::new().resolve(), default_result_root());

    // TOML
    assert_eq!(
        ResultRootResolver::new().with_toml(&toml).resolve(),
        PathBuf::from("/from/toml")
    );

    // Environment beats TOML
    env::set_var(RESULT_ROOT_ENV, "/from/env");
    assert_eq!(
        ResultRootResolver::new().with_toml(&toml).resolve(),
        PathBuf::from("/from/env")
    );

    // CLI beats everything
    let resolved = ResultRootResolver::new()
        .with_cli_arg(Some(PathBuf::from("/from/cli")))
        .with_toml(&toml)
        .resolve();
    assert_eq!(resolved, PathBuf::from("/from/cli"));

    env::remove_var(RESULT_ROOT_ENV);
}

#[test]
fn test_initializer_creates_directory_idempotently() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("run-files");

    let initializer = ResultRootInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
}

#[test]
fn test_initializer_rejects_file_path() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, "x").unwrap();

    let initializer = ResultRootInitializer::new(file);
    assert!(initializer.ensure_directory_exists().is_err());
}
