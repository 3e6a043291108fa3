//! Root folder resolution priority tests
//!
//! These touch process environment variables, so they run serially.

use serial_test::serial;
use snaily_common::config::{default_root_folder, load_toml, resolve_root_folder};
use std::io::Write;
use std::path::PathBuf;

const ENV_VAR: &str = "SNAILY_TEST_ROOT_FOLDER";

#[test]
#[serial]
fn cli_argument_wins_over_everything() {
    std::env::set_var(ENV_VAR, "/from/env");
    let root = resolve_root_folder(Some("/from/cli"), ENV_VAR, Some("/from/toml"));
    std::env::remove_var(ENV_VAR);

    assert_eq!(root, PathBuf::from("/from/cli"));
}

#[test]
#[serial]
fn env_var_wins_over_toml() {
    std::env::set_var(ENV_VAR, "/from/env");
    let root = resolve_root_folder(None, ENV_VAR, Some("/from/toml"));
    std::env::remove_var(ENV_VAR);

    assert_eq!(root, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn toml_used_when_no_cli_or_env() {
    std::env::remove_var(ENV_VAR);
    let root = resolve_root_folder(None, ENV_VAR, Some("/from/toml"));

    assert_eq!(root, PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn falls_back_to_platform_default() {
    std::env::remove_var(ENV_VAR);
    let root = resolve_root_folder(None, ENV_VAR, None);

    assert_eq!(root, default_root_folder());
    assert!(root.to_string_lossy().contains("snaily"));
}

#[derive(Debug, serde::Deserialize)]
struct Sample {
    port: u16,
    root_folder: Option<String>,
}

#[test]
fn load_toml_parses_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = 5741\nroot_folder = \"/srv/snaily\"").unwrap();

    let sample: Sample = load_toml(file.path()).unwrap();
    assert_eq!(sample.port, 5741);
    assert_eq!(sample.root_folder.as_deref(), Some("/srv/snaily"));
}

#[test]
fn load_toml_reports_config_error_on_garbage() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = = =").unwrap();

    let result: snaily_common::Result<Sample> = load_toml(file.path());
    assert!(matches!(result, Err(snaily_common::Error::Config(_))));
}
