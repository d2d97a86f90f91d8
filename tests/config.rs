use std::io::Write;
use std::path::Path;

use schemata::config::Settings;
use schemata::error::SchemataError;

#[test]
fn defaults_apply_without_a_file() {
    let settings = Settings::default();
    assert_eq!(settings.log_level, "info");
    assert!(settings.scripts.is_empty());
    assert!(settings.print_reports);
}

#[test]
fn a_settings_file_overrides_defaults() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temporary settings file");
    writeln!(
        file,
        "log_level = \"debug\"\nscripts = [\"schema.edn\", \"data.edn\"]\nprint_reports = false"
    )
    .unwrap();
    let settings = Settings::load(Some(file.path())).expect("settings loaded");
    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.scripts, vec!["schema.edn", "data.edn"]);
    assert!(!settings.print_reports);
}

#[test]
fn a_partial_file_keeps_the_remaining_defaults() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temporary settings file");
    writeln!(file, "print_reports = false").unwrap();
    let settings = Settings::load(Some(file.path())).expect("settings loaded");
    assert_eq!(settings.log_level, "info");
    assert!(!settings.print_reports);
}

#[test]
fn a_missing_explicit_file_is_an_error() {
    let result = Settings::load(Some(Path::new("/nonexistent/schemata-settings.toml")));
    assert!(matches!(result, Err(SchemataError::Config(_))));
}
