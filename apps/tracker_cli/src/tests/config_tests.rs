use super::*;

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

use tracker_core::settings::DEFAULT_UPDATE_INTERVAL;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[test]
fn file_values_override_defaults() {
    let mut settings = TrackerSettings::default();
    apply_file(
        &mut settings,
        r#"
update_interval_ms = 500
validation_delay_ms = 0
focus_zoom = 12
default_latitude = 52.52
tile_url_template = "http://tiles.local/{z}/{x}/{y}.png"
tile_subdomains = []
"#,
    )
    .expect("apply file");

    assert_eq!(settings.update_interval, Duration::from_millis(500));
    assert_eq!(settings.validation_delay, Duration::ZERO);
    assert_eq!(settings.focus_zoom, 12);
    assert_eq!(settings.default_center.lat, 52.52);
    assert_eq!(
        settings.tile_layer.url_template,
        "http://tiles.local/{z}/{x}/{y}.png"
    );
    assert!(settings.tile_layer.subdomains.is_empty());
}

#[test]
fn file_subdomain_array_is_accepted() {
    let mut settings = TrackerSettings::default();
    apply_file(&mut settings, r#"tile_subdomains = ["x", "y"]"#).expect("apply file");
    assert_eq!(settings.tile_layer.subdomains, vec!["x", "y"]);
}

#[test]
fn env_overrides_use_app_prefix() {
    let mut settings = TrackerSettings::default();
    apply_env(
        &mut settings,
        vars(&[
            ("APP__UPDATE_INTERVAL_MS", "250"),
            ("APP__TILE_SUBDOMAINS", "a, b"),
            ("UPDATE_INTERVAL_MS", "9999"),
        ]),
    )
    .expect("apply env");

    assert_eq!(settings.update_interval, Duration::from_millis(250));
    assert_eq!(settings.tile_layer.subdomains, vec!["a", "b"]);
}

#[test]
fn malformed_number_names_the_variable() {
    let mut settings = TrackerSettings::default();
    let err = apply_env(&mut settings, vars(&[("APP__FOCUS_ZOOM", "close")]))
        .expect_err("malformed");
    let message = format!("{err:#}");
    assert!(message.contains("APP__FOCUS_ZOOM"), "{message}");
    assert!(message.contains("focus_zoom"), "{message}");
}

#[test]
fn unknown_keys_are_ignored() {
    let mut settings = TrackerSettings::default();
    apply_file(&mut settings, "colour = \"blue\"").expect("apply file");
    assert_eq!(settings, TrackerSettings::default());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("tracker_cli_missing_{suffix}.toml"));

    let settings = load_settings(&path).expect("defaults");
    assert_eq!(settings.update_interval, DEFAULT_UPDATE_INTERVAL);
}

#[test]
fn zero_interval_is_rejected_on_load() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("tracker_cli_zero_{suffix}.toml"));
    fs::write(&path, "update_interval_ms = 0\n").expect("write config");

    let err = load_settings(&path).expect_err("zero interval");
    assert!(err.to_string().contains("update_interval"));

    fs::remove_file(path).expect("cleanup");
}
