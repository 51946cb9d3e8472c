use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use tracing::{debug, warn};
use tracker_core::settings::TrackerSettings;

const ENV_PREFIX: &str = "APP__";

/// Defaults, then `path` if it exists, then `APP__*` environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<TrackerSettings> {
    let mut settings = TrackerSettings::default();

    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) => debug!(path = %path.display(), error = %err, "config: no config file loaded"),
    }

    apply_env(&mut settings, std::env::vars())?;
    settings.validate()?;
    Ok(settings)
}

fn apply_file(settings: &mut TrackerSettings, raw: &str) -> anyhow::Result<()> {
    let table: toml::Table = toml::from_str(raw)?;
    for (key, value) in &table {
        let value = match value {
            toml::Value::String(text) => text.clone(),
            toml::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| item.to_string())
                })
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_string(),
        };
        apply_override(settings, key, &value)?;
    }
    Ok(())
}

fn apply_env(
    settings: &mut TrackerSettings,
    vars: impl IntoIterator<Item = (String, String)>,
) -> anyhow::Result<()> {
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        apply_override(settings, &key.to_ascii_lowercase(), &value)
            .with_context(|| format!("invalid environment variable {name}"))?;
    }
    Ok(())
}

fn apply_override(settings: &mut TrackerSettings, key: &str, value: &str) -> anyhow::Result<()> {
    match key {
        "update_interval_ms" => settings.update_interval = parse_millis(key, value)?,
        "validation_delay_ms" => settings.validation_delay = parse_millis(key, value)?,
        "fly_duration_ms" => settings.fly_duration = parse_millis(key, value)?,
        "default_zoom" => settings.default_zoom = parse_number(key, value)?,
        "focus_zoom" => settings.focus_zoom = parse_number(key, value)?,
        "default_latitude" => settings.default_center.lat = parse_number(key, value)?,
        "default_longitude" => settings.default_center.lng = parse_number(key, value)?,
        "tile_url_template" => settings.tile_layer.url_template = value.trim().to_string(),
        "tile_subdomains" => {
            settings.tile_layer.subdomains = value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect();
        }
        "tile_attribution" => settings.tile_layer.attribution = value.to_string(),
        "event_capacity" => settings.event_capacity = parse_number(key, value)?,
        _ => warn!(key, "config: ignoring unknown setting"),
    }
    Ok(())
}

fn parse_millis(key: &str, value: &str) -> anyhow::Result<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

fn parse_number<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|err| anyhow!("{key}: cannot parse '{value}': {err}"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
