use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use picker_core::{
    settings::{GEOCODER_URL, MAPGL_SCRIPT_URL},
    PickerSettings,
};
use serde::Deserialize;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub script_url: String,
    pub geocoder_url: String,
    pub readonly: bool,
    pub error_dismiss_ms: u64,
    pub request_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            script_url: MAPGL_SCRIPT_URL.into(),
            geocoder_url: GEOCODER_URL.into(),
            readonly: false,
            error_dismiss_ms: 3_000,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_key: Option<String>,
    script_url: Option<String>,
    geocoder_url: Option<String>,
    readonly: Option<bool>,
    error_dismiss_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
}

pub fn load_settings(path: &Path) -> Settings {
    load_settings_with(path, |key| std::env::var(key).ok())
}

fn load_settings_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring malformed settings file"),
        }
    }

    if let Some(v) = env("PICKER_API_KEY") {
        settings.api_key = Some(v);
    }
    if let Some(v) = env("APP__API_KEY") {
        settings.api_key = Some(v);
    }

    if let Some(v) = env("PICKER_SCRIPT_URL") {
        settings.script_url = v;
    }

    if let Some(v) = env("PICKER_GEOCODER_URL") {
        settings.geocoder_url = v;
    }
    if let Some(v) = env("APP__GEOCODER_URL") {
        settings.geocoder_url = v;
    }

    if let Some(v) = env("APP__READONLY") {
        match v.parse::<bool>() {
            Ok(parsed) => settings.readonly = parsed,
            Err(_) => warn!(value = %v, "ignoring invalid APP__READONLY"),
        }
    }

    if let Some(v) = env("APP__ERROR_DISMISS_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.error_dismiss_ms = parsed,
            Err(_) => warn!(value = %v, "ignoring invalid APP__ERROR_DISMISS_MS"),
        }
    }

    settings
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_key {
        settings.api_key = Some(v);
    }
    if let Some(v) = file_cfg.script_url {
        settings.script_url = v;
    }
    if let Some(v) = file_cfg.geocoder_url {
        settings.geocoder_url = v;
    }
    if let Some(v) = file_cfg.readonly {
        settings.readonly = v;
    }
    if let Some(v) = file_cfg.error_dismiss_ms {
        settings.error_dismiss_ms = v;
    }
    if file_cfg.request_timeout_secs.is_some() {
        settings.request_timeout_secs = file_cfg.request_timeout_secs;
    }
}

impl Settings {
    pub fn picker_settings(&self) -> anyhow::Result<PickerSettings> {
        let mut picker = PickerSettings::default();
        picker.script.url = Url::parse(&self.script_url)
            .with_context(|| format!("invalid script url '{}'", self.script_url))?;
        picker.geocoder_url = Url::parse(&self.geocoder_url)
            .with_context(|| format!("invalid geocoder url '{}'", self.geocoder_url))?;
        picker.error_dismiss = Duration::from_millis(self.error_dismiss_ms);
        picker.request_timeout = self.request_timeout_secs.map(Duration::from_secs);
        Ok(picker)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
