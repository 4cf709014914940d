use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::{preamble::PreamblePlan, session::SessionConfig};

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";
pub const FALLBACK_MESSAGE: &str =
    "The mystical connection wavers... Please try again in a moment.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub history_limit: u32,
    pub reveal_step_ms: u64,
    pub preamble_total_ms: u64,
    pub confirmation_display_ms: u64,
    pub request_timeout_ms: u64,
    pub fallback_message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            history_limit: 50,
            reveal_step_ms: 30,
            preamble_total_ms: 5000,
            confirmation_display_ms: 3000,
            request_timeout_ms: 30_000,
            fallback_message: FALLBACK_MESSAGE.into(),
        }
    }
}

/// Every key is optional; missing keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_base_url: Option<String>,
    history_limit: Option<u32>,
    reveal_step_ms: Option<u64>,
    preamble_total_ms: Option<u64>,
    confirmation_display_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    fallback_message: Option<String>,
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reveal_step: Duration::from_millis(self.reveal_step_ms),
            preamble: PreamblePlan::dream_weaver(Duration::from_millis(self.preamble_total_ms)),
            confirmation_display: Duration::from_millis(self.confirmation_display_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            fallback_message: self.fallback_message.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn apply_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file_cfg.history_limit {
            self.history_limit = v;
        }
        if let Some(v) = file_cfg.reveal_step_ms {
            self.reveal_step_ms = v;
        }
        if let Some(v) = file_cfg.preamble_total_ms {
            self.preamble_total_ms = v;
        }
        if let Some(v) = file_cfg.confirmation_display_ms {
            self.confirmation_display_ms = v;
        }
        if let Some(v) = file_cfg.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        if let Some(v) = file_cfg.fallback_message {
            self.fallback_message = v;
        }
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ANTARA_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("APP__API_URL") {
            self.api_base_url = v;
        }
        parse_env(&lookup, "APP__HISTORY_LIMIT", &mut self.history_limit);
        parse_env(&lookup, "APP__REVEAL_STEP_MS", &mut self.reveal_step_ms);
        parse_env(&lookup, "APP__PREAMBLE_TOTAL_MS", &mut self.preamble_total_ms);
        parse_env(
            &lookup,
            "APP__CONFIRMATION_DISPLAY_MS",
            &mut self.confirmation_display_ms,
        );
        parse_env(&lookup, "APP__REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
    }
}

fn parse_env<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("config: ignoring unparsable {key}={raw}"),
    }
}

fn read_file_settings(path: &Path) -> anyhow::Result<Option<FileSettings>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    let parsed = toml::from_str::<FileSettings>(&raw)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;
    Ok(Some(parsed))
}

/// Defaults, then `path` (or `client.toml` when absent), then the environment.
/// An explicitly named file must exist; the default one is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let file_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match read_file_settings(file_path)? {
        Some(file_cfg) => settings.apply_file(file_cfg),
        None if path.is_some() => {
            anyhow::bail!("config file '{}' does not exist", file_path.display())
        }
        None => {}
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}
