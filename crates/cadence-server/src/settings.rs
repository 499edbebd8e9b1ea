//! Layered server settings: config file, then `CADENCE_*` environment variables

use anyhow::Context;
use cadence_core::{ServerConfig, SpeechConfig};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming an explicit config file
const CONFIG_PATH_VAR: &str = "CADENCE_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialSettings {
    /// API keys in rotation order
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Wall-clock timing without sound
    #[default]
    Clock,
    /// The default playback device (needs the `device` feature)
    Device,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioSettings {
    #[serde(default)]
    pub output: OutputKind,
}

/// Load settings from the config file (if any) and the environment.
///
/// The file is `$CADENCE_CONFIG` when set, otherwise
/// `<config dir>/cadence/config.toml` if it exists. Environment variables
/// use the `CADENCE_` prefix and `__` between sections, e.g.
/// `CADENCE_SERVER__PORT=9000` or `CADENCE_CREDENTIALS__API_KEYS=k1,k2`.
pub fn load() -> anyhow::Result<Settings> {
    let mut builder = Config::builder();

    match std::env::var_os(CONFIG_PATH_VAR) {
        Some(path) => {
            let path = PathBuf::from(path);
            builder = builder.add_source(File::from(path.clone()).required(true));
            tracing::info!("Loading settings from {}", path.display());
        }
        None => {
            if let Some(path) = default_config_path() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("CADENCE")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("credentials.api_keys")
            .try_parsing(true),
    );

    build(builder)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cadence").join("config.toml"))
}

fn build(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Settings> {
    let settings: Settings = builder
        .build()
        .context("failed to read settings")?
        .try_deserialize()
        .context("invalid settings")?;
    Ok(settings)
}
