use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AssistError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Long generations stream for a while.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const ENV_API_KEY: &str = "DRAFTSMITH_API_KEY";
pub const ENV_BASE_URL: &str = "DRAFTSMITH_BASE_URL";
pub const ENV_MODEL: &str = "DRAFTSMITH_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub image_size: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Fully resolved settings: file, then environment, then defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub image_model: String,
    pub image_size: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

pub fn get_app_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AssistError::config("Could not find data directory"))?
        .join("Draftsmith");

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| AssistError::config(format!("Failed to create data directory: {}", e)))?;
    }

    Ok(data_dir)
}

fn get_config_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| AssistError::config(format!("Failed to read config: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| AssistError::config(format!("Failed to parse config: {}", e)))
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| AssistError::config(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, content)
        .map_err(|e| AssistError::config(format!("Failed to write config: {}", e)))?;
    tracing::debug!(path = %path.display(), "saved config");
    Ok(())
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

fn update_config(apply: impl FnOnce(&mut Config)) -> Result<()> {
    let mut config = load_config().unwrap_or_default();
    apply(&mut config);
    save_config(&config)
}

pub fn set_api_key(key: &str) -> Result<()> {
    update_config(|config| config.api_key = Some(key.to_string()))
}

pub fn set_base_url(url: &str) -> Result<()> {
    url::Url::parse(url).map_err(|e| AssistError::config(format!("Invalid base URL: {}", e)))?;
    update_config(|config| config.base_url = Some(url.to_string()))
}

pub fn set_model(model: &str) -> Result<()> {
    update_config(|config| config.model = Some(model.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve `config` against an environment lookup.
pub fn resolve(config: Config, env: impl Fn(&str) -> Option<String>) -> EffectiveConfig {
    EffectiveConfig {
        api_key: non_empty(env(ENV_API_KEY))
            .or(non_empty(config.api_key))
            .unwrap_or_default(),
        base_url: non_empty(env(ENV_BASE_URL))
            .or(non_empty(config.base_url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        model: non_empty(env(ENV_MODEL))
            .or(non_empty(config.model))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        image_model: non_empty(config.image_model)
            .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
        image_size: non_empty(config.image_size)
            .unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string()),
        temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        request_timeout: Duration::from_secs(
            config.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        ),
    }
}

pub fn get_effective_config() -> Result<EffectiveConfig> {
    Ok(resolve(load_config()?, |key| std::env::var(key).ok()))
}
