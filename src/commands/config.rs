use crate::services::config_service;

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

pub fn has_api_key() -> Result<bool, String> {
    let config = config_service::get_effective_config().map_err(|e| e.to_string())?;
    Ok(!config.api_key.is_empty())
}

pub fn set_api_key(key: String) -> Result<(), String> {
    config_service::set_api_key(key.trim()).map_err(|e| e.to_string())
}

pub fn set_base_url(url: String) -> Result<(), String> {
    config_service::set_base_url(url.trim()).map_err(|e| e.to_string())
}

pub fn set_model(model: String) -> Result<(), String> {
    config_service::set_model(model.trim()).map_err(|e| e.to_string())
}

/// Stored configuration with the API key masked.
pub fn get_config() -> Result<config_service::Config, String> {
    let mut config = config_service::load_config().map_err(|e| e.to_string())?;
    config.api_key = config.api_key.as_deref().map(mask);
    Ok(config)
}
