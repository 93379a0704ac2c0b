//! Config file load, save, and migration logic (A4).

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::types::AgentConfig;

/// Migrate an on-disk config to the current field set: drop retired keys, add
/// new ones with defaults, log every change.
pub(crate) fn migrate_config(config_path: &Path) -> Result<bool> {
    if !config_path.exists() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(config_path)?;
    let mut json: serde_json::Value = serde_json::from_str(&content)?;
    let mut migrated = false;

    if let Some(agent) = json.get_mut("agent").and_then(|a| a.as_object_mut()) {
        if agent.remove("update_interval").is_some() {
            info!("migrated: removed retired 'agent.update_interval'");
            migrated = true;
        }
        if !agent.contains_key("token_refresh_rate") {
            agent.insert("token_refresh_rate".to_string(), serde_json::json!(0));
            info!("migrated: added 'agent.token_refresh_rate' with default 0");
            migrated = true;
        }
    }

    if migrated {
        std::fs::write(config_path, serde_json::to_string_pretty(&json)?)?;
        info!("config migrated to latest version: {:?}", config_path);
    }

    Ok(migrated)
}

pub fn default_config_path() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("cannot determine executable directory"))?
        .to_path_buf();
    Ok(exe_dir.join("config.json"))
}

pub async fn load_config(path: Option<&str>) -> Result<AgentConfig> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path()?,
    };

    if let Err(e) = migrate_config(&config_path) {
        warn!("config migration check failed: {e}");
    }

    if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path).await?;
        let mut config: AgentConfig = serde_json::from_str(&content)?;
        config.normalize();
        info!("loaded configuration from: {:?}", config_path);
        Ok(config)
    } else {
        info!("config file not found at {:?}, using defaults", config_path);
        Ok(AgentConfig::default())
    }
}

pub async fn save_config(config: &AgentConfig, path: &str) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!("configuration saved to: {path}");
    Ok(())
}
