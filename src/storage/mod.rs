//! Storage Layer
//!
//! Platform directories for configuration, data and the descriptor cache.

use anyhow::Result;
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "bazaar-assistant", "BazaarAssistant")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Get the descriptor cache directory
pub fn get_cache_dir() -> Result<PathBuf> {
    let cache_dir = project_dirs()?.cache_dir().join("features");
    std::fs::create_dir_all(&cache_dir)?;
    Ok(cache_dir)
}
