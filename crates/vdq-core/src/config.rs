use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/vdq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdqConfig {
    /// Download directory. When unset, the embedding application chooses
    /// (typically a `downloaded_media` directory next to itself).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Worker-pool size used by `start()` when the caller passes no override.
    pub max_concurrent_downloads: usize,
    /// Pause between dispatches in sequential mode, in milliseconds.
    /// Courtesy toward the remote service, not required for correctness.
    pub dispatch_delay_ms: u64,
    /// Optional bytes/sec cap forwarded to the transfer backend. The core
    /// does not enforce it.
    #[serde(default)]
    pub max_download_rate: Option<u64>,
    /// Explicit converter directory checked before the built-in search path.
    #[serde(default)]
    pub converter_dir: Option<PathBuf>,
}

impl Default for VdqConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_concurrent_downloads: 3,
            dispatch_delay_ms: 500,
            max_download_rate: None,
            converter_dir: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VdqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VdqConfig = toml::from_str(&data)?;
    Ok(cfg)
}
