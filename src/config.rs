// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration for romsync.
//!
//! Configuration lives in `~/.romsync/config.json` (override the directory
//! with `ROMSYNC_HOME`). Every section has defaults so a partial file is
//! valid; the only thing romsync cannot guess is where the RomM server is.
//!
//! ```json
//! {
//!   "romm": { "url": "http://romm.local:8080", "username": "me", "password": "..." },
//!   "paths": { "roms_root": "~/retrodeck/roms" },
//!   "platform_mapping": { "Nintendo - Game Boy": "gb", "SNES": "snes" }
//! }
//! ```

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::QueueSettings;
use crate::types::PlatformSummary;

/// Environment variable overriding the config directory.
pub const HOME_ENV: &str = "ROMSYNC_HOME";

const DEFAULT_PORT: u16 = 5000;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub romm: RommConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    /// Remote platform name -> local folder name.
    #[serde(default)]
    pub platform_mapping: PlatformMapping,
}

/// Connection settings for the RomM server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RommConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the local collection; each platform is a sub-folder.
    #[serde(default = "default_roms_root")]
    pub roms_root: PathBuf,
    /// Where the inventory snapshot is kept. Defaults to the config directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            roms_root: default_roms_root(),
            data_dir: None,
        }
    }
}

fn default_roms_root() -> PathBuf {
    PathBuf::from("~/retrodeck/roms")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Download queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum simultaneous transfers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-transfer timeout.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// Pause between items of a batch request.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// How long a completed entry stays visible.
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,
    /// Settle time before a finished file is registered locally.
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            batch_delay_ms: default_batch_delay_ms(),
            cleanup_delay_secs: default_cleanup_delay_secs(),
            refresh_delay_ms: default_refresh_delay_ms(),
        }
    }
}

fn default_max_concurrent() -> usize {
    2
}

fn default_transfer_timeout_secs() -> u64 {
    30 * 60
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_cleanup_delay_secs() -> u64 {
    3
}

fn default_refresh_delay_ms() -> u64 {
    1000
}

impl DownloadConfig {
    /// Convert to the queue manager's settings.
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            // A zero cap would never admit anything.
            max_concurrent: self.max_concurrent.max(1),
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            cleanup_delay: Duration::from_secs(self.cleanup_delay_secs),
            refresh_delay: Duration::from_millis(self.refresh_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// A scan running longer than this is considered abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    30 * 60
}

impl ScanConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Ordered mapping from remote platform name to local folder name.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct PlatformMapping(IndexMap<String, String>);

impl PlatformMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping entry.
    pub fn insert(&mut self, platform: impl Into<String>, folder: impl Into<String>) {
        self.0.insert(platform.into(), folder.into());
    }

    /// Local folder for a remote platform name. Blank folders count as unmapped.
    pub fn folder_for(&self, platform: &str) -> Option<&str> {
        self.0
            .get(platform)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
    }

    /// Every distinct mapped folder, in file order.
    pub fn folders(&self) -> Vec<&str> {
        let mut folders: Vec<&str> = Vec::new();
        for folder in self.0.values().map(|f| f.trim()) {
            if !folder.is_empty() && !folders.contains(&folder) {
                folders.push(folder);
            }
        }
        folders
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for PlatformMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Config {
    /// Root of the local collection with `~` expanded.
    pub fn roms_root(&self) -> PathBuf {
        expand_home(&self.paths.roms_root)
    }

    /// Directory holding the inventory snapshot.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.paths.data_dir {
            Some(dir) => Ok(expand_home(dir)),
            None => config_dir(),
        }
    }

    /// Path of the persisted inventory snapshot.
    pub fn inventory_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("inventory.json"))
    }

    /// Human-readable problems that will stop romsync from working.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let url = self.romm.url.trim();
        if url.is_empty() {
            problems.push("romm.url is not set".to_string());
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            problems.push(format!("romm.url '{}' must start with http:// or https://", url));
        }
        if self.platform_mapping.is_empty() {
            problems.push(
                "platform_mapping is empty; run `romsync mappings` for a suggestion".to_string(),
            );
        }
        problems
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Config directory, created on first use.
pub fn config_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .context("Could not find home directory")?
            .join(".romsync"),
    };
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
    }
    Ok(dir)
}

/// Default config file location.
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load the config from `path`, or from the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };
    if !path.exists() {
        tracing::warn!("No config file at {:?}, using defaults", path);
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(config)
}

/// Write the config to `path` as pretty JSON.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).with_context(|| format!("Failed to write config: {:?}", path))?;
    Ok(())
}

/// Well-known RomM platform names and their RetroDECK folders.
const KNOWN_FOLDERS: &[(&str, &str)] = &[
    ("Nintendo - Game Boy", "gb"),
    ("Nintendo - Game Boy Color", "gbc"),
    ("Nintendo - Game Boy Advance", "gba"),
    ("Nintendo - Nintendo Entertainment System", "nes"),
    ("Nintendo - Super Nintendo Entertainment System", "snes"),
    ("Nintendo - Nintendo 64", "n64"),
    ("Nintendo - GameCube", "gc"),
    ("Nintendo - Wii", "wii"),
    ("Nintendo - Wii U", "wiiu"),
    ("Nintendo - Nintendo DS", "nds"),
    ("Nintendo - Nintendo 3DS", "3ds"),
    ("Nintendo Switch", "switch"),
    ("Sony - PlayStation", "psx"),
    ("Sony - PlayStation 2", "ps2"),
    ("Sony - PlayStation 3", "ps3"),
    ("Sony - PlayStation Portable", "psp"),
    ("Sony - PlayStation Vita", "psvita"),
    ("Sega - Master System", "mastersystem"),
    ("Sega - Mega Drive", "genesis"),
    ("Sega - Game Gear", "gamegear"),
    ("Sega - Saturn", "saturn"),
    ("Sega - Dreamcast", "dreamcast"),
    ("Atari 2600", "atari2600"),
    ("Atari 5200", "atari5200"),
    ("Atari 7800", "atari7800"),
];

/// Suggest a mapping for the given remote platforms.
///
/// Known names use the table above; anything else falls back to the slug,
/// or to the name lowercased with spaces and dashes removed.
pub fn suggest_mapping(platforms: &[PlatformSummary]) -> PlatformMapping {
    platforms
        .iter()
        .map(|p| {
            let folder = KNOWN_FOLDERS
                .iter()
                .find(|(name, _)| *name == p.name)
                .map(|(_, folder)| folder.to_string())
                .unwrap_or_else(|| {
                    if p.slug.is_empty() {
                        p.name.to_lowercase().replace([' ', '-'], "")
                    } else {
                        p.slug.clone()
                    }
                });
            (p.name.clone(), folder)
        })
        .collect()
}
