// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local scanner.
//!
//! Walks `<roms_root>/<folder>` and produces presence records for every ROM
//! file found. Known folders are filtered by extension; a folder that is not
//! in [`ROM_EXTENSIONS`] accepts any file. In-flight download files
//! (`*.part`) are never reported.
//!
//! Everything here is blocking I/O. Async callers go through
//! `tokio::task::spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::inventory::LocalPresenceRecord;

/// Suffix of files still being downloaded.
pub const PARTIAL_SUFFIX: &str = "part";

/// ROM file extensions by local folder (lowercase, without the dot).
pub const ROM_EXTENSIONS: &[(&str, &[&str])] = &[
    ("gb", &["gb"]),
    ("gbc", &["gbc"]),
    ("gba", &["gba"]),
    ("nes", &["nes", "unf"]),
    ("snes", &["sfc", "smc"]),
    ("n64", &["n64", "z64", "v64"]),
    ("gc", &["iso", "gcm", "rvz"]),
    ("wii", &["iso", "wbfs", "rvz"]),
    ("psx", &["bin", "cue", "chd", "pbp", "iso"]),
    ("ps2", &["iso", "bin", "chd"]),
    ("psp", &["iso", "cso"]),
    ("megadrive", &["md", "smd", "gen", "bin"]),
    ("genesis", &["md", "smd", "gen", "bin"]),
    ("mastersystem", &["sms"]),
    ("gamegear", &["gg"]),
    ("dreamcast", &["cdi", "gdi", "chd"]),
    ("atari2600", &["a26", "bin"]),
    ("atari7800", &["a78"]),
    ("atarilynx", &["lnx"]),
    ("pcengine", &["pce", "cue", "chd"]),
    ("ngp", &["ngp"]),
    ("ngpc", &["ngc"]),
];

/// Known extensions for a folder, or `None` when any file is accepted.
pub fn extensions_for(folder: &str) -> Option<&'static [&'static str]> {
    let folder = folder.to_lowercase();
    ROM_EXTENSIONS
        .iter()
        .find(|(name, _)| *name == folder)
        .map(|(_, exts)| *exts)
}

/// Whether `path` looks like a ROM for `folder`.
pub fn is_rom_file(folder: &str, path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext == PARTIAL_SUFFIX {
        return false;
    }
    match extensions_for(folder) {
        Some(exts) => exts.contains(&ext.as_str()),
        None => true,
    }
}

/// Result of scanning one platform folder.
#[derive(Debug, Clone)]
pub struct PlatformScan {
    pub platform: String,
    pub records: Vec<LocalPresenceRecord>,
    pub duration: Duration,
}

/// File count and size of a folder, without building records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub exists: bool,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Scanner rooted at the local collection.
#[derive(Debug, Clone)]
pub struct RomScanner {
    roms_root: PathBuf,
}

impl RomScanner {
    pub fn new(roms_root: impl Into<PathBuf>) -> Self {
        let roms_root = roms_root.into();
        if !roms_root.exists() {
            tracing::warn!("ROM root does not exist: {:?}", roms_root);
        }
        Self { roms_root }
    }

    pub fn roms_root(&self) -> &Path {
        &self.roms_root
    }

    /// Directory of a platform folder.
    pub fn folder_path(&self, folder: &str) -> PathBuf {
        self.roms_root.join(folder)
    }

    /// Scan one platform folder recursively.
    ///
    /// A missing folder yields an empty scan. Unreadable entries are logged
    /// and skipped.
    pub fn scan_platform(&self, folder: &str) -> PlatformScan {
        let start = Instant::now();
        let dir = self.folder_path(folder);
        let mut records = Vec::new();

        if !dir.is_dir() {
            tracing::warn!("Platform directory does not exist: {:?}", dir);
        } else {
            if extensions_for(folder).is_none() {
                tracing::debug!(folder, "No known extensions, accepting every file");
            }
            for entry in WalkDir::new(&dir).min_depth(1).into_iter() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry under {:?}: {}", dir, e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_rom_file(folder, entry.path()) {
                    continue;
                }
                match record_for(folder, entry.path()) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("Error scanning {:?}: {:#}", entry.path(), e),
                }
            }
        }

        tracing::info!(folder, files = records.len(), "Scanned platform folder");
        PlatformScan {
            platform: folder.to_string(),
            records,
            duration: start.elapsed(),
        }
    }

    /// Scan several folders in order.
    pub fn scan_all(&self, folders: &[String]) -> Vec<PlatformScan> {
        folders.iter().map(|f| self.scan_platform(f)).collect()
    }

    /// Build a record for a single, just-written file.
    pub fn quick_scan_file(&self, folder: &str, path: &Path) -> Result<LocalPresenceRecord> {
        record_for(folder, path)
    }

    /// Count files in a folder without building records.
    pub fn platform_stats(&self, folder: &str) -> FolderStats {
        let dir = self.folder_path(folder);
        if !dir.is_dir() {
            return FolderStats::default();
        }
        let mut stats = FolderStats {
            exists: true,
            ..FolderStats::default()
        };
        for entry in WalkDir::new(&dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_rom_file(folder, entry.path()) {
                stats.file_count += 1;
                if let Ok(meta) = entry.metadata() {
                    stats.total_bytes += meta.len();
                }
            }
        }
        stats
    }
}

fn record_for(folder: &str, path: &Path) -> Result<LocalPresenceRecord> {
    let meta = fs::metadata(path).with_context(|| format!("Failed to stat {:?}", path))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Path has no file name: {:?}", path))?;

    let mut record = LocalPresenceRecord::new(folder, file_name, path, meta.len());
    record.modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn test_is_rom_file() {
        assert!(is_rom_file("snes", Path::new("Game.SFC")));
        assert!(is_rom_file("snes", Path::new("game.smc")));
        assert!(!is_rom_file("snes", Path::new("game.txt")));
        assert!(!is_rom_file("snes", Path::new("game.sfc.part")));
        assert!(is_rom_file("arcade", Path::new("anything.zip")));
        assert!(!is_rom_file("arcade", Path::new("anything.zip.part")));
    }

    #[test]
    fn test_scan_platform_filters_and_recurses() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        write(dir.path(), "snes/Game One.sfc", 10);
        write(dir.path(), "snes/sub/Game Two.smc", 20);
        write(dir.path(), "snes/readme.txt", 5);
        write(dir.path(), "snes/Pending.sfc.part", 5);
        write(dir.path(), "gb/other.gb", 1);

        let scanner = RomScanner::new(dir.path());
        let scan = scanner.scan_platform("snes");

        assert_eq!(scan.platform, "snes");
        let mut names: Vec<_> = scan.records.iter().map(|r| r.file_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Game One.sfc", "Game Two.smc"]);
        assert!(scan.records.iter().all(|r| r.present && r.platform == "snes"));
        assert!(scan.records.iter().all(|r| r.modified_at.is_some()));
    }

    #[test]
    fn test_missing_folder_is_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let scanner = RomScanner::new(dir.path());
        assert!(scanner.scan_platform("n64").records.is_empty());
        assert_eq!(scanner.platform_stats("n64"), FolderStats::default());
    }

    #[test]
    fn test_quick_scan_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        write(dir.path(), "gba/New.gba", 64);
        let scanner = RomScanner::new(dir.path());

        let record = scanner
            .quick_scan_file("gba", &dir.path().join("gba/New.gba"))
            .unwrap();
        assert_eq!(record.file_name, "New.gba");
        assert_eq!(record.size_bytes, 64);
        assert!(scanner.quick_scan_file("gba", &dir.path().join("gba/missing.gba")).is_err());
    }

    #[test]
    fn test_platform_stats() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        write(dir.path(), "nes/a.nes", 100);
        write(dir.path(), "nes/b.unf", 50);
        write(dir.path(), "nes/c.jpg", 999);

        let stats = RomScanner::new(dir.path()).platform_stats("nes");
        assert!(stats.exists);
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_bytes, 150);
    }
}
