pub mod metadata;

use crate::SUPPORTED_EXTENSIONS;
use indicatif::{ProgressBar, ProgressStyle};
use metadata::TrackTags;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

/// A file in the library with the tags read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryTrack {
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    #[serde(default)]
    pub tags: TrackTags,
    /// Tags looked up from an outside source; these win over `tags`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched: Option<TrackTags>,
}

impl LibraryTrack {
    pub fn new(path: impl Into<PathBuf>, size: u64, tags: TrackTags) -> Self {
        Self {
            path: path.into(),
            size,
            tags,
            fetched: None,
        }
    }

    /// Stat and tag-read a single file.
    pub fn from_path(path: &Path) -> Result<Self, ScanError> {
        let size = std::fs::metadata(path)?.len();
        Ok(Self::new(path, size, metadata::read_tags(path)))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File tags with fetched tags merged on top.
    pub fn effective_tags(&self) -> TrackTags {
        let mut tags = self.tags.clone();
        if let Some(fetched) = &self.fetched {
            tags.overlay(fetched);
        }
        tags
    }
}

pub struct ScanResult {
    pub tracks: Vec<LibraryTrack>,
    pub scanned: u64,
    pub errors: u64,
}

/// Whether two paths name the same file, however they are spelled.
///
/// `./music/a.mp3` and `music/a.mp3` match without touching the disk.
/// Otherwise paths sharing a file name are compared canonicalized;
/// paths that cannot be resolved only match lexically.
pub fn same_file(a: &Path, b: &Path) -> bool {
    let lexical = |p: &Path| -> PathBuf {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    };
    if lexical(a) == lexical(b) {
        return true;
    }
    if a.file_name() != b.file_name() {
        return false;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Whether the path has one of the supported audio extensions.
pub fn is_supported(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Every supported audio file under `paths`, sorted. Plain files are taken as given.
pub fn collect_audio_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
    let mut audio_files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(ScanError::NotFound(path.clone()));
        }
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_supported(entry.path()) {
                audio_files.push(entry.into_path());
            }
        }
    }

    audio_files.sort();
    audio_files.dedup();
    Ok(audio_files)
}

/// Walk directories for audio files and read their tags.
pub fn scan(paths: &[PathBuf]) -> Result<ScanResult, ScanError> {
    let audio_files = collect_audio_files(paths)?;

    let pb = ProgressBar::new(audio_files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb.set_message("Scanning...");

    let mut result = ScanResult {
        tracks: Vec::with_capacity(audio_files.len()),
        scanned: 0,
        errors: 0,
    };

    for path in &audio_files {
        result.scanned += 1;
        match LibraryTrack::from_path(path) {
            Ok(track) => result.tracks.push(track),
            Err(e) => {
                log::warn!("Error scanning {}: {}", path.display(), e);
                result.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Done: {} tracks, {} errors",
        result.tracks.len(),
        result.errors
    ));
    log::info!("Scanned {} files ({} errors)", result.scanned, result.errors);

    Ok(result)
}
