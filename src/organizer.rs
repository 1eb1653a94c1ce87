//! Folder layout previews from tag patterns.
//!
//! Only the plan is computed; moving or copying files is left to the caller.

use crate::scanner::LibraryTrack;
use crate::scanner::metadata::TrackTags;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_PATTERN: &str = "[artist]/[album]/[trackNumber] - [title]";

const DEFAULT_EXTENSION: &str = "mp3";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\[(artist|albumartist|album|title|year|genre|tracknumber|discnumber|composer|copyright|originalartist|encodedby)\]",
    )
    .unwrap()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static INVALID_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[\\?%*:|"<>]"#).unwrap());

static LEADING_DOTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\.+").unwrap());

fn text(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn placeholder_value(name: &str, tags: &TrackTags) -> String {
    match name {
        "artist" => text(&tags.artist).unwrap_or("Unknown Artist").to_string(),
        "albumartist" => text(&tags.album_artist)
            .or(text(&tags.artist))
            .unwrap_or("Unknown Artist")
            .to_string(),
        "album" => text(&tags.album).unwrap_or("Unknown Album").to_string(),
        "title" => text(&tags.title).unwrap_or("Unknown Title").to_string(),
        "year" => text(&tags.year).unwrap_or("0000").to_string(),
        "genre" => text(&tags.genre).unwrap_or("Unknown Genre").to_string(),
        "tracknumber" => format!("{:02}", tags.track_number.unwrap_or(0)),
        "discnumber" => tags
            .disc_number
            .filter(|&d| d > 0)
            .unwrap_or(1)
            .to_string(),
        "composer" => text(&tags.composer).unwrap_or("Unknown Composer").to_string(),
        "copyright" => text(&tags.copyright).unwrap_or("").to_string(),
        "originalartist" => text(&tags.original_artist).unwrap_or("").to_string(),
        "encodedby" => text(&tags.encoded_by).unwrap_or("").to_string(),
        _ => String::new(),
    }
}

/// Make one path component safe for common filesystems. May return an empty string.
fn sanitize_component(part: &str) -> String {
    let part = WHITESPACE.replace_all(part.trim(), " ");
    let part = INVALID_CHARS.replace_all(&part, "-");
    LEADING_DOTS.replace(&part, "").into_owned()
}

/// Relative destination for a file, e.g. `Artist/Album/01 - Title.flac`.
///
/// Placeholders match case-insensitively and are substituted in one pass, so
/// tag values containing bracketed text are left alone. Components that end
/// up empty are dropped. The original extension is kept.
pub fn generate_path(pattern: &str, tags: &TrackTags, original_file_name: &str) -> String {
    let extension = Path::new(original_file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EXTENSION);

    let filled = PLACEHOLDER.replace_all(pattern, |caps: &Captures| {
        placeholder_value(&caps[1].to_lowercase(), tags)
    });

    let parts: Vec<String> = filled
        .split('/')
        .map(sanitize_component)
        .filter(|p| !p.is_empty())
        .collect();

    format!("{}.{}", parts.join("/"), extension)
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizePlan {
    pub source: PathBuf,
    /// Relative to the target root.
    pub destination: String,
    /// Another track in the plan maps to the same destination.
    pub collides: bool,
}

/// Compute destinations for every track without touching the filesystem.
pub fn preview_organization(tracks: &[LibraryTrack], pattern: &str) -> Vec<OrganizePlan> {
    let mut plans: Vec<OrganizePlan> = tracks
        .iter()
        .map(|t| OrganizePlan {
            source: t.path.clone(),
            destination: generate_path(pattern, &t.effective_tags(), &t.file_name()),
            collides: false,
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for plan in &plans {
        *counts.entry(plan.destination.to_lowercase()).or_insert(0) += 1;
    }
    for plan in &mut plans {
        plan.collides = counts
            .get(&plan.destination.to_lowercase())
            .is_some_and(|&n| n > 1);
    }

    let collisions = plans.iter().filter(|p| p.collides).count();
    if collisions > 0 {
        log::warn!("{} files share a destination path", collisions);
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> TrackTags {
        TrackTags {
            artist: Some("Daft Punk".into()),
            album: Some("Discovery".into()),
            title: Some("One More Time".into()),
            track_number: Some(1),
            year: Some("2001".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_pattern() {
        assert_eq!(
            generate_path(DEFAULT_PATTERN, &tags(), "01.flac"),
            "Daft Punk/Discovery/01 - One More Time.flac"
        );
    }

    #[test]
    fn test_placeholders_are_case_insensitive() {
        assert_eq!(
            generate_path("[ARTIST]/[Year] - [TITLE]", &tags(), "x.mp3"),
            "Daft Punk/2001 - One More Time.mp3"
        );
    }

    #[test]
    fn test_defaults() {
        let empty = TrackTags::default();
        assert_eq!(
            generate_path(
                "[albumArtist]/[album]/[discNumber]-[trackNumber] [title] [year] [genre] [composer]",
                &empty,
                "a.wav"
            ),
            "Unknown Artist/Unknown Album/1-00 Unknown Title 0000 Unknown Genre Unknown Composer.wav"
        );
    }

    #[test]
    fn test_album_artist_falls_back_to_artist() {
        assert_eq!(
            generate_path("[albumArtist]", &tags(), "a.mp3"),
            "Daft Punk.mp3"
        );
    }

    #[test]
    fn test_empty_placeholders_drop_components() {
        assert_eq!(
            generate_path("[copyright]/[artist]/[encodedBy]/[title]", &tags(), "a.mp3"),
            "Daft Punk/One More Time.mp3"
        );
    }

    #[test]
    fn test_sanitization() {
        let nasty = TrackTags {
            artist: Some("..AC/DC".into()),
            title: Some("What?  Is:  \"This\"".into()),
            ..Default::default()
        };
        // "/" inside a tag value splits into components
        assert_eq!(
            generate_path("[artist] - [title]", &nasty, "t.mp3"),
            "AC/DC - What- Is- -This-.mp3"
        );
        assert_eq!(sanitize_component("  .hidden  "), "hidden");
        assert_eq!(sanitize_component("   "), "");
        assert_eq!(sanitize_component("a<b>c|d"), "a-b-c-d");
    }

    #[test]
    fn test_underscore_tag_is_kept() {
        let t = TrackTags {
            album: Some("_".into()),
            ..tags()
        };
        assert_eq!(
            generate_path(DEFAULT_PATTERN, &t, "a.mp3"),
            "Daft Punk/_/01 - One More Time.mp3"
        );
    }

    #[test]
    fn test_extension_defaults_to_mp3() {
        assert_eq!(generate_path("[title]", &tags(), "noext"), "One More Time.mp3");
    }

    #[test]
    fn test_tag_text_is_not_reexpanded() {
        let t = TrackTags {
            title: Some("Live [year]".into()),
            ..tags()
        };
        assert_eq!(generate_path("[title]", &t, "a.mp3"), "Live [year].mp3");
    }

    #[test]
    fn test_preview_marks_collisions() {
        let tracks = vec![
            LibraryTrack::new("/in/a.mp3", 1, tags()),
            LibraryTrack::new("/in/b.mp3", 1, tags()),
            LibraryTrack::new("/in/c.flac", 1, tags()),
        ];
        let plans = preview_organization(&tracks, DEFAULT_PATTERN);
        assert_eq!(plans.len(), 3);
        assert!(plans[0].collides && plans[1].collides);
        assert!(!plans[2].collides);
        assert_eq!(plans[2].destination, "Daft Punk/Discovery/01 - One More Time.flac");
    }
}
