use crate::scanner::LibraryTrack;
use crate::scanner::metadata::TrackTags;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthRating {
    Bad,
    Average,
    Good,
    Perfect,
}

impl HealthRating {
    fn from_score(score: u8) -> Self {
        match score {
            100.. => Self::Perfect,
            80..=99 => Self::Good,
            50..=79 => Self::Average,
            _ => Self::Bad,
        }
    }
}

/// How complete and trustworthy a track's tags are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataHealth {
    /// 0-100.
    pub score: u8,
    pub rating: HealthRating,
    pub missing: Vec<&'static str>,
    pub issues: Vec<String>,
}

const SUSPICIOUS_BPM_LOW: f64 = 50.0;
const SUSPICIOUS_BPM_HIGH: f64 = 250.0;
const LOW_BITRATE_KBPS: u32 = 128;

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Score tag completeness: text fields 40, cover 20, DJ fields 30, bitrate 10.
pub fn metadata_health(tags: &TrackTags) -> MetadataHealth {
    let mut score: u8 = 0;
    let mut missing = Vec::new();
    let mut issues = Vec::new();

    let mut check = |ok: bool, points: u8, name: &'static str| {
        if ok {
            score += points;
        } else {
            missing.push(name);
        }
    };

    check(present(&tags.title), 15, "Title");
    check(present(&tags.artist), 15, "Artist");
    check(present(&tags.album), 10, "Album");
    check(tags.has_cover, 20, "Cover");
    check(tags.bpm_value().is_some(), 10, "BPM");
    check(present(&tags.initial_key), 10, "Key");
    check(present(&tags.genre), 5, "Genre");
    check(present(&tags.year), 5, "Year");

    if let Some(bpm) = tags.bpm_value() {
        if !(SUSPICIOUS_BPM_LOW..=SUSPICIOUS_BPM_HIGH).contains(&bpm) {
            issues.push(format!("Suspicious BPM ({})", bpm));
        }
    }

    score += match tags.bitrate.unwrap_or(0) {
        320.. => 10,
        256..=319 => 8,
        192..=255 => 5,
        b @ 1.. if b < LOW_BITRATE_KBPS => {
            issues.push(format!("Low audio quality ({} kbps)", b));
            2
        }
        _ => 0,
    };

    MetadataHealth {
        score,
        rating: HealthRating::from_score(score),
        missing,
        issues,
    }
}

/// Health of every track, least healthy first.
pub fn library_health(tracks: &[LibraryTrack]) -> Vec<(&LibraryTrack, MetadataHealth)> {
    let mut report: Vec<_> = tracks
        .iter()
        .map(|t| (t, metadata_health(&t.effective_tags())))
        .collect();
    report.sort_by_key(|(_, h)| h.score);
    report
}
