use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analyzer::TrackAnalysis;

/// Tag fields the library works with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    /// Free text as tagged; see [`TrackTags::year_number`].
    pub year: Option<String>,
    pub genre: Option<String>,
    pub bpm: Option<f64>,
    /// Key as tagged, Camelot ("8A") or musical ("Am") notation.
    pub initial_key: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub composer: Option<String>,
    pub copyright: Option<String>,
    pub original_artist: Option<String>,
    pub encoded_by: Option<String>,
    /// Audio bitrate in kbps.
    pub bitrate: Option<u32>,
    pub has_cover: bool,
    pub duration_secs: Option<f64>,
}

impl TrackTags {
    /// Leading digits of the year field, so "2019-05-01" reads as 2019.
    pub fn year_number(&self) -> Option<i32> {
        let year = self.year.as_deref()?.trim_start();
        let digits: String = year.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    /// BPM when tagged and non-zero.
    pub fn bpm_value(&self) -> Option<f64> {
        self.bpm.filter(|&b| b > 0.0 && b.is_finite())
    }

    /// Merge tags looked up elsewhere: every field present in `fetched` wins.
    pub fn overlay(&mut self, fetched: &TrackTags) {
        fn take<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }

        take(&mut self.title, &fetched.title);
        take(&mut self.artist, &fetched.artist);
        take(&mut self.album, &fetched.album);
        take(&mut self.album_artist, &fetched.album_artist);
        take(&mut self.year, &fetched.year);
        take(&mut self.genre, &fetched.genre);
        take(&mut self.bpm, &fetched.bpm);
        take(&mut self.initial_key, &fetched.initial_key);
        take(&mut self.track_number, &fetched.track_number);
        take(&mut self.disc_number, &fetched.disc_number);
        take(&mut self.composer, &fetched.composer);
        take(&mut self.copyright, &fetched.copyright);
        take(&mut self.original_artist, &fetched.original_artist);
        take(&mut self.encoded_by, &fetched.encoded_by);
        take(&mut self.bitrate, &fetched.bitrate);
        take(&mut self.duration_secs, &fetched.duration_secs);
        self.has_cover |= fetched.has_cover;
    }

    /// Fill BPM and key from audio analysis where the tags have none.
    pub fn fill_from_analysis(&mut self, analysis: &TrackAnalysis) {
        if self.bpm_value().is_none() && analysis.bpm > 0 {
            self.bpm = Some(analysis.bpm as f64);
        }
        let has_key = self
            .initial_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key {
            if let Some(key) = &analysis.key {
                self.initial_key = Some(key.camelot.to_string());
            }
        }
    }
}

/// Read tags from an audio file. Returns empty tags on failure.
pub fn read_tags(path: &Path) -> TrackTags {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return TrackTags::default();
        }
    };

    let props = tagged_file.properties();
    let duration_secs = Some(props.duration().as_secs_f64()).filter(|&s| s > 0.0);
    let bitrate = props.audio_bitrate().filter(|&b| b > 0);

    let tag = match tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
    {
        Some(t) => t,
        None => {
            return TrackTags {
                bitrate,
                duration_secs,
                ..TrackTags::default()
            };
        }
    };

    let text = |key: &ItemKey| {
        tag.get_string(key)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let bpm = text(&ItemKey::Bpm)
        .or_else(|| text(&ItemKey::IntegerBpm))
        .and_then(|s| s.parse::<f64>().ok());

    TrackTags {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        album_artist: text(&ItemKey::AlbumArtist),
        year: tag
            .year()
            .map(|y| y.to_string())
            .or_else(|| text(&ItemKey::RecordingDate)),
        genre: tag.genre().map(|s| s.to_string()),
        bpm,
        initial_key: text(&ItemKey::InitialKey),
        track_number: tag.track(),
        disc_number: tag.disk(),
        composer: text(&ItemKey::Composer),
        copyright: text(&ItemKey::CopyrightMessage),
        original_artist: text(&ItemKey::OriginalArtist),
        encoded_by: text(&ItemKey::EncodedBy),
        bitrate,
        has_cover: tag.picture_count() > 0,
        duration_secs,
    }
}
