//! Musical key estimation.
//!
//! The default method builds a 12-bin chroma vector from windowed FFT frames
//! and correlates it against Krumhansl-Schmuckler major/minor profiles rotated
//! to every tonic. A legacy placeholder method is kept for libraries whose
//! stored keys were produced by it.

use crate::harmonic::{CamelotKey, CamelotLetter};
use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Krumhansl-Schmuckler probe-tone profile, tonic first.
pub const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

pub const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

// Camelot hour per pitch class (C..B).
const CAMELOT_MAJOR_HOURS: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
const CAMELOT_MINOR_HOURS: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

const FFT_SIZE: usize = 4096;
const HOP_SIZE: usize = 2048;
const MIN_FREQ: f64 = 65.0;
const MAX_FREQ: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Major,
    Minor,
}

/// A (pitch class, mode) pair. Pitch class 0 = C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MusicalKey {
    tonic: u8,
    mode: Mode,
}

impl MusicalKey {
    pub fn new(tonic: u8, mode: Mode) -> Self {
        Self { tonic: tonic % 12, mode }
    }

    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// "C Major", "A# Minor".
    pub fn name(&self) -> String {
        let mode = match self.mode {
            Mode::Major => "Major",
            Mode::Minor => "Minor",
        };
        format!("{} {}", NOTE_NAMES[self.tonic as usize], mode)
    }

    pub fn camelot(&self) -> CamelotKey {
        let (hour, letter) = match self.mode {
            Mode::Major => (CAMELOT_MAJOR_HOURS[self.tonic as usize], CamelotLetter::B),
            Mode::Minor => (CAMELOT_MINOR_HOURS[self.tonic as usize], CamelotLetter::A),
        };
        CamelotKey::from_table(hour, letter)
    }

    /// All 24 keys: the 12 majors then the 12 minors.
    pub fn all() -> impl Iterator<Item = MusicalKey> {
        [Mode::Major, Mode::Minor]
            .into_iter()
            .flat_map(|mode| (0..12u8).map(move |tonic| MusicalKey { tonic, mode }))
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a musical key: {0:?}")]
pub struct ParseKeyError(pub String);

fn pitch_class(note: &str) -> Option<u8> {
    let mut chars = note.chars();
    let base = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let shift: i8 = match chars.as_str() {
        "" => 0,
        "#" | "♯" => 1,
        "b" | "♭" => -1,
        _ => return None,
    };
    Some((base + shift).rem_euclid(12) as u8)
}

impl FromStr for MusicalKey {
    type Err = ParseKeyError;

    /// Accepts "C Major", "a minor", "Am", "F#m", "Bb", "Ebmin", "C maj".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError(s.to_string());
        let text = s.trim();
        if text.is_empty() {
            return Err(err());
        }

        let (note, suffix) = match text.find(char::is_whitespace) {
            Some(i) => (&text[..i], text[i..].trim()),
            None => {
                // Attached suffix: note is the letter plus an optional accidental.
                let accidental_len = text
                    .char_indices()
                    .nth(1)
                    .filter(|(_, c)| matches!(c, '#' | 'b' | '♯' | '♭'))
                    .map(|(i, c)| i + c.len_utf8());
                let split = accidental_len.unwrap_or_else(|| {
                    text.char_indices().nth(1).map(|(i, _)| i).unwrap_or(text.len())
                });
                (&text[..split], &text[split..])
            }
        };

        let mode = match suffix.to_lowercase().as_str() {
            "" | "maj" | "major" | "dur" => Mode::Major,
            "m" | "min" | "minor" | "moll" => Mode::Minor,
            _ => return Err(err()),
        };
        let tonic = pitch_class(note).ok_or_else(err)?;
        Ok(MusicalKey::new(tonic, mode))
    }
}

/// How keys are estimated from audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMethod {
    /// Chroma vector correlated against key profiles.
    #[default]
    Chroma,
    /// Stable placeholder derived from file size and the first sample.
    Legacy,
}

/// Result of key estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyEstimate {
    #[serde(serialize_with = "serialize_display")]
    pub key: MusicalKey,
    pub camelot: CamelotKey,
    /// 0..1, how clearly the best key stood out.
    pub confidence: f32,
}

fn serialize_display<S: serde::Serializer>(key: &MusicalKey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(key)
}

impl KeyEstimate {
    fn from_key(key: MusicalKey, confidence: f32) -> Self {
        Self {
            key,
            camelot: key.camelot(),
            confidence,
        }
    }
}

impl From<MusicalKey> for KeyEstimate {
    fn from(key: MusicalKey) -> Self {
        Self::from_key(key, 1.0)
    }
}

/// Estimate the key of mono PCM. Deterministic for identical input.
/// Silence and clips shorter than one FFT frame return C Major with zero confidence.
pub fn estimate_key(samples: &[f32], sample_rate: u32) -> KeyEstimate {
    let chroma = compute_chroma(samples, sample_rate);
    key_from_chroma(&chroma)
}

/// Pick the best-correlating (tonic, mode) for a chroma vector.
pub fn key_from_chroma(chroma: &[f64; 12]) -> KeyEstimate {
    let mut best = MusicalKey::new(0, Mode::Major);
    let mut best_corr = f64::NEG_INFINITY;
    let mut second_corr = f64::NEG_INFINITY;

    for key in MusicalKey::all() {
        let profile = match key.mode {
            Mode::Major => &MAJOR_PROFILE,
            Mode::Minor => &MINOR_PROFILE,
        };
        let corr = pearson_rotated(chroma, profile, key.tonic as usize);
        if corr > best_corr {
            second_corr = best_corr;
            best_corr = corr;
            best = key;
        } else if corr > second_corr {
            second_corr = corr;
        }
    }

    let confidence = if best_corr > 0.0 {
        let gap = ((best_corr - second_corr) * 8.0).clamp(0.0, 1.0);
        (gap * 0.7 + best_corr.clamp(0.0, 1.0) * 0.3).clamp(0.0, 1.0)
    } else {
        0.0
    };

    log::trace!("key {} corr={:.3} second={:.3}", best, best_corr, second_corr);
    KeyEstimate::from_key(best, confidence as f32)
}

/// Placeholder estimator: a stable key derived from file size and the first
/// decoded sample. Musically meaningless, kept for compatibility.
pub fn legacy_key(file_size: u64, first_sample: f32) -> KeyEstimate {
    let seed = file_size as f64 + first_sample as f64 * 10000.0;
    let tonic = seed.rem_euclid(12.0).floor() as u8;
    let mode = if (seed * 7.0).rem_euclid(2.0).floor() == 0.0 {
        Mode::Major
    } else {
        Mode::Minor
    };
    KeyEstimate::from_key(MusicalKey::new(tonic, mode), 0.0)
}

/// Sum FFT power per pitch class over Hann-windowed frames, normalized to 1.
pub fn compute_chroma(samples: &[f32], sample_rate: u32) -> [f64; 12] {
    let mut chroma = [0.0f64; 12];
    if samples.len() < FFT_SIZE || sample_rate == 0 {
        return chroma;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);

    let window: Vec<f64> = (0..FFT_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (FFT_SIZE - 1) as f64).cos()))
        .collect();

    // 12-TET mapping with A4 = 440 Hz; +9 moves A to index 9 (C = 0).
    let bin_pitch_class: Vec<Option<usize>> = (0..FFT_SIZE / 2 + 1)
        .map(|bin| {
            let freq = bin as f64 * sample_rate as f64 / FFT_SIZE as f64;
            if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
                return None;
            }
            let semitones = (12.0 * (freq / 440.0).log2()).round() as i32;
            Some((semitones + 9).rem_euclid(12) as usize)
        })
        .collect();

    let mut buffer: Vec<Complex<f64>> = Vec::with_capacity(FFT_SIZE);
    let frames = (samples.len() - FFT_SIZE) / HOP_SIZE + 1;

    for frame in 0..frames {
        let start = frame * HOP_SIZE;
        buffer.clear();
        buffer.extend(
            samples[start..start + FFT_SIZE]
                .iter()
                .zip(&window)
                .map(|(&s, &w)| Complex::new(s as f64 * w, 0.0)),
        );
        fft.process(&mut buffer);

        for (bin, pc) in bin_pitch_class.iter().enumerate() {
            if let Some(pc) = pc {
                chroma[*pc] += buffer[bin].norm_sqr();
            }
        }
    }

    let total: f64 = chroma.iter().sum();
    if total > 0.0 {
        for v in chroma.iter_mut() {
            *v /= total;
        }
    }
    chroma
}

/// Pearson correlation of `chroma` against `profile` rotated so index 0 sits on `root`.
fn pearson_rotated(chroma: &[f64; 12], profile: &[f64; 12], root: usize) -> f64 {
    let n = 12.0;
    let (mut sx, mut sy, mut sxy, mut sx2, mut sy2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (i, &y) in profile.iter().enumerate() {
        let x = chroma[(root + i) % 12];
        sx += x;
        sy += y;
        sxy += x * y;
        sx2 += x * x;
        sy2 += y * y;
    }
    let denom = ((n * sx2 - sx * sx) * (n * sy2 - sy * sy)).sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        (n * sxy - sx * sy) / denom
    }
}
