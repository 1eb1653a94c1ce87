//! Loudness-contour fingerprints for duplicate detection.
//!
//! A fingerprint is one hex digit per 200 ms window, each digit the window's
//! RMS energy quantized to 0-15. Two fingerprints are compared as sequences
//! with a small alignment search, so re-encodes and files with slightly
//! different lead-in still match.

use crate::analyzer::decode::PcmBuffer;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Window length in seconds.
pub const WINDOW_SECS: f64 = 0.2;
/// RMS is scaled by this before truncating to a level.
const LEVEL_SCALE: f64 = 100.0;
const MAX_LEVEL: u8 = 15;

/// Per-window credit: full within one level, half within two.
const FULL_CREDIT_DIFF: u8 = 1;
const HALF_CREDIT_DIFF: u8 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from quantized levels; values above 15 are clamped.
    pub fn from_levels(levels: impl IntoIterator<Item = u8>) -> Self {
        let s = levels
            .into_iter()
            .map(|l| {
                char::from_digit(l.min(MAX_LEVEL) as u32, 16).unwrap_or('0')
            })
            .collect();
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The 0-15 level of every window.
    pub fn levels(&self) -> Vec<u8> {
        self.0
            .chars()
            .filter_map(|c| c.to_digit(16))
            .map(|d| d as u8)
            .collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fingerprint contains non-hex character {0:?}")]
pub struct ParseFingerprintError(pub char);

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ParseFingerprintError(bad));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// Fingerprint mono PCM.
///
/// The trailing partial window is kept and its energy is averaged over a
/// full window length, so it reads quieter than the audio it holds.
pub fn generate(pcm: &PcmBuffer) -> Fingerprint {
    let window = (pcm.sample_rate as f64 * WINDOW_SECS).floor() as usize;
    if window == 0 || pcm.samples.is_empty() {
        return Fingerprint::empty();
    }

    let levels = pcm.samples.chunks(window).map(|chunk| {
        let sum: f64 = chunk.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum / window as f64).sqrt();
        ((rms * LEVEL_SCALE).floor() as u64).min(MAX_LEVEL as u64) as u8
    });

    Fingerprint::from_levels(levels)
}

/// Offset-tolerant fingerprint comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerprintMatcher {
    /// Alignments tried in each direction, in windows.
    pub max_offset: usize,
    /// Similarity a pair must exceed to count as duplicates.
    pub threshold: f64,
}

impl Default for FingerprintMatcher {
    fn default() -> Self {
        Self {
            max_offset: 10,
            threshold: 0.85,
        }
    }
}

impl FingerprintMatcher {
    pub fn new(max_offset: usize, threshold: f64) -> Self {
        Self {
            max_offset,
            threshold,
        }
    }

    /// Best per-window agreement over all offsets in `-max_offset..=max_offset`, in [0, 1].
    pub fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let a = a.levels();
        let b = b.levels();
        let len = a.len().min(b.len());
        let max_offset = self.max_offset as isize;

        let mut best = 0.0f64;
        for offset in -max_offset..=max_offset {
            let mut credit = 0.0;
            let mut compared = 0usize;

            for (i, &level) in a.iter().enumerate().take(len) {
                let j = i as isize + offset;
                if j < 0 || j as usize >= b.len() {
                    continue;
                }
                let diff = level.abs_diff(b[j as usize]);
                if diff <= FULL_CREDIT_DIFF {
                    credit += 1.0;
                } else if diff <= HALF_CREDIT_DIFF {
                    credit += 0.5;
                }
                compared += 1;
            }

            if compared > 0 {
                best = best.max(credit / compared as f64);
            }
        }
        best
    }

    pub fn is_duplicate(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        self.compare(a, b) > self.threshold
    }
}

/// Compare with the default ±10 window alignment search.
pub fn compare_fingerprints(a: &Fingerprint, b: &Fingerprint) -> f64 {
    FingerprintMatcher::default().compare(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        s.parse().unwrap()
    }

    /// Deterministic pseudo-random levels.
    fn noise_levels(seed: u64, n: usize) -> Vec<u8> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % 16) as u8
            })
            .collect()
    }

    #[test]
    fn test_generate_constant_level() {
        let pcm = PcmBuffer::new(vec![0.05; 11025], 11025);
        let fp = generate(&pcm);
        assert_eq!(fp.len(), 5);
        assert!(fp.as_str().chars().all(|c| c == '5'), "{}", fp);
    }

    #[test]
    fn test_generate_clamps_and_silence() {
        let loud = generate(&PcmBuffer::new(vec![0.9; 4410], 11025));
        assert_eq!(loud.as_str(), "ff");
        let quiet = generate(&PcmBuffer::new(vec![0.0; 4410], 11025));
        assert_eq!(quiet.as_str(), "00");
    }

    #[test]
    fn test_partial_window_averages_over_full_window() {
        // 2205-sample windows; the tail holds a quarter window.
        let mut samples = vec![0.1f32; 2205];
        samples.extend(vec![0.1f32; 551]);
        let fp = generate(&PcmBuffer::new(samples, 11025));
        assert_eq!(fp.len(), 2);
        assert_eq!(fp.levels()[0], 10);
        assert!(fp.levels()[1] < 10);
    }

    #[test]
    fn test_generate_deterministic() {
        let samples: Vec<f32> = (0..11025 * 10)
            .map(|i| (i as f32 * 0.01).sin() * ((i / 5000) % 4) as f32 * 0.05)
            .collect();
        let pcm = PcmBuffer::new(samples, 11025);
        assert_eq!(generate(&pcm), generate(&pcm));
        assert_eq!(generate(&pcm).len(), 50);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(generate(&PcmBuffer::new(vec![], 11025)).is_empty());
        assert_eq!(compare_fingerprints(&Fingerprint::empty(), &fp("0123")), 0.0);
        assert_eq!(compare_fingerprints(&fp("0123"), &Fingerprint::empty()), 0.0);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let a = Fingerprint::from_levels(noise_levels(7, 300));
        assert_eq!(compare_fingerprints(&a, &a), 1.0);
    }

    #[test]
    fn test_credit_tolerance() {
        let direct = FingerprintMatcher::new(0, 0.85);
        assert_eq!(direct.compare(&fp("5555"), &fp("6666")), 1.0);
        assert_eq!(direct.compare(&fp("5555"), &fp("7777")), 0.5);
        assert_eq!(direct.compare(&fp("0000"), &fp("ffff")), 0.0);
    }

    #[test]
    fn test_monotonicity() {
        let levels = noise_levels(42, 300);
        let original = Fingerprint::from_levels(levels.clone());

        let mut shifted_levels = vec![3u8];
        shifted_levels.extend_from_slice(&levels[..levels.len() - 1]);
        let shifted = Fingerprint::from_levels(shifted_levels);

        let random = Fingerprint::from_levels(noise_levels(1234, 300));

        let same = compare_fingerprints(&original, &original);
        let near = compare_fingerprints(&original, &shifted);
        let far = compare_fingerprints(&original, &random);
        assert!(same >= near, "{} < {}", same, near);
        assert!(near >= far, "{} < {}", near, far);
        assert!(near > 0.95);
        assert!(far < 0.6);
    }

    #[test]
    fn test_offset_outside_window_not_found() {
        let levels = noise_levels(9, 200);
        let a = Fingerprint::from_levels(levels.clone());
        let b = Fingerprint::from_levels(levels[20..].iter().copied());
        let narrow = FingerprintMatcher::new(10, 0.85);
        let wide = FingerprintMatcher::new(25, 0.85);
        assert!(narrow.compare(&a, &b) < 0.85);
        assert_eq!(wide.compare(&b, &a), 1.0);
        assert!(wide.is_duplicate(&b, &a));
        assert!(!narrow.is_duplicate(&a, &b));
    }

    #[test]
    fn test_parse() {
        assert_eq!(fp("0aF").as_str(), "0af");
        assert_eq!("01g".parse::<Fingerprint>(), Err(ParseFingerprintError('g')));
    }
}
