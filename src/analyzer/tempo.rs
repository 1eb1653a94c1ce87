//! Coarse tempo estimation by kick-drum peak picking.
//!
//! This is an approximate heuristic tuned for four-on-the-floor dance music,
//! not a beat tracker: waveform peaks stand in for onsets and the most common
//! inter-peak interval wins.

use std::collections::{BTreeMap, VecDeque};

/// Samples skipped between threshold checks.
const STRIDE: usize = 4;
/// Amplitude a sample must exceed to be a peak candidate.
const PEAK_THRESHOLD: f32 = 0.3;
/// A candidate must not be exceeded within this many following samples.
const LOCAL_MAX_WINDOW: usize = 1000;
/// Refractory period after a peak; caps detection at 240 BPM.
const REFRACTORY_SECS: f64 = 0.25;
/// Fewer peaks than this and the estimate is undetermined.
const MIN_PEAKS: usize = 10;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 180.0;
/// Histogram bucket width in BPM.
const BUCKET_BPM: f64 = 2.0;

/// Estimate tempo in whole BPM. Returns 0 when undetermined.
pub fn detect_tempo(samples: &[f32], sample_rate: u32) -> u32 {
    if sample_rate == 0 {
        return 0;
    }

    let peaks = find_peaks(samples, sample_rate);
    if peaks.len() < MIN_PEAKS {
        log::debug!("tempo undetermined: only {} peaks", peaks.len());
        return 0;
    }

    // BTreeMap so ties resolve to the slowest bucket.
    let mut histogram: BTreeMap<u32, u32> = BTreeMap::new();
    for pair in peaks.windows(2) {
        let interval = (pair[1] - pair[0]) as f64;
        let bpm = (60.0 * sample_rate as f64 / interval).round();
        if (MIN_BPM..=MAX_BPM).contains(&bpm) {
            let bucket = ((bpm / BUCKET_BPM).round() * BUCKET_BPM) as u32;
            *histogram.entry(bucket).or_insert(0) += 1;
        }
    }

    let mut best_bpm = 0;
    let mut best_count = 0;
    for (&bpm, &count) in &histogram {
        if count > best_count {
            best_count = count;
            best_bpm = bpm;
        }
    }

    log::debug!(
        "tempo {} BPM ({} peaks, {} votes)",
        best_bpm,
        peaks.len(),
        best_count
    );
    best_bpm
}

/// Sample indices of percussive peaks.
fn find_peaks(samples: &[f32], sample_rate: u32) -> Vec<usize> {
    let refractory = (sample_rate as f64 * REFRACTORY_SECS).floor() as usize;
    let mut peaks = Vec::new();
    let mut i = 0;

    while i < samples.len() {
        let value = samples[i];
        if value > PEAK_THRESHOLD {
            let end = (i + LOCAL_MAX_WINDOW).min(samples.len());
            let is_peak = samples[i + 1..end].iter().all(|&s| s <= value);
            if is_peak {
                peaks.push(i);
                i += refractory;
            }
        }
        i += STRIDE;
    }

    peaks
}

/// Longest pause between taps before the history restarts.
const TAP_RESET_MS: u64 = 2000;
/// Taps kept for the rolling average.
const TAP_HISTORY: usize = 8;

/// Manual tap-tempo: feed tap timestamps, read back a rolling BPM.
#[derive(Debug, Default)]
pub struct TapTempo {
    taps: VecDeque<u64>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tap at `at_ms` (any monotonic millisecond clock).
    /// Returns the BPM once at least two taps are in the history.
    pub fn tap(&mut self, at_ms: u64) -> Option<u32> {
        // A long pause or a clock that stepped back starts a new sequence.
        if let Some(&last) = self.taps.back() {
            if at_ms <= last || at_ms - last > TAP_RESET_MS {
                self.taps.clear();
            }
        }

        self.taps.push_back(at_ms);
        if self.taps.len() > TAP_HISTORY {
            self.taps.pop_front();
        }

        self.bpm()
    }

    pub fn bpm(&self) -> Option<u32> {
        let first = *self.taps.front()?;
        let last = *self.taps.back()?;
        let intervals = self.taps.len().checked_sub(1).filter(|&n| n > 0)?;
        let avg = last.saturating_sub(first) as f64 / intervals as f64;
        if avg <= 0.0 {
            return None;
        }
        Some((60_000.0 / avg).round() as u32)
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }
}
