use crate::config::SimilarityConfig;
use crate::harmonic::{CamelotKey, HarmonicTransition, transition_between};
use crate::scanner::{self, LibraryTrack};
use crate::scanner::metadata::TrackTags;
use rayon::prelude::*;
use serde::Serialize;

/// Per-signal sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub bpm: f64,
    pub key: f64,
    pub genre: f64,
    pub year: f64,
}

/// Which signals cleared their match threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalMatches {
    pub bpm: bool,
    pub key: bool,
    pub genre: bool,
}

/// How well a candidate fits next to a seed track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairScore {
    /// Weighted total, 0-100.
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub matches: SignalMatches,
    /// Key transition from seed to candidate, when both keys are known.
    pub transition: Option<HarmonicTransition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation<'a> {
    pub track: &'a LibraryTrack,
    #[serde(flatten)]
    pub fit: PairScore,
}

/// Rank `library` by how well each track mixes after `seed`.
///
/// Scores strictly above `min_score` survive, best first, at most
/// `max_results`. The seed itself is never recommended.
pub fn find_similar_tracks<'a>(
    seed: &LibraryTrack,
    library: &'a [LibraryTrack],
    cfg: &SimilarityConfig,
) -> Vec<Recommendation<'a>> {
    let w = cfg.weights;
    if w.bpm + w.key + w.genre + w.year <= 0.0 {
        log::warn!("All similarity weights are zero, nothing to rank");
        return Vec::new();
    }

    let seed_tags = seed.effective_tags();

    let mut results: Vec<Recommendation<'a>> = library
        .par_iter()
        .filter(|track| !scanner::same_file(&track.path, &seed.path))
        .map(|track| Recommendation {
            track,
            fit: score_pair(&seed_tags, &track.effective_tags(), cfg),
        })
        .filter(|r| r.fit.score > cfg.min_score)
        .collect();

    results.sort_by(|a, b| {
        b.fit
            .score
            .partial_cmp(&a.fit.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(cfg.max_results);

    log::debug!(
        "{} recommendations for {}",
        results.len(),
        seed.path.display()
    );
    results
}

/// Score one candidate against a seed's tags.
pub fn score_pair(seed: &TrackTags, candidate: &TrackTags, cfg: &SimilarityConfig) -> PairScore {
    let transition = match (key_of(seed), key_of(candidate)) {
        (Some(from), Some(to)) => Some(transition_between(from, to)),
        _ => None,
    };

    let breakdown = ScoreBreakdown {
        bpm: bpm_score(seed.bpm_value(), candidate.bpm_value(), cfg.bpm_tolerance),
        key: transition.map_or(0.0, |t| t.score as f64 / 100.0),
        genre: genre_score(seed.genre.as_deref(), candidate.genre.as_deref()),
        year: year_score(seed.year_number(), candidate.year_number()),
    };

    let w = cfg.weights;
    let total_weight = w.bpm + w.key + w.genre + w.year;
    let score = if total_weight > 0.0 {
        (breakdown.bpm * w.bpm
            + breakdown.key * w.key
            + breakdown.genre * w.genre
            + breakdown.year * w.year)
            / total_weight
            * 100.0
    } else {
        0.0
    };

    let t = cfg.thresholds;
    PairScore {
        score,
        breakdown,
        matches: SignalMatches {
            bpm: breakdown.bpm > t.bpm,
            key: breakdown.key > t.key,
            genre: breakdown.genre > t.genre,
        },
        transition,
    }
}

fn key_of(tags: &TrackTags) -> Option<CamelotKey> {
    tags.initial_key.as_deref().and_then(CamelotKey::resolve)
}

/// Linear falloff from 1 at equal tempo to 0 at `tolerance` relative deviation.
fn bpm_score(seed: Option<f64>, candidate: Option<f64>, tolerance: f64) -> f64 {
    let (Some(seed), Some(candidate)) = (seed, candidate) else {
        return 0.0;
    };
    if tolerance <= 0.0 {
        return if seed == candidate { 1.0 } else { 0.0 };
    }
    let deviation = (seed - candidate).abs() / seed;
    if deviation > tolerance {
        0.0
    } else {
        1.0 - deviation / tolerance
    }
}

fn genre_score(seed: Option<&str>, candidate: Option<&str>) -> f64 {
    let clean = |g: Option<&str>| {
        g.map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    };
    let (Some(seed), Some(candidate)) = (clean(seed), clean(candidate)) else {
        return 0.0;
    };
    if seed == candidate {
        1.0
    } else if seed.contains(&candidate) || candidate.contains(&seed) {
        0.8
    } else {
        0.0
    }
}

fn year_score(seed: Option<i32>, candidate: Option<i32>) -> f64 {
    let (Some(seed), Some(candidate)) = (seed, candidate) else {
        return 0.0;
    };
    match (seed - candidate).abs() {
        0 => 1.0,
        1..=5 => 0.8,
        6..=10 => 0.5,
        _ => 0.0,
    }
}
