use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Ring of the Camelot wheel: A = minor keys, B = major keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CamelotLetter {
    A,
    B,
}

/// A position on the Camelot wheel, e.g. `8A` (A minor) or `8B` (C major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CamelotKey {
    hour: u8,
    letter: CamelotLetter,
}

impl CamelotKey {
    /// Build a key from an hour (1-12) and ring letter.
    pub fn new(hour: u8, letter: CamelotLetter) -> Option<Self> {
        if (1..=12).contains(&hour) {
            Some(Self { hour, letter })
        } else {
            None
        }
    }

    /// Entries of the fixed key tables, which only hold hours 1..=12.
    pub(crate) const fn from_table(hour: u8, letter: CamelotLetter) -> Self {
        Self { hour, letter }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn letter(&self) -> CamelotLetter {
        self.letter
    }

    /// All 24 wheel positions, 1A, 1B, 2A ... 12B.
    pub fn all() -> impl Iterator<Item = CamelotKey> {
        (1..=12u8).flat_map(|hour| {
            [CamelotLetter::A, CamelotLetter::B]
                .into_iter()
                .map(move |letter| CamelotKey { hour, letter })
        })
    }

    /// Resolve free-form key text: Camelot first ("08a"), then musical notation ("Am").
    pub fn resolve(text: &str) -> Option<CamelotKey> {
        text.parse::<CamelotKey>().ok().or_else(|| {
            text.parse::<crate::analyzer::key::MusicalKey>()
                .ok()
                .map(|k| k.camelot())
        })
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.letter {
            CamelotLetter::A => 'A',
            CamelotLetter::B => 'B',
        };
        f.pad(&format!("{}{}", self.hour, letter))
    }
}

impl Serialize for CamelotKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a Camelot key: {0:?}")]
pub struct ParseCamelotError(pub String);

impl FromStr for CamelotKey {
    type Err = ParseCamelotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = normalize_key(s);
        let err = || ParseCamelotError(s.to_string());

        let Some((split, last)) = clean.char_indices().last() else {
            return Err(err());
        };
        let digits = &clean[..split];
        let letter = match last {
            'A' => CamelotLetter::A,
            'B' => CamelotLetter::B,
            _ => return Err(err()),
        };
        if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u8 = digits.parse().map_err(|_| err())?;
        CamelotKey::new(hour, letter).ok_or_else(err)
    }
}

/// Normalize Camelot spellings: trims, upper-cases and drops a single
/// leading zero on three-character keys ("08a" -> "8A").
pub fn normalize_key(key: &str) -> String {
    let clean = key.trim().to_uppercase();
    if clean.len() == 3 && clean.starts_with('0') {
        clean[1..].to_string()
    } else {
        clean
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionKind {
    Perfect,
    #[serde(rename = "Energy Boost")]
    EnergyBoost,
    #[serde(rename = "Energy Drop")]
    EnergyDrop,
    #[serde(rename = "Harmonic Change")]
    HarmonicChange,
    Dissonant,
}

impl TransitionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Perfect => "Perfect",
            Self::EnergyBoost => "Energy Boost",
            Self::EnergyDrop => "Energy Drop",
            Self::HarmonicChange => "Harmonic Change",
            Self::Dissonant => "Dissonant",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Compatibility of mixing from one key into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HarmonicTransition {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    pub description: &'static str,
    /// 0-100 compatibility.
    pub score: u8,
}

impl HarmonicTransition {
    const fn new(kind: TransitionKind, description: &'static str, score: u8) -> Self {
        Self { kind, description, score }
    }
}

const UNKNOWN_KEY: HarmonicTransition =
    HarmonicTransition::new(TransitionKind::Dissonant, "Unknown key", 0);

/// Classify a transition between two keys given in Camelot notation.
///
/// Unparseable keys on either side yield `Dissonant` with score 0.
pub fn analyze_transition(from_key: &str, to_key: &str) -> HarmonicTransition {
    match (from_key.parse::<CamelotKey>(), to_key.parse::<CamelotKey>()) {
        (Ok(from), Ok(to)) => transition_between(from, to),
        _ => UNKNOWN_KEY,
    }
}

/// Classify a transition between two parsed wheel positions.
///
/// Rules are checked in priority order; same-hour checks must run before the
/// hour-distance checks.
pub fn transition_between(from: CamelotKey, to: CamelotKey) -> HarmonicTransition {
    use TransitionKind::*;

    let same_letter = from.letter == to.letter;

    if from.hour == to.hour {
        return if same_letter {
            HarmonicTransition::new(Perfect, "Same key (perfect mix)", 100)
        } else {
            HarmonicTransition::new(Perfect, "Relative major/minor (mood change)", 95)
        };
    }

    // Clockwise distance, wrapping 12 -> 1 as +1.
    let diff = (to.hour as i16 - from.hour as i16).rem_euclid(12);

    match (diff, same_letter) {
        (1, true) => HarmonicTransition::new(EnergyBoost, "Energy boost (+1)", 90),
        (11, true) => HarmonicTransition::new(EnergyDrop, "Energy drop (-1)", 85),
        (1, false) => HarmonicTransition::new(
            HarmonicChange,
            "Diagonal mix (energy up + mood change)",
            70,
        ),
        (11, false) => HarmonicTransition::new(
            HarmonicChange,
            "Diagonal mix (energy down + mood change)",
            70,
        ),
        (7, true) => HarmonicTransition::new(EnergyBoost, "Semitone modulation (+7h)", 60),
        (2 | 10, true) => HarmonicTransition::new(HarmonicChange, "Compatible (+/- 2h)", 50),
        _ => HarmonicTransition::new(Dissonant, "Incompatible keys", 10),
    }
}

/// Every wheel position reachable from `key` without a dissonant transition,
/// best score first (ties in wheel order).
pub fn compatible_keys(key: CamelotKey) -> Vec<(CamelotKey, HarmonicTransition)> {
    let mut keys: Vec<_> = CamelotKey::all()
        .map(|to| (to, transition_between(key, to)))
        .filter(|(_, t)| t.kind != TransitionKind::Dissonant)
        .collect();
    keys.sort_by(|a, b| b.1.score.cmp(&a.1.score));
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_score(a: &str, b: &str) -> (TransitionKind, u8) {
        let t = analyze_transition(a, b);
        (t.kind, t.score)
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("08A"), "8A");
        assert_eq!(normalize_key(" 8a "), "8A");
        assert_eq!(normalize_key("12b"), "12B");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn test_parse_camelot() {
        let k: CamelotKey = "08a".parse().unwrap();
        assert_eq!(k.hour(), 8);
        assert_eq!(k.letter(), CamelotLetter::A);
        assert_eq!(k.to_string(), "8A");

        assert!("13A".parse::<CamelotKey>().is_err());
        assert!("0A".parse::<CamelotKey>().is_err());
        assert!("8C".parse::<CamelotKey>().is_err());
        assert!("A".parse::<CamelotKey>().is_err());
        assert!("Am".parse::<CamelotKey>().is_err());
    }

    #[test]
    fn test_rule_table() {
        use TransitionKind::*;
        assert_eq!(kind_score("8A", "8A"), (Perfect, 100));
        assert_eq!(kind_score("8A", "8B"), (Perfect, 95));
        assert_eq!(kind_score("8A", "9A"), (EnergyBoost, 90));
        assert_eq!(kind_score("8A", "7A"), (EnergyDrop, 85));
        assert_eq!(kind_score("8A", "9B"), (HarmonicChange, 70));
        assert_eq!(kind_score("8A", "7B"), (HarmonicChange, 70));
        assert_eq!(kind_score("8A", "3A"), (EnergyBoost, 60));
        assert_eq!(kind_score("8A", "10A"), (HarmonicChange, 50));
        assert_eq!(kind_score("8A", "6A"), (HarmonicChange, 50));
        assert_eq!(kind_score("8A", "1A"), (Dissonant, 10));
        assert_eq!(kind_score("8A", "10B"), (Dissonant, 10));
    }

    #[test]
    fn test_wraparound() {
        use TransitionKind::*;
        assert_eq!(kind_score("12A", "1A"), (EnergyBoost, 90));
        assert_eq!(kind_score("1B", "12B"), (EnergyDrop, 85));
        assert_eq!(kind_score("11A", "1A"), (HarmonicChange, 50));
    }

    #[test]
    fn test_unknown_keys() {
        assert_eq!(kind_score("", "8A"), (TransitionKind::Dissonant, 0));
        assert_eq!(kind_score("8A", "H7"), (TransitionKind::Dissonant, 0));
        assert_eq!(kind_score("Am", "8A"), (TransitionKind::Dissonant, 0));
    }

    #[test]
    fn test_leading_zero_and_case() {
        assert_eq!(kind_score("08a", "9A"), (TransitionKind::EnergyBoost, 90));
    }

    #[test]
    fn test_resolve_musical_notation() {
        assert_eq!(CamelotKey::resolve("Am").map(|k| k.to_string()), Some("8A".into()));
        assert_eq!(CamelotKey::resolve("C Major").map(|k| k.to_string()), Some("8B".into()));
        assert_eq!(CamelotKey::resolve("09b").map(|k| k.to_string()), Some("9B".into()));
        assert_eq!(CamelotKey::resolve("nonsense"), None);
    }

    #[test]
    fn test_compatible_keys() {
        let key: CamelotKey = "8A".parse().unwrap();
        let compat = compatible_keys(key);
        // self, relative, +1, -1, two diagonals, +7, +2, -2
        assert_eq!(compat.len(), 9);
        assert_eq!(compat[0].0, key);
        assert_eq!(compat[0].1.score, 100);
        assert!(compat.windows(2).all(|w| w[0].1.score >= w[1].1.score));
    }

    #[test]
    fn test_wheel_has_24_positions() {
        assert_eq!(CamelotKey::all().count(), 24);
    }
}
