pub mod analyzer;
pub mod config;
pub mod duplicates;
pub mod fingerprint;
pub mod harmonic;
pub mod health;
pub mod organizer;
pub mod scanner;
pub mod similarity;

/// Audio file extensions we support (everything symphonia probes)
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "wav", "aif", "aiff", "m4a", "mp4", "aac", "caf",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "cratedig";
