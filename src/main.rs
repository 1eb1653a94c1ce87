use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cratedig::analyzer::decode::{self, AudioBlob};
use cratedig::analyzer::tempo::TapTempo;
use cratedig::config::AppConfig;
use cratedig::duplicates::{FileFingerprinter, ScanProgress};
use cratedig::fingerprint::{Fingerprint, FingerprintMatcher};
use cratedig::harmonic::{self, CamelotKey};
use cratedig::scanner::{self, LibraryTrack};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "cratedig", version, about = "DJ music library analyzer")]
struct Cli {
    /// Config file (defaults to ~/.config/cratedig/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect tempo, key and fingerprint for audio files
    Analyze {
        /// Files or directories (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Estimate the tempo of a file
    Tempo { file: PathBuf },

    /// Estimate the musical key of a file
    Key { file: PathBuf },

    /// Print the loudness fingerprint of a file
    Fingerprint { file: PathBuf },

    /// Compare two files (or two fingerprints with --raw)
    Compare {
        a: String,
        b: String,

        /// Treat arguments as hex fingerprints instead of file paths
        #[arg(long)]
        raw: bool,
    },

    /// Rate the harmonic transition between two keys (Camelot or musical notation)
    Transition {
        from: String,

        /// Target key; omit to list every compatible key
        to: Option<String>,
    },

    /// Recommend tracks that mix well after a seed track
    Similar {
        seed: PathBuf,

        /// Library files or directories (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Fill missing BPM and key tags from audio analysis
        #[arg(long)]
        analyze: bool,

        /// Number of results (defaults to config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Find duplicate tracks by name, tags and audio fingerprint
    Duplicates {
        /// Files or directories (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Cut a 15 second WAV preview from a file
    Snippet {
        file: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Score tag completeness
    Health {
        /// Files or directories (defaults to config file music_dirs)
        paths: Vec<PathBuf>,
    },

    /// Preview a folder layout built from tags
    Organize {
        /// Files or directories (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Folder pattern (defaults to config)
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Tap a tempo: press Enter on each beat, q to quit
    Tap,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path).context("Failed to load config")?,
        None => AppConfig::load(),
    };
    let json = cli.json;

    match cli.command {
        Commands::Analyze { paths, jobs } => {
            let files = scanner::collect_audio_files(&library_roots(paths, &config)?)
                .context("Scan failed")?;
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let report = cratedig::analyzer::analyze_batch(&files, &config.analysis, workers)
                .context("Analysis failed")?;

            if json {
                return print_json(&report);
            }
            println!("{:<6} {:<5} {:<12} File", "BPM", "Key", "");
            for file in &report.results {
                let a = &file.analysis;
                let (camelot, name) = match &a.key {
                    Some(k) => (k.camelot.to_string(), k.key.to_string()),
                    None => ("-".to_string(), String::new()),
                };
                println!(
                    "{:<6} {:<5} {:<12} {}",
                    bpm_text(a.bpm),
                    camelot,
                    name,
                    file.path.display()
                );
            }
            print_failures(&report.failures);
            println!(
                "Analysis complete: {} analyzed, {} failed",
                report.results.len(),
                report.failures.len()
            );
        }

        Commands::Tempo { file } => {
            let blob = read_blob(&file)?;
            let bpm = cratedig::analyzer::detect_tempo(&blob, &config.analysis)
                .context("Tempo detection failed")?;
            if json {
                return print_json(&serde_json::json!({ "bpm": bpm }));
            }
            println!("{}", bpm_text(bpm));
        }

        Commands::Key { file } => {
            let blob = read_blob(&file)?;
            let estimate = cratedig::analyzer::detect_key(&blob, &config.analysis)
                .context("Key detection failed")?;
            if json {
                return print_json(&estimate);
            }
            println!(
                "{} ({}) confidence {:.2}",
                estimate.key, estimate.camelot, estimate.confidence
            );
        }

        Commands::Fingerprint { file } => {
            let blob = read_blob(&file)?;
            let fp = cratedig::analyzer::try_generate_fingerprint(&blob, &config.analysis)
                .context("Fingerprinting failed")?;
            if json {
                return print_json(&serde_json::json!({ "fingerprint": fp }));
            }
            println!("{}", fp);
        }

        Commands::Compare { a, b, raw } => {
            let fingerprint = |arg: &str| -> Result<Fingerprint> {
                if raw {
                    return arg.parse().context("Invalid fingerprint");
                }
                let blob = read_blob(Path::new(arg))?;
                cratedig::analyzer::try_generate_fingerprint(&blob, &config.analysis)
                    .with_context(|| format!("Fingerprinting {} failed", arg))
            };
            let (fp_a, fp_b) = (fingerprint(&a)?, fingerprint(&b)?);
            let matcher: FingerprintMatcher = config.duplicates.matcher();
            let similarity = matcher.compare(&fp_a, &fp_b);
            let duplicate = similarity > matcher.threshold;
            if json {
                return print_json(&serde_json::json!({
                    "similarity": similarity,
                    "duplicate": duplicate,
                }));
            }
            println!(
                "Similarity: {:.1}%{}",
                similarity * 100.0,
                if duplicate { " (duplicate)" } else { "" }
            );
        }

        Commands::Transition { from, to } => {
            let from_key = CamelotKey::resolve(&from)
                .with_context(|| format!("Unrecognized key \"{}\"", from))?;

            match to {
                Some(to) => {
                    let transition = match CamelotKey::resolve(&to) {
                        Some(to_key) => harmonic::transition_between(from_key, to_key),
                        None => harmonic::analyze_transition(&from, &to),
                    };
                    if json {
                        return print_json(&transition);
                    }
                    println!(
                        "{} -> {}: {} ({}) - {}",
                        from_key, to, transition.kind, transition.score, transition.description
                    );
                }
                None => {
                    let keys = harmonic::compatible_keys(from_key);
                    if json {
                        let rows: Vec<_> = keys
                            .iter()
                            .map(|(k, t)| serde_json::json!({ "key": k, "transition": t }))
                            .collect();
                        return print_json(&rows);
                    }
                    println!("Compatible with {}:", from_key);
                    for (key, t) in keys {
                        println!("  {:<4} {:>3}  {:<16} {}", key, t.score, t.kind, t.description);
                    }
                }
            }
        }

        Commands::Similar {
            seed,
            paths,
            analyze,
            limit,
        } => {
            let mut seed_track = LibraryTrack::from_path(&seed)
                .with_context(|| format!("Cannot read {}", seed.display()))?;
            let mut library = scanner::scan(&library_roots(paths, &config)?)
                .context("Scan failed")?
                .tracks;

            if analyze {
                fill_from_analysis(std::slice::from_mut(&mut seed_track), &config)?;
                fill_from_analysis(&mut library, &config)?;
            }

            let mut cfg = config.similarity.clone();
            if let Some(limit) = limit {
                cfg.max_results = limit;
            }
            let results =
                cratedig::similarity::find_similar_tracks(&seed_track, &library, &cfg);

            if json {
                return print_json(&results);
            }
            if results.is_empty() {
                println!("No compatible tracks found.");
                return Ok(());
            }
            println!("Tracks to mix after {}:", seed.display());
            println!();
            println!(
                "{:>5}  {:>6} {:<5} {:<3} {:<3} {:<3}  File",
                "Score", "BPM", "Key", "B", "K", "G"
            );
            for r in &results {
                let tags = r.track.effective_tags();
                let flag = |m: bool| if m { "*" } else { "" };
                println!(
                    "{:>5.1}  {:>6} {:<5} {:<3} {:<3} {:<3}  {}",
                    r.fit.score,
                    tags.bpm_value().map(|b| format!("{:.1}", b)).unwrap_or_else(|| "-".into()),
                    tags.initial_key.as_deref().unwrap_or("-"),
                    flag(r.fit.matches.bpm),
                    flag(r.fit.matches.key),
                    flag(r.fit.matches.genre),
                    r.track.path.display()
                );
            }
        }

        Commands::Duplicates { paths, jobs } => {
            let tracks = scanner::scan(&library_roots(paths, &config)?)
                .context("Scan failed")?
                .tracks;
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let source = FileFingerprinter::new(config.analysis.clone());

            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
                    .context("Invalid progress template")?
                    .progress_chars("#>-"),
            );
            let mut sink = |p: ScanProgress| {
                pb.set_position(p.percent as u64);
                pb.set_message(p.message);
            };
            let cancel = AtomicBool::new(false);
            let report = cratedig::duplicates::find_duplicates(
                &tracks,
                &config.duplicates,
                workers,
                &source,
                &mut sink,
                &cancel,
            )
            .context("Duplicate scan failed")?;
            pb.finish_and_clear();

            if json {
                return print_json(&report);
            }
            if report.groups.is_empty() {
                println!("No duplicates found.");
            }
            for group in &report.groups {
                println!("[{}] {} ({}%)", group.id, group.label, group.similarity);
                for member in &group.members {
                    println!("    {}", member.display());
                }
            }
            print_failures(&report.failures);
        }

        Commands::Snippet { file, output } => {
            let blob = read_blob(&file)?;
            let wav = decode::extract_snippet(&blob).context("Snippet extraction failed")?;
            std::fs::write(&output, &wav)
                .with_context(|| format!("Cannot write {}", output.display()))?;
            println!("Wrote {} ({} bytes)", output.display(), wav.len());
        }

        Commands::Health { paths } => {
            let tracks = scanner::scan(&library_roots(paths, &config)?)
                .context("Scan failed")?
                .tracks;
            let report = cratedig::health::library_health(&tracks);

            if json {
                let rows: Vec<_> = report
                    .iter()
                    .map(|(t, h)| serde_json::json!({ "path": t.path, "health": h }))
                    .collect();
                return print_json(&rows);
            }
            for (track, health) in &report {
                println!(
                    "{:>3} {:<8} {}",
                    health.score,
                    format!("{:?}", health.rating),
                    track.path.display()
                );
                if !health.missing.is_empty() {
                    println!("      missing: {}", health.missing.join(", "));
                }
                for issue in &health.issues {
                    println!("      issue: {}", issue);
                }
            }
        }

        Commands::Organize { paths, pattern } => {
            let tracks = scanner::scan(&library_roots(paths, &config)?)
                .context("Scan failed")?
                .tracks;
            let pattern = pattern.unwrap_or_else(|| config.organizer.pattern.clone());
            let plans = cratedig::organizer::preview_organization(&tracks, &pattern);

            if json {
                return print_json(&plans);
            }
            for plan in &plans {
                println!(
                    "{}{} -> {}",
                    if plan.collides { "! " } else { "" },
                    plan.source.display(),
                    plan.destination
                );
            }
        }

        Commands::Tap => {
            println!("Press Enter on every beat, q + Enter to quit.");
            let start = Instant::now();
            let mut tap = TapTempo::new();
            for line in std::io::stdin().lock().lines() {
                let line = line.context("Failed to read stdin")?;
                if line.trim().eq_ignore_ascii_case("q") {
                    break;
                }
                match tap.tap(start.elapsed().as_millis() as u64) {
                    Some(bpm) => println!("{} BPM", bpm),
                    None => println!("..."),
                }
            }
        }
    }

    Ok(())
}

/// CLI args > config music_dirs.
fn library_roots(paths: Vec<PathBuf>, config: &AppConfig) -> Result<Vec<PathBuf>> {
    if !paths.is_empty() {
        Ok(paths)
    } else if !config.music_dirs.is_empty() {
        Ok(config.music_dirs.clone())
    } else {
        anyhow::bail!("No music to scan. Pass paths as arguments or set music_dirs in config.");
    }
}

fn read_blob(path: &Path) -> Result<AudioBlob> {
    AudioBlob::read(path).with_context(|| format!("Cannot read {}", path.display()))
}

/// Analyze tracks missing BPM or key and fill those tags in.
fn fill_from_analysis(tracks: &mut [LibraryTrack], config: &AppConfig) -> Result<()> {
    let needs: Vec<PathBuf> = tracks
        .iter()
        .filter(|t| {
            let tags = t.effective_tags();
            tags.bpm_value().is_none() || tags.initial_key.is_none()
        })
        .map(|t| t.path.clone())
        .collect();
    if needs.is_empty() {
        return Ok(());
    }

    let report =
        cratedig::analyzer::analyze_batch(&needs, &config.analysis, config.resolve_workers())
            .context("Analysis failed")?;
    for file in &report.results {
        if let Some(track) = tracks.iter_mut().find(|t| t.path == file.path) {
            track.tags.fill_from_analysis(&file.analysis);
        }
    }
    Ok(())
}

fn bpm_text(bpm: u32) -> String {
    if bpm == 0 { "-".to_string() } else { bpm.to_string() }
}

fn print_failures(failures: &[cratedig::analyzer::FileFailure]) {
    for f in failures {
        eprintln!("  failed: {} ({})", f.path.display(), f.error);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
