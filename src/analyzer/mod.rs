pub mod decode;
pub mod key;
pub mod tempo;

use crate::config::AnalysisConfig;
use crate::fingerprint::{self, Fingerprint};
use decode::{AudioBlob, DecodeError, DecodeOptions};
use indicatif::{ProgressBar, ProgressStyle};
use key::{KeyEstimate, KeyMethod};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("Analysis worker panicked")]
    WorkerPanicked,
    #[error("Failed to start analysis worker: {0}")]
    Spawn(std::io::Error),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Everything derived from one file's audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackAnalysis {
    /// 0 when undetermined.
    pub bpm: u32,
    /// `None` when the audio carried no pitched content.
    pub key: Option<KeyEstimate>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedFile {
    pub path: PathBuf,
    #[serde(flatten)]
    pub analysis: TrackAnalysis,
}

/// A file that could not be analyzed, and why.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<AnalyzedFile>,
    pub failures: Vec<FileFailure>,
}

fn analysis_options(cfg: &AnalysisConfig) -> DecodeOptions {
    DecodeOptions::new(Some(cfg.sample_rate), cfg.window_secs)
}

fn fingerprint_options(cfg: &AnalysisConfig) -> DecodeOptions {
    DecodeOptions::new(Some(cfg.fingerprint_sample_rate), cfg.fingerprint_window_secs)
}

/// Tempo of a file in whole BPM, 0 when undetermined.
pub fn detect_tempo(blob: &AudioBlob, cfg: &AnalysisConfig) -> Result<u32, AnalyzeError> {
    let pcm = decode::decode(blob, &analysis_options(cfg))?;
    Ok(tempo::detect_tempo(&pcm.samples, pcm.sample_rate))
}

/// Key of a file using the configured method.
pub fn detect_key(blob: &AudioBlob, cfg: &AnalysisConfig) -> Result<KeyEstimate, AnalyzeError> {
    let pcm = decode::decode(blob, &analysis_options(cfg))?;
    Ok(key_of(blob, &pcm, cfg.key_method))
}

fn key_of(blob: &AudioBlob, pcm: &decode::PcmBuffer, method: KeyMethod) -> KeyEstimate {
    match method {
        KeyMethod::Chroma => key::estimate_key(&pcm.samples, pcm.sample_rate),
        KeyMethod::Legacy => {
            key::legacy_key(blob.len(), pcm.samples.first().copied().unwrap_or(0.0))
        }
    }
}

pub fn try_generate_fingerprint(
    blob: &AudioBlob,
    cfg: &AnalysisConfig,
) -> Result<Fingerprint, AnalyzeError> {
    let pcm = decode::decode(blob, &fingerprint_options(cfg))?;
    Ok(fingerprint::generate(&pcm))
}

/// Fingerprint a file; an empty fingerprint means no signature is available.
pub fn generate_fingerprint(blob: &AudioBlob, cfg: &AnalysisConfig) -> Fingerprint {
    match try_generate_fingerprint(blob, cfg) {
        Ok(fp) => fp,
        Err(e) => {
            log::warn!("No fingerprint for {}: {}", blob.name(), e);
            Fingerprint::empty()
        }
    }
}

/// Tempo, key and fingerprint of an in-memory file.
pub fn analyze_blob(blob: &AudioBlob, cfg: &AnalysisConfig) -> Result<TrackAnalysis, AnalyzeError> {
    let pcm = decode::decode(blob, &analysis_options(cfg))?;
    let bpm = tempo::detect_tempo(&pcm.samples, pcm.sample_rate);
    let estimate = key_of(blob, &pcm, cfg.key_method);
    let key = match cfg.key_method {
        KeyMethod::Chroma if estimate.confidence <= 0.0 => None,
        _ => Some(estimate),
    };
    drop(pcm);

    let fingerprint = try_generate_fingerprint(blob, cfg)?;

    log::debug!(
        "Analyzed {}: {} BPM, key {}, {} fingerprint windows",
        blob.name(),
        bpm,
        key.map(|k| k.camelot.to_string()).unwrap_or_else(|| "?".into()),
        fingerprint.len()
    );

    Ok(TrackAnalysis {
        bpm,
        key,
        fingerprint,
    })
}

/// Read and analyze a file, bounded by the configured per-file timeout.
pub fn analyze_file(path: &Path, cfg: &AnalysisConfig) -> Result<TrackAnalysis, AnalyzeError> {
    let path = path.to_path_buf();
    let job_cfg = cfg.clone();
    with_timeout(cfg.timeout(), move || {
        let blob = AudioBlob::read(&path)?;
        analyze_blob(&blob, &job_cfg)
    })
}

/// Run `job` on a worker thread and give up after `timeout`.
///
/// A timed-out worker is detached: it runs to completion in the background
/// and its result is dropped.
pub fn with_timeout<T, F>(timeout: Option<Duration>, job: F) -> Result<T, AnalyzeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AnalyzeError> + Send + 'static,
{
    let Some(limit) = timeout else {
        return job();
    };

    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("cratedig-analyze".into())
        .spawn(move || {
            // The receiver is gone if we already timed out.
            let _ = tx.send(job());
        })
        .map_err(AnalyzeError::Spawn)?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(AnalyzeError::Timeout(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(AnalyzeError::WorkerPanicked),
    }
}

/// Analyze files in parallel on a pool of `jobs` threads.
///
/// Files are processed in chunks of `jobs * 2` so memory stays bounded.
/// A failing file is recorded in `failures` and never stops the batch.
pub fn analyze_batch(
    paths: &[PathBuf],
    cfg: &AnalysisConfig,
    jobs: usize,
) -> Result<BatchReport, AnalyzeError> {
    let mut report = BatchReport::default();
    if paths.is_empty() {
        log::info!("No tracks to analyze");
        return Ok(report);
    }

    let jobs = jobs.max(1);
    log::info!("Analyzing {} tracks with {} workers", paths.len(), jobs);

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    for chunk in paths.chunks(jobs * 2) {
        let results: Vec<_> = pool.install(|| {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|path| {
                    let result = analyze_file(path, cfg);
                    pb.inc(1);
                    (path, result)
                })
                .collect()
        });

        for (path, result) in results {
            match result {
                Ok(analysis) => report.results.push(AnalyzedFile {
                    path: path.clone(),
                    analysis,
                }),
                Err(e) => {
                    log::warn!("Analysis failed for {}: {}", path.display(), e);
                    report.failures.push(FileFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        pb.set_message(format!(
            "{} analyzed, {} failed",
            report.results.len(),
            report.failures.len()
        ));
    }

    pb.finish_with_message(format!(
        "Done: {} analyzed, {} failed",
        report.results.len(),
        report.failures.len()
    ));

    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::test_signals::*;
    use super::*;

    #[test]
    fn test_detect_tempo_from_wav() {
        let blob = wav_blob("click.wav", &click_track(120.0, 22050, 20.0));
        assert_eq!(detect_tempo(&blob, &AnalysisConfig::default()).unwrap(), 120);
    }

    #[test]
    fn test_detect_key_from_wav() {
        let blob = wav_blob("am.wav", &chord(&[220.0, 261.63, 329.63], 22050, 5.0));
        let est = detect_key(&blob, &AnalysisConfig::default()).unwrap();
        assert_eq!(est.camelot.to_string(), "8A");
    }

    #[test]
    fn test_detect_key_legacy() {
        let blob = wav_blob("am.wav", &chord(&[220.0], 22050, 1.0));
        let cfg = AnalysisConfig {
            key_method: KeyMethod::Legacy,
            ..Default::default()
        };
        let a = detect_key(&blob, &cfg).unwrap();
        let b = detect_key(&blob, &cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, key::legacy_key(blob.len(), 0.0));
    }

    #[test]
    fn test_fingerprint_failure_is_empty() {
        let blob = AudioBlob::new("junk.mp3", vec![1u8; 2048]);
        let cfg = AnalysisConfig::default();
        assert!(generate_fingerprint(&blob, &cfg).is_empty());
        assert!(matches!(
            try_generate_fingerprint(&blob, &cfg),
            Err(AnalyzeError::Decode(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let blob = wav_blob("click.wav", &click_track(128.0, 44100, 10.0));
        let cfg = AnalysisConfig::default();
        let a = generate_fingerprint(&blob, &cfg);
        assert!(!a.is_empty());
        assert_eq!(a, generate_fingerprint(&blob, &cfg));
        // 10 s at 200 ms per window
        assert!((a.len() as i64 - 50).abs() <= 1, "{} windows", a.len());
    }

    #[test]
    fn test_analyze_silence_has_no_key() {
        let blob = wav_blob("silence.wav", &decode::PcmBuffer::new(vec![0.0; 22050 * 3], 22050));
        let analysis = analyze_blob(&blob, &AnalysisConfig::default()).unwrap();
        assert_eq!(analysis.bpm, 0);
        assert_eq!(analysis.key, None);
        assert!(analysis.fingerprint.as_str().chars().all(|c| c == '0'));
    }

    #[test]
    fn test_with_timeout() {
        let ok = with_timeout(Some(Duration::from_secs(5)), || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let slow = with_timeout(Some(Duration::from_millis(20)), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(1)
        });
        assert!(matches!(slow, Err(AnalyzeError::Timeout(_))));

        let panicked: Result<u32, _> =
            with_timeout(Some(Duration::from_secs(5)), || panic!("decoder blew up"));
        assert!(matches!(panicked, Err(AnalyzeError::WorkerPanicked)));

        let inline = with_timeout(None, || Ok("no thread"));
        assert_eq!(inline.unwrap(), "no thread");
    }

    #[test]
    fn test_analyze_batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.wav");
        let bad = dir.path().join("bad.mp3");
        let missing = dir.path().join("missing.wav");
        let blob = wav_blob("good.wav", &click_track(120.0, 22050, 20.0));
        std::fs::write(&good, blob.bytes()).unwrap();
        std::fs::write(&bad, b"garbage").unwrap();

        let report = analyze_batch(
            &[good.clone(), bad.clone(), missing.clone()],
            &AnalysisConfig::default(),
            2,
        )
        .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].path, good);
        assert_eq!(report.results[0].analysis.bpm, 120);
        let failed: Vec<_> = report.failures.iter().map(|f| f.path.clone()).collect();
        assert_eq!(failed, vec![bad, missing]);
    }
}
