//! Library-wide duplicate detection.
//!
//! Cheap checks run first: identical file names, then identical artist and
//! title. Whatever is left is bucketed by file size and only files sharing a
//! bucket are decoded and fingerprinted, so most of the library is never
//! decoded at all.

use crate::analyzer::decode::AudioBlob;
use crate::analyzer::{self, AnalyzeError, FileFailure};
use crate::config::{AnalysisConfig, DuplicateConfig};
use crate::fingerprint::Fingerprint;
use crate::scanner::LibraryTrack;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateKind {
    Filename,
    Metadata,
    Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: DuplicateKind,
    pub label: String,
    pub members: Vec<PathBuf>,
    /// 0-100.
    pub similarity: u8,
}

#[derive(Debug, Default, Serialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    /// Files that could not be fingerprinted.
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanProgress {
    /// 0-100, never decreasing within a scan.
    pub percent: u8,
    pub message: String,
}

/// Receives progress updates on the scanning thread.
pub trait ProgressSink {
    fn report(&mut self, progress: ScanProgress);
}

impl<F: FnMut(ScanProgress)> ProgressSink for F {
    fn report(&mut self, progress: ScanProgress) {
        self(progress)
    }
}

impl ProgressSink for mpsc::Sender<ScanProgress> {
    fn report(&mut self, progress: ScanProgress) {
        // A dropped receiver just means nobody is watching.
        let _ = self.send(progress);
    }
}

/// Discards progress.
impl ProgressSink for () {
    fn report(&mut self, _progress: ScanProgress) {}
}

/// Produces fingerprints for tracks. Called from worker threads.
pub trait FingerprintSource: Sync {
    fn fingerprint(&self, track: &LibraryTrack) -> Result<Fingerprint, AnalyzeError>;
}

/// Reads and decodes files from disk, bounded by the per-file timeout.
pub struct FileFingerprinter {
    cfg: AnalysisConfig,
}

impl FileFingerprinter {
    pub fn new(cfg: AnalysisConfig) -> Self {
        Self { cfg }
    }
}

impl FingerprintSource for FileFingerprinter {
    fn fingerprint(&self, track: &LibraryTrack) -> Result<Fingerprint, AnalyzeError> {
        let path = track.path.clone();
        let cfg = self.cfg.clone();
        analyzer::with_timeout(self.cfg.timeout(), move || {
            let blob = AudioBlob::read(&path)?;
            analyzer::try_generate_fingerprint(&blob, &cfg)
        })
    }
}

struct Progress<'a> {
    sink: &'a mut dyn ProgressSink,
    last: u8,
}

impl Progress<'_> {
    fn report(&mut self, percent: u8, message: impl Into<String>) {
        let percent = percent.clamp(self.last, 100);
        self.last = percent;
        self.sink.report(ScanProgress {
            percent,
            message: message.into(),
        });
    }
}

/// Strip everything but lower-case ASCII letters and digits.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Group indices by key, keeping first-seen order of keys.
fn group_by_key(items: impl IntoIterator<Item = (String, usize)>) -> Vec<(String, Vec<usize>)> {
    let mut order: Vec<(String, Vec<usize>)> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    for (key, idx) in items {
        match position.get(&key) {
            Some(&pos) => order[pos].1.push(idx),
            None => {
                position.insert(key.clone(), order.len());
                order.push((key, vec![idx]));
            }
        }
    }
    order
}

/// Find duplicate tracks in `tracks`.
///
/// Fingerprinting runs `jobs` files at a time. Per-file failures land in
/// the report and never abort the scan. Setting `cancel` stops the scan
/// between fingerprint chunks; the groups found so far are returned.
pub fn find_duplicates(
    tracks: &[LibraryTrack],
    cfg: &DuplicateConfig,
    jobs: usize,
    source: &dyn FingerprintSource,
    progress: &mut dyn ProgressSink,
    cancel: &AtomicBool,
) -> Result<DuplicateReport, AnalyzeError> {
    let mut progress = Progress {
        sink: progress,
        last: 0,
    };
    let mut report = DuplicateReport::default();
    let mut grouped: HashSet<usize> = HashSet::new();
    let mut next_id = 1;

    progress.report(10, "Analyzing filenames...");

    let by_name = group_by_key(
        tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.file_name().to_lowercase(), i)),
    );
    for (name, members) in by_name {
        if members.len() < 2 {
            continue;
        }
        grouped.extend(&members);
        report.groups.push(DuplicateGroup {
            id: next_id,
            kind: DuplicateKind::Filename,
            label: format!("Filename: {}", name),
            members: members.iter().map(|&i| tracks[i].path.clone()).collect(),
            similarity: 100,
        });
        next_id += 1;
    }

    progress.report(20, "Analyzing metadata...");

    let by_tags = group_by_key(tracks.iter().enumerate().filter_map(|(i, t)| {
        if grouped.contains(&i) {
            return None;
        }
        let tags = t.effective_tags();
        let artist = normalize(tags.artist.as_deref().unwrap_or(""));
        let title = normalize(tags.title.as_deref().unwrap_or(""));
        if artist.is_empty() || title.is_empty() {
            return None;
        }
        Some((format!("{}|{}", artist, title), i))
    }));
    for (_, members) in by_tags {
        if members.len() < 2 {
            continue;
        }
        let tags = tracks[members[0]].effective_tags();
        grouped.extend(&members);
        report.groups.push(DuplicateGroup {
            id: next_id,
            kind: DuplicateKind::Metadata,
            label: format!(
                "Tags: {} - {}",
                tags.artist.unwrap_or_default(),
                tags.title.unwrap_or_default()
            ),
            members: members.iter().map(|&i| tracks[i].path.clone()).collect(),
            similarity: 100,
        });
        next_id += 1;
    }

    progress.report(40, "Grouping candidates for audio analysis...");

    let bucket_bytes = cfg.size_bucket_mib * BYTES_PER_MIB;
    let buckets: Vec<Vec<usize>> = group_by_key(
        tracks
            .iter()
            .enumerate()
            .filter(|(i, _)| !grouped.contains(i))
            .map(|(i, t)| {
                let bucket = if bucket_bytes > 0.0 {
                    (t.size as f64 / bucket_bytes).floor() as u64
                } else {
                    t.size
                };
                (bucket.to_string(), i)
            }),
    )
    .into_iter()
    .map(|(_, members)| members)
    .filter(|members| members.len() > 1)
    .collect();

    let total: usize = buckets.iter().map(Vec::len).sum();
    log::info!(
        "Fingerprinting {} candidates in {} size buckets",
        total,
        buckets.len()
    );

    let jobs = jobs.max(1);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
    let matcher = cfg.matcher();
    let mut prints: HashMap<usize, Fingerprint> = HashMap::new();
    let mut analyzed = 0usize;

    'buckets: for bucket in &buckets {
        for chunk in bucket.chunks(jobs) {
            if cancel.load(Ordering::Relaxed) {
                log::info!("Duplicate scan cancelled after {} files", analyzed);
                report.cancelled = true;
                break 'buckets;
            }

            let results: Vec<_> = pool.install(|| {
                use rayon::prelude::*;
                chunk
                    .par_iter()
                    .map(|&i| (i, source.fingerprint(&tracks[i])))
                    .collect()
            });

            for (i, result) in results {
                let pct = 40 + (analyzed * 60 / total.max(1)) as u8;
                progress.report(pct, format!("Analyzing audio: {}", tracks[i].file_name()));
                analyzed += 1;
                match result {
                    Ok(fp) => {
                        prints.insert(i, fp);
                    }
                    Err(e) => {
                        log::warn!("Skipping {}: {}", tracks[i].path.display(), e);
                        report.failures.push(FileFailure {
                            path: tracks[i].path.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        for (a, &i) in bucket.iter().enumerate() {
            for &j in &bucket[a + 1..] {
                if grouped.contains(&i) && grouped.contains(&j) {
                    continue;
                }
                let (Some(fp_i), Some(fp_j)) = (prints.get(&i), prints.get(&j)) else {
                    continue;
                };
                let similarity = matcher.compare(fp_i, fp_j);
                if similarity > matcher.threshold {
                    let pct = (similarity * 100.0).round() as u8;
                    report.groups.push(DuplicateGroup {
                        id: next_id,
                        kind: DuplicateKind::Fingerprint,
                        label: format!("Audio Match (~{}%)", pct),
                        members: vec![tracks[i].path.clone(), tracks[j].path.clone()],
                        similarity: pct,
                    });
                    next_id += 1;
                    grouped.insert(i);
                    grouped.insert(j);
                }
            }
        }

        let pct = 40 + (analyzed * 60 / total.max(1)) as u8;
        progress.report(
            pct,
            format!(
                "Compared {} fingerprints ({} groups so far)",
                bucket.len(),
                report.groups.len()
            ),
        );
    }

    if report.cancelled {
        progress.report(100, "Cancelled.");
    } else {
        progress.report(100, "Done.");
    }

    log::info!(
        "Found {} duplicate groups ({} files failed)",
        report.groups.len(),
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_signals::{click_track, wav_blob};
    use crate::scanner::metadata::TrackTags;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FakeSource {
        prints: HashMap<PathBuf, Option<&'static str>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(prints: &[(&str, Option<&'static str>)]) -> Self {
            Self {
                prints: prints
                    .iter()
                    .map(|(p, fp)| (PathBuf::from(p), *fp))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FingerprintSource for FakeSource {
        fn fingerprint(&self, track: &LibraryTrack) -> Result<Fingerprint, AnalyzeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.prints.get(&track.path).copied().flatten() {
                Some(fp) => Ok(fp.parse().unwrap()),
                None => Err(AnalyzeError::Timeout(Duration::from_secs(30))),
            }
        }
    }

    fn track(path: &str, size: u64) -> LibraryTrack {
        LibraryTrack::new(path, size, TrackTags::default())
    }

    fn tagged(path: &str, size: u64, artist: &str, title: &str) -> LibraryTrack {
        LibraryTrack::new(
            path,
            size,
            TrackTags {
                artist: Some(artist.into()),
                title: Some(title.into()),
                ..Default::default()
            },
        )
    }

    fn run(tracks: &[LibraryTrack], source: &dyn FingerprintSource) -> DuplicateReport {
        find_duplicates(
            tracks,
            &DuplicateConfig::default(),
            2,
            source,
            &mut (),
            &AtomicBool::new(false),
        )
        .unwrap()
    }

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_filename_groups() {
        let tracks = vec![
            track("/a/Song.mp3", MIB),
            track("/b/song.MP3", 9 * MIB),
            track("/c/other.mp3", 3 * MIB),
        ];
        let source = FakeSource::new(&[]);
        let report = run(&tracks, &source);

        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.kind, DuplicateKind::Filename);
        assert_eq!(group.similarity, 100);
        assert_eq!(group.label, "Filename: song.mp3");
        assert_eq!(group.members.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_metadata_groups_normalize_tags() {
        let tracks = vec![
            tagged("/a/1.mp3", MIB, "The Artist!", "Song (Mix)"),
            tagged("/b/2.flac", 30 * MIB, "the artist", "song mix"),
            tagged("/c/3.mp3", 5 * MIB, "Someone", "Else"),
        ];
        let report = run(&tracks, &FakeSource::new(&[]));
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].kind, DuplicateKind::Metadata);
        assert_eq!(report.groups[0].label, "Tags: The Artist! - Song (Mix)");
    }

    #[test]
    fn test_fingerprint_groups_within_bucket_only() {
        let tracks = vec![
            track("/a.mp3", 4 * MIB + 10),
            track("/b.mp3", 4 * MIB + 20),
            track("/c.mp3", 4 * MIB + 30),
            track("/lonely.mp3", 20 * MIB),
        ];
        let source = FakeSource::new(&[
            ("/a.mp3", Some("0123456789abcdef")),
            ("/b.mp3", Some("0123456789abcdef")),
            ("/c.mp3", Some("f0f0f0f0f0f0f0f0")),
            ("/lonely.mp3", Some("0123456789abcdef")),
        ]);
        let report = run(&tracks, &source);

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.kind, DuplicateKind::Fingerprint);
        assert_eq!(group.similarity, 100);
        assert_eq!(group.members, vec![PathBuf::from("/a.mp3"), PathBuf::from("/b.mp3")]);
    }

    #[test]
    fn test_failures_do_not_abort() {
        let tracks = vec![
            track("/a.mp3", MIB),
            track("/broken.mp3", MIB),
            track("/b.mp3", MIB),
        ];
        let source = FakeSource::new(&[
            ("/a.mp3", Some("77777777")),
            ("/broken.mp3", None),
            ("/b.mp3", Some("77777777")),
        ]);
        let report = run(&tracks, &source);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("/broken.mp3"));
        assert_eq!(report.groups.len(), 1);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_at_100() {
        let tracks = vec![
            track("/a.mp3", MIB),
            track("/b.mp3", MIB),
            track("/c.mp3", MIB),
        ];
        let source = FakeSource::new(&[
            ("/a.mp3", Some("1234")),
            ("/b.mp3", Some("4321")),
            ("/c.mp3", Some("8888")),
        ]);
        let mut seen = Vec::new();
        let mut sink = |p: ScanProgress| seen.push(p);
        find_duplicates(
            &tracks,
            &DuplicateConfig::default(),
            1,
            &source,
            &mut sink,
            &AtomicBool::new(false),
        )
        .unwrap();

        let percents: Vec<u8> = seen.iter().map(|p| p.percent).collect();
        assert_eq!(&percents[..3], &[10, 20, 40]);
        assert_eq!(&percents[3..6], &[40, 60, 80]);
        assert_eq!(percents[6], 100);
        assert!(seen[6].message.starts_with("Compared 3 fingerprints"));
        assert_eq!(seen.last().unwrap().message, "Done.");
        assert_eq!(*percents.last().unwrap(), 100);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_progress_over_channel() {
        let (tx, rx) = mpsc::channel();
        let mut tx = tx;
        find_duplicates(
            &[],
            &DuplicateConfig::default(),
            1,
            &FakeSource::new(&[]),
            &mut tx,
            &AtomicBool::new(false),
        )
        .unwrap();
        drop(tx);
        let percents: Vec<u8> = rx.iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![10, 20, 40, 100]);
    }

    #[test]
    fn test_cancel_before_fingerprinting() {
        let tracks = vec![track("/a.mp3", MIB), track("/b.mp3", MIB)];
        let source = FakeSource::new(&[("/a.mp3", Some("11")), ("/b.mp3", Some("11"))]);
        let mut last = None;
        let mut sink = |p: ScanProgress| last = Some(p);
        let report = find_duplicates(
            &tracks,
            &DuplicateConfig::default(),
            1,
            &source,
            &mut sink,
            &AtomicBool::new(true),
        )
        .unwrap();

        assert!(report.cancelled);
        assert!(report.groups.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(last.map(|p| p.percent), Some(100));
    }

    #[test]
    fn test_identical_files_form_fingerprint_group() {
        let dir = tempfile::tempdir().unwrap();
        let blob = wav_blob("x.wav", &click_track(124.0, 11025, 12.0));
        let mut tracks = Vec::new();
        for name in ["first take.wav", "copy of track.wav"] {
            let path = dir.path().join(name);
            std::fs::write(&path, blob.bytes()).unwrap();
            tracks.push(LibraryTrack::from_path(&path).unwrap());
        }

        let source = FileFingerprinter::new(AnalysisConfig::default());
        let report = run(&tracks, &source);

        assert!(report.failures.is_empty());
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].kind, DuplicateKind::Fingerprint);
        assert_eq!(report.groups[0].similarity, 100);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Daft Punk!"), "daftpunk");
        assert_eq!(normalize("Beyoncé"), "beyonc");
        assert_eq!(normalize(""), "");
    }
}
