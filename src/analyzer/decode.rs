use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Sample rate unknown")]
    UnknownSampleRate,
    #[error("Decode error: {0}")]
    Codec(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("WAV encode error: {0}")]
    Wav(#[from] hound::Error),
}

/// An audio file held in memory. Cloning shares the bytes.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    name: String,
    bytes: Arc<[u8]>,
}

impl AudioBlob {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a whole file into memory.
    pub fn read(path: &Path) -> Result<Self, DecodeError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lower-cased extension of the file name, used as a probe hint.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

/// Mono f32 PCM in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copy out `len_secs` starting at `start_secs`, clamped to the buffer.
    pub fn slice_secs(&self, start_secs: f64, len_secs: f64) -> PcmBuffer {
        let rate = self.sample_rate as f64;
        let start = ((start_secs * rate).floor() as usize).min(self.samples.len());
        let len = ((len_secs * rate).floor() as usize).min(self.samples.len() - start);
        PcmBuffer::new(self.samples[start..start + len].to_vec(), self.sample_rate)
    }
}

/// What to decode: how much audio and at which rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Output rate; `None` keeps the file's native rate.
    pub sample_rate: Option<u32>,
    /// Only this much audio from the start of the file is decoded.
    pub max_duration_secs: f64,
}

impl DecodeOptions {
    pub fn new(sample_rate: Option<u32>, max_duration_secs: f64) -> Self {
        Self {
            sample_rate,
            max_duration_secs,
        }
    }
}

/// A probed container plus codec for one decode call.
///
/// Created per call and dropped when the call returns, so analyzing many
/// files never accumulates open decoders.
pub struct DecodeSession {
    name: String,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
}

impl DecodeSession {
    pub fn open(blob: &AudioBlob) -> Result<Self, DecodeError> {
        let source = Cursor::new(blob.bytes.clone());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = blob.extension() {
            hint.with_extension(&ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(DecodeError::UnknownSampleRate)?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        log::trace!("opened decode session for {} ({} Hz)", blob.name, sample_rate);

        Ok(Self {
            name: blob.name.clone(),
            format,
            decoder,
            track_id,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode up to `max_frames` frames of channel 0 at the native rate.
    /// Corrupt packets are skipped; a broken stream ends the read.
    pub fn read_first_channel(&mut self, max_frames: usize) -> Result<Vec<f32>, DecodeError> {
        let mut out: Vec<f32> = Vec::new();

        while out.len() < max_frames {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet in {}: {}", self.name, e);
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);
            out.extend(buf.samples().iter().step_by(channels).copied());
        }

        out.truncate(max_frames);
        Ok(out)
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        log::trace!("released decode session for {}", self.name);
    }
}

/// Decode a prefix of `blob` to mono PCM.
///
/// Multi-channel audio keeps channel 0 only. When `opts.sample_rate` differs
/// from the native rate the audio is resampled.
pub fn decode(blob: &AudioBlob, opts: &DecodeOptions) -> Result<PcmBuffer, DecodeError> {
    let samples;
    let native_rate;
    {
        let mut session = DecodeSession::open(blob)?;
        native_rate = session.sample_rate();
        let max_frames = (opts.max_duration_secs.max(0.0) * native_rate as f64).ceil() as usize;
        samples = session.read_first_channel(max_frames)?;
    }

    let pcm = PcmBuffer::new(samples, native_rate);
    log::debug!(
        "Decoded {}: {:.1}s at {} Hz",
        blob.name,
        pcm.duration_secs(),
        native_rate
    );

    match opts.sample_rate {
        Some(rate) if rate != native_rate => {
            let mut out = resample(&pcm, rate)?;
            let max_frames = (opts.max_duration_secs.max(0.0) * rate as f64).ceil() as usize;
            out.samples.truncate(max_frames);
            Ok(out)
        }
        _ => Ok(pcm),
    }
}

/// Resample mono PCM with rubato's polynomial resampler.
pub fn resample(pcm: &PcmBuffer, target_rate: u32) -> Result<PcmBuffer, DecodeError> {
    if pcm.sample_rate == target_rate || pcm.is_empty() {
        return Ok(PcmBuffer::new(pcm.samples.clone(), target_rate));
    }
    if pcm.sample_rate == 0 || target_rate == 0 {
        return Err(DecodeError::Resample(format!(
            "invalid rates {} -> {}",
            pcm.sample_rate, target_rate
        )));
    }

    let mut resampler = FastFixedIn::<f32>::new(
        target_rate as f64 / pcm.sample_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        pcm.samples.len(),
        1,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let mut planar = resampler
        .process(&[pcm.samples.as_slice()], None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    Ok(PcmBuffer::new(planar.pop().unwrap_or_default(), target_rate))
}

/// How much audio a snippet is cut from.
const SNIPPET_SOURCE_SECS: f64 = 60.0;
const SNIPPET_SECS: f64 = 15.0;
/// Where the snippet starts, as a fraction of the decoded source.
const SNIPPET_START_FRACTION: f64 = 0.25;
/// Sources shorter than this are cut from the very start.
const SNIPPET_MIN_SOURCE_SECS: f64 = 20.0;

/// Cut a 15 second mono WAV clip from the first minute of `blob`,
/// starting a quarter of the way in.
pub fn extract_snippet(blob: &AudioBlob) -> Result<Vec<u8>, DecodeError> {
    let pcm = decode(blob, &DecodeOptions::new(None, SNIPPET_SOURCE_SECS))?;
    let start_fraction = if pcm.duration_secs() < SNIPPET_MIN_SOURCE_SECS {
        0.0
    } else {
        SNIPPET_START_FRACTION
    };
    let clip = pcm.slice_secs(pcm.duration_secs() * start_fraction, SNIPPET_SECS);
    encode_wav(&clip)
}

/// Encode mono PCM as a 16-bit WAV file in memory.
pub fn encode_wav(pcm: &PcmBuffer) -> Result<Vec<u8>, DecodeError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in &pcm.samples {
            let clamped = s.clamp(-1.0, 1.0);
            let value = if clamped < 0.0 {
                clamped * 32768.0
            } else {
                clamped * 32767.0
            };
            writer.write_sample(value as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, secs: f32, amp: f32) -> PcmBuffer {
        let n = (sample_rate as f32 * secs) as usize;
        let samples = (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        PcmBuffer::new(samples, sample_rate)
    }

    fn wav_blob(pcm: &PcmBuffer) -> AudioBlob {
        AudioBlob::new("test.wav", encode_wav(pcm).unwrap())
    }

    #[test]
    fn test_decode_wav_native_rate() {
        let pcm = sine(440.0, 11025, 2.0, 0.5);
        let decoded = decode(&wav_blob(&pcm), &DecodeOptions::new(None, 60.0)).unwrap();
        assert_eq!(decoded.sample_rate, 11025);
        assert_eq!(decoded.samples.len(), pcm.samples.len());
        for (a, b) in decoded.samples.iter().zip(&pcm.samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_truncates_to_max_duration() {
        let pcm = sine(440.0, 8000, 5.0, 0.5);
        let decoded = decode(&wav_blob(&pcm), &DecodeOptions::new(None, 2.0)).unwrap();
        assert_eq!(decoded.samples.len(), 16000);
    }

    #[test]
    fn test_decode_takes_first_channel() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..8000 {
                writer.write_sample(16384i16).unwrap();
                writer.write_sample(-16384i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let blob = AudioBlob::new("stereo.wav", cursor.into_inner());
        let decoded = decode(&blob, &DecodeOptions::new(None, 60.0)).unwrap();
        assert_eq!(decoded.samples.len(), 8000);
        assert!(decoded.samples.iter().all(|&s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_decode_resamples() {
        let pcm = sine(440.0, 22050, 2.0, 0.5);
        let decoded = decode(&wav_blob(&pcm), &DecodeOptions::new(Some(11025), 60.0)).unwrap();
        assert_eq!(decoded.sample_rate, 11025);
        let expected = 22050.0;
        let got = decoded.samples.len() as f64;
        assert!((got - expected).abs() / expected < 0.1, "got {} frames", got);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let blob = AudioBlob::new("broken.mp3", vec![0x13u8; 4096]);
        assert!(decode(&blob, &DecodeOptions::new(None, 30.0)).is_err());

        let empty = AudioBlob::new("empty.wav", Vec::new());
        assert!(decode(&empty, &DecodeOptions::new(None, 30.0)).is_err());
    }

    #[test]
    fn test_snippet_from_long_source() {
        let pcm = sine(220.0, 8000, 40.0, 0.3);
        let wav = extract_snippet(&wav_blob(&pcm)).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.duration(), 15 * 8000);
    }

    #[test]
    fn test_snippet_from_short_source() {
        let pcm = sine(220.0, 8000, 10.0, 0.3);
        let wav = extract_snippet(&wav_blob(&pcm)).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.duration(), 10 * 8000);
    }

    #[test]
    fn test_slice_secs_clamps() {
        let pcm = PcmBuffer::new(vec![0.0; 100], 10);
        assert_eq!(pcm.slice_secs(5.0, 100.0).samples.len(), 50);
        assert_eq!(pcm.slice_secs(50.0, 1.0).samples.len(), 0);
    }

    #[test]
    fn test_blob_extension() {
        assert_eq!(AudioBlob::new("Track.MP3", vec![]).extension().as_deref(), Some("mp3"));
        assert_eq!(AudioBlob::new("noext", vec![]).extension(), None);
    }
}
