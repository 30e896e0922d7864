//! PCM sample re-encoding.
//!
//! Mapped samples are decoded from their source container, brought down to
//! the target model's sample profile and written back as plain RIFF/WAVE.
//! Failures stay scoped to the sample they happened on.

use flate2::read::GzDecoder;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::SampleProfile;
use crate::{CancelToken, ConverterError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

#[derive(Debug, Error)]
pub enum ReencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported source encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("corrupt WAVE data: {0}")]
    Wav(#[from] hound::Error),

    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Sample format of one encoded stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub float: bool,
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.float {
            write!(f, "{} Hz/{}-bit float", self.sample_rate, self.bits_per_sample)
        } else {
            write!(f, "{} Hz/{}-bit", self.sample_rate, self.bits_per_sample)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Reencoded {
    pub data: Vec<u8>,
    pub source: PcmFormat,
    pub output: PcmFormat,
}

/// Unwrap one gzip layer if present and check for RIFF/WAVE.
fn unwrap_container(bytes: &[u8]) -> std::result::Result<Cow<'_, [u8]>, ReencodeError> {
    let data: Cow<'_, [u8]> = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut inflated = Vec::new();
        decoder.read_to_end(&mut inflated)?;
        Cow::Owned(inflated)
    } else {
        Cow::Borrowed(bytes)
    };

    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        let head: Vec<String> = data.iter().take(4).map(|b| format!("{:02X}", b)).collect();
        return Err(ReencodeError::UnsupportedEncoding(format!(
            "unrecognised header [{}]",
            head.join(" ")
        )));
    }

    Ok(data)
}

/// Decode to interleaved samples in [-1.0, 1.0].
fn decode(data: &[u8]) -> std::result::Result<(PcmFormat, Vec<f32>), ReencodeError> {
    let mut reader = WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();
    let format = PcmFormat {
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        channels: spec.channels,
        float: spec.sample_format == SampleFormat::Float,
    };

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok((format, samples))
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}

fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    let Some(frames) = planar.iter().map(Vec::len).min() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in &planar {
            out.push(channel[i]);
        }
    }
    out
}

fn resample(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
    channels: u16,
) -> std::result::Result<Vec<f32>, ReencodeError> {
    let planar = deinterleave(samples, channels as usize);
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    if frames == 0 {
        return Ok(Vec::new());
    }

    let mut resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        frames,
        channels as usize,
    )
    .map_err(|e| ReencodeError::Resample(e.to_string()))?;

    let output = resampler
        .process(&planar, None)
        .map_err(|e| ReencodeError::Resample(e.to_string()))?;

    Ok(interleave(output))
}

/// Quantise to signed integers of `bits` width. TPDF dither is added when
/// precision is lost.
fn quantize(samples: &[f32], bits: u16, dither: bool, seed: u64) -> Vec<i32> {
    let max = ((1i64 << (bits - 1)) - 1) as f32;
    let min = -(1i64 << (bits - 1)) as f32;
    let mut rng = StdRng::seed_from_u64(seed);

    samples
        .iter()
        .map(|s| {
            let noise = if dither {
                rng.gen::<f32>() - rng.gen::<f32>()
            } else {
                0.0
            };
            (s * max + noise).round().clamp(min, max) as i32
        })
        .collect()
}

fn encode(samples: &[i32], format: PcmFormat) -> std::result::Result<Vec<u8>, ReencodeError> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Convert one encoded sample to `profile`.
///
/// `seed` drives the dither so identical input gives identical output.
pub fn reencode(
    bytes: &[u8],
    profile: SampleProfile,
    seed: u64,
) -> std::result::Result<Reencoded, ReencodeError> {
    let data = unwrap_container(bytes)?;
    let (source, samples) = decode(&data)?;

    let output_rate = source.sample_rate.min(profile.max_sample_rate);
    let samples = if output_rate != source.sample_rate {
        debug!("resampling {} Hz -> {} Hz", source.sample_rate, output_rate);
        resample(&samples, source.sample_rate, output_rate, source.channels)?
    } else {
        samples
    };

    let output_bits = if source.float {
        profile.bits_per_sample
    } else {
        source.bits_per_sample.min(profile.bits_per_sample)
    };
    let dither = source.float || source.bits_per_sample > output_bits;

    let output = PcmFormat {
        sample_rate: output_rate,
        bits_per_sample: output_bits,
        channels: source.channels,
        float: false,
    };
    let quantized = quantize(&samples, output_bits, dither, seed);
    let data = encode(&quantized, output)?;

    Ok(Reencoded {
        data,
        source,
        output,
    })
}

/// A mapped sample waiting to be re-encoded. `index` is its position in the
/// classifier listing.
#[derive(Clone, Debug)]
pub struct ReencodeJob {
    pub index: usize,
    pub name: String,
    pub source: PathBuf,
    pub dest: PathBuf,
}

impl ReencodeJob {
    fn seed(&self) -> u64 {
        crc32fast::hash(self.name.as_bytes()) as u64
    }

    /// Re-encode in place: the destination is written first, the source is
    /// removed only afterwards.
    pub fn run(&self, profile: SampleProfile) -> std::result::Result<Reencoded, ReencodeError> {
        let bytes = fs::read(&self.source)?;
        let reencoded = reencode(&bytes, profile, self.seed())?;
        self.commit(&reencoded.data, |path| fs::remove_file(path))?;
        Ok(reencoded)
    }

    /// Write the destination, then drop the source. If the source cannot be
    /// dropped the destination goes too, so the tree holds exactly one of
    /// them.
    fn commit(&self, data: &[u8], remove: impl FnOnce(&Path) -> io::Result<()>) -> io::Result<()> {
        fs::write(&self.dest, data)?;
        if self.dest == self.source {
            return Ok(());
        }
        if let Err(e) = remove(&self.source) {
            if let Err(cleanup) = fs::remove_file(&self.dest) {
                warn!("{}: cannot remove {}: {}", self.name, self.dest.display(), cleanup);
            }
            return Err(e);
        }
        Ok(())
    }
}

pub type JobResult = (usize, std::result::Result<Reencoded, ReencodeError>);

/// Run all jobs on a pool of `threads` workers (0 = one per CPU).
///
/// Results come back in job order whatever order the workers finish in.
pub fn run_jobs(
    jobs: &[ReencodeJob],
    profile: SampleProfile,
    threads: usize,
    cancel: &CancelToken,
) -> Result<Vec<JobResult>> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ConverterError::Config(format!("failed to create re-encoding pool: {e}")))?;

    let results: Vec<Option<JobResult>> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                if cancel.is_cancelled() {
                    return None;
                }
                let result = job.run(profile);
                match &result {
                    Ok(done) => debug!("{}: {} -> {}", job.name, done.source, done.output),
                    Err(e) => warn!("{}: re-encoding failed: {}", job.name, e),
                }
                Some((job.index, result))
            })
            .collect()
    });

    cancel.check()?;

    let mut results: Vec<JobResult> = results.into_iter().flatten().collect();
    results.sort_by_key(|(index, _)| *index);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn wav_bytes(sample_rate: u32, bits: u16, channels: u16, frames: usize) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let amplitude = ((1i64 << (bits - 1)) - 1) as f32 * 0.5;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let v = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * amplitude) as i32;
                for _ in 0..channels {
                    writer.write_sample(v).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn spec_of(bytes: &[u8]) -> WavSpec {
        WavReader::new(Cursor::new(bytes)).unwrap().spec()
    }

    const PA3X: SampleProfile = SampleProfile {
        max_sample_rate: 48_000,
        bits_per_sample: 16,
    };

    #[test]
    fn downsamples_and_reduces_depth() {
        let src = wav_bytes(96_000, 24, 2, 9_600);
        let out = reencode(&src, PA3X, 7).unwrap();

        assert_eq!(out.source.sample_rate, 96_000);
        assert_eq!(out.source.bits_per_sample, 24);
        let spec = spec_of(&out.data);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.channels, 2);
        assert_eq!(out.output.to_string(), "48000 Hz/16-bit");
    }

    #[test]
    fn never_upsamples() {
        let src = wav_bytes(22_050, 16, 1, 2_205);
        let out = reencode(&src, PA3X, 0).unwrap();
        let spec = spec_of(&out.data);
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[test]
    fn matching_format_is_lossless() {
        let src = wav_bytes(44_100, 16, 1, 1_000);
        let out = reencode(&src, PA3X, 0).unwrap();

        let before: Vec<i16> = WavReader::new(Cursor::new(&src[..]))
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        let after: Vec<i16> = WavReader::new(Cursor::new(&out.data[..]))
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(&after).all(|(a, b)| (*a as i32 - *b as i32).abs() <= 1));
    }

    #[test]
    fn gzip_wrapped_wave_is_accepted() {
        let src = wav_bytes(48_000, 16, 1, 480);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&src).unwrap();
        let gz = encoder.finish().unwrap();

        let out = reencode(&gz, PA3X, 0).unwrap();
        assert_eq!(spec_of(&out.data).sample_rate, 48_000);
    }

    #[test]
    fn output_is_deterministic_per_seed() {
        let src = wav_bytes(96_000, 24, 1, 4_800);
        let a = reencode(&src, PA3X, 42).unwrap();
        let b = reencode(&src, PA3X, 42).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn unknown_header_is_unsupported() {
        let err = reencode(b"KORGPCM\0\x01\x02\x03\x04", PA3X, 0).unwrap_err();
        assert!(matches!(err, ReencodeError::UnsupportedEncoding(_)));
        assert_eq!(
            err.to_string(),
            "unsupported source encoding: unrecognised header [4B 4F 52 47]"
        );
    }

    #[test]
    fn truncated_wave_is_corrupt() {
        let src = wav_bytes(48_000, 16, 1, 480);
        let err = reencode(&src[..40], PA3X, 0).unwrap_err();
        assert!(matches!(err, ReencodeError::Wav(_)));
    }

    #[test]
    fn results_follow_job_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobs = Vec::new();
        for i in 0..6 {
            let source = dir.path().join(format!("in{i}.wav"));
            let bytes = if i == 3 {
                b"not a wave file".to_vec()
            } else {
                wav_bytes(48_000, 16, 1, 480 * (6 - i))
            };
            fs::write(&source, bytes).unwrap();
            jobs.push(ReencodeJob {
                index: i * 2,
                name: format!("Sample {i}"),
                source,
                dest: dir.path().join(format!("out{i}.wav")),
            });
        }

        let results = run_jobs(&jobs, PA3X, 3, &CancelToken::new()).unwrap();

        let order: Vec<usize> = results.iter().map(|(index, _)| *index).collect();
        assert_eq!(order, vec![0, 2, 4, 6, 8, 10]);
        assert!(results[3].1.is_err());
        assert!(dir.path().join("in3.wav").exists());
        assert!(!dir.path().join("in0.wav").exists());
        assert!(dir.path().join("out0.wav").exists());
    }

    #[test]
    fn source_kept_whole_when_it_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("A.wav");
        fs::write(&source, b"original").unwrap();
        let job = ReencodeJob {
            index: 0,
            name: "A".to_string(),
            source: source.clone(),
            dest: dir.path().join("B.wav"),
        };

        let err = job
            .commit(b"converted", |_| {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))
            })
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(!dir.path().join("B.wav").exists());
        assert_eq!(fs::read(&source).unwrap(), b"original");
    }

    #[test]
    fn cancelled_run_reports_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let job = ReencodeJob {
            index: 0,
            name: "x".to_string(),
            source: PathBuf::from("/nonexistent/x.wav"),
            dest: PathBuf::from("/nonexistent/y.wav"),
        };
        let err = run_jobs(&[job], PA3X, 1, &cancel).unwrap_err();
        assert!(matches!(err, ConverterError::Cancelled));
    }
}
