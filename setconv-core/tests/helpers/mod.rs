//! Fixture builders for end-to-end conversion tests.

#![allow(dead_code)]

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

/// Write a mono or stereo 440 Hz sine at the given rate and bit depth.
pub fn write_sine_wav(path: &Path, sample_rate: u32, bits: u16, channels: u16, frames: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: bits,
        sample_format: SampleFormat::Int,
    };
    let amplitude = ((1i64 << (bits - 1)) - 1) as f32 * 0.5;
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let v = ((2.0 * PI * 440.0 * t).sin() * amplitude) as i32;
        for _ in 0..channels {
            writer.write_sample(v).unwrap();
        }
    }
    writer.finalize().unwrap();
}

pub fn write_file(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, data).unwrap();
}

/// The SET used by the PA4X -> PA3X scenario: one style, one sound, one
/// high-resolution sample.
pub fn write_demo_set(root: &Path) {
    write_file(&root.join("STYLE/POP_Modern_Ballad_style.sty"), b"STY-DATA");
    write_file(&root.join("SOUND/Grand_Piano_4K_sound.snd"), b"SND-DATA");
    write_sine_wav(&root.join("PCM/StudioStringsHQ.wav"), 96_000, 24, 2, 9_600);
}

pub fn zip_names(archive: &Path) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn zip_read(archive: &Path, name: &str) -> Vec<u8> {
    let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut file = zip.by_name(name).unwrap();
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    data
}

pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Report text without the timing line.
pub fn without_timing(report: &str) -> String {
    report
        .lines()
        .filter(|line| !line.starts_with("Processing time (sec):"))
        .collect::<Vec<_>>()
        .join("\n")
}
