//! Silence-based splitting of long inputs and reassembly of converted chunks.
//!
//! `split` writes `chunk_NNNN.wav` files into `<dir>/<stem>_segments/` and a
//! manifest `<dir>/<stem>_timestamps.txt` with one `path\tstart\tend` line
//! (seconds) per chunk. Chunks are contiguous and cover the whole input, so
//! `merge` can rebuild a waveform of the original duration.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;
use vc_core::{AudioSegmenter, VcError};
use vc_signal::{resample_linear, rms, seconds_to_samples};

use crate::io::{read_audio, write_wav};

const FRAME_MS: u32 = 10;

#[derive(Debug, Clone)]
pub struct SilenceSegmenter {
    /// Frames quieter than this (dBFS RMS) count as silence.
    pub threshold_db: f32,
    /// Silence shorter than this does not split.
    pub min_silence_ms: u32,
    /// Chunks longer than this are cut even without silence.
    pub max_chunk_secs: f32,
}

impl Default for SilenceSegmenter {
    fn default() -> Self {
        Self {
            threshold_db: -45.0,
            min_silence_ms: 500,
            max_chunk_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Base name of `input` without its final extension.
pub fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Manifest location for a split of `input` into `work_dir`.
pub fn timestamps_path(work_dir: &Path, input: &Path) -> PathBuf {
    let parent = work_dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}_timestamps.txt", input_stem(input)))
}

impl SilenceSegmenter {
    /// Half-open sample ranges covering `0..samples.len()` without gaps.
    pub fn chunk_bounds(&self, samples: &[f32], sample_rate: u32) -> Vec<(usize, usize)> {
        let total = samples.len();
        if total == 0 {
            return Vec::new();
        }
        let frame = ((sample_rate * FRAME_MS) / 1000).max(1) as usize;
        let min_silence_frames = (self.min_silence_ms / FRAME_MS).max(1) as usize;
        let threshold = 10.0_f32.powf(self.threshold_db / 20.0);

        let silent: Vec<bool> = samples.chunks(frame).map(|f| rms(f) < threshold).collect();

        let mut cuts = vec![0usize];
        let mut run_start = None;
        for (i, &is_silent) in silent.iter().chain(std::iter::once(&false)).enumerate() {
            match (is_silent, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    let len = i - start;
                    // leading and trailing silence stay attached to their neighbour
                    if len >= min_silence_frames && start > 0 && i < silent.len() {
                        let mid = (start + len / 2) * frame;
                        if mid > *cuts.last().unwrap_or(&0) && mid < total {
                            cuts.push(mid);
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        cuts.push(total);

        let max_len = seconds_to_samples(self.max_chunk_secs as f64, sample_rate).max(frame);
        let mut bounds = Vec::with_capacity(cuts.len());
        for pair in cuts.windows(2) {
            let (mut start, end) = (pair[0], pair[1]);
            while end - start > max_len {
                bounds.push((start, start + max_len));
                start += max_len;
            }
            bounds.push((start, end));
        }
        bounds
    }

    fn split_impl(&self, input: &Path) -> Result<PathBuf> {
        let (samples, sample_rate) = read_audio(input)?;
        if samples.is_empty() {
            bail!("input audio {} is empty", input.display());
        }

        let parent = input.parent().unwrap_or_else(|| Path::new("."));
        let stem = input_stem(input);
        let work_dir = parent.join(format!("{stem}_segments"));
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)
                .with_context(|| format!("failed to clear {}", work_dir.display()))?;
        }
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("failed to create {}", work_dir.display()))?;

        let bounds = self.chunk_bounds(&samples, sample_rate);
        let mut manifest = String::new();
        for (i, (start, end)) in bounds.iter().enumerate() {
            let chunk_path = work_dir.join(format!("chunk_{i:04}.wav"));
            write_wav(&chunk_path, &samples[*start..*end], sample_rate)?;
            manifest.push_str(&format!(
                "{}\t{:.6}\t{:.6}\n",
                chunk_path.display(),
                *start as f64 / sample_rate as f64,
                *end as f64 / sample_rate as f64
            ));
        }
        let manifest_path = timestamps_path(&work_dir, input);
        fs::write(&manifest_path, manifest)
            .with_context(|| format!("failed to write {}", manifest_path.display()))?;

        debug!(
            input = %input.display(),
            chunks = bounds.len(),
            dir = %work_dir.display(),
            "split audio"
        );
        Ok(work_dir)
    }

    fn merge_impl(&self, manifest: &Path) -> Result<(u32, Vec<f32>)> {
        let entries = read_manifest(manifest)?;
        let last = entries
            .last()
            .ok_or_else(|| anyhow!("manifest {} lists no chunks", manifest.display()))?;
        let total_secs = last.end_secs;

        let mut sample_rate = 0;
        let mut out = Vec::new();
        for entry in &entries {
            let (chunk, chunk_rate) = read_audio(&entry.path)?;
            if sample_rate == 0 {
                sample_rate = chunk_rate;
                out = vec![0.0_f32; seconds_to_samples(total_secs, sample_rate)];
            }
            let chunk = if chunk_rate == sample_rate {
                chunk
            } else {
                resample_linear(&chunk, chunk_rate, sample_rate)
            };
            let offset = seconds_to_samples(entry.start_secs, sample_rate).min(out.len());
            let slot_end = seconds_to_samples(entry.end_secs, sample_rate).min(out.len());
            let n = slot_end.saturating_sub(offset).min(chunk.len());
            out[offset..offset + n].copy_from_slice(&chunk[..n]);
        }
        debug!(
            manifest = %manifest.display(),
            chunks = entries.len(),
            sample_rate,
            "merged audio"
        );
        Ok((sample_rate, out))
    }
}

pub fn read_manifest(manifest: &Path) -> Result<Vec<ManifestEntry>> {
    let raw = fs::read_to_string(manifest)
        .with_context(|| format!("failed to read manifest {}", manifest.display()))?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut parts = line.split('\t');
            let (Some(path), Some(start), Some(end)) = (parts.next(), parts.next(), parts.next())
            else {
                bail!("malformed manifest line '{line}'");
            };
            Ok(ManifestEntry {
                path: PathBuf::from(path),
                start_secs: start.trim().parse().context("invalid chunk start")?,
                end_secs: end.trim().parse().context("invalid chunk end")?,
            })
        })
        .collect()
}

impl AudioSegmenter for SilenceSegmenter {
    fn split(&self, input: &Path) -> vc_core::Result<PathBuf> {
        self.split_impl(input)
            .map_err(|e| VcError::Audio(format!("{e:#}")))
    }

    fn merge(&self, manifest: &Path) -> vc_core::Result<(u32, Vec<f32>)> {
        self.merge_impl(manifest)
            .map_err(|e| VcError::Audio(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    /// 10 s of 220 Hz tone with a second of silence at 3 s and 7 s.
    fn gapped_tone() -> Vec<f32> {
        (0..SR as usize * 10)
            .map(|i| {
                let t = i as f32 / SR as f32;
                let silent = (3.0..4.0).contains(&t) || (7.0..8.0).contains(&t);
                if silent {
                    0.0
                } else {
                    0.5 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                }
            })
            .collect()
    }

    #[test]
    fn bounds_cut_inside_silence_and_cover_input() {
        let samples = gapped_tone();
        let bounds = SilenceSegmenter::default().chunk_bounds(&samples, SR);
        assert_eq!(bounds.len(), 3);
        assert_eq!(bounds[0].0, 0);
        assert_eq!(bounds.last().unwrap().1, samples.len());
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        let first_cut = bounds[0].1 as f32 / SR as f32;
        assert!((3.0..4.0).contains(&first_cut), "cut at {first_cut}");
    }

    #[test]
    fn bounds_respect_max_chunk_length() {
        let samples = vec![0.5_f32; SR as usize * 5];
        let seg = SilenceSegmenter {
            max_chunk_secs: 2.0,
            ..Default::default()
        };
        let bounds = seg.chunk_bounds(&samples, SR);
        assert_eq!(bounds, vec![(0, 32_000), (32_000, 64_000), (64_000, 80_000)]);
    }

    #[test]
    fn manifest_sits_next_to_work_dir() {
        let path = timestamps_path(Path::new("/data/take.1_segments"), Path::new("/in/take.1.wav"));
        assert_eq!(path, PathBuf::from("/data/take.1_timestamps.txt"));
    }

    #[test]
    fn dotted_names_get_separate_work_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("take.1.wav");
        let second = dir.path().join("take.2.wav");
        write_wav(&first, &gapped_tone(), SR).unwrap();
        write_wav(&second, &gapped_tone(), SR).unwrap();

        let seg = SilenceSegmenter::default();
        let first_dir = seg.split(&first).unwrap();
        let second_dir = seg.split(&second).unwrap();

        assert_ne!(first_dir, second_dir);
        assert!(first_dir.join("chunk_0000.wav").exists());
        assert!(timestamps_path(&first_dir, &first).exists());
        assert!(timestamps_path(&second_dir, &second).exists());
    }

    #[test]
    fn split_then_merge_preserves_duration() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("long.wav");
        let samples = gapped_tone();
        write_wav(&input, &samples, SR).unwrap();

        let seg = SilenceSegmenter::default();
        let work_dir = seg.split(&input).unwrap();
        let wavs = fs::read_dir(&work_dir).unwrap().count();
        assert_eq!(wavs, 3);

        let manifest = timestamps_path(&work_dir, &input);
        assert!(manifest.exists());
        let (rate, merged) = seg.merge(&manifest).unwrap();
        assert_eq!(rate, SR);
        assert!(merged.len().abs_diff(samples.len()) <= 160);
        assert!((merged[SR as usize] - samples[SR as usize]).abs() < 1e-3);
    }

    #[test]
    fn merge_rejects_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("x_timestamps.txt");
        fs::write(&manifest, "").unwrap();
        assert!(SilenceSegmenter::default().merge(&manifest).is_err());
    }
}
