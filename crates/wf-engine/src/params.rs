//! Transcode parameter resolution.
//!
//! Turns a user-facing [`OutputSpec`] into a concrete, deterministic ffmpeg
//! invocation: encoder selection, bitrate defaulting, and the audio filter
//! chain for pitch and tempo effects. Resolution is pure; the same spec
//! always yields the same arguments.

use serde::{Deserialize, Serialize};
use std::path::Path;

use wf_core::{AudioFormat, OutputSpec, Result};

/// All outputs are normalized to CD-quality stereo.
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;
/// Output channel count.
pub const OUTPUT_CHANNELS: u32 = 2;

/// A fully resolved encoder invocation for one output spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub format: AudioFormat,
    /// ffmpeg encoder name.
    pub codec: String,
    /// Bitrate in kbps; `None` for lossless formats with no bitrate flag.
    pub bitrate_kbps: Option<u32>,
    /// Audio filter chain entries, applied in order. Empty when the output
    /// is a plain format conversion.
    pub filters: Vec<String>,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Resolve an output spec into concrete encoder parameters.
///
/// Pitch shifting resamples the stream to `44100 * 2^(n/12)` and then back
/// to the output rate, which shifts pitch by `n` semitones (the classic
/// varispeed effect; duration changes with it). Tempo is an independent
/// `atempo` stage applied after any pitch filter.
pub fn resolve(spec: &OutputSpec) -> Result<ResolvedParams> {
    spec.options.validate()?;

    let mut filters = Vec::new();

    if let Some(semitones) = spec.options.pitch_shift_semitones {
        if semitones != 0 {
            let shifted = (OUTPUT_SAMPLE_RATE as f64
                * 2f64.powf(semitones as f64 / 12.0))
            .round() as u32;
            filters.push(format!("asetrate={shifted}"));
            filters.push(format!("aresample={OUTPUT_SAMPLE_RATE}"));
        }
    }

    if let Some(tempo) = spec.options.tempo_factor {
        if (tempo - 1.0).abs() > f64::EPSILON {
            filters.push(format!("atempo={tempo}"));
        }
    }

    let bitrate_kbps = if spec.format.uses_bitrate_flag() {
        spec.options
            .bitrate_kbps
            .or_else(|| spec.format.default_bitrate_kbps())
    } else {
        // Lossless targets ignore any requested bitrate.
        None
    };

    Ok(ResolvedParams {
        format: spec.format,
        codec: spec.format.codec_name().to_string(),
        bitrate_kbps,
        filters,
        sample_rate: OUTPUT_SAMPLE_RATE,
        channels: OUTPUT_CHANNELS,
    })
}

impl ResolvedParams {
    /// Build the full ffmpeg argument list for this invocation.
    pub fn to_ffmpeg_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
        ];

        if !self.filters.is_empty() {
            args.push("-af".to_string());
            args.push(self.filters.join(","));
        }

        args.push("-c:a".to_string());
        args.push(self.codec.clone());

        if let Some(kbps) = self.bitrate_kbps {
            args.push("-b:a".to_string());
            args.push(format!("{kbps}k"));
        }

        args.push("-ar".to_string());
        args.push(self.sample_rate.to_string());
        args.push("-ac".to_string());
        args.push(self.channels.to_string());

        args.push(output.to_string_lossy().to_string());
        args
    }
}
