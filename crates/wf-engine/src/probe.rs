//! Audio file inspection via ffprobe.
//!
//! Runs `ffprobe -print_format json -show_format -show_streams` and maps the
//! raw output to [`AudioInfo`]. Parsing is separated from process execution
//! so it can be tested against captured JSON without ffprobe installed.

use std::path::Path;

use serde::Deserialize;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;
use wf_core::{AudioMetadata, Error, Result};

/// Probed facts about an audio file.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInfo {
    pub duration_seconds: Option<f64>,
    pub size_bytes: Option<u64>,
    pub metadata: AudioMetadata,
}

// Raw ffprobe JSON shapes. ffprobe emits numbers as strings.

#[derive(Debug, Deserialize)]
struct RawProbe {
    format: Option<RawFormat>,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bit_rate: Option<String>,
}

/// Parse raw ffprobe JSON into [`AudioInfo`].
///
/// Uses the first audio stream; the format-level bitrate is the fallback
/// when the stream does not carry one (common for wav and flac).
pub fn parse_probe_output(json: &str) -> Result<AudioInfo> {
    let raw: RawProbe =
        serde_json::from_str(json).map_err(|e| Error::Probe(format!("invalid ffprobe JSON: {e}")))?;

    let audio = raw
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| Error::Probe("no audio stream found".into()))?;

    let format = raw.format.as_ref();

    let stream_bitrate = audio.bit_rate.as_deref().and_then(|s| s.parse::<u64>().ok());
    let format_bitrate = format
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|s| s.parse::<u64>().ok());
    let bitrate_kbps = stream_bitrate
        .or(format_bitrate)
        .map(|bps| (bps / 1000) as u32);

    Ok(AudioInfo {
        duration_seconds: format
            .and_then(|f| f.duration.as_deref())
            .and_then(|s| s.parse::<f64>().ok()),
        size_bytes: format
            .and_then(|f| f.size.as_deref())
            .and_then(|s| s.parse::<u64>().ok()),
        metadata: AudioMetadata {
            codec: audio.codec_name.clone(),
            sample_rate: audio
                .sample_rate
                .as_deref()
                .and_then(|s| s.parse::<u32>().ok()),
            channels: audio.channels,
            bitrate_kbps,
        },
    })
}

/// Probe `path` with the registry's ffprobe.
pub async fn probe_file(registry: &ToolRegistry, path: &Path) -> Result<AudioInfo> {
    let ffprobe = registry.require("ffprobe")?;

    let output = ToolCommand::new(ffprobe.clone())
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(path.to_string_lossy().to_string())
        .execute()
        .await?;

    parse_probe_output(&output.stdout)
}
