//! Job domain model: requests, output options, states, and results.
//!
//! A [`JobRequest`] describes one upload to be transcoded into one or more
//! output formats. The queue persists it as a job row; workers report back
//! one [`TranscodeResult`] per output spec. These types are validated at the
//! submission boundary so the worker never handles partially-shaped data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Supported output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Ogg,
    Wav,
    Flac,
}

impl AudioFormat {
    /// Canonical lowercase name, also used as the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
        }
    }

    /// Default bitrate in kbps when the request leaves it unset.
    ///
    /// `None` means the encoder's own lossless default applies and no
    /// bitrate flag is passed (flac). wav carries the uncompressed PCM
    /// equivalent so callers see a meaningful number.
    pub fn default_bitrate_kbps(&self) -> Option<u32> {
        match self {
            AudioFormat::Mp3 => Some(192),
            AudioFormat::Aac => Some(128),
            AudioFormat::Ogg => Some(160),
            AudioFormat::Wav => Some(1411),
            AudioFormat::Flac => None,
        }
    }

    /// The ffmpeg encoder name for this format.
    pub fn codec_name(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "libvorbis",
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Flac => "flac",
        }
    }

    /// Whether a `-b:a` bitrate flag is meaningful for this format.
    pub fn uses_bitrate_flag(&self) -> bool {
        matches!(self, AudioFormat::Mp3 | AudioFormat::Aac | AudioFormat::Ogg)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "aac" | "m4a" => Ok(AudioFormat::Aac),
            "ogg" | "vorbis" => Ok(AudioFormat::Ogg),
            "wav" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// OutputOptions / OutputSpec
// ---------------------------------------------------------------------------

/// Allowed pitch shift range in semitones.
pub const PITCH_RANGE: (i32, i32) = (-12, 12);
/// Allowed tempo factor range.
pub const TEMPO_RANGE: (f64, f64) = (0.5, 2.0);
/// Allowed explicit bitrate range in kbps.
pub const BITRATE_RANGE: (u32, u32) = (64, 320);

/// Per-output effect and encoding options. Unset fields fall back to
/// format-specific defaults during parameter resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    pub pitch_shift_semitones: Option<i32>,
    pub tempo_factor: Option<f64>,
    pub bitrate_kbps: Option<u32>,
}

impl OutputOptions {
    /// Range-check every set field.
    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self.pitch_shift_semitones {
            if p < PITCH_RANGE.0 || p > PITCH_RANGE.1 {
                return Err(Error::validation(format!(
                    "pitch_shift_semitones {p} out of range [{}, {}]",
                    PITCH_RANGE.0, PITCH_RANGE.1
                )));
            }
        }
        if let Some(t) = self.tempo_factor {
            if !(TEMPO_RANGE.0..=TEMPO_RANGE.1).contains(&t) {
                return Err(Error::validation(format!(
                    "tempo_factor {t} out of range [{}, {}]",
                    TEMPO_RANGE.0, TEMPO_RANGE.1
                )));
            }
        }
        if let Some(b) = self.bitrate_kbps {
            if b < BITRATE_RANGE.0 || b > BITRATE_RANGE.1 {
                return Err(Error::validation(format!(
                    "bitrate_kbps {b} out of range [{}, {}]",
                    BITRATE_RANGE.0, BITRATE_RANGE.1
                )));
            }
        }
        Ok(())
    }
}

/// One requested output: a format plus its options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub format: AudioFormat,
    #[serde(default)]
    pub options: OutputOptions,
}

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// Input to the pipeline: one source file fanning out to one or more outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Opaque tenant/user identifier.
    pub owner_id: String,
    /// Identifier of the resource being transcoded (e.g. a track).
    pub subject_id: String,
    /// Location of the source audio.
    pub input_path: PathBuf,
    /// Requested outputs; must be non-empty.
    pub output_specs: Vec<OutputSpec>,
}

impl JobRequest {
    /// Structural validation. Filesystem readability is checked separately by
    /// the queue at enqueue time.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(Error::validation("owner_id is empty"));
        }
        if self.subject_id.trim().is_empty() {
            return Err(Error::validation("subject_id is empty"));
        }
        if self.output_specs.is_empty() {
            return Err(Error::validation("output_specs is empty"));
        }
        for spec in &self.output_specs {
            spec.options.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Job state machine: `waiting → active → {completed | failed | delayed → waiting}`.
///
/// `delayed` only represents a job waiting out its retry backoff; observers
/// should treat it as a variant of `waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "delayed" => Ok(JobState::Delayed),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(Error::Internal(format!("unknown job state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TranscodeResult
// ---------------------------------------------------------------------------

/// Stream metadata probed from a produced artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

/// Outcome status of a single output spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Per-output-format outcome. A job with N output specs yields N entries;
/// the job as a whole succeeds only if every entry succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeResult {
    pub format: AudioFormat,
    pub output_path: Option<String>,
    pub duration_seconds: Option<f64>,
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub metadata: AudioMetadata,
    pub processing_time_ms: u64,
    pub status: ResultStatus,
    pub error: Option<String>,
}

impl TranscodeResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

// ---------------------------------------------------------------------------
// JobSnapshot
// ---------------------------------------------------------------------------

/// Read-only view of a job returned by status queries. Never blocks and
/// never mutates the underlying record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: crate::ids::JobId,
    pub owner_id: String,
    pub subject_id: String,
    pub input_path: Option<String>,
    pub output_specs: Vec<OutputSpec>,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress_percent: f64,
    pub results: Option<Vec<TranscodeResult>>,
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobSnapshot {
    /// Strip internal filesystem paths for responses crossing the trust
    /// boundary.
    pub fn redacted(mut self) -> Self {
        self.input_path = None;
        if let Some(ref mut results) = self.results {
            for r in results.iter_mut() {
                r.output_path = None;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(specs: Vec<OutputSpec>) -> JobRequest {
        JobRequest {
            owner_id: "owner-1".into(),
            subject_id: "track-1".into(),
            input_path: PathBuf::from("/uploads/owner-1/track.wav"),
            output_specs: specs,
        }
    }

    fn mp3_spec() -> OutputSpec {
        OutputSpec {
            format: AudioFormat::Mp3,
            options: OutputOptions::default(),
        }
    }

    #[test]
    fn format_from_str() {
        assert_eq!("mp3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert_eq!("FLAC".parse::<AudioFormat>().unwrap(), AudioFormat::Flac);
        assert!(matches!(
            "wma".parse::<AudioFormat>(),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn default_bitrates() {
        assert_eq!(AudioFormat::Mp3.default_bitrate_kbps(), Some(192));
        assert_eq!(AudioFormat::Aac.default_bitrate_kbps(), Some(128));
        assert_eq!(AudioFormat::Ogg.default_bitrate_kbps(), Some(160));
        assert_eq!(AudioFormat::Wav.default_bitrate_kbps(), Some(1411));
        assert_eq!(AudioFormat::Flac.default_bitrate_kbps(), None);
    }

    #[test]
    fn options_in_range() {
        let opts = OutputOptions {
            pitch_shift_semitones: Some(2),
            tempo_factor: Some(1.2),
            bitrate_kbps: Some(192),
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn options_out_of_range() {
        let pitch = OutputOptions {
            pitch_shift_semitones: Some(13),
            ..Default::default()
        };
        assert!(pitch.validate().is_err());

        let tempo = OutputOptions {
            tempo_factor: Some(2.5),
            ..Default::default()
        };
        assert!(tempo.validate().is_err());

        let bitrate = OutputOptions {
            bitrate_kbps: Some(32),
            ..Default::default()
        };
        assert!(bitrate.validate().is_err());
    }

    #[test]
    fn request_requires_specs() {
        let req = request(vec![]);
        assert!(req.validate().is_err());

        let req = request(vec![mp3_spec()]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn request_requires_owner() {
        let mut req = request(vec![mp3_spec()]);
        req.owner_id = " ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn state_roundtrip() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Delayed,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }

    #[test]
    fn snapshot_redaction_strips_paths() {
        let snapshot = JobSnapshot {
            id: crate::ids::JobId::new(),
            owner_id: "owner-1".into(),
            subject_id: "track-1".into(),
            input_path: Some("/uploads/owner-1/track.wav".into()),
            output_specs: vec![mp3_spec()],
            state: JobState::Completed,
            attempts: 1,
            max_attempts: 3,
            progress_percent: 100.0,
            results: Some(vec![TranscodeResult {
                format: AudioFormat::Mp3,
                output_path: Some("/outputs/owner-1/track-1/track.mp3".into()),
                duration_seconds: Some(180.0),
                size_bytes: Some(4_321_000),
                metadata: AudioMetadata::default(),
                processing_time_ms: 2_500,
                status: ResultStatus::Success,
                error: None,
            }]),
            failure_reason: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            finished_at: None,
        };

        let redacted = snapshot.redacted();
        assert!(redacted.input_path.is_none());
        assert!(redacted.results.unwrap()[0].output_path.is_none());
    }

    #[test]
    fn request_serde_roundtrip() {
        let req = request(vec![OutputSpec {
            format: AudioFormat::Ogg,
            options: OutputOptions {
                pitch_shift_semitones: Some(-3),
                tempo_factor: None,
                bitrate_kbps: None,
            },
        }]);
        let json = serde_json::to_string(&req).unwrap();
        let back: JobRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.output_specs[0].format, AudioFormat::Ogg);
        assert_eq!(back.output_specs[0].options.pitch_shift_semitones, Some(-3));
    }
}
