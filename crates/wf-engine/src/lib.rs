//! Audio transcoding engine built on external ffmpeg/ffprobe binaries.
//!
//! [`params`] resolves user-facing output options into a concrete encoder
//! invocation, [`probe`] inspects audio files, and [`transcode`] drives the
//! actual encode with live progress reporting. The [`Engine`] trait is the
//! seam the worker pool programs against, so tests can substitute a scripted
//! engine without ffmpeg installed.

pub mod command;
pub mod params;
pub mod probe;
pub mod tools;
pub mod transcode;

pub use command::{StreamOutput, ToolCommand, ToolOutput};
pub use params::ResolvedParams;
pub use probe::AudioInfo;
pub use tools::{ToolInfo, ToolRegistry};
pub use transcode::{Engine, EngineOutcome, FfmpegEngine, TranscodeTask};
