use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "waveforge")]
#[command(author, version, about = "Asynchronous audio transcoding pipeline")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker pool and maintenance sweep
    Serve,

    /// Enqueue a transcode job against the shared database
    Submit {
        /// Source audio file
        #[arg(required = true)]
        input: PathBuf,

        /// Output formats (mp3, aac, ogg, wav, flac); repeatable
        #[arg(short, long, required = true)]
        format: Vec<String>,

        /// Owner identifier
        #[arg(long, default_value = "local")]
        owner: String,

        /// Subject (e.g. track) identifier
        #[arg(long, default_value = "adhoc")]
        subject: String,

        /// Pitch shift in semitones (-12..=12)
        #[arg(long)]
        pitch: Option<i32>,

        /// Tempo factor (0.5..=2.0)
        #[arg(long)]
        tempo: Option<f64>,

        /// Bitrate in kbps (64..=320)
        #[arg(long)]
        bitrate: Option<u32>,
    },

    /// Show the status of a job as JSON
    Status {
        /// Job identifier
        #[arg(required = true)]
        job_id: String,
    },

    /// List jobs, optionally filtered
    List {
        /// Filter by owner
        #[arg(long)]
        owner: Option<String>,

        /// Filter by state (waiting, active, completed, failed)
        #[arg(long)]
        state: Option<String>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
