mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

use waveforge::{queue, AppContext, JobQueue, WorkerPool};
use wf_core::config::Config;
use wf_core::{JobId, JobRequest, JobState, OutputOptions, OutputSpec};
use wf_engine::ToolRegistry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use defaults based on verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "waveforge=trace,wf_engine=trace,wf_db=debug,wf_core=debug".to_string()
        } else {
            "waveforge=debug,wf_engine=debug,wf_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(cli.config.as_deref()))
        }
        Commands::Submit {
            input,
            format,
            owner,
            subject,
            pitch,
            tempo,
            bitrate,
        } => submit(
            cli.config.as_deref(),
            input,
            format,
            owner,
            subject,
            pitch,
            tempo,
            bitrate,
        ),
        Commands::Status { job_id } => status(cli.config.as_deref(), &job_id),
        Commands::List { owner, state } => list(cli.config.as_deref(), owner, state),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate { config } => {
            let path = config.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("waveforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Config {
    let config = Config::load_or_default(path);
    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }
    config
}

async fn serve(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);

    tracing::info!("Starting waveforge");
    tracing::info!(
        "Database at {}, {} executors",
        config.storage.db_path.display(),
        config.worker.concurrency
    );

    for tool in ToolRegistry::discover(&config.tools).check_all() {
        if tool.available {
            tracing::info!(
                "{} found at {}",
                tool.name,
                tool.path.as_deref().unwrap_or(Path::new("?")).display()
            );
        } else {
            tracing::warn!("{} not found; jobs will fail until it is installed", tool.name);
        }
    }

    let ctx = AppContext::new(config)?;
    let job_queue = Arc::new(JobQueue::new(ctx.clone()));

    // Reclaim claims orphaned by a previous process before workers start.
    job_queue.run_maintenance()?;

    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(ctx, Arc::clone(&job_queue));
    let mut handles = pool.spawn(cancel.clone());
    handles.push(queue::spawn_maintenance(Arc::clone(&job_queue), cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn submit(
    config_path: Option<&Path>,
    input: std::path::PathBuf,
    formats: Vec<String>,
    owner: String,
    subject: String,
    pitch: Option<i32>,
    tempo: Option<f64>,
    bitrate: Option<u32>,
) -> Result<()> {
    let config = load_config(config_path);
    let ctx = AppContext::new(config)?;
    let job_queue = JobQueue::new(ctx);

    let options = OutputOptions {
        pitch_shift_semitones: pitch,
        tempo_factor: tempo,
        bitrate_kbps: bitrate,
    };
    let output_specs = formats
        .iter()
        .map(|f| {
            Ok(OutputSpec {
                format: f.parse()?,
                options,
            })
        })
        .collect::<wf_core::Result<Vec<_>>>()?;

    let request = JobRequest {
        owner_id: owner,
        subject_id: subject,
        input_path: input,
        output_specs,
    };

    let id = job_queue.enqueue(&request)?;
    println!("{id}");
    Ok(())
}

fn status(config_path: Option<&Path>, job_id: &str) -> Result<()> {
    let config = load_config(config_path);
    let ctx = AppContext::new(config)?;
    let job_queue = JobQueue::new(ctx);

    let id: JobId = job_id.parse()?;
    let snapshot = job_queue.get_status(id)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn list(
    config_path: Option<&Path>,
    owner: Option<String>,
    state: Option<String>,
) -> Result<()> {
    let config = load_config(config_path);
    let ctx = AppContext::new(config)?;
    let job_queue = JobQueue::new(ctx);

    let state = state
        .as_deref()
        .map(|s| s.parse::<JobState>())
        .transpose()?;
    let jobs = job_queue.list(owner.as_deref(), state, 0, 100)?;

    for job in &jobs {
        println!(
            "{}  {:<9}  {:>5.1}%  attempts {}/{}  {}",
            job.id,
            job.state,
            job.progress_percent,
            job.attempts,
            job.max_attempts,
            job.subject_id
        );
    }
    if jobs.is_empty() {
        println!("No jobs found.");
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    println!("Checking external tools...\n");

    let mut all_ok = true;
    for tool in ToolRegistry::discover(&config.tools).check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable transcoding.");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)?;
            let config = Config::from_json(&contents)?;
            let warnings = config.validate();
            println!("✓ Configuration is valid");
            println!("  Database: {}", config.storage.db_path.display());
            println!("  Executors: {}", config.worker.concurrency);
            println!(
                "  Retry: {} attempts, base delay {}s",
                config.retry.max_attempts, config.retry.base_delay_secs
            );
            for warning in warnings {
                println!("  warning: {warning}");
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("Default config:");
            println!("  Database: {}", config.storage.db_path.display());
            println!("  Executors: {}", config.worker.concurrency);
        }
    }

    Ok(())
}
