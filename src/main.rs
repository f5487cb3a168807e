mod cli;

use reelforge::config;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use rf_av::{Assembler, FfmpegTranscoder, ToolRegistry, Transcode};
use rf_core::config::Config;
use rf_core::{allocate_scene_durations, BgmSpec, ProgressAggregator, Project, RenderRequest};
use rf_pipeline::{Backends, Orchestrator, PipelineOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,rf_core=debug,rf_av=debug,rf_pipeline=debug".to_string()
        } else {
            "reelforge=info,rf_core=info,rf_av=info,rf_pipeline=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Assemble { request, hw } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(assemble(&request, hw, config))
        }
        Commands::Run {
            topic,
            category,
            work_dir,
            reference,
            bgm,
            bgm_volume,
            bgm_fade,
            chaining,
            hw,
            output,
        } => {
            let mut config = config::load_config_or_default(cli.config.as_deref())?;
            if chaining {
                config.generation.chaining = true;
            }
            let bgm = bgm.map(|file_path| BgmSpec {
                file_path,
                volume: bgm_volume,
                fade_in_secs: bgm_fade,
                fade_out_secs: bgm_fade,
            });
            let options = PipelineOptions {
                output_path: output,
                use_hardware_encode: hw,
                bgm,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_pipeline(topic, category, work_dir, reference, options, config))
        }
        Commands::Probe { file, json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, &config))
        }
        Commands::Allocate { duration, lengths } => allocate(duration, &lengths),
        Commands::CheckTools => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config).or_else(config::discover_config_path);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn progress_printer() -> ProgressAggregator {
    ProgressAggregator::with_callback(|percent, stage| println!("[{percent}%] {stage}"))
}

fn transcoder(config: &Config) -> Result<Arc<dyn Transcode>> {
    let tools = ToolRegistry::discover(&config.tools);
    let transcoder = FfmpegTranscoder::from_registry(&tools, config.tools.timeout())
        .context("ffmpeg and ffprobe are required")?;
    Ok(Arc::new(transcoder))
}

async fn assemble(request_path: &Path, hw: bool, config: Config) -> Result<()> {
    let content = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read render request: {:?}", request_path))?;
    let mut request: RenderRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse render request: {:?}", request_path))?;
    request.use_hardware_encode |= hw;
    request.validate()?;

    let assembler = Assembler::new(transcoder(&config)?, config.render.clone());
    let progress = progress_printer();
    let stage = progress.stage(0.0, 100.0, "assembly");
    let cancel = cancel_on_ctrl_c();

    let output = assembler.assemble(&request, &stage, &cancel).await?;
    println!("Output: {}", output.display());
    Ok(())
}

async fn run_pipeline(
    topic: String,
    category: String,
    work_dir: PathBuf,
    reference: Option<PathBuf>,
    options: PipelineOptions,
    config: Config,
) -> Result<()> {
    let mut project = match Project::load_snapshot(&work_dir)? {
        Some(project) => {
            if project.topic != topic {
                tracing::warn!(
                    "Resuming snapshot for \"{}\" (ignoring --topic \"{topic}\")",
                    project.topic
                );
            }
            tracing::info!("Resuming project in {}", work_dir.display());
            project
        }
        None => Project::new(topic, category, &work_dir),
    };
    if let Some(reference) = reference.or_else(|| config.generation.reference_image.clone()) {
        if !reference.exists() {
            anyhow::bail!("Reference image does not exist: {:?}", reference);
        }
        project.reference_image = Some(reference);
    }

    let backends = Backends::from_config(&config)?;
    let orchestrator = Orchestrator::new(config.clone(), backends, transcoder(&config)?)
        .with_progress(progress_printer())
        .with_options(options);
    let cancel = cancel_on_ctrl_c();

    let outcome = orchestrator.run_full_pipeline(&mut project, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.succeeded {
        Ok(())
    } else if outcome.is_cancelled() {
        anyhow::bail!("Cancelled; rerun the same command to resume")
    } else {
        anyhow::bail!(
            "Generation failed: {}",
            outcome.failure_reason.as_deref().unwrap_or("unknown error")
        )
    }
}

async fn probe_file(file: &Path, json: bool, config: &Config) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let duration = transcoder(config)?.probe_duration(file).await;
    if duration <= 0.0 {
        anyhow::bail!("Could not determine duration of {:?}", file);
    }

    if json {
        let value = serde_json::json!({ "file": file, "duration_secs": duration });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("File: {}", file.display());
        println!("Duration: {duration:.3}s");
    }
    Ok(())
}

fn allocate(duration: f64, lengths: &[usize]) -> Result<()> {
    if duration.is_nan() || duration <= 0.0 {
        anyhow::bail!("Duration must be positive");
    }
    if lengths.is_empty() {
        anyhow::bail!("At least one scene length is required");
    }

    let durations = allocate_scene_durations(duration, lengths);
    for (i, (len, secs)) in lengths.iter().zip(&durations).enumerate() {
        println!("scene {i}: {secs:.2}s ({len} chars)");
    }
    let total: f64 = durations.iter().sum();
    println!("total: {total:.2}s (narration {duration:.2}s)");
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
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
        println!("Some tools are missing. Install ffmpeg to enable assembly.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  ! {warning}");
        }
    }
    println!("  Render: {}x{} @ {} fps", config.render.output_width, config.render.output_height, config.render.fps);
    println!("  Transition: {:.2}s", config.render.transition_secs);
    println!("  Image backend: {:?}", config.generation.backend);
    println!("  Chaining: {}", config.generation.chaining);
    println!("  Parts: {}", config.generation.parts);

    Ok(())
}
