use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use converter::{
    compat::CompatibilityChecker,
    display::{compression_label, format_bytes, format_timestamp, parse_timestamp},
    scan::collect_media_files,
    BatchStatus, ConversionSettings, ConverterConfig, FfmpegEngine, FsDirectoryPicker, JobOutcome,
    OutputFormat, ServiceCompatibility, Session,
};
use log::{info, warn};
use serde_json::json;

/// Convert video files and check them against upload limits
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show duration, tracks and tags of a file
    Probe {
        input: PathBuf,
    },
    /// Estimate the converted size and check it against upload limits
    Estimate {
        input: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Convert one file
    Convert {
        input: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Output file (defaults to the input name with the new extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert several files (or directories of files) into one directory
    Batch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Output directory (asked for on the terminal when not configured)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Check a size and duration against upload limits
    Check {
        /// Size in bytes
        #[arg(long)]
        size: u64,
        /// Duration in seconds or HH:MM:SS
        #[arg(long, value_parser = parse_time)]
        duration: f64,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct SettingsArgs {
    /// Output container (mp4 or webm)
    #[arg(short, long, default_value = "mp4")]
    format: OutputFormat,

    /// Quality from 1 to 100
    #[arg(short, long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Target width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Target height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Trim start (seconds or HH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    start: Option<f64>,

    /// Trim end (seconds or HH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    end: Option<f64>,
}

impl SettingsArgs {
    /// Layer the flags over `base`; unset trim bounds keep the base window
    fn apply(&self, base: ConversionSettings) -> ConversionSettings {
        ConversionSettings {
            format: self.format,
            quality: self.quality,
            width: self.width.or(base.width),
            height: self.height.or(base.height),
            start_time: self.start.or(base.start_time),
            end_time: self.end.or(base.end_time),
        }
    }
}

fn parse_time(s: &str) -> std::result::Result<f64, String> {
    parse_timestamp(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    let mut cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Command::Check { size, duration } = &args.command {
        let verdicts = CompatibilityChecker::new(cfg.services.clone()).check(*size, *duration);
        print_compatibility(&verdicts, args.json)?;
        return Ok(());
    }

    // One-shot commands estimate explicitly
    cfg.live_preview = false;

    let engine = FfmpegEngine::detect(&cfg)
        .await
        .context("FFmpeg is not usable")?;
    let session = Arc::new(Session::new(Arc::new(engine), cfg));

    match args.command {
        Command::Probe { input } => probe(&session, &input, args.json).await,
        Command::Estimate { input, settings } => estimate(&session, &input, &settings, args.json).await,
        Command::Convert { input, settings, output } => {
            convert(&session, &input, &settings, output, args.json).await
        }
        Command::Batch { inputs, settings, output_dir } => {
            batch(&session, &inputs, &settings, output_dir, args.json).await
        }
        Command::Check { .. } => Ok(()),
    }
}

async fn probe(session: &Session, input: &Path, as_json: bool) -> Result<()> {
    let loaded = session.load_file(input).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&loaded)?);
        return Ok(());
    }

    println!("File:     {}", loaded.file.name);
    println!("Size:     {}", format_bytes(loaded.file.size));
    println!("Duration: {}", format_timestamp(loaded.probe.duration_secs));
    match &loaded.probe.video {
        Some(video) => println!("Video:    {}x{} ({})",
                                video.display_width, video.display_height,
                                video.codec.as_deref().unwrap_or("unknown")),
        None => println!("Video:    none"),
    }
    match &loaded.probe.audio {
        Some(audio) => println!("Audio:    {}", audio.codec.as_deref().unwrap_or("unknown")),
        None => println!("Audio:    none"),
    }
    if let Some(tags) = &loaded.probe.tags {
        for (label, value) in [
            ("Title", &tags.title),
            ("Artist", &tags.artist),
            ("Comment", &tags.comment),
            ("Description", &tags.description),
        ] {
            if let Some(value) = value {
                println!("{:<9} {}", format!("{}:", label), value);
            }
        }
    }
    Ok(())
}

async fn load_with_settings(session: &Session, input: &Path, settings: &SettingsArgs) -> Result<()> {
    session.load_file(input).await?;
    let stored = session.update_settings(settings.apply(session.settings()));
    info!("Settings: {} quality {}, trim {:.2}s..{:.2}s",
          stored.format, stored.quality,
          stored.start_time.unwrap_or(0.0), stored.end_time.unwrap_or(0.0));
    Ok(())
}

async fn estimate(session: &Session, input: &Path, settings: &SettingsArgs, as_json: bool) -> Result<()> {
    load_with_settings(session, input, settings).await?;
    let estimate = session.estimate_now().await?;
    let verdicts = session.compatibility();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({
            "estimate": estimate,
            "compatibility": verdicts,
        }))?);
        return Ok(());
    }

    if estimate.is_known() {
        println!("Estimated size: {}", format_bytes(estimate.estimated_size));
    } else {
        println!("Estimated size: unknown");
    }
    print_compatibility(&verdicts, false)
}

async fn convert(
    session: &Arc<Session>,
    input: &Path,
    settings: &SettingsArgs,
    output: Option<PathBuf>,
    as_json: bool,
) -> Result<()> {
    load_with_settings(session, input, settings).await?;

    let mut progress = session.subscribe_progress();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow_and_update();
            eprint!("\rConverting... {:>3}%", percent);
        }
    });

    let conversion = session.start_conversion();
    tokio::pin!(conversion);
    let outcome = loop {
        tokio::select! {
            outcome = &mut conversion => break outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling conversion");
                session.cancel_conversion();
            }
        }
    };
    watcher.abort();
    eprintln!();

    let result = match outcome {
        JobOutcome::Completed(result) => result,
        JobOutcome::Cancelled => bail!("Conversion cancelled"),
        JobOutcome::Failed(e) => return Err(anyhow!(e)),
    };

    let target = output.unwrap_or_else(|| input.with_file_name(&result.filename));
    if target == input {
        bail!("Refusing to overwrite the source file {}; pass --output", input.display());
    }
    tokio::fs::write(&target, &result.buffer)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({
            "output": target,
            "result": result,
            "compressionRatio": result.compression_ratio(),
        }))?);
    } else {
        println!("✅ {} → {}", input.display(), target.display());
        println!("   {} → {} ({})",
                 format_bytes(result.original_size),
                 format_bytes(result.converted_size),
                 compression_label(result.original_size, result.converted_size));
    }
    Ok(())
}

async fn batch(
    session: &Arc<Session>,
    inputs: &[PathBuf],
    settings: &SettingsArgs,
    output_dir: Option<PathBuf>,
    as_json: bool,
) -> Result<()> {
    let files = collect_media_files(inputs).await?;
    if files.is_empty() {
        bail!("No media files found in the given inputs");
    }

    let stored = session.update_settings(settings.apply(ConversionSettings::default()));
    info!("Batch settings: {} quality {}", stored.format, stored.quality);

    let picker = FsDirectoryPicker::new(output_dir.or_else(|| session.config().output_dir.clone()));

    let mut updates = session.subscribe_batch_status();
    let watcher = tokio::spawn(async move {
        let mut reported = Vec::new();
        while updates.changed().await.is_ok() {
            let statuses = updates.borrow_and_update().clone();
            for (index, entry) in statuses.iter().enumerate() {
                if reported.get(index) == Some(&entry.status) {
                    continue;
                }
                if entry.status == BatchStatus::Converting {
                    eprintln!("[{}/{}] {}", index + 1, statuses.len(), entry.file.name);
                }
            }
            reported = statuses.iter().map(|s| s.status).collect();
        }
    });

    let run = session.start_batch(files, &picker);
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling batch");
                session.cancel_batch();
            }
        }
    };
    watcher.abort();
    let statuses = outcome?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for entry in &statuses {
            match (&entry.status, &entry.result, &entry.error) {
                (BatchStatus::Completed, Some(result), _) => println!(
                    "✅ {} → {} ({}, {})",
                    entry.file.name,
                    result.filename,
                    format_bytes(result.converted_size),
                    compression_label(result.original_size, result.converted_size)
                ),
                (BatchStatus::Error, _, error) => println!(
                    "❌ {}: {}",
                    entry.file.name,
                    error.as_deref().unwrap_or("unknown error")
                ),
                _ => println!("⏸️  {}: not processed", entry.file.name),
            }
        }
    }

    let failed = statuses.iter().filter(|s| s.status != BatchStatus::Completed).count();
    if failed > 0 {
        bail!("{} of {} files were not converted", failed, statuses.len());
    }
    Ok(())
}

fn print_compatibility(verdicts: &[ServiceCompatibility], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(verdicts)?);
        return Ok(());
    }

    for service in verdicts {
        let mark = if service.compatible { "✅" } else { "❌" };
        println!("{} {}", mark, service.name);
        for tier in &service.tiers {
            match tier.reason() {
                None => println!("     {}: ok", tier.tier),
                Some(reason) => println!("     {}: {}", tier.tier, reason),
            }
        }
    }
    Ok(())
}
