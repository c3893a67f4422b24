//! # Scrollback CLI (`scrollback`)
//!
//! Exports recorded conversations into bounded Markdown or JSON documents.
//!
//! ## Usage
//!
//! ```bash
//! scrollback --config ./config/scrollback.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scrollback export <transcript>` | Harvest, chunk, render, and package a conversation |
//! | `scrollback inspect <transcript>` | Show what a transcript contains without exporting |
//!
//! Progress goes to stderr, log lines go to stderr (`RUST_LOG` adjusts the
//! filter), and the final summary goes to stdout. Ctrl-C cancels a running
//! export; whatever was collected up to that point is still written.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use scrollback::config::{self, Config};
use scrollback::export::{export_session, ExportOptions, ExportSummary};
use scrollback::harvest::DateWindow;
use scrollback::media::strategies::default_chain;
use scrollback::media::{MediaHost, QualityHint};
use scrollback::progress::ProgressMode;
use scrollback::render::OutputFormat;
use scrollback::session::Exporter;
use scrollback::transcript::{
    Transcript, TranscriptExtractor, TranscriptItem, TranscriptMediaHost, TranscriptSource,
};

/// Scrollback: export conversations from virtualized, scroll-loaded views.
#[derive(Parser)]
#[command(
    name = "scrollback",
    about = "Export conversations from virtualized, scroll-loaded views",
    version,
    long_about = "Scrollback walks a scroll-loaded conversation from its first message to its last, \
    captures every embedded image through a chain of fallback strategies, and writes the result \
    as size-bounded Markdown or JSON documents (zipped when there is more than one)."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/scrollback.toml`. Built-in defaults are used when
    /// the default file does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_CONFIG: &str = "./config/scrollback.toml";

#[derive(Subcommand)]
enum Commands {
    /// Export a conversation.
    ///
    /// Seeks the start of the conversation, collects every message in order,
    /// acquires images, and writes one document per chunk. A single chunk is
    /// written as is; several chunks are packaged into a zip archive.
    Export {
        /// Transcript file (JSON).
        transcript: PathBuf,

        /// Only export messages on or after this day (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Only export messages on or before this day (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,

        /// Image quality: `full` or `reduced`.
        #[arg(long)]
        quality: Option<QualityHint>,

        /// Output document format.
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Output directory. Overrides `output.dir`.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum messages per document. Overrides `export.max_records_per_chunk`.
        #[arg(long)]
        max_records: Option<usize>,

        /// Maximum images per document. Overrides `export.max_media_per_chunk`.
        #[arg(long)]
        max_media: Option<usize>,

        /// Harvest and render, but do not write anything.
        #[arg(long)]
        dry_run: bool,

        /// Start collecting from the current view position instead of
        /// scrolling to the start of the conversation first.
        #[arg(long)]
        no_seek: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show what a transcript contains.
    Inspect {
        /// Transcript file (JSON).
        transcript: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrollback=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = read_config(&cli.config)?;

    match cli.command {
        Commands::Export {
            transcript,
            from,
            to,
            quality,
            format,
            out,
            max_records,
            max_media,
            dry_run,
            no_seek,
            progress,
        } => {
            if let Some(quality) = quality {
                cfg.export.quality = quality;
            }
            if let Some(format) = format {
                cfg.output.format = format;
            }
            if let Some(out) = out {
                cfg.output.dir = out;
            }
            if let Some(n) = max_records {
                cfg.export.max_records_per_chunk = n;
            }
            if let Some(n) = max_media {
                cfg.export.max_media_per_chunk = n;
            }
            if no_seek {
                cfg.scroll.seek_boundary = false;
            }
            let window = parse_window(from.as_deref(), to.as_deref())?;
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);

            run_export(cfg, &transcript, window, dry_run, progress).await?;
        }
        Commands::Inspect { transcript } => {
            run_inspect(&transcript)?;
        }
    }

    Ok(())
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        return Ok(Config::default());
    }
    config::load_config(path)
}

fn parse_day(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid --{} date '{}': expected YYYY-MM-DD", flag, value))
}

fn parse_window(from: Option<&str>, to: Option<&str>) -> Result<Option<DateWindow>> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    let from = match from {
        Some(v) => parse_day(v, "from")?,
        None => NaiveDate::default(),
    };
    let to = match to {
        Some(v) => parse_day(v, "to")?,
        None => Local::now().date_naive(),
    };
    if from > to {
        bail!("--from {} is after --to {}", from, to);
    }
    Ok(Some(DateWindow::new(from, to)?))
}

async fn run_export(
    cfg: Config,
    transcript_path: &Path,
    window: Option<DateWindow>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let transcript = Transcript::load(transcript_path)?;
    let mut source = TranscriptSource::new(&transcript);
    let host: Arc<dyn MediaHost> = Arc::new(TranscriptMediaHost::new(&transcript));
    let chain = default_chain(&cfg, host)?;

    let out_dir = cfg.output.dir.clone();
    let renderer = cfg.output.format.renderer();
    let reporter = progress.reporter();

    let exporter = Exporter::new();
    let session = exporter.begin(cfg)?;
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling export...");
            cancel.cancel();
        }
    });

    let options = ExportOptions {
        window,
        today: None,
    };
    let summary = export_session(
        session,
        &mut source,
        &TranscriptExtractor,
        &chain,
        renderer.as_ref(),
        &options,
        reporter.as_ref(),
    )
    .await?;

    print_summary(&summary);

    let Some(package) = &summary.package else {
        if summary.is_partial() {
            println!("Cancelled before any message was collected; nothing written.");
        } else {
            println!("No messages found; nothing written.");
        }
        return Ok(());
    };

    if dry_run {
        println!(
            "Dry run: would write {} ({} bytes) to {}",
            package.filename,
            package.bytes.len(),
            out_dir.display()
        );
        return Ok(());
    }

    let path = package
        .write_to(&out_dir)
        .with_context(|| format!("Failed to write export to {}", out_dir.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_summary(summary: &ExportSummary) {
    let stats = &summary.stats;
    let parts = summary.package.as_ref().map(|p| p.parts).unwrap_or(0);
    if summary.is_partial() {
        println!(
            "Export cancelled: partial result with {} messages, {} images, {} part(s)",
            stats.records, stats.media_acquired, parts
        );
    } else {
        println!(
            "Export complete: {} messages, {} images, {} part(s)",
            stats.records, stats.media_acquired, parts
        );
    }
    if stats.media_failed > 0 {
        println!("  images unavailable: {}", stats.media_failed);
    }
    if stats.skipped > 0 {
        println!("  items skipped:      {}", stats.skipped);
    }
    if stats.out_of_window > 0 {
        println!("  outside date range: {}", stats.out_of_window);
    }
    if stats.fingerprinted > 0 {
        println!(
            "  low-confidence ids: {} (identified by content; repeated messages may be merged)",
            stats.fingerprinted
        );
    }
}

fn run_inspect(path: &Path) -> Result<()> {
    let transcript = Transcript::load(path)?;
    let days = transcript
        .items
        .iter()
        .filter(|i| matches!(i, TranscriptItem::Day { .. }))
        .count();
    let service = transcript
        .items
        .iter()
        .filter(|i| matches!(i, TranscriptItem::Service { .. }))
        .count();

    println!("Title:     {}", transcript.title);
    println!("Items:     {}", transcript.items.len());
    println!("Messages:  {}", transcript.message_count());
    println!("Images:    {}", transcript.media_count());
    println!("Days:      {}", days);
    println!("Notices:   {}", service);
    println!(
        "View:      {}px visible, {}px rows, pages of {}",
        transcript.view.visible, transcript.view.item_height, transcript.view.page_size
    );
    Ok(())
}
