use crate::config::{self, FileConfig, Overrides};
use crate::engine::service::{ExportService, HttpExportService};
use crate::model::{ExportConfig, ExportEvent, ExportFilters, ExportRecord, ExportRequest, NoticeLevel};
use crate::session::ExportSession;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "bulk-export",
    version,
    about = "Export a filtered record listing to a spreadsheet, with optional TUI"
)]
pub struct Cli {
    /// Base URL of the export service [default: http://localhost:8080]
    #[arg(long)]
    pub base_url: Option<String>,

    /// Only export records owned by this id
    #[arg(long)]
    pub owner_id: Option<String>,

    /// Free-text search filter
    #[arg(long)]
    pub search: Option<String>,

    /// Number of records in the current listing; picks direct vs. background export
    #[arg(long)]
    pub total: u64,

    /// Directory the exported file is written to [default: .]
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Largest record count exported in a single request [default: 200]
    #[arg(long)]
    pub sync_threshold: Option<u64>,

    /// Delay between job progress queries [default: 2s]
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Consecutive failed progress queries before giving up [default: 10]
    #[arg(long)]
    pub max_poll_failures: Option<u32>,

    /// Timeout for each request to the export service [default: 30s]
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Print the export record as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Save each finished export to the history. Use --auto-save true or --auto-save false
    #[arg(long, action = clap::ArgAction::Set)]
    pub auto_save: Option<bool>,

    /// Start an export as soon as the TUI launches
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub export_on_launch: bool,

    /// Path to a config file [default: <config dir>/bulk-export/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log engine activity to stderr (RUST_LOG takes precedence)
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    pub fn is_tui(&self) -> bool {
        !(self.silent || self.json || self.text)
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let cfg = build_config(&args)?;

    // Silent mode takes precedence over other output modes
    if args.silent {
        return run_json(args, cfg, true).await;
    }

    if args.is_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, cfg).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args, cfg).await;
        }
    }

    if args.json {
        return run_json(args, cfg, false).await;
    }

    run_text(args, cfg).await
}

fn build_overrides(args: &Cli) -> Overrides {
    Overrides {
        base_url: args.base_url.clone(),
        output_dir: args.output_dir.clone(),
        sync_threshold: args.sync_threshold,
        poll_interval: args.poll_interval.map(Into::into),
        max_poll_failures: args.max_poll_failures,
        request_timeout: args.request_timeout.map(Into::into),
        auto_save: args.auto_save,
    }
}

/// Resolve the effective settings from flags and the config file.
pub fn build_config(args: &Cli) -> Result<ExportConfig> {
    let file = FileConfig::load(args.config.as_deref())?;
    config::resolve(file, build_overrides(args))
}

/// Snapshot of the filters and listing size for one export.
pub fn build_request(args: &Cli) -> ExportRequest {
    ExportRequest {
        filters: ExportFilters {
            owner_id: args.owner_id.clone().filter(|s| !s.trim().is_empty()),
            search: args.search.clone().filter(|s| !s.trim().is_empty()),
        },
        total_records: args.total,
    }
}

pub fn build_service(cfg: &ExportConfig) -> Result<Arc<dyn ExportService>> {
    let service = HttpExportService::new(cfg).context("failed to set up HTTP client")?;
    Ok(Arc::new(service))
}

/// Run one attempt to completion; Ctrl-C cancels it.
async fn drive(session: &mut ExportSession, request: ExportRequest) -> Result<ExportRecord> {
    session.start(request)?;
    let record = tokio::select! {
        record = session.wait() => record,
        _ = tokio::signal::ctrl_c() => session.cancel().await,
    };
    debug_assert!(!session.state().exporting);
    record.context("export task failed")
}

fn finish(record: &ExportRecord) -> Result<()> {
    if record.outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("export {}", record.outcome.label()))
    }
}

/// JSON and silent modes. `silent` suppresses everything but errors.
async fn run_json(args: Cli, cfg: ExportConfig, silent: bool) -> Result<()> {
    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    // Nothing reads events here; the record carries the outcome. With the
    // receiver gone the session's sends fail and nothing is queued.
    let (evt_tx, _) = mpsc::unbounded_channel::<ExportEvent>();
    let mut session = ExportSession::new(build_service(&cfg)?, cfg.clone(), evt_tx);
    let record = drive(&mut session, build_request(&args)).await?;
    session.teardown();

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&record)?;
        let _ = tx.send(OutputLine::Stdout(out));
    }

    if cfg.auto_save {
        if silent {
            crate::storage::save_record(&record).context("failed to save export record")?;
        } else if let Some(tx) = out_tx.as_ref() {
            if let Ok(p) = crate::storage::save_record(&record) {
                let _ = tx.send(OutputLine::Stderr(format!("Recorded: {}", p.display())));
            }
        }
    }

    drop(out_tx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    finish(&record)
}

fn render_event(ev: &ExportEvent) -> Option<String> {
    match ev {
        ExportEvent::Started {
            strategy,
            total_records,
        } => Some(format!("== Export {total_records} records ({strategy:?}) ==")),
        ExportEvent::JobSubmitted { job_id } => Some(format!("Job submitted: {job_id}")),
        ExportEvent::Progress(p) => Some(format!("Progress: {:>3}% {}", p.progress, p.message)),
        ExportEvent::Notice { level, message } => Some(match level {
            NoticeLevel::Error => format!("Error: {message}"),
            NoticeLevel::Success | NoticeLevel::Info => message.clone(),
        }),
        ExportEvent::Info(info) => Some(info.to_message()),
        ExportEvent::ExportingChanged(_) | ExportEvent::Finished { .. } => None,
    }
}

async fn run_text(args: Cli, cfg: ExportConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<ExportEvent>();

    let printer_tx = out_tx.clone();
    let printer = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if let Some(line) = render_event(&ev) {
                let _ = printer_tx.send(OutputLine::Stderr(line));
            }
        }
    });

    let mut session = ExportSession::new(build_service(&cfg)?, cfg.clone(), evt_tx);
    let result = drive(&mut session, build_request(&args)).await;
    // Closes the event channel, which ends the printer.
    session.teardown();
    let _ = printer.await;
    let record = result?;

    let processed =
        crate::orchestrator::process_export_completion(cfg.auto_save, 0, &record);
    let summary = crate::text_summary::build_text_summary(&record);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if let Some(p) = processed.history_path.as_ref() {
        let _ = out_tx.send(OutputLine::Stderr(format!("Recorded: {}", p.display())));
    }
    for msg in processed.messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    drop(out_tx);
    let _ = out_handle.await;

    finish(&record)
}
