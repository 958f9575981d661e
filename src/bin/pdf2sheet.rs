//! CLI binary for pdf2sheet.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConvertConfig`, wires up the orchestrator, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2sheet::{
    ConversionRequest, ConvertApiClient, ConvertConfig, CredentialStore, DriveRelayClient,
    Orchestrator, Phase, RunObserver, RunReport, RunState, SourceDocument, UploadError,
    ENV_API_SECRET, ENV_DRIVE_ENDPOINT,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Clip to at most `max` characters, never splitting a multibyte character.
fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\u{2026}", &text[..cut]),
        None => text.to_string(),
    }
}

// ── CLI run observer using indicatif ─────────────────────────────────────────

/// Terminal run observer: renders a live 0–100 progress bar and one log line
/// per completed phase. The bar position tracks the orchestrator's weighted
/// overall progress, so the handoff from conversion to upload lands at 85%.
struct CliRunObserver {
    /// One bar for the whole run, pinned at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-phase wall-clock start times for elapsed reporting.
    phase_starts: Mutex<HashMap<Phase, Instant>>,
}

impl CliRunObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);

        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}%  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            phase_starts: Mutex::new(HashMap::new()),
        })
    }

    /// Print the green tick for a finished phase, if it ever started.
    fn finish_phase(&self, phase: Phase, label: &str) {
        let started = self.phase_starts.lock().unwrap().remove(&phase);
        if let Some(t) = started {
            self.bar.println(format!(
                "  {} {label}  {}",
                green("✓"),
                dim(&format!("{:.1}s", t.elapsed().as_secs_f64())),
            ));
        }
    }
}

impl RunObserver for CliRunObserver {
    fn on_state_change(&self, state: RunState) {
        match state {
            RunState::Validating => {
                self.bar.set_prefix("Validating");
            }
            RunState::Converting => {
                self.phase_starts
                    .lock()
                    .unwrap()
                    .insert(Phase::Convert, Instant::now());
                self.bar
                    .println(format!("{} {}", cyan("◆"), bold("Converting document…")));
                self.bar.set_prefix("Converting");
            }
            RunState::Uploading => {
                self.finish_phase(Phase::Convert, "Converted");
                self.phase_starts
                    .lock()
                    .unwrap()
                    .insert(Phase::Upload, Instant::now());
                self.bar.set_prefix("Uploading");
            }
            RunState::Complete => {
                self.finish_phase(Phase::Upload, "Uploaded to Drive");
                self.finish_phase(Phase::Convert, "Converted");
                self.bar.finish_and_clear();
            }
            RunState::SecretRequired | RunState::Failed | RunState::Idle => {
                self.bar.finish_and_clear();
            }
        }
    }

    fn on_progress(&self, overall: f32) {
        self.bar.set_position(overall.round() as u64);
    }

    fn on_upload_warning(&self, warning: &UploadError) {
        // Relay messages are arbitrary text; keep them to one tidy line.
        let msg = clip(&warning.to_string(), 79);
        self.bar
            .println(format!("  {} Drive upload failed  {}", red("✗"), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a statement and print the download link
  pdf2sheet statement.pdf --consent

  # Password-protected document
  pdf2sheet statement.pdf --consent --password 1234

  # Convert and relay the workbook into Google Drive
  pdf2sheet statement.pdf --consent --drive

  # Machine-readable run report
  pdf2sheet statement.pdf --consent --json > report.json

  # One-time Drive setup
  pdf2sheet --connect-drive service-account.json
  pdf2sheet --drive-status
  pdf2sheet --disconnect-drive

EXIT CODES:
  0  run completed (a Drive warning does not change this)
  1  run failed
  3  the document is password-protected and no --password was given

ENVIRONMENT VARIABLES:
  CONVERTAPI_SECRET       Conversion service secret (required for runs)
  CONVERTAPI_BASE_URL     Override the conversion service base URL
  DRIVE_RELAY_URL         Drive relay endpoint used by --drive
  PDF2SHEET_CREDENTIALS   Path to the Drive credential file
  PDF2SHEET_PASSWORD      Document password (same as --password)

SETUP:
  1. Set the secret:      export CONVERTAPI_SECRET=...
  2. Convert:             pdf2sheet statement.pdf --consent
  3. Optional Drive:      export DRIVE_RELAY_URL=https://relay.example.com/upload
                          pdf2sheet --connect-drive service-account.json
                          pdf2sheet statement.pdf --consent --drive
"#;

/// Convert PDF documents to XLSX workbooks through a remote service.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2sheet",
    version,
    about = "Convert PDF documents to XLSX workbooks via a remote conversion service",
    long_about = "Convert PDF documents to XLSX workbooks through a ConvertAPI-compatible \
service, optionally relaying the finished workbook into Google Drive. A run moves through \
validation, conversion, and upload; an upload failure is reported as a warning and never \
discards the converted workbook.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file to convert.
    #[arg(required_unless_present_any = ["connect_drive", "drive_status", "disconnect_drive"])]
    input: Option<PathBuf>,

    /// Confirm the document may be sent to the remote conversion service.
    #[arg(long, env = "PDF2SHEET_CONSENT")]
    consent: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2SHEET_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Relay the converted workbook into Google Drive after conversion.
    #[arg(long, env = "PDF2SHEET_DRIVE")]
    drive: bool,

    /// Conversion service secret token.
    #[arg(long, env = "CONVERTAPI_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Conversion service base URL.
    #[arg(long, env = "CONVERTAPI_BASE_URL")]
    api_base_url: Option<String>,

    /// Drive relay endpoint (required with --drive).
    #[arg(long, env = "DRIVE_RELAY_URL")]
    drive_endpoint: Option<String>,

    /// Path to the Drive credential file.
    #[arg(long, env = "PDF2SHEET_CREDENTIALS", value_name = "FILE")]
    credentials: Option<PathBuf>,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "PDF2SHEET_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Output the run report as JSON instead of human-readable text.
    #[arg(long, env = "PDF2SHEET_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2SHEET_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2SHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and links.
    #[arg(short, long, env = "PDF2SHEET_QUIET")]
    quiet: bool,

    /// Store a Drive service-account key from this file, then exit.
    #[arg(long, value_name = "KEY_FILE")]
    connect_drive: Option<PathBuf>,

    /// Report whether a Drive credential is stored, then exit.
    #[arg(long)]
    drive_status: bool,

    /// Remove the stored Drive credential, then exit.
    #[arg(long)]
    disconnect_drive: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are redundant while the progress bar is
    // rendering; keep stderr quiet so the bar stays readable.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Credential management (no conversion service needed) ─────────────
    if let Some(ref key_file) = cli.connect_drive {
        return connect_drive(&cli, key_file).await;
    }
    if cli.drive_status {
        return drive_status(&cli).await;
    }
    if cli.disconnect_drive {
        return disconnect_drive(&cli).await;
    }

    // ── Build config and orchestrator ────────────────────────────────────
    let input = cli.input.clone().context("An input PDF is required")?;
    let config = build_config(&cli)?;

    let converter =
        Arc::new(ConvertApiClient::new(&config).context("Conversion client setup failed")?);
    let mut orchestrator = Orchestrator::new(converter)
        .with_upload_failure_threshold(config.upload_failure_threshold);

    if config.storage_configured() {
        let store = Arc::new(CredentialStore::on_disk(credentials_file(&cli)?));
        if let Some(uploader) = drive_uploader(&config, store).await? {
            orchestrator = orchestrator.with_uploader(uploader);
        } else if !cli.quiet {
            eprintln!(
                "{} Drive is not connected; converting without upload. Run --connect-drive first.",
                cyan("⚠")
            );
        }
    }
    if show_progress {
        orchestrator = orchestrator.with_observer(CliRunObserver::new());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let mut request =
        ConversionRequest::new(SourceDocument::Path(input)).with_consent(cli.consent);
    if let Some(ref secret) = cli.password {
        request = request.with_secret(secret);
    }

    orchestrator.start(request).await;
    let report = orchestrator.report();

    if cli.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialise the run report")?;
        println!("{json}");
        return Ok(exit_code_for(report.state));
    }

    // start() always ends Complete, SecretRequired, or Failed.
    match report.state {
        RunState::Complete => {
            print_outcome(&report, cli.quiet);
            Ok(ExitCode::SUCCESS)
        }
        RunState::SecretRequired => {
            eprintln!(
                "{} This document is password-protected. Re-run with --password <SECRET>.",
                cyan("⚠")
            );
            Ok(ExitCode::from(3))
        }
        _ => {
            let reason = report
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            eprintln!("{} Conversion failed: {reason}", red("✘"));
            Ok(ExitCode::from(1))
        }
    }
}

/// Links go to stdout for piping; decorations go to stderr.
fn print_outcome(report: &RunReport, quiet: bool) {
    let Some(conversion) = &report.conversion else {
        return;
    };
    if !quiet {
        eprintln!(
            "{} {}",
            green("✔"),
            bold(&format!("Workbook ready: {}", conversion.file_name))
        );
    }
    println!("{}", conversion.download_url);
    if let Some(upload) = &report.upload {
        println!("{}", upload.view_url);
    }
    if quiet {
        return;
    }
    if let Some(warning) = &report.upload_warning {
        eprintln!(
            "{} Drive upload failed (the download link still works): {warning}",
            cyan("⚠")
        );
        if report.storage_degraded {
            eprintln!(
                "   {}",
                dim("Several runs in a row now; check DRIVE_RELAY_URL and --drive-status.")
            );
        }
    }
    match (report.convert_ms, report.upload_ms) {
        (Some(c), Some(u)) => eprintln!(
            "   {}",
            dim(&format!("converted in {c}ms, uploaded in {u}ms"))
        ),
        (Some(c), None) => eprintln!("   {}", dim(&format!("converted in {c}ms"))),
        _ => {}
    }
}

fn exit_code_for(state: RunState) -> ExitCode {
    match state {
        RunState::Complete => ExitCode::SUCCESS,
        RunState::SecretRequired => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

/// Map CLI args to `ConvertConfig`.
fn build_config(cli: &Cli) -> Result<ConvertConfig> {
    let secret = cli.api_secret.clone().with_context(|| {
        format!("No conversion service secret. Set {ENV_API_SECRET} or pass --api-secret")
    })?;

    let mut builder = ConvertConfig::builder()
        .api_secret(secret)
        .request_timeout_secs(cli.timeout);
    if let Some(ref base) = cli.api_base_url {
        builder = builder.api_base_url(base.clone());
    }
    if cli.drive {
        let endpoint = cli.drive_endpoint.clone().with_context(|| {
            format!("--drive needs a relay endpoint. Set {ENV_DRIVE_ENDPOINT} or pass --drive-endpoint")
        })?;
        builder = builder.drive_endpoint(endpoint);
    }

    builder.build().context("Invalid configuration")
}

/// Where the Drive credential slot lives on disk.
///
/// `--credentials` (or `$PDF2SHEET_CREDENTIALS`, folded in by clap) wins;
/// otherwise `$HOME/.config/pdf2sheet/credentials.json`.
fn credentials_file(cli: &Cli) -> Result<PathBuf> {
    if let Some(ref path) = cli.credentials {
        return Ok(path.clone());
    }
    let home = std::env::var_os("HOME")
        .context("HOME is not set; pass --credentials <FILE> instead")?;
    Ok(PathBuf::from(home).join(".config/pdf2sheet/credentials.json"))
}

/// Build the Drive relay uploader, or `None` when no credential is stored.
///
/// Upload is never attempted without a stored credential; the caller prints
/// the connect hint and the run proceeds convert-only.
async fn drive_uploader(
    config: &ConvertConfig,
    store: Arc<CredentialStore>,
) -> Result<Option<Arc<DriveRelayClient>>> {
    if !store.check_access().await {
        return Ok(None);
    }
    let uploader = DriveRelayClient::new(config, store).context("Drive relay setup failed")?;
    Ok(Some(Arc::new(uploader)))
}

// ── Credential management commands ───────────────────────────────────────────

async fn connect_drive(cli: &Cli, key_file: &Path) -> Result<ExitCode> {
    let payload = tokio::fs::read_to_string(key_file)
        .await
        .with_context(|| format!("Failed to read {}", key_file.display()))?;

    let store = CredentialStore::on_disk(credentials_file(cli)?);
    store
        .initialize(&payload)
        .await
        .context("The service-account key was rejected")?;

    if !cli.quiet {
        eprintln!("{} Drive connected", green("✔"));
    }
    Ok(ExitCode::SUCCESS)
}

async fn drive_status(cli: &Cli) -> Result<ExitCode> {
    let path = credentials_file(cli)?;
    let store = CredentialStore::on_disk(&path);
    if store.check_access().await {
        println!("connected  {}", dim(&path.display().to_string()));
        Ok(ExitCode::SUCCESS)
    } else {
        println!("not connected");
        Ok(ExitCode::from(1))
    }
}

async fn disconnect_drive(cli: &Cli) -> Result<ExitCode> {
    let store = CredentialStore::on_disk(credentials_file(cli)?);
    store
        .clear()
        .await
        .context("Failed to remove the stored credential")?;

    if !cli.quiet {
        eprintln!("{} Drive disconnected", green("✔"));
    }
    Ok(ExitCode::SUCCESS)
}
