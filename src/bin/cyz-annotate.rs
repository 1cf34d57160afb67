//! CLI binary for cyz-annotate.
//!
//! A thin shim over the library crate: flags map to `SessionConfig`, the
//! pipeline runs once, and then an optional line-oriented browse loop lets
//! the operator step through images and record annotations.

use anyhow::{Context, Result};
use clap::Parser;
use cyz_annotate::{
    AnnotationRecord, ImageOrder, ProgressCallback, Session, SessionConfig, Stage,
    StageProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One spinner per running stage. Decoding can take minutes, so the operator
/// needs to see that something is still happening.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn take_bar(&self) -> Option<ProgressBar> {
        self.bar.lock().ok().and_then(|mut b| b.take())
    }
}

impl StageProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix(stage.to_string());
        bar.set_message(match stage {
            Stage::Acquire => "fetching instrument file…",
            Stage::Convert => "decoding (this can take a while)…",
            Stage::Extract => "extracting images…",
        });
        bar.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut slot) = self.bar.lock() {
            if let Some(old) = slot.replace(bar) {
                old.finish_and_clear();
            }
        }
    }

    fn on_stage_complete(&self, stage: Stage, output: &Path, elapsed_ms: u64) {
        if let Some(bar) = self.take_bar() {
            bar.finish_and_clear();
        }
        eprintln!(
            "  {} {:<8} {}  {}",
            green("✓"),
            stage,
            output.display(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        );
    }

    fn on_stage_error(&self, stage: Stage, _error: &str) {
        if let Some(bar) = self.take_bar() {
            bar.finish_and_clear();
        }
        // The full message is printed by main's error path.
        eprintln!("  {} {}", red("✗"), stage);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full run from a URL, then browse and annotate interactively
  cyz-annotate https://example.org/data/sample.cyz

  # Local file, decode only
  cyz-annotate --until convert ./sample.cyz

  # Non-interactive: list extracted images as JSON
  cyz-annotate --json ./sample.cyz > images.json

  # Custom annotation columns, images in enumeration order
  cyz-annotate --fields group,genus,confidence --order enumeration ./sample.cyz

BROWSE COMMANDS:
  n                  next image
  p                  previous image
  g <index>          go to image (0-based)
  a <v1> ; <v2> …    save annotation for the current image (';' separates fields)
  l                  list all images with their annotations
  q                  quit (Ctrl-D works too)

ENVIRONMENT VARIABLES:
  CYZ_WORKSPACE          Workspace directory (default: <tmp>/CyzWorkspace)
  CYZ2JSON_PATH          Path to Cyz2Json.dll
  CYZ_DOTNET             .NET host used to run the decoder (default: dotnet)
  CYZ_EXTRACTOR_SCRIPT   Path to listmode.py
  CYZ_PYTHON             Interpreter for the extractor (default: python)
  CYZ_ANNOTATIONS        Annotation CSV (default: <workspace>/annotations/annotations.csv)

NOTE:
  Every regular file directly inside the workspace is deleted at startup.
  Annotations in the default location live in a subdirectory and are kept.
"#;

/// Fetch, decode and extract a .cyz file, then browse and annotate its images.
#[derive(Parser, Debug)]
#[command(
    name = "cyz-annotate",
    version,
    about = "Turn flow-cytometry .cyz files into particle images and annotate them",
    long_about = "Acquire a CytoSense .cyz file (local path or HTTP/HTTPS URL), decode it with \
Cyz2Json, extract particle images and the measurement table with listmode.py, then step through \
the images recording per-image annotations into a CSV file that persists across sessions.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local .cyz file path or HTTP/HTTPS URL.
    source: String,

    /// Workspace directory. Its top-level files are deleted at startup.
    #[arg(short, long, env = "CYZ_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to Cyz2Json.dll.
    #[arg(long, env = "CYZ2JSON_PATH")]
    decoder: Option<PathBuf>,

    /// .NET host used to run the decoder.
    #[arg(long, env = "CYZ_DOTNET", default_value = "dotnet")]
    dotnet: PathBuf,

    /// Path to the listmode.py extractor script.
    #[arg(long, env = "CYZ_EXTRACTOR_SCRIPT")]
    extractor_script: Option<PathBuf>,

    /// Interpreter for the extractor script.
    #[arg(long, env = "CYZ_PYTHON", default_value = "python")]
    python: PathBuf,

    /// Annotation CSV file.
    #[arg(long, env = "CYZ_ANNOTATIONS")]
    annotations: Option<PathBuf>,

    /// Annotation columns, comma-separated.
    #[arg(long, env = "CYZ_FIELDS", value_delimiter = ',', default_value = "biological,species")]
    fields: Vec<String>,

    /// Extension of extracted images.
    #[arg(long, env = "CYZ_IMAGE_EXT", default_value = "tif")]
    image_ext: String,

    /// Image ordering for browsing.
    #[arg(long, value_enum, default_value = "lexicographic")]
    order: OrderArg,

    /// Stop after this stage.
    #[arg(long, value_enum, default_value = "extract")]
    until: StageArg,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CYZ_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the stage result as JSON and exit without browsing.
    #[arg(long)]
    json: bool,

    /// Print the image list and exit without browsing.
    #[arg(long)]
    no_browse: bool,

    /// Disable the stage spinner.
    #[arg(long, env = "CYZ_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CYZ_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "CYZ_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OrderArg {
    Lexicographic,
    Enumeration,
}

impl From<OrderArg> for ImageOrder {
    fn from(v: OrderArg) -> Self {
        match v {
            OrderArg::Lexicographic => ImageOrder::Lexicographic,
            OrderArg::Enumeration => ImageOrder::Enumeration,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StageArg {
    Acquire,
    Convert,
    Extract,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers stage feedback; keep INFO logs out of its way.
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn StageProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Session ──────────────────────────────────────────────────────────
    let (mut session, report) = Session::open(config).context("Failed to open workspace")?;
    if !cli.quiet {
        eprintln!(
            "{} workspace {}  {}",
            cyan("◆"),
            bold(&session.workspace().root().display().to_string()),
            dim(&format!("{} stale file(s) removed", report.removed.len())),
        );
        for failure in &report.failures {
            eprintln!("  {} {}", cyan("⚠"), failure);
        }
    }

    // ── Stages ───────────────────────────────────────────────────────────
    let acquired = session.acquire(&cli.source).await.context("Acquire failed")?;
    if cli.until == StageArg::Acquire {
        return emit(&cli, &acquired, &acquired.path);
    }

    let record = session.convert(&acquired.path).await.context("Convert failed")?;
    if cli.until == StageArg::Convert {
        return emit(&cli, &serde_json::json!({ "record": record }), &record);
    }

    let result = session.extract().await.context("Extract failed")?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
        return Ok(());
    }
    if !cli.quiet {
        eprintln!(
            "{} {} images  {}  →  {}",
            green("✔"),
            bold(&result.images.len().to_string()),
            dim(&format!("{}ms", result.duration_ms)),
            result.table.display(),
        );
    }

    if cli.no_browse {
        for name in &result.images {
            println!("{}", result.image_path(name).display());
        }
        return Ok(());
    }

    browse(&mut session)
}

/// Map CLI args to `SessionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<SessionConfig> {
    let mut builder = SessionConfig::builder()
        .dotnet_program(&cli.dotnet)
        .extractor_program(&cli.python)
        .annotation_fields(cli.fields.iter().map(|f| f.trim().to_string()))
        .image_extension(cli.image_ext.clone())
        .image_order(cli.order.into())
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref ws) = cli.workspace {
        builder = builder.workspace_root(ws);
    }
    if let Some(ref dll) = cli.decoder {
        builder = builder.decoder_path(dll);
    }
    if let Some(ref script) = cli.extractor_script {
        builder = builder.extractor_script(script);
    }
    if let Some(ref path) = cli.annotations {
        builder = builder.annotation_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Print an early-stop result.
fn emit<T: serde::Serialize>(cli: &Cli, value: &T, path: &Path) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialise result")?
        );
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

// ── Browse loop ──────────────────────────────────────────────────────────────

enum Command {
    Next,
    Previous,
    Goto(isize),
    Annotate(Vec<String>),
    List,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let cmd = match head {
        "" => return Ok(None),
        "n" | "next" => Command::Next,
        "p" | "prev" | "previous" => Command::Previous,
        "g" | "goto" => Command::Goto(
            rest.parse()
                .with_context(|| format!("Expected an image index, got '{rest}'"))?,
        ),
        "a" | "annotate" => Command::Annotate(rest.split(';').map(|v| v.trim().to_string()).collect()),
        "l" | "list" => Command::List,
        "q" | "quit" | "exit" => Command::Quit,
        other => anyhow::bail!("Unknown command '{other}' (n, p, g <i>, a v1 ; v2, l, q)"),
    };
    Ok(Some(cmd))
}

fn browse(session: &mut Session) -> Result<()> {
    if session.navigator().is_empty() {
        eprintln!("{} no images were extracted; nothing to annotate", cyan("⚠"));
        return Ok(());
    }

    let interactive = io::stdin().is_terminal();
    show_current(session)?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            eprint!("{} ", bold(">"));
            io::stderr().flush().ok();
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read from stdin")?;

        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{} {e}", red("✗"));
                continue;
            }
        };

        match cmd {
            Command::Quit => break,
            Command::Next => {
                if !session.navigator_mut().next() {
                    eprintln!("{}", dim("(last image)"));
                }
            }
            Command::Previous => {
                if !session.navigator_mut().previous() {
                    eprintln!("{}", dim("(first image)"));
                }
            }
            Command::Goto(i) => {
                if let Err(e) = session.navigator_mut().move_to(i) {
                    eprintln!("{} {e}", red("✗"));
                    continue;
                }
            }
            Command::Annotate(values) => {
                // A failed save leaves the cursor in place so the same line can be retried.
                match session.annotate_current(&AnnotationRecord::new(values)) {
                    Ok(image) => eprintln!("  {} saved {}", green("✓"), image),
                    Err(e) => eprintln!("{} {e}", red("✗")),
                }
                continue;
            }
            Command::List => {
                list_all(session)?;
                continue;
            }
        }
        show_current(session)?;
    }
    Ok(())
}

fn show_current(session: &Session) -> Result<()> {
    let Some((image, record)) = session
        .current_annotation()
        .context("Failed to load annotation")?
    else {
        return Ok(());
    };
    let nav = session.navigator();
    let position = nav.position().unwrap_or(0);

    println!(
        "[{}/{}] {}",
        position,
        nav.len().saturating_sub(1),
        session.workspace().path_for(&image).display()
    );
    for (i, field) in session.store().fields().iter().enumerate() {
        let value = record.get(i);
        println!(
            "    {:<14} {}",
            field,
            if value.is_empty() { dim("—") } else { value.to_string() }
        );
    }
    Ok(())
}

fn list_all(session: &Session) -> Result<()> {
    let stored = session
        .store()
        .load_all()
        .context("Failed to load annotations")?;
    let current = session.navigator().position();

    for (i, image) in session.navigator().images().iter().enumerate() {
        let marker = if Some(i) == current { "▶" } else { " " };
        let values = stored
            .get(image)
            .map(|r| r.values().join(" ; "))
            .unwrap_or_default();
        println!("{marker} {i:>4}  {image:<24} {}", dim(&values));
    }
    Ok(())
}
