//! CLI binary for poster-snapshot.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RunConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use poster_snapshot::{
    generate_all, store, KeyMigration, KeyRename, Orchestrator, PosterProgress, ProgressCallback,
    RunConfig, RunConfigBuilder, RunSummary, Service, SnapshotError, Target,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished poster. Posters finish
/// out of order, so start times are tracked per storage key.
struct CliProgress {
    bar: ProgressBar,
    verb: &'static str,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new(verb: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Building poster matrix…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            verb,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, key: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(key))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PosterProgress for CliProgress {
    fn on_run_start(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} posters  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(self.verb);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} {total} posters…", self.verb))
        ));
    }

    fn on_poster_start(&self, key: &str, _index: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(key.to_string(), Instant::now());
        }
        self.bar.set_message(key.to_string());
    }

    fn on_poster_complete(&self, key: &str, _index: usize, _total: usize) {
        let secs = self.elapsed_secs(key);
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            key,
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_poster_error(&self, key: &str, _index: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(key);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            key,
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} posters done", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} posters done  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Store new baselines for the render service
  poster-snapshot snapshot

  # Compare tile and placement posters against their baselines
  poster-snapshot compare --services tile,placement

  # Only Helsinki posters in the bw style, locally
  poster-snapshot compare --target local --only locationId:hki_* --only posterStyle:bw

  # List the matrix without rendering anything
  poster-snapshot matrix --services render-map

  # Preview renaming "-L1-" to "-labels-" in every stored key
  poster-snapshot migrate-keys --target local --from=-L1- --to=-labels- --dry-run

ENVIRONMENT VARIABLES:
  RENDER_API_URL          Render service base URL
  RENDER_API_KEY          Render service API key
  PLACEMENT_API_URL       Placement service base URL
  PLACEMENT_API_KEY       Placement service API key
  SNAPSHOT_BUCKET_URL     Public read URL of the baseline bucket
  SNAPSHOT_UPLOAD_URL     Write URL of the baseline bucket
  SNAPSHOT_UPLOAD_TOKEN   Bearer token for bucket writes
  BUILD_ID                CI build id; names temp/{BUILD_ID}/ for the report
  PDFIUM_LIB_PATH         Directory containing libpdfium, for pdf posters
  RUST_LOG                Overrides the log filter
"#;

/// Visual regression testing for map-poster rendering services.
#[derive(Parser, Debug)]
#[command(
    name = "poster-snapshot",
    version,
    about = "Visual regression testing for map-poster rendering services",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render every poster and overwrite its baseline.
    Snapshot(RunArgs),
    /// Render every poster, diff against baselines and upload a report.
    Compare(RunArgs),
    /// Print the poster matrix as JSON lines; no network access.
    Matrix(MatrixArgs),
    /// Rename stored baselines after a key layout change (copy, then delete).
    MigrateKeys(MigrateArgs),
}

#[derive(Args, Debug)]
struct MatrixArgs {
    /// Services to include, comma separated.
    #[arg(long, env = "SNAPSHOT_SERVICES", value_delimiter = ',', default_value = "render")]
    services: Vec<String>,

    /// Location used by groups that test a single place.
    #[arg(long, env = "SNAPSHOT_MAIN_LOCATION_ID", default_value = "tokyo_c")]
    main_location_id: String,

    /// Keep posters matching `field:glob`, or a bare glob tried against
    /// every field. Repeat to require several patterns.
    #[arg(long)]
    only: Vec<String>,
}

#[derive(Args, Debug)]
struct StorageArgs {
    /// Baseline storage: s3 or local.
    #[arg(long, env = "SNAPSHOT_TARGET", default_value = "s3")]
    target: String,

    /// Baseline directory for --target local.
    #[arg(long, env = "SNAPSHOT_DIR", default_value = "images")]
    snapshot_dir: PathBuf,

    #[arg(long, env = "SNAPSHOT_BUCKET_URL")]
    bucket_url: Option<String>,

    #[arg(long, env = "SNAPSHOT_UPLOAD_URL")]
    upload_url: Option<String>,

    #[arg(long, env = "SNAPSHOT_UPLOAD_TOKEN", hide_env_values = true)]
    upload_token: Option<String>,
}

impl StorageArgs {
    fn apply(&self, mut builder: RunConfigBuilder) -> Result<RunConfigBuilder> {
        let target: Target = self.target.parse()?;
        builder = builder.target(target).snapshot_dir(&self.snapshot_dir);
        if let Some(url) = &self.bucket_url {
            builder = builder.bucket_url(url);
        }
        if let Some(url) = &self.upload_url {
            builder = builder.upload_url(url);
        }
        if let Some(token) = &self.upload_token {
            builder = builder.upload_token(token);
        }
        Ok(builder)
    }
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[command(flatten)]
    storage: StorageArgs,

    /// Regex matched against every stored key outside temp/.
    #[arg(long, value_name = "REGEX")]
    from: String,

    /// Replacement for the first match; `$1` refers to a capture group.
    #[arg(long, value_name = "REPLACEMENT")]
    to: String,

    /// Print the planned renames without touching the store.
    #[arg(long)]
    dry_run: bool,

    /// Print the migration summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SNAPSHOT_VERBOSE")]
    verbose: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    matrix: MatrixArgs,

    /// Store baselines at the size the service returned.
    #[arg(long, env = "SNAPSHOT_ORIGINALS")]
    originals: bool,

    #[command(flatten)]
    storage: StorageArgs,

    /// Posters processed at once.
    #[arg(short, long, env = "SNAPSHOT_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Write raw service responses to this directory.
    #[arg(long, env = "SNAPSHOT_KEEP_TEMP_FILES")]
    keep_temp_files: Option<PathBuf>,

    /// Names the temp/{build-id}/ prefix of the report.
    #[arg(long, env = "BUILD_ID")]
    build_id: Option<String>,

    #[arg(long, env = "RENDER_API_URL")]
    render_url: Option<String>,

    #[arg(long, env = "RENDER_API_KEY", hide_env_values = true)]
    render_api_key: Option<String>,

    #[arg(long, env = "PLACEMENT_API_URL")]
    placement_url: Option<String>,

    #[arg(long, env = "PLACEMENT_API_KEY", hide_env_values = true)]
    placement_api_key: Option<String>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SNAPSHOT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SNAPSHOT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SNAPSHOT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Matrix(args) => {
            init_logging("warn");
            print_matrix(&args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Snapshot(args) => run(args, false).await,
        Command::Compare(args) => run(args, true).await,
        Command::MigrateKeys(args) => {
            init_logging(if args.verbose { "debug" } else { "info" });
            migrate_keys(&args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();
}

fn print_matrix(args: &MatrixArgs) -> Result<()> {
    let mut builder = RunConfig::builder()
        .services(parse_services(&args.services)?)
        .main_location_id(&args.main_location_id);
    for pattern in &args.only {
        builder = builder.only(pattern);
    }
    let config = builder.build().context("Invalid configuration")?;
    let posters = generate_all(&config.services, &config.matrix, &config.only)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for poster in &posters {
        let mut line = serde_json::to_value(poster).context("Failed to serialise poster")?;
        line["storageKey"] = poster.storage_key().into();
        writeln!(out, "{}", line).context("Failed to write to stdout")?;
    }
    eprintln!("{} posters", posters.len());
    Ok(())
}

async fn run(args: RunArgs, compare: bool) -> Result<ExitCode> {
    // ── Logging setup ────────────────────────────────────────────────────
    // The bar replaces INFO logs; errors still go through.
    let show_progress = !args.quiet && !args.no_progress && !args.json;
    let filter = if args.verbose {
        "debug"
    } else if args.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    init_logging(filter);

    let verb = if compare { "Comparing" } else { "Snapshotting" };
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new(verb) as Arc<dyn PosterProgress>)
    } else {
        None
    };

    let config = build_config(&args, progress)?;
    let mut orchestrator = Orchestrator::from_config(config).context("Failed to set up run")?;

    let result = if compare {
        orchestrator.compare().await
    } else {
        orchestrator.snapshot().await
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e @ SnapshotError::Aborted { .. }) => {
            eprintln!("{} {}", red("✘"), e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context(format!("{} failed", verb)),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !args.quiet {
        print_summary(&summary, compare);
    }

    if summary.has_fully_failed_service() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary, compare: bool) {
    for (service, counts) in &summary.services {
        eprintln!(
            "  {:<12} {}/{} ok{}",
            service.as_str(),
            counts.succeeded,
            counts.total,
            if counts.failed > 0 {
                red(&format!("  ({} failed)", counts.failed))
            } else {
                String::new()
            }
        );
    }
    for failure in &summary.failures {
        eprintln!("  {} {}  {}", red("✗"), failure.storage_key, dim(&failure.error.to_string()));
    }
    if compare {
        let differing = summary.differing_count();
        match &summary.report_location {
            Some(location) => eprintln!(
                "{} {} posters differ  →  {}",
                cyan("⚠"),
                differing,
                bold(location)
            ),
            None => eprintln!("{} no visual differences", green("✔")),
        }
    }
    eprintln!("{}", dim(&format!("{}ms total", summary.duration_ms)));
}

async fn migrate_keys(args: &MigrateArgs) -> Result<()> {
    let config = args
        .storage
        .apply(RunConfig::builder())?
        .build()
        .context("Invalid configuration")?;
    let objects = store::from_config(&config).context("Failed to open baseline store")?;
    let rename = KeyRename::new(&args.from, args.to.as_str())?;

    let summary = KeyMigration::new(objects, rename, config.baseline_retry)
        .run(args.dry_run)
        .await
        .context("Key migration failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
        return Ok(());
    }
    for m in &summary.moves {
        eprintln!("  {} {}", m.from, dim(&format!("→ {}", m.to)));
    }
    let verb = if summary.dry_run { "would rename" } else { "renamed" };
    eprintln!(
        "{} {} {} of {} objects",
        green("✔"),
        verb,
        summary.moves.len(),
        summary.scanned
    );
    Ok(())
}

/// Map CLI args to `RunConfig`.
fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<RunConfig> {
    let builder = RunConfig::builder()
        .services(parse_services(&args.matrix.services)?)
        .main_location_id(&args.matrix.main_location_id)
        .originals(args.originals)
        .concurrency(args.concurrency);
    let mut builder = args.storage.apply(builder)?;

    for pattern in &args.matrix.only {
        builder = builder.only(pattern);
    }
    if let Some(dir) = &args.keep_temp_files {
        builder = builder.keep_temp_files(dir);
    }
    if let Some(id) = &args.build_id {
        builder = builder.build_id(id);
    }
    if let Some(url) = &args.render_url {
        builder = builder.render_url(url);
    }
    if let Some(key) = &args.render_api_key {
        builder = builder.render_api_key(key);
    }
    if let Some(url) = &args.placement_url {
        builder = builder.placement_url(url);
    }
    if let Some(key) = &args.placement_api_key {
        builder = builder.placement_api_key(key);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn parse_services(names: &[String]) -> Result<Vec<Service>> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| n.parse::<Service>().map_err(Into::into))
        .collect()
}
