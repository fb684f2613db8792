//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;

use hinted_file_tracker::core::config::{Config, WalkerSettings};
use hinted_file_tracker::core::errors::TrackerError;
use hinted_file_tracker::daemon::signals::SignalHandler;
use hinted_file_tracker::logger::journal::{ChangeJournal, JournalConfig};
use hinted_file_tracker::scanner::source::{DirectorySource, LocalDirectorySource};
use hinted_file_tracker::scanner::walker::{DirectoryWalker, WalkStats, WalkerConfig};
use hinted_file_tracker::store::attached::{AttachedDataRecord, DeletionPolicy};
use hinted_file_tracker::store::entries::TrackedEntry;
use hinted_file_tracker::tracker::event::{ChangeEvent, ChangeKind};
use hinted_file_tracker::tracker::{HintedTracker, TrackerOptions, TrackerReader};

/// Hinted file tracker: keeps a persistent index of a directory tree and
/// reports what changed.
#[derive(Debug, Parser)]
#[command(
    name = "htrk",
    author,
    version,
    about = "Hinted file tracker - persistent change index",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the index database path.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Debug-level diagnostics on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Walk a directory once and reconcile it into the index.
    Scan(ScanArgs),
    /// Keep walking a directory until interrupted, printing events.
    Watch(WatchArgs),
    /// Show one tracked entry.
    Stat(PathArgs),
    /// List the tracked children of a directory.
    Ls(PathArgs),
    /// Attach a payload to a file under ROOT.
    Attach(AttachArgs),
    /// List attached payloads of an entry.
    Attached(PathArgs),
    /// Show index row counts.
    Summary,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Directory to index.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Print every change event.
    #[arg(long)]
    events: bool,
}

#[derive(Debug, Clone, Args)]
struct WatchArgs {
    /// Directory to index.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Seconds between walks (overrides `walker.rescan_interval_secs`).
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct PathArgs {
    /// Index path, e.g. `/docs/readme.md`.
    #[arg(value_name = "PATH", default_value = "/")]
    path: String,
}

#[derive(Debug, Clone, Args)]
struct AttachArgs {
    /// Directory the index mirrors.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Index path of the target entry.
    #[arg(value_name = "PATH")]
    path: String,
    /// Name of the attached data kind.
    #[arg(long, value_name = "KEY")]
    key: String,
    /// Payload text.
    #[arg(long, value_name = "TEXT")]
    payload: String,
    /// Drop the payload when the file's content changes.
    #[arg(long)]
    delete_on_change: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Tracker or environment failure.
    #[error("{0}")]
    Tracker(#[from] TrackerError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Tracker(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

/// Install the stderr diagnostics subscriber. `HTRK_LOG` takes precedence.
pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env("HTRK_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Watch(args) => run_watch(cli, args),
        Command::Stat(args) => run_stat(cli, args),
        Command::Ls(args) => run_ls(cli, args),
        Command::Attach(args) => run_attach(cli, args),
        Command::Attached(args) => run_attached(cli, args),
        Command::Summary => run_summary(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── setup helpers ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.store.database_path = db.clone();
    }
    tracing::debug!(hash = %config.stable_hash()?, "configuration loaded");
    Ok(config)
}

fn open_tracker(config: &Config) -> Result<(HintedTracker, Option<Arc<ChangeJournal>>), CliError> {
    let tracker = HintedTracker::open(TrackerOptions::from_config(config))?;
    let journal = config.journal.enabled.then(|| {
        let journal = ChangeJournal::open(JournalConfig::from_settings(&config.journal));
        journal.attach(&tracker);
        journal
    });
    Ok((tracker, journal))
}

fn open_reader(config: &Config) -> Result<TrackerReader, CliError> {
    match TrackerReader::open(&config.store.database_path, config.store.busy_timeout()) {
        Ok(reader) => Ok(reader),
        Err(TrackerError::MissingIndex { path }) => Err(CliError::User(format!(
            "no index at {}; run `htrk scan <ROOT>` first",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn local_source(root: &std::path::Path, config: &Config) -> Result<LocalDirectorySource, CliError> {
    if !root.is_dir() {
        return Err(CliError::User(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(LocalDirectorySource::new(root)
        .with_follow_symlinks(config.walker.follow_symlinks)
        .with_excluded_names(config.walker.excluded_names.iter().cloned()))
}

// ──────────────────── scan ────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct EventTally {
    created: u64,
    changed: u64,
    deleted: u64,
}

impl EventTally {
    fn add(&mut self, events: &[ChangeEvent]) {
        for event in events {
            match event.kind {
                ChangeKind::Created => self.created += 1,
                ChangeKind::Changed => self.changed += 1,
                ChangeKind::Deleted => self.deleted += 1,
            }
        }
    }
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let config = load_config(cli)?;
    let source: Arc<dyn DirectorySource> = Arc::new(local_source(&args.root, &config)?);
    let (tracker, journal) = open_tracker(&config)?;

    let tally = Arc::new(Mutex::new(EventTally::default()));
    let collected = Arc::new(Mutex::new(Vec::<ChangeEvent>::new()));
    {
        let tally = Arc::clone(&tally);
        let collected = Arc::clone(&collected);
        let keep_events = args.events;
        tracker.subscribe(move |events| {
            tally.lock().add(events);
            if keep_events {
                collected.lock().extend_from_slice(events);
            }
        });
    }

    let walker = DirectoryWalker::new(source, WalkerConfig::new("/"), tracker.hint_sink());
    let walk = walker.walk_once()?;
    tracker.wait_complete();
    let stats = tracker.stats();
    let summary = tracker.reader()?.summary()?;
    tracker.shutdown();
    if let Some(journal) = journal {
        journal.close();
    }

    let tally = *tally.lock();
    let events = std::mem::take(&mut *collected.lock());
    match mode {
        OutputMode::Json => {
            if args.events {
                for event in &events {
                    write_json_line(&serde_json::to_value(event)?)?;
                }
            }
            write_json_line(&json!({
                "command": "scan",
                "root": args.root.display().to_string(),
                "walk": walk,
                "created": tally.created,
                "changed": tally.changed,
                "deleted": tally.deleted,
                "failed_hints": stats.failed_hints,
                "index": summary,
            }))?;
        }
        OutputMode::Human => {
            if args.events {
                for event in &events {
                    print_event_human(event);
                }
            }
            print_scan_summary(&args.root, &walk, tally, stats.failed_hints);
            println!(
                "  index: {} entries ({} observed, {} inferred), {} attached",
                summary.entries, summary.observed, summary.inferred, summary.attached
            );
        }
    }
    Ok(())
}

fn print_scan_summary(root: &std::path::Path, walk: &WalkStats, tally: EventTally, failed: u64) {
    println!(
        "{} {} ({} directories in {} ms)",
        "Scanned".bold(),
        root.display(),
        walk.directories_listed,
        walk.duration_ms
    );
    println!(
        "  {} created  {} changed  {} deleted",
        tally.created.to_string().green(),
        tally.changed.to_string().yellow(),
        tally.deleted.to_string().red()
    );
    let problems = walk.listing_failures + walk.sink_failures + failed;
    if problems > 0 {
        println!(
            "  {} {} unreadable directories, {} failed hints (see log)",
            "warning:".yellow().bold(),
            walk.listing_failures,
            walk.sink_failures + failed
        );
    }
}

fn print_event_human(event: &ChangeEvent) {
    let label = match event.kind {
        ChangeKind::Created => "+".green(),
        ChangeKind::Changed => "~".yellow(),
        ChangeKind::Deleted => "-".red(),
    };
    let suffix = if event.entry.is_directory { "/" } else { "" };
    let removed: Vec<&str> = event.removed_attached().map(|r| r.key.as_str()).collect();
    if removed.is_empty() {
        println!("{label} {}{suffix}", event.path());
    } else {
        println!(
            "{label} {}{suffix}  (dropped: {})",
            event.path(),
            removed.join(", ").dimmed()
        );
    }
}

// ──────────────────── watch ────────────────────

fn run_watch(cli: &Cli, args: &WatchArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let source: Arc<dyn DirectorySource> = Arc::new(local_source(&args.root, &config)?);
    let (tracker, journal) = open_tracker(&config)?;
    let (_subscription, events) = tracker.subscribe_channel();
    let signals = SignalHandler::new();

    let mut walker_config = WalkerConfig::from_settings("/", &config.walker);
    walker_config.rescan_interval = watch_interval(args.interval, &config.walker);
    let mut walker = tracker.spawn_walker(source, walker_config)?;
    tracing::info!(root = %args.root.display(), "watching; SIGUSR1 rescans, SIGINT stops");

    while !signals.should_shutdown() {
        if signals.should_rescan() {
            walker.request_walk();
        }
        while let Ok(batch) = events.try_recv() {
            emit_events(cli, &batch)?;
        }
        thread::sleep(Duration::from_millis(200));
    }

    walker.stop();
    tracker.wait_complete();
    while let Ok(batch) = events.try_recv() {
        emit_events(cli, &batch)?;
    }
    tracker.shutdown();
    if let Some(journal) = journal {
        journal.close();
    }
    tracing::info!(stats = ?tracker.stats(), "watch stopped");
    Ok(())
}

/// Zero means SIGUSR1-only. If neither the flag nor the config sets it, 30 s.
fn watch_interval(flag: Option<u64>, settings: &WalkerSettings) -> Option<Duration> {
    let secs = flag.or(settings.rescan_interval_secs).unwrap_or(30);
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn emit_events(cli: &Cli, batch: &[ChangeEvent]) -> Result<(), CliError> {
    for event in batch {
        match output_mode(cli) {
            OutputMode::Json => write_json_line(&serde_json::to_value(event)?)?,
            OutputMode::Human => print_event_human(event),
        }
    }
    Ok(())
}

// ──────────────────── read commands ────────────────────

fn run_stat(cli: &Cli, args: &PathArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut reader = open_reader(&config)?;
    let entry = reader
        .entry(&args.path)?
        .ok_or_else(|| CliError::User(format!("{} is not tracked", args.path)))?;
    let attached = reader.attached(&args.path)?;
    match output_mode(cli) {
        OutputMode::Json => {
            let mut value = entry_json(&entry);
            value["attached"] = Value::Array(attached.iter().map(record_json).collect());
            write_json_line(&value)?;
        }
        OutputMode::Human => {
            let state = if entry.is_inferred() {
                "inferred".dimmed().to_string()
            } else {
                "observed".green().to_string()
            };
            println!("{} {}", entry.path.bold(), state);
            println!("  id:          {}", entry.id);
            println!(
                "  kind:        {}",
                if entry.is_directory { "directory" } else { "file" }
            );
            println!(
                "  identifier:  {}",
                entry.identifier_tag.as_deref().unwrap_or("-")
            );
            println!(
                "  content:     {}",
                entry.content_tag.as_deref().unwrap_or("-")
            );
            println!("  attached:    {}", attached.len());
        }
    }
    Ok(())
}

fn run_ls(cli: &Cli, args: &PathArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut reader = open_reader(&config)?;
    let children = reader.children(&args.path)?;
    match output_mode(cli) {
        OutputMode::Json => {
            for child in &children {
                write_json_line(&entry_json(child))?;
            }
        }
        OutputMode::Human => {
            for child in &children {
                let name = hinted_file_tracker::core::paths::file_name(&child.path);
                if child.is_directory {
                    println!("{}/", name.blue().bold());
                } else {
                    println!("{name}");
                }
            }
        }
    }
    Ok(())
}

fn run_attach(cli: &Cli, args: &AttachArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let source = local_source(&args.root, &config)?;
    let identity = source.identity(&args.path)?.ok_or_else(|| {
        CliError::User(format!(
            "{} does not exist under {}",
            args.path,
            args.root.display()
        ))
    })?;
    let policy = if args.delete_on_change {
        DeletionPolicy::DELETE_ON_CONTENT_CHANGE
    } else {
        DeletionPolicy::NONE
    };

    let (tracker, journal) = open_tracker(&config)?;
    let record = tracker.attach_data(
        args.path.clone(),
        identity,
        args.key.clone(),
        args.payload.clone().into_bytes(),
        policy,
    )?;
    tracker.wait_complete();
    tracker.shutdown();
    if let Some(journal) = journal {
        journal.close();
    }

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&record_json(&record))?,
        OutputMode::Human => println!(
            "{} {} on {} (record {})",
            "Attached".green().bold(),
            record.key,
            args.path,
            record.id
        ),
    }
    Ok(())
}

fn run_attached(cli: &Cli, args: &PathArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut reader = open_reader(&config)?;
    let records = reader.attached(&args.path)?;
    match output_mode(cli) {
        OutputMode::Json => {
            for record in &records {
                write_json_line(&record_json(record))?;
            }
        }
        OutputMode::Human => {
            for record in &records {
                println!(
                    "{}  {:?}  {}",
                    record.key.bold(),
                    record.policy,
                    String::from_utf8_lossy(&record.payload)
                );
            }
        }
    }
    Ok(())
}

fn run_summary(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let summary = open_reader(&config)?.summary()?;
    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(summary)?)?,
        OutputMode::Human => {
            println!("{}", config.store.database_path.display().to_string().bold());
            println!(
                "  {} entries ({} observed, {} inferred)",
                summary.entries, summary.observed, summary.inferred
            );
            println!("  {} attached records", summary.attached);
            println!("  schema v{}", summary.schema_version);
        }
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn entry_json(entry: &TrackedEntry) -> Value {
    json!({
        "id": entry.id,
        "path": entry.path,
        "parent_id": entry.parent_id,
        "is_directory": entry.is_directory,
        "identifier_tag": entry.identifier_tag,
        "content_tag": entry.content_tag,
        "inferred": entry.is_inferred(),
    })
}

fn record_json(record: &AttachedDataRecord) -> Value {
    let delete_on_change = record
        .policy
        .contains(DeletionPolicy::DELETE_ON_CONTENT_CHANGE);
    json!({
        "id": record.id,
        "target_entry_id": record.target_entry_id,
        "key": record.key,
        "payload": String::from_utf8_lossy(&record.payload),
        "delete_on_content_change": delete_on_change,
    })
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("HTRK_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
