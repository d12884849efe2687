//! # PromptLog CLI - Prompt-scoped history for your working tree
//!
//! Command-line presentation of the [`promptlog`] library.
//!
//! ## Usage
//! ```bash
//! # Start a session and pin the current state
//! promptlog start
//! promptlog checkpoint
//!
//! # ... let the assistant edit files ...
//!
//! # Record the prompt and what it changed
//! promptlog log -m "Add retry logic" --touched src/net.rs
//!
//! # Browse and inspect
//! promptlog list
//! promptlog diff 3f2b src/net.rs
//!
//! # Put a file back the way it was before the prompt, then change your mind
//! promptlog restore 3f2b --side before --file src/net.rs
//! promptlog undo
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use promptlog::{
    format_bytes, BuildOutcome, DiffStatSummarizer, Event, FileDiff, LineChange, ListMode,
    PromptLog, PromptLogBuilder, PromptLogError, RestoreOutcome, RestoreScope, Side,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// PromptLog CLI - record prompts and the file changes they caused
#[derive(Parser)]
#[command(name = "promptlog")]
#[command(version)]
#[command(about = "Record prompt events and restore files to before or after any prompt")]
#[command(long_about = None)]
struct Cli {
    /// Path to the repository (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Storage directory (defaults to <path>/.promptlog)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session (initializes storage on first use)
    Start {
        /// Extra ignore patterns, only used when initializing
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Maximum events to keep, only used when initializing (0 = unlimited)
        #[arg(long)]
        max_events: Option<usize>,
    },

    /// End the session
    End,

    /// Pin the current state as the checkpoint for the next prompt
    #[command(alias = "cp")]
    Checkpoint,

    /// Log a prompt and the changes it caused
    Log {
        /// Prompt text
        #[arg(short, long)]
        message: String,

        /// Assistant response preview
        #[arg(short, long)]
        response: Option<String>,

        /// Tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Files the assistant touched since the checkpoint
        #[arg(long)]
        touched: Vec<String>,
    },

    /// List events, newest first
    #[command(alias = "ls")]
    List {
        /// Show trashed events instead
        #[arg(long)]
        trash: bool,

        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Search prompts, paths and tags
    Search {
        /// Case-insensitive query
        query: String,

        /// Search trashed events instead
        #[arg(long)]
        trash: bool,
    },

    /// Show one event
    Show {
        /// Event id or unique prefix
        id: String,
    },

    /// Show the line diff of one file in an event
    Diff {
        /// Event id or unique prefix
        id: String,

        /// Repo-relative path
        #[arg(id = "file_path", value_name = "PATH")]
        path: String,
    },

    /// Summarize an event (cached after the first run)
    Summarize {
        /// Event id or unique prefix
        id: String,
    },

    /// Move an event to the trash
    Trash {
        /// Event id or unique prefix
        id: String,
    },

    /// Take an event out of the trash
    Untrash {
        /// Event id or unique prefix
        id: String,
    },

    /// Permanently delete an event and its artifacts
    Purge {
        /// Event id or unique prefix
        id: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Restore files to the before or after state of an event
    #[command(alias = "rs")]
    Restore {
        /// Event id or unique prefix
        id: String,

        /// Which state to restore
        #[arg(long, default_value = "before")]
        side: Side,

        /// Restore only this file
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Undo a restore (the most recent one by default)
    Undo {
        /// Backup directory of the restore to undo
        #[arg(long)]
        backup: Option<PathBuf>,
    },

    /// Export an event as Markdown
    Export {
        /// Event id or unique prefix
        id: String,
    },

    /// Show session and storage status
    Status,

    /// Interactive session with a file watcher
    Shell,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PROMPTLOG_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<PromptLogError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let storage_path = cli.storage.unwrap_or_else(|| root_path.join(".promptlog"));

    let log = match cli.command {
        Commands::Start { ignore, max_events } => {
            return cmd_start(root_path, storage_path, ignore, max_events);
        }
        _ => PromptLog::open(root_path, storage_path)?,
    };
    match cli.command {
        Commands::Start { .. } => Ok(log.start_session()?),
        Commands::End => {
            log.end_session()?;
            println!("{} Session ended", "✓".green().bold());
            Ok(())
        }
        Commands::Checkpoint => cmd_checkpoint(&log),
        Commands::Log { message, response, tags, touched } => {
            for path in &touched {
                if let Some(nudge) = log.record_file_edit(path) {
                    println!("{}", nudge.message().yellow());
                }
            }
            cmd_log(&log, &message, response, tags)
        }
        Commands::List { trash, limit } => cmd_list(&log, list_mode(trash), limit),
        Commands::Search { query, trash } => {
            let events = log.search(&query, list_mode(trash))?;
            if events.is_empty() {
                println!("{}", format!("No events match '{}'.", query).yellow());
            }
            for event in &events {
                print_event_line(event);
            }
            Ok(())
        }
        Commands::Show { id } => cmd_show(&log, &id),
        Commands::Diff { id, path } => {
            let diff = log.event_diff(&id, &path)?;
            print_file_diff(&diff);
            Ok(())
        }
        Commands::Summarize { id } => cmd_summarize(&log, &id),
        Commands::Trash { id } => {
            let changed = log.trash(&id)?;
            report_toggle(changed, "Moved to trash", "Already in trash");
            Ok(())
        }
        Commands::Untrash { id } => {
            let changed = log.untrash(&id)?;
            report_toggle(changed, "Restored from trash", "Not in trash");
            Ok(())
        }
        Commands::Purge { id, yes } => cmd_purge(&log, &id, yes),
        Commands::Restore { id, side, file } => cmd_restore(&log, &id, side, file),
        Commands::Undo { backup } => cmd_undo(&log, backup),
        Commands::Export { id } => {
            let path = log.export_markdown(&id)?;
            println!("{} Exported to {}", "✓".green().bold(), path.display().to_string().cyan());
            Ok(())
        }
        Commands::Status => cmd_status(&log),
        Commands::Shell => cmd_shell(log),
    }
}

/// Start a session
///
/// Initializes storage when needed:
/// - config.json: retention, nudge and size limits
/// - session.json: the persisted session record
/// - events.jsonl: the event log
fn cmd_start(
    root_path: PathBuf,
    storage_path: PathBuf,
    ignore: Vec<String>,
    max_events: Option<usize>,
) -> anyhow::Result<()> {
    let mut builder = PromptLogBuilder::new().ignore_patterns(ignore);
    if let Some(max_events) = max_events {
        builder = builder.max_events(max_events);
    }
    let log = builder
        .build(root_path, storage_path.clone())
        .with_context(|| format!("opening storage at {}", storage_path.display()))?;
    log.start_session()?;

    println!("{} Session started", "✓".green().bold());
    println!("  Root: {}", log.repo_root().display().to_string().cyan());
    println!("  Storage: {}", log.storage_path().display().to_string().cyan());
    println!("  Source: {}", log.source_name().cyan());
    println!("\nNext steps:");
    println!("  - Pin the current state: {}", "promptlog checkpoint".yellow());
    println!("  - Record a prompt: {}", "promptlog log -m \"...\"".yellow());
    Ok(())
}

fn cmd_checkpoint(log: &PromptLog) -> anyhow::Result<()> {
    let token = log.create_checkpoint()?;
    println!("{} Checkpoint {}", "✓".green().bold(), token.yellow().bold());
    println!(
        "  Only files reported with {} (or seen by {}) will be logged.",
        "--touched".cyan(),
        "shell".cyan()
    );
    Ok(())
}

fn cmd_log(
    log: &PromptLog,
    message: &str,
    response: Option<String>,
    tags: Vec<String>,
) -> anyhow::Result<()> {
    let spinner = spinner("Snapshotting changes...");
    let outcome = log.log_prompt(message, response, tags);
    spinner.finish_and_clear();

    match outcome? {
        BuildOutcome::NothingToLog => {
            println!("{}", "Nothing to log: no changed files.".yellow());
        }
        BuildOutcome::Logged(report) => {
            let event = &report.event;
            let (added, modified, deleted) = event.op_counts();
            println!("{} Logged event {}", "✓".green().bold(), event.short_id().yellow().bold());
            println!(
                "  Files: {} ({} added, {} modified, {} deleted)",
                event.files_changed.len().to_string().cyan(),
                added,
                modified,
                deleted
            );
            if let Some(before) = &event.before_ref {
                println!("  Before: {}", before.dimmed());
            }
            let warnings = report.warnings();
            if !warnings.is_empty() {
                println!("\n{}", "Warnings:".yellow().bold());
                for warning in &warnings {
                    println!("  - {}", warning.yellow());
                }
            }
            if !report.trimmed.is_empty() {
                println!(
                    "  {}",
                    format!("Retention dropped {} old event(s)", report.trimmed.len()).dimmed()
                );
            }
        }
    }
    Ok(())
}

fn cmd_list(log: &PromptLog, mode: ListMode, limit: Option<usize>) -> anyhow::Result<()> {
    let events = log.list_events(mode)?;
    if events.is_empty() {
        match mode {
            ListMode::Active => println!("{}", "No events recorded.".yellow()),
            ListMode::Trash => println!("{}", "Trash is empty.".yellow()),
        }
        return Ok(());
    }

    let shown = limit.unwrap_or(events.len()).min(events.len());
    for event in events.iter().take(shown) {
        print_event_line(event);
    }
    if shown < events.len() {
        println!("\n{}", format!("Showing {} of {} events", shown, events.len()).dimmed());
    }
    Ok(())
}

fn cmd_show(log: &PromptLog, id: &str) -> anyhow::Result<()> {
    let event = log.get_event(id)?;
    println!("{} {}", "Event".blue().bold(), event.short_id().yellow().bold());
    println!();
    println!("  Full ID: {}", event.id.dimmed());
    println!("  Logged: {}", event.created_at().format("%Y-%m-%d %H:%M:%S UTC"));
    match event.before_ref.as_deref() {
        Some(before) if event.has_synthetic_checkpoint() => {
            println!("  Before: {} {}", before, "(working tree)".dimmed())
        }
        Some(before) => println!("  Before: {}", before),
        None => println!("  Before: {}", "(no checkpoint)".dimmed()),
    }
    println!("  After: {}", event.after_ref);
    if !event.tags.is_empty() {
        println!("  Tags: {}", event.tags.join(", ").cyan());
    }

    println!("\n{}", "Prompt:".bold());
    for line in event.prompt.lines() {
        println!("  {}", line);
    }
    if let Some(response) = &event.response_preview {
        println!("\n{}", "Response:".bold());
        for line in response.lines() {
            println!("  {}", line.dimmed());
        }
    }

    println!("\n{}", "Files:".bold());
    for entry in &event.diff_uris {
        println!("  {} {}", op_marker(entry.op), entry.path);
    }

    if let Some(summary) = log.cached_summary(&event.id)? {
        println!("\n{}", "Summary:".bold());
        for line in summary.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn cmd_summarize(log: &PromptLog, id: &str) -> anyhow::Result<()> {
    let spinner = spinner("Summarizing...");
    let summary = log.summarize(id, &DiffStatSummarizer);
    spinner.finish_and_clear();
    println!("{}", summary?);
    Ok(())
}

fn cmd_purge(log: &PromptLog, id: &str, yes: bool) -> anyhow::Result<()> {
    let event = log.get_event(id)?;
    if !yes && !confirm(&format!(
        "Permanently delete event {} and its snapshots?",
        event.short_id()
    ))? {
        println!("{}", "Aborted.".yellow());
        return Ok(());
    }

    let report = log.purge(&event.id)?;
    if report.is_clean() {
        println!("{} Purged event {}", "✓".green().bold(), event.short_id().yellow());
    } else {
        println!("{} Purged event {} with errors:", "!".yellow().bold(), event.short_id().yellow());
        for error in &report.errors {
            println!("  - {}", error.red());
        }
    }
    Ok(())
}

fn cmd_restore(log: &PromptLog, id: &str, side: Side, file: Option<String>) -> anyhow::Result<()> {
    let scope = match file {
        Some(path) => RestoreScope::Path(path),
        None => RestoreScope::All,
    };
    let report = log.restore(id, side, scope)?;

    println!(
        "{} Restored {} state of {}",
        "✓".green().bold(),
        side.to_string().cyan(),
        promptlog::short_id(&report.event_id).yellow()
    );
    for outcome in &report.outcomes {
        match &outcome.outcome {
            RestoreOutcome::Restored => println!("  {} {}", "W".green(), outcome.path),
            RestoreOutcome::Deleted => println!("  {} {}", "D".red(), outcome.path),
            RestoreOutcome::Skipped(reason) => {
                println!("  {} {} {}", "S".yellow(), outcome.path, format!("({})", reason).dimmed())
            }
            RestoreOutcome::Error(reason) => {
                println!("  {} {} {}", "E".red().bold(), outcome.path, reason.red())
            }
        }
    }
    println!("  {}", report.summary());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms)).to_string().cyan()
    );
    println!("  Backup: {}", report.backup_dir.display().to_string().dimmed());
    Ok(())
}

fn cmd_undo(log: &PromptLog, backup: Option<PathBuf>) -> anyhow::Result<()> {
    let report = match backup {
        Some(dir) => log.undo_from(&dir)?,
        None => match log.undo_last_restore() {
            Ok(report) => report,
            // A new process has no in-memory restore; fall back to the newest backup
            Err(PromptLogError::NothingToUndo) => match log.latest_backup()? {
                Some(dir) => log.undo_from(&dir)?,
                None => bail!(PromptLogError::NothingToUndo),
            },
            Err(e) => return Err(e.into()),
        },
    };

    println!(
        "{} Undo complete: {} restored, {} deleted",
        "✓".green().bold(),
        report.restored,
        report.deleted
    );
    for warning in &report.warnings {
        println!("  - {}", warning.yellow());
    }
    if report.errors > 0 {
        bail!("{} file(s) could not be put back", report.errors);
    }
    Ok(())
}

fn cmd_status(log: &PromptLog) -> anyhow::Result<()> {
    let status = log.status()?;
    println!("{}", "PromptLog Status".blue().bold());
    println!();
    println!(
        "  Session: {}",
        if status.active { "active".green() } else { "inactive".dimmed() }
    );
    println!("  Root: {}", log.repo_root().display().to_string().cyan());
    println!("  Source: {}", log.source_name());
    match &status.checkpoint {
        Some(checkpoint) => {
            println!("  Checkpoint: {}", checkpoint.yellow());
            println!("  Touched files: {}", status.touched_files);
        }
        None => println!("  Checkpoint: {}", "none".dimmed()),
    }
    println!("  Events: {} ({} in trash)", status.events.to_string().cyan(), status.trashed);
    println!("  Storage: {}", format_bytes(status.storage_bytes).cyan());
    Ok(())
}

/// Interactive session
///
/// Starts a watcher so edits made by other tools are tracked and can raise
/// a nudge, then reads commands from stdin until `quit`.
fn cmd_shell(log: PromptLog) -> anyhow::Result<()> {
    let log = Arc::new(log);
    log.start_session()?;
    let watcher = log.watch(|nudge| println!("\n{}", nudge.message().yellow()))?;
    let log: &PromptLog = &log;
    println!("{}", "PromptLog shell".blue().bold());
    println!(
        "{}",
        "Commands: checkpoint | log <prompt> | restore <id> [before|after] [file] | undo | list | status | quit"
            .dimmed()
    );

    let stdin = io::stdin();
    loop {
        print!("{} ", "promptlog>".green());
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let result = match command {
            "quit" | "exit" => break,
            "checkpoint" | "cp" => cmd_checkpoint(log),
            "log" => cmd_log(log, rest, None, Vec::new()),
            "restore" => shell_restore(log, rest),
            "undo" => cmd_undo(log, None),
            "list" | "ls" => cmd_list(log, ListMode::Active, Some(10)),
            "status" => cmd_status(log),
            other => {
                println!("{}", format!("Unknown command '{}'", other).yellow());
                Ok(())
            }
        };
        if let Err(e) = result {
            let message = match e.downcast_ref::<PromptLogError>() {
                Some(err) => err.user_message(),
                None => format!("{:#}", e),
            };
            println!("{}: {}", "Error".red().bold(), message);
        }
    }

    watcher.stop()?;
    println!("{}", format!("Watcher saw {} edits", watcher.recorded()).dimmed());
    Ok(())
}

fn shell_restore(log: &PromptLog, args: &str) -> anyhow::Result<()> {
    let mut parts = args.split_whitespace();
    let Some(id) = parts.next() else {
        bail!("usage: restore <id> [before|after] [file]");
    };
    let side = match parts.next() {
        Some(side) => side.parse::<Side>().map_err(anyhow::Error::msg)?,
        None => Side::Before,
    };
    cmd_restore(log, id, side, parts.next().map(str::to_string))
}

// Helper functions

fn list_mode(trash: bool) -> ListMode {
    if trash {
        ListMode::Trash
    } else {
        ListMode::Active
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn report_toggle(changed: bool, done: &str, unchanged: &str) {
    if changed {
        println!("{} {}", "✓".green().bold(), done);
    } else {
        println!("{}", unchanged.dimmed());
    }
}

fn op_marker(op: promptlog::FileOp) -> ColoredString {
    match op {
        promptlog::FileOp::Added => "A".green(),
        promptlog::FileOp::Modified => "M".yellow(),
        promptlog::FileOp::Deleted => "D".red(),
    }
}

fn print_event_line(event: &Event) {
    let headline = event.prompt.lines().next().unwrap_or_default();
    print!("{} ", event.short_id().yellow().bold());
    print!("{} ", event.created_at().format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
    print!("{}", headline.cyan());
    print!(" {}", format!("({} files)", event.files_changed.len()).dimmed());
    if !event.tags.is_empty() {
        print!(" {}", format!("[{}]", event.tags.join(", ")).magenta());
    }
    println!();
}

fn print_file_diff(diff: &FileDiff) {
    println!("{} {} {}", "diff".dimmed(), diff.path.cyan(), format!("({})", diff.op).dimmed());
    if diff.is_binary {
        println!("{}", "Binary files differ".yellow());
        return;
    }
    if diff.too_large {
        println!("{}", "File too large to diff".yellow());
        return;
    }
    println!(
        "{} {}",
        format!("+{}", diff.lines_added).green(),
        format!("-{}", diff.lines_deleted).red()
    );
    for hunk in &diff.hunks {
        println!(
            "{}",
            format!(
                "@@ -{},{} +{},{} @@",
                hunk.from_line, hunk.from_count, hunk.to_line, hunk.to_count
            )
            .cyan()
        );
        for change in &hunk.changes {
            match change {
                LineChange::Added(_, content) => println!("{}", format!("+{}", content).green()),
                LineChange::Deleted(_, content) => println!("{}", format!("-{}", content).red()),
                LineChange::Context(_, content) => println!(" {}", content.dimmed()),
            }
        }
    }
}
