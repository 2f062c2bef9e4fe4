use std::path::PathBuf;
use std::process;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use clipkeep::config::{AppPaths, Settings};
use clipkeep::daemon;
use clipkeep::engine::Engine;
use clipkeep::errors::{ClipError, Result};
use clipkeep::paste::PasteOutcome;
use clipkeep::storage::models::{ClipEntry, ContentType};

#[derive(Parser)]
#[command(name = "ck", version, about = "A local clipboard history with groups, search and backups")]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List recent clipboard entries
    List {
        /// Maximum number of entries to show (0 for all)
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only entries in this group (persisted or url/images/text/dev)
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Search history: `group:NAME text`, `category:NAME text` or plain text
    Search {
        /// Search query
        query: String,

        /// Maximum results (0 for all)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one entry in full
    Get {
        /// Entry ID
        id: i64,
    },

    /// Put an entry back on the clipboard
    Copy {
        /// Entry ID
        id: i64,
    },

    /// Paste the last copied (or newest) entry into the focused app
    Paste,

    /// Delete an entry
    Delete {
        /// Entry ID
        id: i64,
    },

    /// Toggle an entry's pinned state
    Pin {
        /// Entry ID
        id: i64,
    },

    /// Set an entry's legacy category label (also joins that group)
    Category {
        /// Entry ID
        id: i64,

        /// Label
        label: String,
    },

    /// Manage groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Write a JSON backup
    Backup {
        /// Destination file
        path: PathBuf,

        /// Only entries in these groups (repeatable)
        #[arg(short, long = "group")]
        groups: Vec<String>,
    },

    /// Restore a JSON backup
    Restore {
        /// Backup file
        path: PathBuf,

        /// merge or replace
        #[arg(short, long, default_value = "merge")]
        mode: String,
    },

    /// Export one group as text blocks
    ExportGroup {
        /// Group name
        name: String,

        /// Destination file
        path: PathBuf,
    },

    /// Export the whole history as text blocks
    ExportAll {
        /// Destination file
        path: PathBuf,
    },

    /// Import a text file into a group, one entry per block or line
    ImportGroup {
        /// Group name
        name: String,

        /// Source file
        path: PathBuf,
    },

    /// Clear old entries
    Clear {
        /// Clear entries older than N days
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// Show storage statistics
    Stats,

    /// Manage the clipboard watcher daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// List persisted groups
    List,
    /// Create a group
    Create { name: String },
    /// Rename a group
    Rename { old: String, new: String },
    /// Delete a group (entries are kept)
    Delete { name: String },
    /// Add an entry to a group
    Add { id: i64, name: String },
    /// Remove an entry from a group
    Remove { id: i64, name: String },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the clipboard watcher
    Start,
    /// Stop the clipboard watcher
    Stop,
    /// Check daemon status
    Status,
    /// Run watcher in foreground (used internally)
    #[command(hide = true)]
    Run,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    clipkeep::logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::new()?;
    let settings = Settings::load(&paths)?;
    let json = cli.json;

    let command = cli.command.unwrap_or(Commands::List {
        limit: 10,
        group: None,
    });
    if let Commands::Daemon { action } = command {
        return cmd_daemon(&paths, settings, action, json);
    }

    let engine = Engine::open(paths, settings)?;
    match command {
        Commands::List { limit, group } => {
            let query = group.map(|g| format!("group:{}", g));
            cmd_list(&engine, query.as_deref(), limit, json)
        }
        Commands::Search { query, limit } => cmd_list(&engine, Some(&query), limit, json),
        Commands::Get { id } => cmd_get(&engine, id, json),
        Commands::Copy { id } => {
            engine.copy_entry(id)?;
            respond(json, true, format!("Copied entry #{} to clipboard.", id), None)
        }
        Commands::Paste => cmd_paste(&engine, json),
        Commands::Delete { id } => {
            engine.delete_entry(id)?;
            respond(json, true, format!("Deleted entry #{}.", id), None)
        }
        Commands::Pin { id } => {
            let message = if engine.toggle_permanent(id)? {
                format!("Pinned entry #{}.", id)
            } else {
                format!("Unpinned entry #{}.", id)
            };
            respond(json, true, message, None)
        }
        Commands::Category { id, label } => {
            engine.set_category(id, &label)?;
            respond(json, true, format!("Set category of #{} to \"{}\".", id, label), None)
        }
        Commands::Group { action } => cmd_group(&engine, action, json),
        Commands::Backup { path, groups } => {
            let count = engine.backup_data(&path, &groups)?;
            respond(
                json,
                true,
                format!("Backed up {} entries to {}.", count, path.display()),
                Some(count),
            )
        }
        Commands::Restore { path, mode } => {
            let count = engine.restore_data(&path, &mode)?;
            respond(
                json,
                true,
                format!("Restored {} entries ({}).", count, mode),
                Some(count),
            )
        }
        Commands::ExportGroup { name, path } => {
            engine.export_group(&name, &path)?;
            respond(
                json,
                true,
                format!("Exported group \"{}\" to {}.", name, path.display()),
                None,
            )
        }
        Commands::ExportAll { path } => {
            engine.export_all_txt(&path)?;
            respond(json, true, format!("Exported history to {}.", path.display()), None)
        }
        Commands::ImportGroup { name, path } => {
            let count = engine.import_group(&name, &path)?;
            respond(
                json,
                true,
                format!("Imported {} entries into \"{}\".", count, name),
                Some(count),
            )
        }
        Commands::Clear { days } => {
            let removed = engine.clear_older_than(days)?;
            respond(
                json,
                true,
                format!("Removed {} entries older than {} days.", removed, days),
                Some(removed),
            )
        }
        Commands::Stats => cmd_stats(&engine, json),
        Commands::Daemon { action } => {
            cmd_daemon(engine.paths(), engine.settings().clone(), action, json)
        }
    }
}

fn respond(json: bool, success: bool, message: String, count: Option<usize>) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string(&StatusResponse {
                success,
                message,
                count,
            })?
        );
    } else {
        println!("{}", message);
    }
    Ok(())
}

fn cmd_list(engine: &Engine, query: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let mut entries = engine.get_history(query)?;
    if limit > 0 {
        entries.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        match query {
            Some(q) => println!("No results for \"{}\".", q),
            None => println!("No entries yet."),
        }
        return Ok(());
    }

    for entry in &entries {
        print_entry_row(entry);
    }
    Ok(())
}

fn cmd_get(engine: &Engine, id: i64, json: bool) -> Result<()> {
    let entry = engine.get_entry(id)?;

    if json {
        println!("{}", serde_json::to_string(&entry)?);
        return Ok(());
    }

    print_entry_detail(&entry);
    Ok(())
}

fn cmd_paste(engine: &Engine, json: bool) -> Result<()> {
    let (success, message) = match engine.paste_item()? {
        PasteOutcome::Delivered { keystroke: true } => (true, "Pasted.".to_string()),
        PasteOutcome::Delivered { keystroke: false } => (
            true,
            "Copied to clipboard; paste manually.".to_string(),
        ),
        PasteOutcome::Cancelled => (false, "Paste cancelled.".to_string()),
    };
    respond(json, success, message, None)
}

fn cmd_group(engine: &Engine, action: GroupAction, json: bool) -> Result<()> {
    let message = match action {
        GroupAction::List => {
            let groups = engine.get_categories()?;
            if json {
                println!("{}", serde_json::to_string(&groups)?);
            } else if groups.is_empty() {
                println!("No groups.");
            } else {
                for name in &groups {
                    println!("{}", name);
                }
            }
            return Ok(());
        }
        GroupAction::Create { name } => {
            engine.create_group(&name)?;
            format!("Created group \"{}\".", name)
        }
        GroupAction::Rename { old, new } => {
            engine.rename_group(&old, &new)?;
            format!("Renamed group \"{}\" to \"{}\".", old, new)
        }
        GroupAction::Delete { name } => {
            engine.delete_group(&name)?;
            format!("Deleted group \"{}\".", name)
        }
        GroupAction::Add { id, name } => {
            engine.add_to_group(id, &name)?;
            format!("Added entry #{} to \"{}\".", id, name)
        }
        GroupAction::Remove { id, name } => {
            engine.remove_from_group(id, &name)?;
            format!("Removed entry #{} from \"{}\".", id, name)
        }
    };
    respond(json, true, message, None)
}

fn cmd_stats(engine: &Engine, json: bool) -> Result<()> {
    let stats = engine.stats()?;
    let daemon_pid = daemon::daemon_status(engine.paths()).ok().flatten();

    if json {
        let mut obj = serde_json::to_value(&stats)?;
        if let Some(m) = obj.as_object_mut() {
            m.insert("daemon_running".into(), serde_json::json!(daemon_pid.is_some()));
            m.insert("daemon_pid".into(), serde_json::json!(daemon_pid));
        }
        println!("{}", serde_json::to_string(&obj)?);
        return Ok(());
    }

    println!("Clipboard Statistics");
    println!("────────────────────");
    println!("Total entries: {}", stats.total);
    println!("  Pinned:      {}", stats.permanent);
    println!("  Text:        {}", stats.text);
    println!("  URL:         {}", stats.url);
    println!("  Dev:         {}", stats.dev);
    println!("  Image:       {}", stats.image);
    println!("Groups:        {}", stats.groups);
    if let Some(oldest) = stats.oldest {
        println!("Oldest:        {}", oldest.format("%Y-%m-%d %H:%M"));
    }
    if let Some(newest) = stats.newest {
        println!("Newest:        {}", newest.format("%Y-%m-%d %H:%M"));
    }

    match daemon_pid {
        Some(pid) => println!("Daemon:        running (pid {})", pid),
        None => println!("Daemon:        not running"),
    }
    Ok(())
}

fn cmd_daemon(paths: &AppPaths, settings: Settings, action: DaemonAction, json: bool) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if let Some(pid) = daemon::daemon_status(paths)? {
                return respond(json, true, format!("Daemon already running (pid {}).", pid), None);
            }

            let exe = std::env::current_exe().map_err(|e| ClipError::Daemon(e.to_string()))?;

            paths.ensure_dirs()?;
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&paths.log_file)
                .map_err(|e| ClipError::Daemon(e.to_string()))?;

            let child = std::process::Command::new(exe)
                .args(["daemon", "run"])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::from(log_file))
                .spawn()
                .map_err(|e| ClipError::Daemon(e.to_string()))?;

            respond(
                json,
                true,
                format!("Started clipboard watcher (pid {}).", child.id()),
                None,
            )
        }
        DaemonAction::Stop => {
            let stopped = daemon::stop_daemon(paths)?;
            let message = if stopped {
                "Stopped clipboard watcher."
            } else {
                "Daemon is not running."
            };
            respond(json, stopped, message.to_string(), None)
        }
        DaemonAction::Status => {
            let pid = daemon::daemon_status(paths)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "running": pid.is_some(),
                        "pid": pid,
                    })
                );
            } else {
                match pid {
                    Some(pid) => println!("Daemon running (pid {}).", pid),
                    None => println!("Daemon is not running."),
                }
            }
            Ok(())
        }
        DaemonAction::Run => daemon::run_watcher(paths, settings),
    }
}

fn print_entry_row(entry: &ClipEntry) {
    let type_icon = match &entry.content_type {
        ContentType::Text => "T",
        ContentType::Url => "U",
        ContentType::Image => "I",
        ContentType::Dev => "D",
        ContentType::Other(_) => "?",
    };

    let pin = if entry.is_permanent { "*" } else { " " };

    let oneline = entry.raw_content.replace('\n', "\\n");
    let preview = if oneline.chars().count() > 60 {
        format!("{}...", oneline.chars().take(57).collect::<String>())
    } else {
        oneline
    };

    let groups = if entry.groups.is_empty() {
        String::new()
    } else {
        format!(" [{}]", entry.groups.join(", "))
    };

    println!(
        "{:>4} {}{} {:>6}  {}{}",
        entry.id,
        type_icon,
        pin,
        format_age(entry.created_at),
        preview,
        groups
    );
}

fn print_entry_detail(entry: &ClipEntry) {
    println!("ID:       {}", entry.id);
    println!("Type:     {}", entry.content_type.as_str());
    println!("Pinned:   {}", entry.is_permanent);
    println!("Created:  {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(category) = &entry.category {
        println!("Category: {}", category);
    }
    if !entry.groups.is_empty() {
        println!("Groups:   {}", entry.groups.join(", "));
    }

    match entry.content_type {
        ContentType::Image => println!("Path:     {}", entry.raw_content),
        _ => {
            println!("─────────────────────────");
            println!("{}", entry.raw_content);
        }
    }
}

fn format_age(dt: chrono::DateTime<Utc>) -> String {
    let dur = Utc::now() - dt;
    if dur.num_seconds() < 60 {
        "now".to_string()
    } else if dur.num_minutes() < 60 {
        format!("{}m", dur.num_minutes())
    } else if dur.num_hours() < 24 {
        format!("{}h", dur.num_hours())
    } else {
        format!("{}d", dur.num_days())
    }
}
