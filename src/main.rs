use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use clap::{Parser, Subcommand};
use serde::Serialize;

use cliphist::config::AppPaths;
use cliphist::errors::{HistoryError, Result};
use cliphist::pasteboard::{Pasteboard, Payload, SystemPasteboard};
use cliphist::retention::{RetentionRule, RetentionScheduler};
use cliphist::storage::HistoryStore;
use cliphist::storage::models::{Category, HistoryEntry, SearchFilter, StorageStats};
use cliphist::storage::sqlite::SqliteStore;
use cliphist::watcher::ClipboardWatcher;

#[derive(Parser)]
#[command(name = "cliphist", version, about = "A clipboard history manager")]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the clipboard in the foreground
    Watch {
        /// Source applications to ignore (repeatable). Only effective when
        /// the platform reports the copying application; the system
        /// pasteboard reports "unknown" where it cannot.
        #[arg(long = "ignore-app")]
        ignore_apps: Vec<String>,

        /// Do not keep image captures
        #[arg(long)]
        skip_images: bool,

        /// Do not keep file-list captures
        #[arg(long)]
        skip_files: bool,

        /// Keep text entries for N hours (0 = forever)
        #[arg(long, default_value = "168")]
        text_hours: i64,

        /// Keep image entries for N hours (0 = forever)
        #[arg(long, default_value = "24")]
        image_hours: i64,

        /// Keep file entries for N hours (0 = forever)
        #[arg(long, default_value = "24")]
        file_hours: i64,

        /// Keep other entries for N hours (0 = forever)
        #[arg(long, default_value = "24")]
        other_hours: i64,
    },

    /// List recent history entries
    List {
        /// Page number (0-based)
        #[arg(short, long, default_value = "0")]
        page: i64,

        /// Entries per page
        #[arg(short = 'n', long, default_value = "10")]
        page_size: i64,

        /// Filter by category: text, image, file, other
        #[arg(short = 't', long)]
        category: Option<String>,

        /// Show only favorited entries
        #[arg(short, long)]
        favorited: bool,

        /// Show only pinned entries
        #[arg(long)]
        pinned: bool,

        /// Filter by source application
        #[arg(long)]
        app: Option<String>,
    },

    /// Search history by display text
    Search {
        /// Search keyword
        keyword: String,

        /// Page number (0-based)
        #[arg(short, long, default_value = "0")]
        page: i64,

        /// Entries per page
        #[arg(short = 'n', long, default_value = "10")]
        page_size: i64,
    },

    /// Show a specific entry with its items and contents
    Get {
        /// Entry ID
        id: i64,
    },

    /// Copy an entry back to the clipboard
    Copy {
        /// Entry ID
        id: i64,
    },

    /// Toggle the favorite flag
    Favorite {
        /// Entry ID
        id: i64,
    },

    /// Toggle the pin flag
    Pin {
        /// Entry ID
        id: i64,
    },

    /// Replace an entry's tag set
    Tag {
        /// Entry ID
        id: i64,

        /// Tags (empty clears all tags)
        tags: Vec<String>,
    },

    /// Delete an entry
    Delete {
        /// Entry ID
        id: i64,
    },

    /// Delete unprotected entries older than N days
    Clear {
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// Run one retention pass with per-category ages
    Cleanup {
        /// Expire text entries older than N hours (0 = keep)
        #[arg(long, default_value = "0")]
        text_hours: i64,

        /// Expire image entries older than N hours (0 = keep)
        #[arg(long, default_value = "0")]
        image_hours: i64,

        /// Expire file entries older than N hours (0 = keep)
        #[arg(long, default_value = "0")]
        file_hours: i64,

        /// Expire other entries older than N hours (0 = keep)
        #[arg(long, default_value = "0")]
        other_hours: i64,
    },

    /// Show history statistics
    Stats,

    /// Delete the entire history
    Truncate,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<i64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cliphist=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

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
    let paths = AppPaths::new();
    let json = cli.json;

    match cli.command {
        None => cmd_list(&paths, SearchFilter::default(), 0, 10, json),
        Some(Commands::Watch {
            ignore_apps,
            skip_images,
            skip_files,
            text_hours,
            image_hours,
            file_hours,
            other_hours,
        }) => cmd_watch(
            &paths,
            ignore_apps,
            skip_images,
            skip_files,
            [text_hours, image_hours, file_hours, other_hours],
        ),
        Some(Commands::List {
            page,
            page_size,
            category,
            favorited,
            pinned,
            app,
        }) => {
            let filter = SearchFilter {
                category: category.as_deref().and_then(Category::parse),
                favorited: if favorited { Some(true) } else { None },
                pinned: if pinned { Some(true) } else { None },
                source_app: app,
                ..Default::default()
            };
            cmd_list(&paths, filter, page, page_size, json)
        }
        Some(Commands::Search {
            keyword,
            page,
            page_size,
        }) => {
            let filter = SearchFilter {
                keyword: Some(keyword),
                ..Default::default()
            };
            cmd_list(&paths, filter, page, page_size, json)
        }
        Some(Commands::Get { id }) => cmd_get(&paths, id, json),
        Some(Commands::Copy { id }) => cmd_copy(&paths, id, json),
        Some(Commands::Favorite { id }) => cmd_favorite(&paths, id, json),
        Some(Commands::Pin { id }) => cmd_pin(&paths, id, json),
        Some(Commands::Tag { id, tags }) => cmd_tag(&paths, id, tags, json),
        Some(Commands::Delete { id }) => cmd_delete(&paths, id, json),
        Some(Commands::Clear { days }) => cmd_clear(&paths, days, json),
        Some(Commands::Cleanup {
            text_hours,
            image_hours,
            file_hours,
            other_hours,
        }) => cmd_cleanup(&paths, [text_hours, image_hours, file_hours, other_hours], json),
        Some(Commands::Stats) => cmd_stats(&paths, json),
        Some(Commands::Truncate) => cmd_truncate(&paths, json),
    }
}

fn open_store(paths: &AppPaths) -> Result<SqliteStore> {
    SqliteStore::open(&paths.db_path)
}

/// Builds a rule per category from `[text, image, file, other]` hour caps;
/// a zero cap means that category is never expired.
fn rules_from_hours(hours: [i64; 4]) -> Vec<RetentionRule> {
    let categories = [
        Category::Text,
        Category::Image,
        Category::File,
        Category::Other,
    ];
    categories
        .iter()
        .zip(hours)
        .filter(|(_, h)| *h > 0)
        .map(|(category, h)| RetentionRule::older_than(vec![*category], Duration::hours(h)))
        .collect()
}

fn cmd_watch(
    paths: &AppPaths,
    ignore_apps: Vec<String>,
    skip_images: bool,
    skip_files: bool,
    retention_hours: [i64; 4],
) -> Result<()> {
    let store: Arc<dyn HistoryStore> = Arc::new(open_store(paths)?);
    let pasteboard: Arc<dyn Pasteboard> = Arc::new(SystemPasteboard::new()?);

    let mut watcher = ClipboardWatcher::new(Arc::clone(&pasteboard), Arc::clone(&store));
    watcher.set_on_copy(move |source_app| !ignore_apps.iter().any(|app| app == source_app));
    watcher.set_on_parsed(move |snapshot| {
        if snapshot.category.is_image() {
            return !skip_images;
        }
        if snapshot.category.is_file() {
            return !skip_files;
        }
        true
    });

    let mut scheduler = RetentionScheduler::new(Arc::clone(&store), move || {
        rules_from_hours(retention_hours)
    });

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::Relaxed);
    })
    .map_err(|e| HistoryError::Watcher(e.to_string()))?;

    watcher.listen()?;
    scheduler.start();
    eprintln!("cliphist: watching clipboard (pid {})", process::id());

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    eprintln!("cliphist: shutting down");
    scheduler.stop();
    watcher.shutdown()
}

fn cmd_list(
    paths: &AppPaths,
    filter: SearchFilter,
    page: i64,
    page_size: i64,
    json: bool,
) -> Result<()> {
    let store = open_store(paths)?;
    let result = store.search(&filter, page, page_size)?;

    if json {
        println!("{}", serde_json::to_string(&result).unwrap());
        return Ok(());
    }

    if result.items.is_empty() {
        println!("No entries found.");
        return Ok(());
    }

    for entry in &result.items {
        print_entry_row(entry);
    }
    if result.has_more {
        println!("... more on page {}", result.page + 1);
    }
    Ok(())
}

fn cmd_get(paths: &AppPaths, id: i64, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    let mut entries = store.select_full(&[id])?;
    let entry = entries
        .pop()
        .ok_or_else(|| HistoryError::RecordNotFound(format!("history entry {} does not exist", id)))?;

    if json {
        println!("{}", serde_json::to_string(&entry).unwrap());
        return Ok(());
    }

    print_entry_detail(&entry);
    Ok(())
}

fn cmd_copy(paths: &AppPaths, id: i64, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    let mut entries = store.select_full(&[id])?;
    let entry = entries
        .pop()
        .ok_or_else(|| HistoryError::RecordNotFound(format!("history entry {} does not exist", id)))?;

    let items: Vec<Vec<Payload>> = entry
        .items
        .iter()
        .map(|item| {
            item.contents
                .iter()
                .map(|content| Payload {
                    kind: content.kind.clone(),
                    bytes: content.bytes.clone(),
                })
                .collect()
        })
        .collect();

    let pasteboard = SystemPasteboard::new()?;
    pasteboard.write(&items)?;
    store.update_last_used(&[id])?;

    print_status(json, true, format!("Copied entry #{} to clipboard.", id), None);
    Ok(())
}

fn cmd_favorite(paths: &AppPaths, id: i64, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    store.toggle_favorite(id)?;
    print_status(json, true, format!("Toggled favorite on entry #{}.", id), None);
    Ok(())
}

fn cmd_pin(paths: &AppPaths, id: i64, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    store.toggle_pin(id)?;
    print_status(json, true, format!("Toggled pin on entry #{}.", id), None);
    Ok(())
}

fn cmd_tag(paths: &AppPaths, id: i64, tags: Vec<String>, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    store.update_tags(id, &tags)?;
    let message = if tags.is_empty() {
        format!("Cleared tags on entry #{}.", id)
    } else {
        format!("Tagged entry #{} with [{}].", id, tags.join(", "))
    };
    print_status(json, true, message, None);
    Ok(())
}

fn cmd_delete(paths: &AppPaths, id: i64, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    store.delete(id)?;
    print_status(json, true, format!("Deleted entry #{}.", id), None);
    Ok(())
}

fn cmd_clear(paths: &AppPaths, days: i64, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    let removed = store.delete_older_than(Duration::days(days))?;
    store.compact()?;
    print_status(
        json,
        true,
        format!("Removed {} entr(ies) older than {} days.", removed, days),
        Some(removed),
    );
    Ok(())
}

fn cmd_cleanup(paths: &AppPaths, hours: [i64; 4], json: bool) -> Result<()> {
    let store: Arc<dyn HistoryStore> = Arc::new(open_store(paths)?);
    let rules = rules_from_hours(hours);
    if rules.is_empty() {
        print_status(json, true, "No retention rules given.".to_string(), None);
        return Ok(());
    }
    let scheduler = RetentionScheduler::new(Arc::clone(&store), Vec::new);
    scheduler.run_once(Some(rules));
    print_status(json, true, "Retention pass complete.".to_string(), None);
    Ok(())
}

fn cmd_stats(paths: &AppPaths, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    let stats = StorageStats {
        total: store.count_total()?,
        by_category: store.count_by_category()?,
    };

    if json {
        println!("{}", serde_json::to_string(&stats).unwrap());
        return Ok(());
    }

    println!("Clipboard History Statistics");
    println!("────────────────────────────");
    println!("Total entries: {}", stats.total);
    for (category, count) in &stats.by_category {
        println!("  {:<8} {}", format!("{}:", category), count);
    }
    Ok(())
}

fn cmd_truncate(paths: &AppPaths, json: bool) -> Result<()> {
    let store = open_store(paths)?;
    let removed = store.truncate()?;
    store.compact()?;
    print_status(
        json,
        true,
        format!("Removed all {} entr(ies).", removed),
        Some(removed),
    );
    Ok(())
}

fn print_status(json: bool, success: bool, message: String, removed: Option<i64>) {
    if json {
        println!(
            "{}",
            serde_json::to_string(&StatusResponse {
                success,
                message,
                removed,
            })
            .unwrap()
        );
    } else {
        println!("{}", message);
    }
}

fn print_entry_row(entry: &HistoryEntry) {
    let category = match entry.category {
        Category::Text => "T",
        Category::Image => "I",
        Category::File => "F",
        Category::Other => "?",
    };
    let fav = if entry.favorited { "*" } else { " " };
    let pin = if entry.pinned { "!" } else { " " };

    let oneline = entry.preview.replace('\n', "\\n");
    let preview: String = if oneline.chars().count() > 60 {
        let truncated: String = oneline.chars().take(57).collect();
        format!("{}...", truncated)
    } else {
        oneline
    };

    let age = format_age(entry.last_used_at.unwrap_or(entry.created_at));
    let tags = if entry.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", entry.tags.join(", "))
    };

    println!(
        "{:>4} {}{}{} {:>6}  {}{}",
        entry.id, category, fav, pin, age, preview, tags
    );
}

fn print_entry_detail(entry: &HistoryEntry) {
    println!("ID:        {}", entry.id);
    println!("Category:  {}", entry.category.as_str());
    println!("App:       {}", entry.source_app);
    println!("Favorited: {}", entry.favorited);
    println!("Pinned:    {}", entry.pinned);
    println!("Created:   {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(last_used) = entry.last_used_at {
        println!("Last used: {}", last_used.format("%Y-%m-%d %H:%M:%S"));
    }
    // The hash can be a display-string fallback, so slice by chars.
    let hash_head: String = entry.hash.chars().take(16).collect();
    println!("Hash:      {}", hash_head);
    if !entry.tags.is_empty() {
        println!("Tags:      {}", entry.tags.join(", "));
    }

    for item in &entry.items {
        println!("Item {}:", item.index);
        for content in &item.contents {
            println!(
                "  [{}] {} ({})",
                content.priority,
                content.kind,
                format_bytes(content.bytes.len() as i64)
            );
        }
    }

    println!("─────────────────────────");
    println!("{}", entry.preview);
}

fn format_age(dt: chrono::DateTime<chrono::Utc>) -> String {
    let dur = chrono::Utc::now() - dt;
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

fn format_bytes(bytes: i64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
