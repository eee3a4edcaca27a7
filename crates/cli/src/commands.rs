// FILE: crates/cli/src/commands.rs

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use console::style;
use notesync_config::{Config, ConfigManager, SyncConfig};
use notesync_core::{LinkedNotebookAuth, Timestamp};
use notesync_sync_engine::{
    EngineConfig, MemoryStorage, RemoteFixture, ReplayRemote, SyncBookmarks, SyncEngine,
    SyncEvent, SyncRunner, SyncSummary,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Tokens passed on the command line are treated as valid for a day
const CLI_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Files involved in one sync
#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub fixture: PathBuf,
    pub replica: PathBuf,
    pub state: PathBuf,
}

/// Write a default configuration file
pub fn init(manager: &ConfigManager) -> Result<()> {
    let created = manager
        .initialize()
        .context("Failed to write default configuration")?;

    if created {
        println!(
            "{} Configuration written to {}",
            style("✓").green().bold(),
            manager.config_path().display()
        );
    } else {
        println!(
            "Configuration already exists at {}",
            manager.config_path().display()
        );
    }
    Ok(())
}

/// Run one sync against a JSON-described remote
pub async fn sync(config: &Config, matches: &ArgMatches) -> Result<()> {
    let path_arg = |name: &str| {
        matches
            .get_one::<String>(name)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("--{} is required", name))
    };
    let paths = SyncPaths {
        fixture: path_arg("fixture")?,
        replica: path_arg("replica")?,
        state: path_arg("state")?,
    };
    let tokens = parse_tokens(matches.get_many::<String>("token").into_iter().flatten())?;

    let summary = run_sync(&paths, engine_config(&config.sync), tokens).await?;

    println!("\n{}", style("Sync finished").bold().green());
    print_summary(&summary);
    Ok(())
}

/// Show persisted sync bookmarks
pub fn status(matches: &ArgMatches) -> Result<()> {
    let state = matches
        .get_one::<String>("state")
        .ok_or_else(|| anyhow!("--state is required"))?;
    let path = Path::new(state);
    if !path.exists() {
        println!("No sync has completed yet ({} not found)", state);
        return Ok(());
    }

    let bookmarks = load_bookmarks(path)?;
    println!("\n{}", style("Sync Status").bold().cyan());
    println!("{}", "=".repeat(60));
    println!("Update count: {}", bookmarks.last_update_count);
    println!("Last sync:    {}", format_timestamp(bookmarks.last_sync_time));

    if bookmarks.linked_notebooks.is_empty() {
        println!("\nNo linked notebooks synced");
    } else {
        println!(
            "\n{} Linked notebooks",
            style(bookmarks.linked_notebooks.len()).bold().cyan()
        );
        for (guid, bookmark) in &bookmarks.linked_notebooks {
            println!(
                "  {}  update count {} | usn {} | last sync {}",
                style(truncate(guid, 12)).bold(),
                bookmark.last_update_count,
                bookmark.last_synchronized_usn,
                format_timestamp(bookmark.last_sync_time)
            );
        }
    }
    Ok(())
}

/// Maps the `sync` config section onto engine tunables
pub fn engine_config(sync: &SyncConfig) -> EngineConfig {
    EngineConfig {
        max_sync_chunk_entries: sync.max_sync_chunk_entries,
        linked_notebook_page_size: sync.linked_notebook_page_size,
        auth_token_min_validity_secs: sync.auth_token_min_validity_secs,
        full_sync_include_resources: sync.full_sync_include_resources,
    }
}

/// Parses `GUID=TOKEN` pairs
pub fn parse_tokens<'a, I>(pairs: I) -> Result<HashMap<String, LinkedNotebookAuth>>
where
    I: IntoIterator<Item = &'a String>,
{
    let expires_at = Timestamp::now().plus_seconds(CLI_TOKEN_LIFETIME_SECS);
    pairs
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((guid, token)) if !guid.is_empty() && !token.is_empty() => Ok((
                guid.to_string(),
                LinkedNotebookAuth::new(token, expires_at),
            )),
            _ => bail!("Invalid token '{}', expected GUID=TOKEN", pair),
        })
        .collect()
}

/// Replays the fixture into the replica and persists the results
pub async fn run_sync(
    paths: &SyncPaths,
    config: EngineConfig,
    tokens: HashMap<String, LinkedNotebookAuth>,
) -> Result<SyncSummary> {
    let fixture_json = fs::read_to_string(&paths.fixture)
        .with_context(|| format!("Failed to read remote fixture {}", paths.fixture.display()))?;
    let fixture = RemoteFixture::from_json(&fixture_json).context("Invalid remote fixture")?;

    let replica = if paths.replica.exists() {
        let json = fs::read_to_string(&paths.replica)
            .with_context(|| format!("Failed to read replica {}", paths.replica.display()))?;
        MemoryStorage::from_json(&json).context("Invalid replica file")?
    } else {
        MemoryStorage::new()
    };
    let bookmarks = if paths.state.exists() {
        load_bookmarks(&paths.state)?
    } else {
        SyncBookmarks::default()
    };

    let after_usn = bookmarks.last_update_count;
    let storage = Arc::new(Mutex::new(replica));
    let engine = SyncEngine::new(config, ReplayRemote::new(fixture));
    let mut handle = SyncRunner::spawn(engine, Arc::clone(&storage))
        .context("Failed to start sync worker")?;

    handle
        .provide_linked_notebook_auth_tokens(tokens.clone())
        .context("Failed to hand over linked notebook tokens")?;
    handle.set_last_sync_parameters(bookmarks)?;
    handle.start(after_usn)?;

    let mut outcome = None;
    while let Some(event) = handle.next_event().await {
        print_event(&event);
        match event {
            SyncEvent::LinkedNotebookAuthTokensRequested(requests) => {
                // Only tokens given on the command line exist; resend them
                let missing: Vec<&str> = requests
                    .iter()
                    .map(|request| request.guid.as_str())
                    .filter(|guid| !tokens.contains_key(*guid))
                    .collect();
                if !missing.is_empty() {
                    println!(
                        "{} No token for linked notebooks: {}",
                        style("!").yellow().bold(),
                        missing.join(", ")
                    );
                }
                handle.provide_linked_notebook_auth_tokens(tokens.clone())?;
            }
            SyncEvent::Paused {
                pending_authentication: true,
            } => {
                println!("Remote authentication expired, stopping");
                handle.stop()?;
            }
            SyncEvent::Finished(summary) => outcome = Some(Ok(summary)),
            SyncEvent::Failure(message) => outcome = Some(Err(anyhow!(message))),
            SyncEvent::Stopped => outcome = Some(Err(anyhow!("sync was stopped"))),
            _ => {}
        }
    }
    handle.join().await.context("Sync worker failed")?;

    let summary = outcome
        .ok_or_else(|| anyhow!("sync worker exited without a result"))?
        .context("Sync failed")?;

    let replica_json = storage
        .lock()
        .map_err(|_| anyhow!("replica lock poisoned"))?
        .to_json()?;
    fs::write(&paths.replica, replica_json)
        .with_context(|| format!("Failed to write replica {}", paths.replica.display()))?;
    let state_json = serde_json::to_string_pretty(&summary.bookmarks)?;
    fs::write(&paths.state, state_json)
        .with_context(|| format!("Failed to write bookmarks {}", paths.state.display()))?;

    Ok(summary)
}

fn load_bookmarks(path: &Path) -> Result<SyncBookmarks> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bookmarks {}", path.display()))?;
    serde_json::from_str(&json).context("Invalid bookmarks file")
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Progress { phase, fraction } => {
            println!(
                "{} {}",
                style(format!("[{:>3.0}%]", fraction * 100.0)).dim(),
                phase
            );
        }
        SyncEvent::SyncChunksDownloadProgress {
            highest_downloaded_usn,
            highest_server_usn,
            ..
        } => println!(
            "  chunks up to usn {} of {}",
            highest_downloaded_usn, highest_server_usn
        ),
        SyncEvent::LinkedNotebookChunksDownloadProgress {
            linked_notebook_guid,
            highest_downloaded_usn,
            highest_server_usn,
            ..
        } => println!(
            "  {} chunks up to usn {} of {}",
            truncate(linked_notebook_guid, 12),
            highest_downloaded_usn,
            highest_server_usn
        ),
        SyncEvent::NotesDownloadProgress { downloaded, total } => {
            println!("  notes {}/{}", downloaded, total)
        }
        SyncEvent::RateLimitExceeded { seconds, .. } => println!(
            "{} Rate limited, waiting {}",
            style("!").yellow().bold(),
            format_duration(*seconds)
        ),
        SyncEvent::Failure(message) => {
            println!("{} {}", style("✗").red().bold(), message)
        }
        _ => {}
    }
}

fn print_summary(summary: &SyncSummary) {
    println!("  Update count: {}", summary.last_update_count);
    println!("  Sync time:    {}", format_timestamp(summary.last_sync_time));
    for (guid, count) in &summary.linked_notebook_update_counts {
        println!("  Linked notebook {}: update count {}", truncate(guid, 12), count);
    }
}

fn format_timestamp(timestamp: Timestamp) -> String {
    if timestamp.as_millis() == 0 {
        return "never".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(timestamp.as_millis())
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{} ms", timestamp.as_millis()))
}

fn format_duration(seconds: u64) -> String {
    let minutes = seconds / 60;
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}
