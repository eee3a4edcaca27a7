// FILE: crates/cli/src/main.rs

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use notesync_config::{Config, ConfigManager};
use std::path::PathBuf;

mod commands;

fn build_cli() -> Command {
    Command::new("notesync")
        .version("0.1.0")
        .author("NoteSync Contributors")
        .about("Downloads a remote note account into a local replica")
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .help("Directory holding config.toml (defaults to the platform config directory)")
                .global(true),
        )
        .subcommand(Command::new("init").about("Write a default configuration file"))
        .subcommand(
            Command::new("sync")
                .about("Run one sync against a JSON-described remote account")
                .arg(
                    Arg::new("fixture")
                        .short('f')
                        .long("fixture")
                        .required(true)
                        .value_name("REMOTE_JSON")
                        .help("Remote account to replay"),
                )
                .arg(
                    Arg::new("replica")
                        .short('r')
                        .long("replica")
                        .required(true)
                        .value_name("REPLICA_JSON")
                        .help("Local replica, created if missing"),
                )
                .arg(
                    Arg::new("state")
                        .short('s')
                        .long("state")
                        .required(true)
                        .value_name("BOOKMARKS_JSON")
                        .help("Sync bookmarks, created if missing"),
                )
                .arg(
                    Arg::new("token")
                        .short('t')
                        .long("token")
                        .value_name("GUID=TOKEN")
                        .help("Auth token for a linked notebook (repeatable)")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show persisted sync bookmarks")
                .arg(
                    Arg::new("state")
                        .short('s')
                        .long("state")
                        .required(true)
                        .value_name("BOOKMARKS_JSON")
                        .help("Sync bookmarks file"),
                ),
        )
}

fn config_manager(config_dir: Option<&String>) -> Result<ConfigManager> {
    match config_dir {
        Some(dir) => Ok(ConfigManager::with_directory(PathBuf::from(dir))),
        None => ConfigManager::new().context("Failed to locate configuration directory"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let manager = config_manager(matches.get_one::<String>("config-dir"))?;
    let config = match manager.load_with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}, using defaults", e);
            Config::default()
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.app.log_level.to_string()),
    )
    .init();

    match matches.subcommand() {
        Some(("init", _)) => commands::init(&manager),
        Some(("sync", sub_matches)) => commands::sync(&config, sub_matches).await,
        Some(("status", sub_matches)) => commands::status(sub_matches),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_sync_requires_paths() {
        let result = build_cli().try_get_matches_from(["notesync", "sync", "--fixture", "r.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tokens_are_repeatable() {
        let matches = build_cli()
            .try_get_matches_from([
                "notesync", "sync", "-f", "r.json", "-r", "l.json", "-s", "s.json", "-t",
                "ln1=a", "-t", "ln2=b",
            ])
            .unwrap();
        let (_, sync) = matches.subcommand().unwrap();
        let tokens: Vec<&String> = sync.get_many::<String>("token").unwrap().collect();
        assert_eq!(tokens, ["ln1=a", "ln2=b"]);
    }
}
