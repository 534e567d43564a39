//! rp - repopulse command-line entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result, bail};
use tracing::{debug, info, warn};

use repopulse::cli::{Cli, Command, OutputFormat, SCAN_MAX_DEPTH, discover_repositories, generate_after_help, get_log_path};
use repopulse::config::Config;
use repopulse::coordinator::{CoordinatorSettings, ProjectCoordinator};
use repopulse::git::GitRunner;
use repopulse::monitor::{MonitorContext, WatchedRepository};
use repopulse::sink::ChannelSink;
use repopulse::snapshot::StateReader;
use repopulse::store::{JsonStore, SnapshotStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Help is built before the config is known, so it checks the default git
    let git_program = Config::default().git.program;
    let cmd = Cli::command().after_help(generate_after_help(&git_program));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(store_dir = %config.storage.store_dir.display(), "repopulse loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Snapshot { path, refresh }) => cmd_snapshot(&config, &path, refresh).await,
        Some(Command::Add { path, project, scan }) => cmd_add(&config, &path, &project, scan).await,
        Some(Command::Remove { id }) => cmd_remove(&config, &id).await,
        Some(Command::List { format }) => cmd_list(&config, format).await,
        Some(Command::Watch { project, poll_on_start }) => cmd_watch(&config, project.as_deref(), poll_on_start).await,
        None => {
            Cli::command().after_help(generate_after_help(&git_program)).print_help()?;
            Ok(())
        }
    }
}

fn reader(config: &Config) -> StateReader {
    StateReader::new(Arc::new(GitRunner::from_config(&config.git)), &config.git)
}

async fn cmd_snapshot(config: &Config, path: &Path, refresh: bool) -> Result<()> {
    debug!(path = %path.display(), refresh, "cmd_snapshot: called");
    let reader = reader(config);
    let snapshot = if refresh {
        reader.read_with_refresh(path).await?
    } else {
        reader.read(path).await?
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn cmd_add(config: &Config, path: &Path, project: &str, scan: bool) -> Result<()> {
    debug!(path = %path.display(), %project, scan, "cmd_add: called");
    let store = JsonStore::new(&config.storage.store_dir);
    let mut repositories = store.load_watched_repositories().await?;
    let reader = reader(config);

    let candidates = if scan {
        let found = discover_repositories(path, SCAN_MAX_DEPTH);
        if found.is_empty() {
            bail!("No repositories found under {}", path.display());
        }
        found
    } else {
        vec![path.to_path_buf()]
    };

    let mut added = 0;
    for candidate in candidates {
        let candidate = fs::canonicalize(&candidate)
            .with_context(|| format!("Failed to resolve {}", candidate.display()))?;
        if let Err(e) = reader.git_dirs(&candidate).await {
            if scan {
                warn!(path = %candidate.display(), error = %e, "Skipping non-repository");
                eprintln!("{} {} ({})", "skip".yellow(), candidate.display(), e);
                continue;
            }
            bail!("Not a git repository: {} ({})", candidate.display(), e);
        }
        if repositories.iter().any(|r| r.path == candidate) {
            println!("{} {} already registered", "=".dimmed(), candidate.display());
            continue;
        }

        let repo = WatchedRepository::new(project, candidate);
        println!("{} {} {}", "\u{2713}".green(), repo.id.cyan(), repo.path.display());
        repositories.push(repo);
        added += 1;
    }

    if added > 0 {
        store.save_watched_repositories(&repositories).await?;
        info!(added, "Registered repositories");
    }
    Ok(())
}

async fn cmd_remove(config: &Config, id: &str) -> Result<()> {
    debug!(%id, "cmd_remove: called");
    let store = JsonStore::new(&config.storage.store_dir);
    let mut repositories = store.load_watched_repositories().await?;

    // An exact id wins over prefix matches
    let matches: Vec<usize> = match repositories.iter().position(|r| r.id == id) {
        Some(index) => vec![index],
        None => repositories
            .iter()
            .enumerate()
            .filter(|(_, r)| r.id.starts_with(id))
            .map(|(i, _)| i)
            .collect(),
    };
    let index = match matches.as_slice() {
        [index] => *index,
        [] => bail!("No repository matches '{}'", id),
        _ => bail!("'{}' matches {} repositories; use more of the id", id, matches.len()),
    };

    let repo = repositories.remove(index);
    store.save_watched_repositories(&repositories).await?;
    store.forget_snapshot(&repo.id).await?;
    println!("{} Removed {} {}", "\u{2713}".green(), repo.id, repo.path.display());
    Ok(())
}

async fn cmd_list(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_list: called");
    let store = JsonStore::new(&config.storage.store_dir);
    let mut repositories = store.load_watched_repositories().await?;
    repositories.sort_by(|a, b| a.project_id.cmp(&b.project_id).then_with(|| a.path.cmp(&b.path)));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&repositories)?),
        OutputFormat::Text => {
            if repositories.is_empty() {
                println!("No repositories registered. Use 'rp add <path> --project <id>'.");
                return Ok(());
            }
            println!("{:<38} {:<16} {:<9} {:<28} PATH", "ID", "PROJECT", "ENABLED", "LAST SEEN");
            for repo in &repositories {
                let enabled = if repo.enabled { "yes".green() } else { "no".red() };
                let last_seen = match store.load_snapshot(&repo.id).await {
                    Ok(Some(snapshot)) => {
                        let short: String = snapshot.head_commit.chars().take(8).collect();
                        format!("{} @ {}", snapshot.branch, short)
                    }
                    Ok(None) => "-".to_string(),
                    Err(e) => {
                        warn!(repository_id = %repo.id, error = %e, "Unreadable stored snapshot");
                        "?".to_string()
                    }
                };
                println!(
                    "{:<38} {:<16} {:<9} {:<28} {}",
                    repo.id.cyan(),
                    repo.project_id,
                    enabled,
                    last_seen,
                    repo.path.display()
                );
            }
        }
    }
    Ok(())
}

async fn cmd_watch(config: &Config, project: Option<&str>, poll_on_start: bool) -> Result<()> {
    debug!(?project, poll_on_start, "cmd_watch: called");
    let store = Arc::new(JsonStore::new(&config.storage.store_dir));
    let repositories = store.load_watched_repositories().await?;

    let mut by_project: BTreeMap<String, Vec<WatchedRepository>> = BTreeMap::new();
    for repo in repositories {
        if project.is_none_or(|p| p == repo.project_id) {
            by_project.entry(repo.project_id.clone()).or_default().push(repo);
        }
    }
    if by_project.is_empty() {
        bail!("Nothing to watch. Use 'rp add <path> --project <id>' first.");
    }

    let (sink, mut events) = ChannelSink::new(config.watcher.event_buffer);
    let runner = Arc::new(GitRunner::from_config(&config.git));
    let ctx = Arc::new(MonitorContext::from_runner(runner, &config.git, Arc::new(sink)).with_store(store));
    let settings = CoordinatorSettings::from_config(config);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let mut coordinators = Vec::with_capacity(by_project.len());
    for (project_id, repos) in by_project {
        let mut coordinator = ProjectCoordinator::new(project_id.as_str(), ctx.clone(), settings);
        let summary = coordinator.start(repos).await;
        for (id, e) in &summary.failed {
            eprintln!("{} {} {}", "\u{2717}".red(), id, e);
        }
        eprintln!(
            "{} project {}: watching {} repositories",
            "\u{2713}".green(),
            project_id.cyan(),
            summary.started.len()
        );
        if poll_on_start {
            let polled = coordinator.poll_now().await;
            debug!(%project_id, ?polled, "cmd_watch: initial poll done");
        }
        coordinators.push(coordinator);
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, stopping");
    for coordinator in &mut coordinators {
        coordinator.stop().await;
    }
    drop(coordinators);
    drop(ctx);
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer ended abnormally");
    }
    Ok(())
}
