//! CLI command definitions and subcommands

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::debug;
use walkdir::WalkDir;

/// Deepest directory level `add --scan` descends to
pub const SCAN_MAX_DEPTH: usize = 3;

/// repopulse - git repository activity monitor
#[derive(Parser)]
#[command(
    name = "rp",
    about = "Turns local git repository changes into a stream of activity events",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print one snapshot of a repository as JSON
    Snapshot {
        /// Repository working directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Fetch from every remote before reading
        #[arg(short, long)]
        refresh: bool,
    },

    /// Register a repository for watching
    Add {
        /// Repository path, or a directory to scan with --scan
        path: PathBuf,

        /// Project the repository belongs to
        #[arg(short, long)]
        project: String,

        /// Register every repository found under PATH
        #[arg(short, long)]
        scan: bool,
    },

    /// Stop watching a repository and forget it
    Remove {
        /// Repository id (or unique prefix)
        id: String,
    },

    /// List registered repositories
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Watch registered repositories and print events as JSON lines
    Watch {
        /// Only watch this project
        #[arg(short, long)]
        project: Option<String>,

        /// Run one remote poll right after starting
        #[arg(long)]
        poll_on_start: bool,
    },
}

/// Output format for list
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" | "table" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Whether `path` has git metadata (`.git` directory or worktree file)
pub fn has_git_metadata(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Repositories under `root`, not descending into a repository once found
///
/// Hidden directories are skipped. Results are sorted by path.
pub fn discover_repositories(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    debug!(root = %root.display(), max_depth, "discover_repositories: called");
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || (e.file_type().is_dir() && e.file_name().to_str().map(|s| !s.starts_with('.')).unwrap_or(true))
        });

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "discover_repositories: skipping unreadable entry");
                continue;
            }
        };
        if has_git_metadata(entry.path()) {
            found.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }
    debug!(count = found.len(), "discover_repositories: done");
    found
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repopulse")
        .join("logs")
        .join("repopulse.log")
}

/// Version of `program`, or None when it cannot be run
pub fn tool_version(program: &Path) -> Option<String> {
    debug!(program = %program.display(), "tool_version: called");
    let output = std::process::Command::new(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(parse_version(&String::from_utf8_lossy(&output.stdout)))
}

/// First version-like word of a `--version` line
fn parse_version(output: &str) -> String {
    output
        .split_whitespace()
        .map(|w| w.trim_start_matches('v'))
        .filter(|w| w.starts_with(|c: char| c.is_ascii_digit()))
        .map(|w| {
            w.split('.')
                .take_while(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
                .collect::<Vec<_>>()
                .join(".")
        })
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// after_help text: git availability and where logs go
pub fn generate_after_help(git_program: &Path) -> String {
    let mut help = String::new();
    help.push_str("Required Tools:\n");
    match tool_version(git_program) {
        Some(version) => help.push_str(&format!("  \u{2705} {:<10} {}\n", "git", version)),
        None => help.push_str(&format!("  \u{274C} {:<10} not found\n", "git")),
    }
    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}
