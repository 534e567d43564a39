//! Line-oriented parsers for git plumbing output
//!
//! Every parser takes the stdout of exactly one command. Blank lines are
//! ignored everywhere; anything else that does not fit the expected shape is
//! either skipped (list outputs) or reported as `None` (scalar outputs).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone, Utc};

use crate::activity::{CommitInfo, DiffStat, ReflogEntry};
use crate::snapshot::StatusEntry;

/// Field separator requested from git via `%x1f`
pub const FIELD_SEP: char = '\u{1f}';

/// Parse `git status --porcelain=v1` output
pub fn parse_status(output: &str) -> Vec<StatusEntry> {
    let mut entries: Vec<StatusEntry> = output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let (code, rest) = line.split_at(2);
            // Renames are reported as "orig -> new"; the new path is what changed
            let path = rest.trim_start().rsplit(" -> ").next().unwrap_or(rest).trim_matches('"');
            // XY is kept whole: " M" (unstaged) and "M " (staged) are different states
            StatusEntry {
                code: code.to_string(),
                path: path.to_string(),
            }
        })
        .collect();
    entries.sort();
    entries
}

/// Parse `git for-each-ref --format=%(refname) <prefix>` output, stripping `prefix`
///
/// Symbolic `*/HEAD` entries under `refs/remotes/` are dropped.
pub fn parse_ref_names(output: &str, prefix: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(prefix))
        .map(|name| name.trim_start_matches('/'))
        .filter(|name| !name.is_empty() && *name != "HEAD" && !name.ends_with("/HEAD"))
        .map(str::to_string)
        .collect()
}

/// Parse `git rev-list --left-right --count HEAD...@{upstream}` into (ahead, behind)
pub fn parse_ahead_behind(output: &str) -> Option<(u32, u32)> {
    let mut parts = output.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((ahead, behind))
}

/// Parse `git config --get-regexp ^remote\..*\.url$` into name -> url
pub fn parse_remote_urls(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, url) = line.trim().split_once(char::is_whitespace)?;
            let name = key.strip_prefix("remote.")?.strip_suffix(".url")?;
            let url = url.trim();
            if name.is_empty() || url.is_empty() {
                return None;
            }
            Some((name.to_string(), url.to_string()))
        })
        .collect()
}

/// Parse `git rev-list --parents -n 1 <commit>` into a parent count
pub fn parse_parent_count(output: &str) -> Option<usize> {
    let mut ids = output.split_whitespace();
    ids.next()?;
    Some(ids.count())
}

/// Parse `git log -1 --format=%an%x1f%s <commit>`
pub fn parse_commit_info(output: &str) -> Option<CommitInfo> {
    let line = output.lines().next()?;
    let (author, subject) = line.split_once(FIELD_SEP)?;
    Some(CommitInfo {
        author: author.trim().to_string(),
        subject: subject.trim().to_string(),
    })
}

/// Parse `git diff --numstat` output into totals
///
/// Binary files count as changed files with no line counts.
pub fn parse_numstat(output: &str) -> DiffStat {
    let mut stat = DiffStat::default();
    for line in output.lines() {
        let mut cols = line.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(_path)) = (cols.next(), cols.next(), cols.next()) else {
            continue;
        };
        stat.files_changed += 1;
        stat.insertions += added.parse::<u64>().unwrap_or(0);
        stat.deletions += deleted.parse::<u64>().unwrap_or(0);
    }
    stat
}

/// Parse `git log -g --date=unix --format=%H%x1f%gd%x1f%gs <ref>`
///
/// The reflog selector looks like `refs/remotes/origin/main@{1700000000}`.
/// Entries are returned newest first, as git prints them.
pub fn parse_reflog(output: &str) -> Vec<ReflogEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(FIELD_SEP);
            let commit = fields.next()?.trim();
            let selector = fields.next()?.trim();
            let subject = fields.next().unwrap_or_default().trim();
            if commit.is_empty() {
                return None;
            }
            let at = parse_selector_time(selector)?;
            Some(ReflogEntry {
                commit: commit.to_string(),
                at,
                subject: subject.to_string(),
            })
        })
        .collect()
}

fn parse_selector_time(selector: &str) -> Option<DateTime<Utc>> {
    let start = selector.rfind("@{")? + 2;
    let end = selector[start..].find('}')? + start;
    let secs: i64 = selector[start..end].parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
