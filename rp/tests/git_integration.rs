//! Integration tests against a real git binary
//!
//! Every test returns early when git is not on PATH.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use repopulse::activity::{ActivityClassifier, ActivityDetails, ActivityKind, ClassifyContext, ClassifyMode, GitInspector};
use repopulse::config::GitConfig;
use repopulse::coordinator::{CoordinatorSettings, ProjectCoordinator};
use repopulse::git::GitRunner;
use repopulse::monitor::{MonitorContext, WatchedRepository};
use repopulse::sink::ChannelSink;
use repopulse::snapshot::{Branch, StateReader};
use repopulse::watcher::{RepositoryWatcher, WatchPhase};
use repopulse::{ActivityEvent, MonitorError};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test Author", "-c", "user.email=test@example.com"])
        .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_file(dir: &Path, name: &str, content: &str, message: &str) -> String {
    std::fs::write(dir.join(name), content).expect("Failed to write file");
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Fresh repository with one commit on main
fn init_repo(dir: &Path) -> String {
    std::fs::create_dir_all(dir).expect("Failed to create repo dir");
    git(dir, &["init", "-q"]);
    git(dir, &["checkout", "-q", "-B", "main"]);
    commit_file(dir, "README.md", "hello\n", "Initial commit")
}

/// Bare remote plus a clone tracking origin/main
fn init_with_remote(root: &Path) -> std::path::PathBuf {
    let remote = root.join("remote.git");
    std::fs::create_dir_all(&remote).expect("Failed to create remote dir");
    git(&remote, &["init", "-q", "--bare"]);

    let work = root.join("work");
    init_repo(&work);
    git(&work, &["remote", "add", "origin", &remote.display().to_string()]);
    git(&work, &["push", "-q", "-u", "origin", "main"]);
    work
}

fn context(sink: ChannelSink) -> Arc<MonitorContext> {
    let config = GitConfig::default();
    let runner = Arc::new(GitRunner::from_config(&config));
    Arc::new(MonitorContext::from_runner(runner, &config, Arc::new(sink)))
}

/// Receive until an event of `kind` arrives or ten seconds pass
async fn wait_for(rx: &mut mpsc::Receiver<ActivityEvent>, kind: ActivityKind) -> Option<ActivityEvent> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) if event.kind() == kind => return Some(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

// =============================================================================
// StateReader
// =============================================================================

#[tokio::test]
async fn test_reader_reads_real_repository() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let head = init_repo(temp.path());
    std::fs::write(temp.path().join("scratch.txt"), "wip\n").unwrap();

    let reader = StateReader::new(Arc::new(GitRunner::new("git")), &GitConfig::default());
    let snapshot = reader.read(temp.path()).await.expect("Failed to read snapshot");

    assert_eq!(snapshot.branch, Branch::named("main"));
    assert_eq!(snapshot.head_commit, head);
    assert_eq!(snapshot.local_branches.iter().collect::<Vec<_>>(), vec!["main"]);
    assert!(snapshot.upstream.is_none());
    assert!(!snapshot.has_remote());
    assert_eq!(snapshot.working_tree.len(), 1);
}

#[tokio::test]
async fn test_reader_detached_head() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let first = init_repo(temp.path());
    commit_file(temp.path(), "b.txt", "b\n", "Second");
    git(temp.path(), &["checkout", "-q", "--detach", &first]);

    let reader = StateReader::new(Arc::new(GitRunner::new("git")), &GitConfig::default());
    let snapshot = reader.read(temp.path()).await.expect("Failed to read snapshot");

    assert_eq!(snapshot.branch, Branch::Detached);
    assert_eq!(snapshot.head_commit, first);
}

#[tokio::test]
async fn test_git_dirs_rejects_plain_directory() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let reader = StateReader::new(Arc::new(GitRunner::new("git")), &GitConfig::default());
    assert!(reader.git_dirs(temp.path()).await.is_err());
}

#[tokio::test]
async fn test_git_dirs_linked_worktree() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let main = temp.path().join("main");
    init_repo(&main);
    let linked = temp.path().join("linked");
    git(&main, &["worktree", "add", "-q", "-b", "feature", &linked.display().to_string()]);

    let reader = StateReader::new(Arc::new(GitRunner::new("git")), &GitConfig::default());
    let dirs = reader.git_dirs(&linked).await.expect("Failed to resolve dirs");

    assert_ne!(dirs.git_dir, dirs.common_dir);
    assert!(dirs.git_dir.join("HEAD").exists());
    assert!(dirs.common_dir.join("refs").exists());
}

// =============================================================================
// ActivityClassifier with the real inspector
// =============================================================================

#[tokio::test]
async fn test_classifier_commit_and_merge() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path();
    init_repo(path);

    let runner = Arc::new(GitRunner::new("git"));
    let reader = StateReader::new(runner.clone(), &GitConfig::default());
    let classifier = ActivityClassifier::new(Arc::new(GitInspector::new(runner, Duration::from_secs(30))));
    let ctx = ClassifyContext {
        project_id: "proj",
        repository_id: "repo",
        path,
        mode: ClassifyMode::Watch,
    };

    let before = reader.read(path).await.unwrap();
    let head = commit_file(path, "a.txt", "a\n", "Add a");
    let after_commit = reader.read(path).await.unwrap();
    let events = classifier.classify(Some(&before), &after_commit, &ctx).await;
    assert_eq!(events.len(), 1);
    match &events[0].details {
        ActivityDetails::Commit {
            head: h, author, subject, ..
        } => {
            assert_eq!(h, &head);
            assert_eq!(author, "Test Author");
            assert_eq!(subject, "Add a");
        }
        other => panic!("Expected COMMIT, got {:?}", other),
    }

    git(path, &["checkout", "-q", "-b", "topic"]);
    commit_file(path, "t.txt", "t\n", "Topic work");
    git(path, &["checkout", "-q", "main"]);
    commit_file(path, "m.txt", "m\n", "Main work");
    let before_merge = reader.read(path).await.unwrap();
    git(path, &["merge", "-q", "--no-ff", "--no-edit", "topic"]);
    let after_merge = reader.read(path).await.unwrap();

    let kinds: Vec<_> = classifier
        .classify(Some(&before_merge), &after_merge, &ctx)
        .await
        .iter()
        .map(|e| e.kind())
        .collect();
    assert_eq!(kinds, vec![ActivityKind::Merge]);
}

#[tokio::test]
async fn test_classifier_worktree_stat() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path();
    init_repo(path);

    let runner = Arc::new(GitRunner::new("git"));
    let reader = StateReader::new(runner.clone(), &GitConfig::default());
    let classifier = ActivityClassifier::new(Arc::new(GitInspector::new(runner, Duration::from_secs(30))));
    let ctx = ClassifyContext {
        project_id: "proj",
        repository_id: "repo",
        path,
        mode: ClassifyMode::Watch,
    };

    let before = reader.read(path).await.unwrap();
    std::fs::write(path.join("README.md"), "hello\nworld\nagain\n").unwrap();
    let after = reader.read(path).await.unwrap();
    let events = classifier.classify(Some(&before), &after, &ctx).await;

    assert_eq!(events.len(), 1);
    match &events[0].details {
        ActivityDetails::WorktreeChange { stat, changed_paths, .. } => {
            assert_eq!(*changed_paths, 1);
            assert_eq!(stat.files_changed, 1);
            assert_eq!(stat.insertions, 2);
            assert_eq!(stat.deletions, 0);
        }
        other => panic!("Expected WORKTREE_CHANGE, got {:?}", other),
    }
}

// =============================================================================
// RepositoryWatcher end to end
// =============================================================================

#[tokio::test]
async fn test_watcher_reports_commit() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("repo");
    init_repo(&path);

    let (sink, mut rx) = ChannelSink::new(64);
    let repo = WatchedRepository::new("proj", &path).with_id("repo");
    let mut watcher = RepositoryWatcher::new(repo, context(sink), Duration::from_millis(100));
    watcher.start().await.expect("Failed to start watcher");
    assert_eq!(watcher.phase(), WatchPhase::Watching);

    let head = commit_file(&path, "feature.txt", "feature\n", "Add feature");

    let event = wait_for(&mut rx, ActivityKind::Commit).await.expect("No COMMIT event");
    assert_eq!(event.repository_id, "repo");
    assert!(matches!(event.details, ActivityDetails::Commit { head: ref h, .. } if *h == head));

    watcher.stop().await;
    assert_eq!(watcher.phase(), WatchPhase::Idle);
}

#[tokio::test]
async fn test_watcher_reports_branch_switch_and_creation() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("repo");
    init_repo(&path);

    let (sink, mut rx) = ChannelSink::new(64);
    let repo = WatchedRepository::new("proj", &path).with_id("repo");
    let mut watcher = RepositoryWatcher::new(repo, context(sink), Duration::from_millis(100));
    watcher.start().await.expect("Failed to start watcher");

    git(&path, &["checkout", "-q", "-b", "feature"]);

    let created = wait_for(&mut rx, ActivityKind::BranchCreated).await;
    assert!(matches!(
        created.map(|e| e.details),
        Some(ActivityDetails::BranchCreated { ref name, .. }) if name == "feature"
    ));

    watcher.stop().await;
}

#[tokio::test]
async fn test_watcher_start_on_plain_directory_fails() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let (sink, _rx) = ChannelSink::new(8);
    let repo = WatchedRepository::new("proj", temp.path());
    let mut watcher = RepositoryWatcher::new(repo, context(sink), Duration::from_millis(100));

    let err = watcher.start().await.err().unwrap();
    assert!(matches!(err, MonitorError::NotARepository { .. }));
    assert_eq!(watcher.phase(), WatchPhase::Idle);
}

// =============================================================================
// ProjectCoordinator remote polling
// =============================================================================

#[tokio::test]
async fn test_poll_detects_push() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let work = init_with_remote(temp.path());

    let (sink, mut rx) = ChannelSink::new(64);
    let settings = CoordinatorSettings {
        debounce: Duration::from_millis(100),
        poll_interval: Duration::from_secs(120),
        poll_concurrency: 2,
    };
    let mut coordinator = ProjectCoordinator::new("proj", context(sink), settings);
    let summary = coordinator
        .start(vec![WatchedRepository::new("proj", &work).with_id("work")])
        .await;
    assert!(summary.all_started());

    let head = commit_file(&work, "pushed.txt", "pushed\n", "Pushed change");
    git(&work, &["push", "-q", "origin", "main"]);
    // Let the watcher settle on the pushed state before polling
    tokio::time::sleep(Duration::from_millis(500)).await;

    let polled = coordinator.poll_now().await;
    assert_eq!(polled.classified, 1);

    let mut pushed = false;
    while let Some(event) = wait_for(&mut rx, ActivityKind::Push).await {
        if matches!(event.details, ActivityDetails::Push { head: ref h, .. } if *h == head) {
            pushed = true;
            break;
        }
    }
    assert!(pushed, "No PUSH event for the pushed commit");

    coordinator.stop().await;
}

#[tokio::test]
async fn test_poll_detects_push_of_other_branch() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let work = init_with_remote(temp.path());
    git(&work, &["checkout", "-q", "-b", "feature"]);
    let feature_head = commit_file(&work, "feature.txt", "feature\n", "Feature work");
    git(&work, &["checkout", "-q", "main"]);

    let (sink, mut rx) = ChannelSink::new(64);
    let settings = CoordinatorSettings {
        debounce: Duration::from_millis(100),
        poll_interval: Duration::from_secs(120),
        poll_concurrency: 2,
    };
    let mut coordinator = ProjectCoordinator::new("proj", context(sink), settings);
    let summary = coordinator
        .start(vec![WatchedRepository::new("proj", &work).with_id("work")])
        .await;
    assert!(summary.all_started());

    // Pushed from main, and feature has no upstream
    git(&work, &["push", "-q", "origin", "feature"]);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let polled = coordinator.poll_now().await;
    assert_eq!(polled.failed, 0);

    let mut pushed = None;
    while let Some(event) = wait_for(&mut rx, ActivityKind::Push).await {
        if let ActivityDetails::Push { branch, head } = event.details
            && head == feature_head
        {
            pushed = Some(branch);
            break;
        }
    }
    assert_eq!(pushed, Some(Branch::named("origin/feature")));

    coordinator.stop().await;
}

#[tokio::test]
async fn test_poll_reports_remote_update() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().expect("Failed to create temp dir");
    let work = init_with_remote(temp.path());
    let other = temp.path().join("other");
    git(
        temp.path(),
        &["clone", "-q", &temp.path().join("remote.git").display().to_string(), "other"],
    );

    let (sink, mut rx) = ChannelSink::new(64);
    let mut coordinator = ProjectCoordinator::new("proj", context(sink), CoordinatorSettings::default());
    let _ = coordinator
        .start(vec![WatchedRepository::new("proj", &work).with_id("work")])
        .await;

    commit_file(&other, "upstream.txt", "upstream\n", "Someone else's change");
    git(&other, &["push", "-q", "origin", "main"]);

    let polled = coordinator.poll_now().await;
    assert_eq!(polled.failed, 0);

    let event = wait_for(&mut rx, ActivityKind::RemoteUpdate)
        .await
        .expect("No REMOTE_UPDATE event");
    assert!(matches!(event.details, ActivityDetails::RemoteUpdate { ahead: 0, behind: 1, .. }));

    let status = coordinator.status().await;
    assert!(status[0].last_successful_poll.is_some());
    coordinator.stop().await;
}
