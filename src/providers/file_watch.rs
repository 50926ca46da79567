//! Filesystem watches that turn file edits into bus events.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event as FsEvent, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// A file to watch and the event its modification publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub event: Event,
}

impl WatchTarget {
    pub fn new(path: impl Into<PathBuf>, event: Event) -> Self {
        Self {
            path: path.into(),
            event,
        }
    }

    /// Directory watched on behalf of this target.
    fn watch_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Event paths are the watched directory joined with the entry name.
    fn matches(&self, path: &Path) -> bool {
        path.file_name() == self.path.file_name()
            && path.parent() == Some(self.watch_dir().as_path())
    }
}

/// Watches the schedule file and, for `kind: file` night flags, the exported
/// state blob.
///
/// The parent directory of every target is watched rather than the file, so
/// editors that replace files atomically are still seen. Bursts of
/// modifications are debounced into a single event per target.
///
/// - **Priority**: 4
/// - **Critical**: No
pub struct FileWatchServiceProvider {
    event_bus: EventBus,
    targets: Vec<WatchTarget>,
}

impl FileWatchServiceProvider {
    pub fn new(event_bus: EventBus, targets: Vec<WatchTarget>) -> Self {
        Self { event_bus, targets }
    }
}

#[async_trait]
impl ServiceProvider for FileWatchServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let event_bus = self.event_bus.clone();
        let targets = self.targets.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_file_watch_service(targets, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "FileWatchService"
    }

    fn priority(&self) -> i32 {
        4
    }
}

#[derive(Debug)]
struct ChannelHandler {
    sender: mpsc::UnboundedSender<notify::Result<FsEvent>>,
}

impl EventHandler for ChannelHandler {
    fn handle_event(&mut self, event: notify::Result<FsEvent>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to forward filesystem event: {e}");
        }
    }
}

fn watch_dirs(targets: &[WatchTarget]) -> BTreeSet<PathBuf> {
    targets.iter().map(WatchTarget::watch_dir).collect()
}

async fn run_file_watch_service(
    targets: Vec<WatchTarget>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(ChannelHandler { sender: event_tx })?;

    let mut watched = Vec::new();
    for dir in watch_dirs(&targets) {
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                info!("Watching directory: {}", dir.display());
                watched.push(dir);
            }
            Err(e) => warn!("Cannot watch {}: {e}", dir.display()),
        }
    }

    let mut debounce = tokio::time::interval(DEBOUNCE);
    debounce.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pending = BTreeSet::new();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("File watch service cancelled");
                break;
            }

            received = event_rx.recv() => {
                match received {
                    Some(Ok(fs_event)) => {
                        if !(fs_event.kind.is_modify() || fs_event.kind.is_create()) {
                            continue;
                        }
                        for (index, target) in targets.iter().enumerate() {
                            if fs_event.paths.iter().any(|path| target.matches(path)) {
                                debug!("{} changed ({:?})", target.path.display(), fs_event.kind);
                                pending.insert(index);
                            }
                        }
                    }
                    Some(Err(e)) => warn!("Filesystem watcher error: {e}"),
                    None => {
                        warn!("Filesystem event channel closed");
                        break;
                    }
                }
            }

            _ = debounce.tick(), if !pending.is_empty() => {
                for index in std::mem::take(&mut pending) {
                    let target = &targets[index];
                    info!("{} modified", target.path.display());
                    if let Err(e) = event_bus.publish(target.event.clone()) {
                        warn!("Failed to publish {:?}: {e}", target.event);
                    }
                }
            }
        }
    }

    for dir in &watched {
        if let Err(e) = watcher.unwatch(dir) {
            debug!("Failed to unwatch {}: {e}", dir.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Trigger;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    #[test]
    fn targets_in_one_directory_share_a_watch() {
        let targets = vec![
            WatchTarget::new("/etc/kb_backlightd/schedule.yml", Event::ScheduleChanged),
            WatchTarget::new(
                "/etc/kb_backlightd/night.bin",
                Event::Trigger(Trigger::NightFlagChanged),
            ),
            WatchTarget::new("relative.yml", Event::ScheduleChanged),
        ];

        let dirs = watch_dirs(&targets);
        assert_eq!(dirs.len(), 2);
        assert!(dirs.contains(Path::new("/etc/kb_backlightd")));
        assert!(dirs.contains(Path::new(".")));
    }

    #[test]
    fn same_name_in_another_directory_does_not_match() {
        let target = WatchTarget::new("/etc/kb_backlightd/schedule.yml", Event::ScheduleChanged);

        assert!(target.matches(Path::new("/etc/kb_backlightd/schedule.yml")));
        assert!(!target.matches(Path::new("/run/user/1000/schedule.yml")));
        assert!(!target.matches(Path::new("/etc/kb_backlightd/schedule.yml.tmp")));

        let relative = WatchTarget::new("schedule.yml", Event::ScheduleChanged);
        assert!(relative.matches(Path::new("./schedule.yml")));
    }

    #[tokio::test]
    async fn schedule_edit_publishes_schedule_changed() {
        let dir = TempDir::new().unwrap();
        let schedule = dir.path().join("schedule.yml");
        std::fs::write(&schedule, "auto_enabled: false\n").unwrap();

        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe();
        let provider = FileWatchServiceProvider::new(
            event_bus,
            vec![WatchTarget::new(&schedule, Event::ScheduleChanged)],
        );
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();

        sleep(Duration::from_millis(300)).await;
        std::fs::write(&schedule, "auto_enabled: true\n").unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .unwrap();
        assert_eq!(event, Event::ScheduleChanged);

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn unrelated_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let schedule = dir.path().join("schedule.yml");

        let other_dir = TempDir::new().unwrap();

        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe();
        let provider = FileWatchServiceProvider::new(
            event_bus,
            vec![
                WatchTarget::new(&schedule, Event::ScheduleChanged),
                WatchTarget::new(
                    other_dir.path().join("night.bin"),
                    Event::Trigger(Trigger::NightFlagChanged),
                ),
            ],
        );
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();

        sleep(Duration::from_millis(300)).await;
        std::fs::write(dir.path().join("other.txt"), "noise").unwrap();
        std::fs::write(other_dir.path().join("schedule.yml"), "noise").unwrap();

        assert!(timeout(Duration::from_millis(1_500), rx.recv()).await.is_err());
        task_manager.shutdown_all().await.unwrap();
    }
}
