use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// Polls the settings file's modification time on a background thread and raises a flag
/// the dispatch loop consumes at the top of its next iteration.
pub struct ConfigWatcher {
    changed: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    pub fn spawn(path: impl Into<PathBuf>, interval: Duration) -> Self {
        let path = path.into();
        let changed = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::spawn({
            let changed = changed.clone();
            let stop = stop.clone();
            move || watch_loop(&path, interval, &changed, &stop)
        });
        Self {
            changed,
            stop,
            handle: Some(handle),
        }
    }

    /// A watcher that never fires, for callers that manage reloads themselves.
    pub fn inert() -> Self {
        Self {
            changed: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(true)),
            handle: None,
        }
    }

    pub fn change_flag(&self) -> Arc<AtomicBool> {
        self.changed.clone()
    }

    /// Returns whether a change was observed since the last call, clearing the flag.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn watch_loop(path: &Path, interval: Duration, changed: &AtomicBool, stop: &AtomicBool) {
    let mut last_seen = modified_at(path);
    while !stop.load(Ordering::Relaxed) {
        let mut remaining = interval;
        while remaining > Duration::ZERO {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let step = remaining.min(Duration::from_millis(50));
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        let current = modified_at(path);
        if current != last_seen {
            last_seen = current;
            changed.store(true, Ordering::Release);
        }
    }
}
