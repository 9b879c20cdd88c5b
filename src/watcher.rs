use log::{error, info};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

/// Re-emits the usage feed whenever the session store settles after a write.
pub struct StoreWatcher {
    watcher: RecommendedWatcher,
    watch_dir: PathBuf,
    last_event: Arc<Mutex<Option<Instant>>>,
    /// Store changed but the rebuild has not run yet
    dirty: Arc<Mutex<bool>>,
    /// Callback invoked once per settled batch of changes
    on_change: Arc<dyn Fn() + Send + Sync>,
}

/// Editors and the agent runtime both write through temp files; only the
/// final JSON rename matters.
fn is_relevant(path: &Path) -> bool {
    let Some(path_str) = path.to_str() else {
        return false;
    };
    if path_str.contains(".swp")
        || path_str.contains(".tmp")
        || path_str.contains('~')
        || path_str.contains("4913")
    {
        return false;
    }
    path.extension().is_some_and(|e| e == "json")
}

impl StoreWatcher {
    pub fn new(
        store_path: &Path,
        on_change: Arc<dyn Fn() + Send + Sync>,
    ) -> notify::Result<Self> {
        let watch_dir = store_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dirty = Arc::new(Mutex::new(false));
        let dirty_clone = dirty.clone();
        let last_event = Arc::new(Mutex::new(None));
        let last_event_clone = last_event.clone();

        // 100ms poll interval for responsiveness on fallback backends
        let config = Config::default().with_poll_interval(Duration::from_millis(100));

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if (event.kind.is_modify() || event.kind.is_create())
                        && event.paths.iter().any(|p| is_relevant(p))
                    {
                        *last_event_clone.lock() = Some(Instant::now());
                        *dirty_clone.lock() = true;
                    }
                }
                Err(e) => error!("File watcher error: {:?}", e),
            },
            config,
        )?;

        Ok(Self {
            watcher,
            watch_dir,
            last_event,
            dirty,
            on_change,
        })
    }

    pub fn start(&mut self) -> notify::Result<()> {
        self.watcher
            .watch(&self.watch_dir, RecursiveMode::NonRecursive)?;
        info!(
            "Watching session store directory: {}",
            self.watch_dir.display()
        );
        Ok(())
    }

    /// Fire the callback once the store has been quiet for 80ms, so a burst
    /// of partial writes triggers a single rebuild.
    pub fn process_changes(&self) {
        let mut dirty = self.dirty.lock();
        if !*dirty {
            return;
        }

        if let Some(last_event) = *self.last_event.lock() {
            if Instant::now().duration_since(last_event) < Duration::from_millis(80) {
                return;
            }
        }

        *dirty = false;
        drop(dirty);

        (self.on_change)();
    }
}
