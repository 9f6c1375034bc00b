//! Hot-reload transport: debounced filesystem watching that drives
//! `reload()` on the owning instance.
//!
//! The watcher monitors the instance's root directory recursively, batches
//! changes (500ms default), filters them through the instance's file filter,
//! and triggers one reload per relevant batch. Dropping the handle (or
//! calling `stop()`) ends the watch.

use std::sync::mpsc::{Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use walkdir::WalkDir;

use crate::instance::BoundApi;

/// Watch configuration.
pub struct WatchConfig {
    /// Debounce duration before a change batch triggers a reload.
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce: Duration::from_millis(500),
        }
    }
}

enum WatchMessage {
    Events(DebounceEventResult),
    Stop,
}

/// Running watch; keeps the underlying watcher alive.
pub struct WatchHandle {
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(WatchMessage::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start watching the instance's root directory.
pub fn watch(api: &BoundApi, config: WatchConfig) -> anyhow::Result<WatchHandle> {
    let ctx = api.ctx();
    let root = ctx.res.dir.clone();

    let (tx, rx) = channel::<WatchMessage>();
    let event_tx = tx.clone();
    let mut debouncer: Debouncer<RecommendedWatcher, RecommendedCache> = new_debouncer(
        config.debounce,
        None,
        move |result: DebounceEventResult| {
            if let Err(e) = event_tx.send(WatchMessage::Events(result)) {
                eprintln!("[watch] error sending event: {e}");
            }
        },
    )?;
    debouncer
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| anyhow::anyhow!("failed to watch {}: {e}", root.display()))?;

    let tracked = count_tracked_files(api);
    eprintln!("[watch] watching {} ({tracked} files)", root.display());

    let api = api.clone();
    let thread = std::thread::spawn(move || {
        let ctx = api.ctx();
        while let Ok(message) = rx.recv() {
            match message {
                WatchMessage::Stop => break,
                WatchMessage::Events(Err(errors)) => {
                    for e in errors {
                        eprintln!("[watch] error: {e}");
                    }
                }
                WatchMessage::Events(Ok(events)) => {
                    let relevant = events.iter().flat_map(|e| e.paths.iter()).any(|p| {
                        p.is_dir() || ctx.res.filter.include_file(p)
                    });
                    if !relevant {
                        continue;
                    }
                    let start = std::time::Instant::now();
                    match api.reload() {
                        Ok(()) => eprintln!(
                            "[watch] reloaded in {:.2}s",
                            start.elapsed().as_secs_f64()
                        ),
                        Err(e) => eprintln!("[watch] reload failed: {e}"),
                    }
                }
            }
        }
    });

    Ok(WatchHandle {
        tx,
        thread: Some(thread),
        _debouncer: debouncer,
    })
}

/// Files the instance's filter currently tracks, for the startup log line.
fn count_tracked_files(api: &BoundApi) -> usize {
    let ctx = api.ctx();
    WalkDir::new(&ctx.res.dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| ctx.res.filter.include_file(entry.path()))
        .count()
}
