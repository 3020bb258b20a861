//! Watcher thread: notify + debounce, settled paths go to the importer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecursiveMode, Watcher};

use crate::error::{CitegraphError, Result};

/// Watch `root` and send each path over `tx` once it has been quiet for
/// `debounce_ms`. A scraper writing a large batch emits many events; only
/// the last one counts. Exits when the receiver is dropped or on watcher error.
pub fn run_watcher_thread(root: &Path, debounce_ms: u64, tx: mpsc::Sender<PathBuf>) -> Result<()> {
    let debounce = Duration::from_millis(debounce_ms);
    let (event_tx, event_rx) = mpsc::channel::<Vec<PathBuf>>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(ev) if matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
            let _ = event_tx.send(ev.paths);
        }
        Ok(_) => {}
        Err(e) => log::warn!("watch event error: {}", e),
    })
    .map_err(|e| CitegraphError::Config(e.to_string()))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| CitegraphError::Config(format!("watch {}: {}", root.display(), e)))?;

    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match event_rx.recv_timeout(debounce) {
            Ok(paths) => {
                let now = Instant::now();
                for p in paths {
                    pending.insert(p, now);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                let mut ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, t)| now.duration_since(**t) >= debounce)
                    .map(|(p, _)| p.clone())
                    .collect();
                ready.sort();
                for p in &ready {
                    pending.remove(p);
                }
                for p in ready {
                    if tx.send(p).is_err() {
                        return Ok(());
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}
