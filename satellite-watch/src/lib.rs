//! Debounced directory watcher (C9). Watches the manifest and global
//! conditions directory for changes and triggers `RouteTable::reload()`.
//! A reload failure is logged and the previous snapshot keeps serving
//! (spec §9, I7) -- the watcher never tears the process down over a bad
//! edit.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use satellite_core::RouteTable;

/// Default debounce window: several rapid edits to the same file (common
/// with editors that write-then-rename) collapse into a single reload.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct RouteWatcher {
    _watcher: RecommendedWatcher,
}

impl RouteWatcher {
    /// Watches `manifest_path`'s parent directory (and, if given, the
    /// global conditions directory) and spawns a background task that
    /// debounces filesystem events and calls `table.reload()`.
    pub fn spawn(
        table: Arc<RouteTable>,
        manifest_path: impl AsRef<Path>,
        global_conditions_dir: Option<PathBuf>,
        debounce: Duration,
    ) -> notify::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        let manifest_dir = manifest_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher.watch(&manifest_dir, RecursiveMode::NonRecursive)?;
        if let Some(dir) = &global_conditions_dir {
            if dir.is_dir() {
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
            }
        }

        std::thread::spawn(move || debounce_loop(rx, table, debounce));

        Ok(RouteWatcher { _watcher: watcher })
    }
}

/// Runs on a dedicated OS thread since `notify`'s channel is synchronous;
/// reload itself is cheap (manifest parse + regex compile) so this never
/// blocks request-serving tasks.
fn debounce_loop(rx: std_mpsc::Receiver<notify::Result<Event>>, table: Arc<RouteTable>, debounce: Duration) {
    loop {
        let first = match rx.recv() {
            Ok(event) => event,
            Err(_) => return, // watcher dropped
        };
        if let Err(e) = first {
            warn!("filesystem watch error: {e}");
            continue;
        }

        // Drain any further events that arrive within the debounce window
        // so a burst of writes triggers exactly one reload.
        loop {
            match rx.recv_timeout(debounce) {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!("filesystem watch error: {e}");
                    continue;
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => break,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }

        match table.reload() {
            Ok(()) => info!("route table reloaded"),
            Err(e) => error!("route table reload failed, keeping previous snapshot: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn reload_on_manifest_change_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("pathList.yml");
        fs::write(&manifest_path, "- path: /a\n  hosted_file: /a\n").unwrap();

        let table = Arc::new(RouteTable::load(dir.path(), manifest_path.clone(), None).unwrap());
        assert_eq!(table.current().routes.len(), 1);

        let _watcher =
            RouteWatcher::spawn(table.clone(), &manifest_path, None, Duration::from_millis(100)).unwrap();

        fs::write(&manifest_path, "- path: /a\n  hosted_file: /a\n- path: /b\n  hosted_file: /b\n").unwrap();

        let mut attempts = 0;
        while table.current().routes.len() != 2 && attempts < 50 {
            std::thread::sleep(Duration::from_millis(100));
            attempts += 1;
        }
        assert_eq!(table.current().routes.len(), 2);
    }

    #[test]
    fn invalid_edit_keeps_previous_snapshot_and_process_alive() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("pathList.yml");
        fs::write(&manifest_path, "- path: /a\n  hosted_file: /a\n").unwrap();

        let table = Arc::new(RouteTable::load(dir.path(), manifest_path.clone(), None).unwrap());
        let _watcher =
            RouteWatcher::spawn(table.clone(), &manifest_path, None, Duration::from_millis(100)).unwrap();

        fs::write(&manifest_path, "not: [valid yaml for a route list").unwrap();
        std::thread::sleep(Duration::from_millis(500));

        assert_eq!(table.current().routes.len(), 1);
    }
}
