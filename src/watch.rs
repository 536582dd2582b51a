//! Change watcher: re-runs the pipeline whenever a watched source file is
//! modified. Every event triggers one independent synchronous run; errors
//! (a half-saved file that does not parse, for instance) are logged and
//! swallowed so the loop keeps running until interrupted.

use std::path::Path;
use std::sync::mpsc;

use notify::{EventKind, RecursiveMode, Watcher};

use crate::error::Error;
use crate::walk::is_source_file;

pub fn watch_directory(root: &Path) -> Result<(), Error> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!(path = %root.display(), "watching for source changes");

    for result in rx {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("watch error: {e}");
                continue;
            }
        };
        if !matches!(event.kind, EventKind::Modify(_)) {
            continue;
        }
        for path in &event.paths {
            if path.is_dir() || !is_source_file(path) {
                continue;
            }
            match crate::process_file(path) {
                Ok(cache) => {
                    tracing::info!(source = %path.display(), cache = %cache.display(), "reinstrumented");
                }
                Err(e) => {
                    tracing::warn!(source = %path.display(), "ignored error: {e}");
                }
            }
        }
    }
    Ok(())
}
