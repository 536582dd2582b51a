//! Directory driver: enumerates source files and runs the pipeline once per
//! file. A single file's failure is reported and skipped so a batch run
//! stays resilient.

use std::path::Path;

use ignore::WalkBuilder;

use crate::cache::CACHE_DIR_NAME;

/// Extension of the sources this tool rewrites.
pub const SOURCE_EXTENSION: &str = "py";

#[derive(Debug, Default, Clone, Copy)]
pub struct DirSummary {
    pub processed: usize,
    pub failed: usize,
}

pub fn is_source_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
}

/// Instrument every source file under `root`, respecting .gitignore and
/// skipping cache directories. Files are processed one at a time in
/// enumeration order; an unreadable entry is counted and skipped like any
/// other per-file failure.
pub fn process_directory(root: &Path) -> DirSummary {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .follow_links(true)
        .filter_entry(|entry| entry.file_name().to_string_lossy() != CACHE_DIR_NAME)
        .build();

    let mut summary = DirSummary::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!("skipped unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path();
        if !is_source_file(path) {
            continue;
        }
        match crate::process_file(path) {
            Ok(cache) => {
                summary.processed += 1;
                tracing::info!(source = %path.display(), cache = %cache.display(), "instrumented");
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(source = %path.display(), "skipped: {e}");
            }
        }
    }
    summary
}
