//! typefence rewrites Python sources with runtime type-guard calls and
//! caches the rewritten tree as a compiled artifact keyed by the source's
//! modification time and size, so the rewrite cost is paid once per change.
//!
//! Pipeline per file: read -> parse ([`parser`]) -> instrument ([`rewrite`])
//! -> serialize and atomically cache ([`cache`]). The guard functions the
//! rewrite injects calls to live in an external Python runtime library.

use std::path::{Path, PathBuf};

pub mod ast;
pub mod cache;
pub mod error;
pub mod parser;
pub mod rewrite;
pub mod synth;
pub mod walk;
pub mod watch;

pub use error::Error;

/// Read, instrument, compile, and cache one source file. Returns the cache
/// path. Any failure is fatal for this file: no partial artifact is written.
pub fn process_file(path: &Path) -> Result<PathBuf, Error> {
    let source = std::fs::read_to_string(path)?;
    let mut module = parser::parse_module(&source, path)?;
    rewrite::instrument_module(&mut module)?;
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(source = %ast::to_source(&module), "instrumented module");
    }
    cache::write_cache(&module, path)
}
