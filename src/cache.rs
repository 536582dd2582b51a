//! Compile-and-cache writer: serializes a rewritten tree into a compiled
//! unit and writes it atomically next to the source, tagged with the
//! source's modification time and size. A consumer loader recomputes the
//! same tags from the live source and treats the entry as stale on any
//! mismatch.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::ast::Module;
use crate::error::Error;

/// Cache directory created next to each source file.
pub const CACHE_DIR_NAME: &str = "__typecache__";
/// Extension of compiled-unit files.
pub const CACHE_EXTENSION: &str = "tfc";

const MAGIC: u32 = 0x5446_0D0A; // "TF\r\n"
const FORMAT_VERSION: u32 = 1;

/// Staleness tags recomputed from a live source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStamp {
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
}

/// One compiled unit plus its staleness tags.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    magic: u32,
    version: u32,
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
    pub module: Module,
}

impl CacheEntry {
    pub fn stamp(&self) -> SourceStamp {
        SourceStamp {
            mtime_secs: self.mtime_secs,
            mtime_nanos: self.mtime_nanos,
            size: self.size,
        }
    }
}

/// Stat the source file for its staleness tags.
pub fn stamp(source: &Path) -> Result<SourceStamp, Error> {
    let metadata = std::fs::metadata(source)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(SourceStamp {
        mtime_secs: mtime.as_secs(),
        mtime_nanos: mtime.subsec_nanos(),
        size: metadata.len(),
    })
}

/// Cache location derived from the source path:
/// `pkg/mod.py` -> `pkg/__typecache__/mod.tfc`.
pub fn cache_path(source: &Path) -> PathBuf {
    let dir = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_DIR_NAME);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    dir.join(format!("{stem}.{CACHE_EXTENSION}"))
}

/// Write the compiled unit for `module`, returning the cache path.
///
/// The entry is staged in a temp file in the target directory and persisted
/// with a rename, so a reader never observes a half-written entry.
pub fn write_cache(module: &Module, source: &Path) -> Result<PathBuf, Error> {
    let stamp = stamp(source)?;
    let target = cache_path(source);

    let write_err = |source: std::io::Error| Error::Write {
        path: target.clone(),
        source,
    };

    // idempotent: a pre-existing cache directory is not an error
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let entry = CacheEntry {
        magic: MAGIC,
        version: FORMAT_VERSION,
        mtime_secs: stamp.mtime_secs,
        mtime_nanos: stamp.mtime_nanos,
        size: stamp.size,
        module: module.clone(),
    };
    let bytes = bincode::serialize(&entry)
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(write_err)?;
    staged.write_all(&bytes).map_err(write_err)?;
    staged.persist(&target).map_err(|e| write_err(e.error))?;
    Ok(target)
}

/// Read a compiled unit back, validating its header.
pub fn read_cache(path: &Path) -> Result<CacheEntry, Error> {
    let bytes = std::fs::read(path)?;
    let entry: CacheEntry =
        bincode::deserialize(&bytes).map_err(|e| Error::InvalidCache {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if entry.magic != MAGIC {
        return Err(Error::InvalidCache {
            path: path.to_path_buf(),
            reason: "bad magic number".into(),
        });
    }
    if entry.version != FORMAT_VERSION {
        return Err(Error::InvalidCache {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", entry.version),
        });
    }
    Ok(entry)
}

/// True when the live source no longer matches the entry's tags.
pub fn is_stale(entry: &CacheEntry, source: &Path) -> Result<bool, Error> {
    Ok(stamp(source)? != entry.stamp())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::ast::{Stmt, StmtKind};

    fn tiny_module() -> Module {
        Module {
            body: vec![Stmt {
                line: 1,
                kind: StmtKind::Other("x = 1".into()),
            }],
        }
    }

    #[test]
    fn cache_path_is_derived_from_the_source_path() {
        let path = cache_path(Path::new("pkg/mod.py"));
        assert_eq!(path, Path::new("pkg/__typecache__/mod.tfc"));
    }

    #[test]
    fn write_then_read_round_trips_the_module() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("mod.py");
        std::fs::write(&source, "x = 1\n").unwrap();

        let module = tiny_module();
        let target = write_cache(&module, &source).unwrap();
        assert!(target.starts_with(dir.path().join(CACHE_DIR_NAME)));

        let entry = read_cache(&target).unwrap();
        assert_eq!(entry.module, module);
        assert_eq!(entry.stamp(), stamp(&source).unwrap());
        assert!(!is_stale(&entry, &source).unwrap());
    }

    #[test]
    fn rewriting_the_cache_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("mod.py");
        std::fs::write(&source, "x = 1\n").unwrap();

        write_cache(&tiny_module(), &source).unwrap();
        write_cache(&tiny_module(), &source).unwrap();
    }

    #[test]
    fn growing_the_source_flips_a_tag() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("mod.py");
        std::fs::write(&source, "x = 1\n").unwrap();

        let target = write_cache(&tiny_module(), &source).unwrap();
        let entry = read_cache(&target).unwrap();

        std::fs::write(&source, "x = 1\ny = 2\n").unwrap();
        assert!(is_stale(&entry, &source).unwrap());
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = write_cache(&tiny_module(), &dir.path().join("gone.py")).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err}");
    }

    #[test]
    fn corrupt_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mod.tfc");
        std::fs::write(&path, b"not a cache entry").unwrap();
        let err = read_cache(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidCache { .. }), "got {err}");
    }
}
