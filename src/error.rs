use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse {}: line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: u32,
        message: String,
    },

    #[error("unexpected tree shape: {0}")]
    Structural(String),

    #[error("invalid cache entry {}: {reason}", path.display())]
    InvalidCache { path: PathBuf, reason: String },

    #[error("failed to write cache entry {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),
}
