use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use typefence::error::Error;
use typefence::{walk, watch};

#[derive(Parser)]
#[command(
    name = "typefence",
    about = "Instrument Python sources with runtime type guards ahead of execution",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument one source file and write its cached compiled unit.
    Apply {
        /// Source file to instrument.
        file: PathBuf,
    },
    /// Instrument every source file under a directory, continuing past
    /// per-file failures.
    Dir {
        /// Directory to walk.
        dir: PathBuf,
    },
    /// Watch a directory and re-instrument files as they change.
    Watch {
        /// Directory to watch (defaults to the current directory).
        dir: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Apply { file } => {
            let cache = typefence::process_file(&file)?;
            println!("{}", cache.display());
            Ok(())
        }
        Commands::Dir { dir } => {
            let summary = walk::process_directory(&dir);
            eprintln!(
                "instrumented {} file(s), {} failed",
                summary.processed, summary.failed
            );
            Ok(())
        }
        Commands::Watch { dir } => {
            let root = dir.unwrap_or_else(|| PathBuf::from("."));
            watch::watch_directory(&root)
        }
    }
}
