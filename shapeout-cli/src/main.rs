//! Shape-Out command-line entry point.
//!
//! Opens a session archive and reports what it contains.

use clap::Parser;
use log::info;
use shapeout_core::{DatasetLoader, PolygonRegistry, TaskRunner};
use shapeout_io::{load_session, LoadOptions, LoadedSession};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("'{0}' is not a session file (expected .zmso)")]
    NotASession(PathBuf),

    #[error("session loading was interrupted")]
    Interrupted,

    #[error("{0}")]
    Io(#[from] shapeout_io::Error),
}

/// Analysis of real-time deformability cytometry data.
#[derive(Parser, Debug)]
#[command(name = "shapeout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session archive to open on startup
    session: Option<PathBuf>,
}

fn check_session_path(path: &Path) -> Result<()> {
    let is_session = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zmso"));
    if is_session {
        Ok(())
    } else {
        Err(CliError::NotASession(path.to_path_buf()))
    }
}

#[cfg(feature = "hdf5")]
fn default_loader() -> Arc<dyn DatasetLoader> {
    Arc::new(shapeout_io::RtdcLoader)
}

#[cfg(not(feature = "hdf5"))]
fn default_loader() -> Arc<dyn DatasetLoader> {
    /// Stands in when the binary is built without HDF5 support.
    struct NoLoader;

    impl DatasetLoader for NoLoader {
        fn open(&self, path: &Path) -> shapeout_core::Result<shapeout_core::Dataset> {
            Err(shapeout_core::Error::Open {
                path: path.display().to_string(),
                reason: "built without the hdf5 feature".to_string(),
            })
        }
    }

    Arc::new(NoLoader)
}

/// Loads `path` on a background task and waits for the result.
fn load_in_background(path: &Path, loader: Arc<dyn DatasetLoader>) -> Result<LoadedSession> {
    let mut runner = TaskRunner::new();
    let (tx, rx) = mpsc::channel();
    let path = path.to_path_buf();
    runner.spawn(
        "load session",
        move |_cancel| {
            load_session(
                &path,
                loader.as_ref(),
                PolygonRegistry::shared(),
                &LoadOptions::default(),
            )
        },
        move |result| {
            let _ = tx.send(result);
        },
    );
    runner.wait("load session");
    match rx.recv() {
        Ok(result) => Ok(result?),
        Err(_) => Err(CliError::Interrupted),
    }
}

fn report(session: &LoadedSession) -> Vec<String> {
    let mut lines = vec![format!(
        "session written by version {}, {} measurements",
        session.version,
        session.analysis.len()
    )];
    for dataset in session.analysis.measurements() {
        lines.push(format!(
            "{}\t{} events\t{} after filtering",
            dataset.title,
            dataset.len(),
            dataset.filtered_len()
        ));
    }
    for warning in &session.hash_warnings {
        lines.push(format!("warning: {warning}"));
    }
    lines
}

fn run(cli: &Cli) -> Result<()> {
    let Some(path) = &cli.session else {
        info!("no session given");
        return Ok(());
    };
    check_session_path(path)?;
    info!("opening {}", path.display());
    let session = load_in_background(path, default_loader())?;
    for line in report(&session) {
        println!("{line}");
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
