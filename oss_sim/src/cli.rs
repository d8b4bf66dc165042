//! Helpers shared by the `oss` and `worker` binaries.

use oss_core::OrchestratorError;
use oss_env::EnvError;
use std::path::PathBuf;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Setup and run failures reported by the binaries before exiting with 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Worker executable not found at {}", .0.display())]
    WorkerMissing(PathBuf),

    #[error("Cannot locate the worker executable: {0}")]
    WorkerPath(#[source] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Default worker location: `worker` next to the running executable.
pub fn default_worker_path() -> Result<PathBuf, CliError> {
    let exe = std::env::current_exe().map_err(CliError::WorkerPath)?;
    Ok(exe.with_file_name("worker"))
}

/// Parses CLI arguments, printing help (exit 0) or a usage error (exit 1).
pub fn parse_or_exit<P: clap::Parser>() -> P {
    match P::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    }
}

/// Parses a shared memory key given in decimal or `0x` hexadecimal.
pub fn parse_key(raw: &str) -> Result<i32, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => raw.parse::<i32>(),
    };
    match parsed {
        Ok(0) => Err("key 0 is IPC_PRIVATE and cannot be shared".to_string()),
        Ok(key) => Ok(key),
        Err(e) => Err(format!("invalid key '{}': {}", raw, e)),
    }
}

/// Installs the global subscriber. Logs go to stderr so stdout carries only
/// the status lines.
///
/// `RUST_LOG` overrides the level chosen by `verbose`.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_accepts_hex_and_decimal() {
        assert_eq!(parse_key("0x1234"), Ok(0x1234));
        assert_eq!(parse_key("4660"), Ok(0x1234));
        assert_eq!(parse_key("0XfF"), Ok(255));
    }

    #[test]
    fn test_parse_key_rejects_garbage_and_private() {
        assert!(parse_key("zz").is_err());
        assert!(parse_key("0x").is_err());
        assert!(parse_key("0").is_err());
    }
}
