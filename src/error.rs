//! Fatal startup errors.
//!
//! Anything here ends the process before the listen window opens and maps
//! to the fatal exit code. Per-session failures never surface as these.

use crate::config::ConfigError;
use std::io;
use std::path::PathBuf;

/// Listener setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStage {
    Create,
    Configure,
    Bind,
    Listen,
}

impl std::fmt::Display for SocketStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SocketStage::Create => "Socket creation",
            SocketStage::Configure => "Socket configuration",
            SocketStage::Bind => "Binding",
            SocketStage::Listen => "Listening",
        };
        f.write_str(name)
    }
}

/// Errors raised while preparing to listen
#[derive(Debug)]
pub enum StartupError {
    OutputDir(PathBuf, io::Error),
    Socket(SocketStage, io::Error),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::OutputDir(path, e) => write!(
                f,
                "Failed to create output directory '{}': {}",
                path.display(),
                e
            ),
            StartupError::Socket(stage, e) => write!(f, "{} failed: {}", stage, e),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::OutputDir(_, e) | StartupError::Socket(_, e) => Some(e),
        }
    }
}

/// Any error that ends the process with the fatal exit code
#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Startup(StartupError),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<StartupError> for Error {
    fn from(e: StartupError) -> Self {
        Error::Startup(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{}", e),
            Error::Startup(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}
