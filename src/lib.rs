//! bind-receiver: transient provisioning server.
//!
//! Listens for a short window, accepts one controller at a time and serves
//! a line protocol:
//! - `VERSION`: identity string
//! - `BIND <base64>`: decode the payload into the bundle file
//! - `UNBIND`: run the factory reset
//! - `INFO`: report hardware and firmware details
//!
//! The outcome is reported to the calling script through the exit code.

pub mod commands;
pub mod config;
pub mod decoder;
pub mod error;
pub mod exit;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::Error;
pub use exit::ExitStatus;
pub use server::Server;
