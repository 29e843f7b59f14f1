//! Command dispatch table and handlers.
//!
//! The command set is fixed: VERSION, BIND, UNBIND, INFO. Lookup is an
//! exact, case-sensitive match against an ordered table. Every handler
//! sends exactly one reply and never fails; problems become `ERR` replies.

use crate::config::Config;
use crate::decoder::decode_to_file;
use crate::exit::ExitStatus;
use crate::protocol::{single_line, Reply, Request};
use crate::runner::{CommandRunner, ExternalCommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity string returned by VERSION.
pub const VERSION_STRING: &str = "OpenIPC bind v0.1";

/// Substituted for the output of a command that could not be run.
pub const EXEC_FAILED: &str = "Failed to execute command";

const INFO_SEPARATOR: &str = " | ";

/// Known commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Version,
    Bind,
    Unbind,
    Info,
}

const COMMAND_TABLE: [(&str, CommandKind); 4] = [
    ("VERSION", CommandKind::Version),
    ("BIND", CommandKind::Bind),
    ("UNBIND", CommandKind::Unbind),
    ("INFO", CommandKind::Info),
];

impl CommandKind {
    /// First table entry whose name equals `name` exactly.
    pub fn lookup(name: &str) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Version => "VERSION",
            CommandKind::Bind => "BIND",
            CommandKind::Unbind => "UNBIND",
            CommandKind::Info => "INFO",
        }
    }
}

/// What a handler asks of the server after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchResult {
    /// End the run with this status.
    pub terminate: Option<ExitStatus>,
    /// A bundle was fully written.
    pub bundle_received: bool,
}

impl DispatchResult {
    pub fn proceed() -> Self {
        Self::default()
    }
}

/// Destination for handler replies.
pub trait ReplySink {
    fn send(&mut self, reply: Reply);
}

impl ReplySink for Vec<Reply> {
    fn send(&mut self, reply: Reply) {
        self.push(reply);
    }
}

/// Uniform handler contract.
pub trait CommandHandler: Send + Sync {
    fn handle(
        &self,
        argument: Option<&str>,
        sink: &mut dyn ReplySink,
        force_listen: bool,
    ) -> DispatchResult;
}

pub struct VersionHandler;

impl CommandHandler for VersionHandler {
    fn handle(&self, _: Option<&str>, sink: &mut dyn ReplySink, _: bool) -> DispatchResult {
        sink.send(Reply::ok_with(VERSION_STRING));
        DispatchResult::proceed()
    }
}

/// Decodes the payload into the bundle file.
pub struct BindHandler {
    bundle_path: PathBuf,
}

impl BindHandler {
    pub fn new(bundle_path: PathBuf) -> Self {
        Self { bundle_path }
    }
}

impl CommandHandler for BindHandler {
    fn handle(
        &self,
        argument: Option<&str>,
        sink: &mut dyn ReplySink,
        force_listen: bool,
    ) -> DispatchResult {
        let payload = match argument {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                warn!("BIND without payload");
                sink.send(Reply::err("Missing bundle payload"));
                return DispatchResult::proceed();
            }
        };

        match decode_to_file(payload, &self.bundle_path) {
            Ok(written) => {
                info!(bytes = written, path = %self.bundle_path.display(), "Bundle saved");
                sink.send(Reply::ok());
                DispatchResult {
                    terminate: (!force_listen).then_some(ExitStatus::Bind),
                    bundle_received: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "Bundle decode failed");
                sink.send(Reply::err("Failed to process data"));
                DispatchResult::proceed()
            }
        }
    }
}

/// Runs the factory reset command.
pub struct UnbindHandler {
    command: ExternalCommand,
    runner: Arc<dyn CommandRunner>,
}

impl UnbindHandler {
    pub fn new(command: ExternalCommand, runner: Arc<dyn CommandRunner>) -> Self {
        Self { command, runner }
    }
}

impl CommandHandler for UnbindHandler {
    fn handle(&self, _: Option<&str>, sink: &mut dyn ReplySink, _: bool) -> DispatchResult {
        info!(command = %self.command, "Running factory reset");

        let output = match self.runner.run(&self.command) {
            Ok(output) => output,
            Err(e) => {
                warn!(command = %self.command, error = %e, "Factory reset could not be started");
                sink.send(Reply::err(&format!("Factory reset failed: {}", EXEC_FAILED)));
                return DispatchResult::proceed();
            }
        };

        if !output.success() {
            let status = match output.code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            warn!(command = %self.command, status = %status, "Factory reset failed");
            sink.send(Reply::err(&format!("Factory reset failed: {}", status)));
            return DispatchResult::proceed();
        }

        let text = single_line(&output.stdout);
        let text = text.trim();
        if text.is_empty() {
            sink.send(Reply::ok_with("Factory reset completed"));
        } else {
            sink.send(Reply::ok_with(text));
        }
        // The reset already ran; force-listen does not hide it from the caller.
        DispatchResult {
            terminate: Some(ExitStatus::Unbind),
            bundle_received: false,
        }
    }
}

/// Collects device identity from the introspection commands.
pub struct InfoHandler {
    commands: Vec<ExternalCommand>,
    runner: Arc<dyn CommandRunner>,
}

impl InfoHandler {
    pub fn new(commands: Vec<ExternalCommand>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { commands, runner }
    }
}

impl CommandHandler for InfoHandler {
    fn handle(&self, _: Option<&str>, sink: &mut dyn ReplySink, _: bool) -> DispatchResult {
        let parts: Vec<String> = self
            .commands
            .iter()
            .map(|command| match self.runner.run(command) {
                Ok(output) => single_line(&output.stdout),
                Err(e) => {
                    warn!(command = %command, error = %e, "Info command failed");
                    EXEC_FAILED.to_string()
                }
            })
            .collect();

        sink.send(Reply::ok_with(&parts.join(INFO_SEPARATOR)));
        DispatchResult::proceed()
    }
}

/// Routes parsed requests to their handlers.
pub struct Dispatcher {
    version: VersionHandler,
    bind: BindHandler,
    unbind: UnbindHandler,
    info: InfoHandler,
}

impl Dispatcher {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            version: VersionHandler,
            bind: BindHandler::new(config.bundle_path()),
            unbind: UnbindHandler::new(config.factory_reset.clone(), Arc::clone(&runner)),
            info: InfoHandler::new(config.info.clone(), runner),
        }
    }

    pub fn handler(&self, kind: CommandKind) -> &dyn CommandHandler {
        match kind {
            CommandKind::Version => &self.version,
            CommandKind::Bind => &self.bind,
            CommandKind::Unbind => &self.unbind,
            CommandKind::Info => &self.info,
        }
    }

    /// Dispatch one request. Unknown commands get the standard error reply.
    pub fn dispatch(
        &self,
        request: &Request<'_>,
        sink: &mut dyn ReplySink,
        force_listen: bool,
    ) -> DispatchResult {
        let Some(kind) = CommandKind::lookup(request.command) else {
            debug!(command = request.command, "Unknown command");
            sink.send(Reply::unknown_command());
            return DispatchResult::proceed();
        };

        debug!(
            command = kind.name(),
            argument_len = request.argument.map_or(0, str::len),
            "Dispatching command"
        );
        self.handler(kind).handle(request.argument, sink, force_listen)
    }
}
