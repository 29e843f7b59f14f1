//! Listener and provisioning window.
//!
//! Single-threaded: the listener is polled without blocking so the window
//! can be enforced without a timer thread, and each accepted connection is
//! served to completion before the next accept.

use crate::commands::Dispatcher;
use crate::config::Config;
use crate::error::{SocketStage, StartupError};
use crate::exit::ExitStatus;
use crate::runner::CommandRunner;
use crate::session::Session;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sleep between accept attempts when nobody is connecting.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const LISTEN_BACKLOG: i32 = 5;

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl Server {
    /// Prepare the output directory and start listening.
    pub fn bind(config: Config, runner: Arc<dyn CommandRunner>) -> Result<Self, StartupError> {
        ensure_output_dir(&config.output_dir)?;
        let listener = create_listener(config.addr())?;
        let dispatcher = Dispatcher::new(&config, runner);

        info!(
            address = %config.addr(),
            duration_secs = config.listen_duration.as_secs(),
            force_listen = config.force_listen,
            "Server listening"
        );

        Ok(Server {
            config,
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections until the window closes or a command
    /// ends the run. The listener is closed when this returns.
    pub fn run(self) -> ExitStatus {
        let started = Instant::now();
        let window = self.config.listen_duration;
        let mut bundle_received = false;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= window {
                info!(bundle_received, "Listen duration expired");
                return ExitStatus::expired(bundle_received);
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let outcome = self.serve(stream, peer);
                    bundle_received |= outcome.bundle_received;

                    if let Some(status) = outcome.terminate {
                        info!(status = %status, "Command requested termination");
                        return status;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(window - elapsed));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(window - elapsed));
                }
            }
        }
    }

    fn serve(&self, stream: TcpStream, peer: SocketAddr) -> crate::session::SessionOutcome {
        info!(peer = %peer, "Client connected");

        let session = stream
            .set_nonblocking(false)
            .and_then(|()| Session::from_stream(stream, self.config.max_line_length));
        let outcome = match session {
            Ok(mut session) => session.serve(&self.dispatcher, self.config.force_listen),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to set up connection");
                Default::default()
            }
        };

        info!(peer = %peer, "Client disconnected");
        outcome
    }
}

fn ensure_output_dir(dir: &Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(dir).map_err(|e| StartupError::OutputDir(dir.to_path_buf(), e))?;
    debug!(path = %dir.display(), "Output directory ready");
    Ok(())
}

fn create_listener(addr: SocketAddr) -> Result<TcpListener, StartupError> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(|e| StartupError::Socket(SocketStage::Create, e))?;

    socket
        .set_reuse_address(true)
        .and_then(|()| socket.set_nonblocking(true))
        .map_err(|e| StartupError::Socket(SocketStage::Configure, e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| StartupError::Socket(SocketStage::Bind, e))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| StartupError::Socket(SocketStage::Listen, e))?;

    Ok(socket.into())
}
