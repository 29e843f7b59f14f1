//! One accepted connection.
//!
//! Lines are read and answered strictly in order until the peer hangs up,
//! a line is malformed, a write fails, or a command asks to terminate.
//! The stream is closed when the session is dropped.

use crate::commands::{Dispatcher, ReplySink};
use crate::exit::ExitStatus;
use crate::protocol::{parse_request, ParseError, Reply};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use tracing::{debug, trace, warn};

/// How a session ended, as far as the server cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOutcome {
    pub terminate: Option<ExitStatus>,
    pub bundle_received: bool,
}

/// Writes each reply immediately and remembers the first failure.
pub struct ReplyWriter<W: Write> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> ReplyWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ReplySink for ReplyWriter<W> {
    fn send(&mut self, reply: Reply) {
        if self.error.is_some() {
            return;
        }
        let encoded = reply.encode();
        if let Err(e) = self
            .inner
            .write_all(&encoded)
            .and_then(|()| self.inner.flush())
        {
            self.error = Some(e);
        }
    }
}

enum LineRead {
    Line,
    Eof,
    TooLong,
}

/// Read one `\n`-terminated line into `buf`, refusing lines over `max` bytes.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead> {
    let limit = (max as u64).saturating_add(1);
    let n = reader.take(limit).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() != Some(&b'\n') && buf.len() > max {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

pub struct Session<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: ReplyWriter<W>,
    max_line_length: usize,
}

impl Session<TcpStream, TcpStream> {
    /// Split a blocking stream into the read and write halves of a session.
    pub fn from_stream(stream: TcpStream, max_line_length: usize) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self::new(stream, writer, max_line_length))
    }
}

impl<R: Read, W: Write> Session<R, W> {
    pub fn new(reader: R, writer: W, max_line_length: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: ReplyWriter::new(writer),
            max_line_length,
        }
    }

    /// Serve requests until the session ends.
    pub fn serve(&mut self, dispatcher: &Dispatcher, force_listen: bool) -> SessionOutcome {
        let mut outcome = SessionOutcome::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match read_line(&mut self.reader, &mut buf, self.max_line_length) {
                Ok(LineRead::Line) => {}
                Ok(LineRead::Eof) => {
                    trace!("Connection closed by client");
                    break;
                }
                Ok(LineRead::TooLong) => {
                    let err = ParseError::LineTooLong;
                    warn!(max = self.max_line_length, "Request line too long");
                    self.writer.send(Reply::err(&err.to_string()));
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "Read failed");
                    break;
                }
            }

            let Ok(line) = std::str::from_utf8(&buf) else {
                warn!("Request line is not valid UTF-8");
                self.writer.send(Reply::err(&ParseError::Empty.to_string()));
                break;
            };

            let request = match parse_request(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Parse error");
                    self.writer.send(Reply::err(&e.to_string()));
                    break;
                }
            };

            let result = dispatcher.dispatch(&request, &mut self.writer, force_listen);
            outcome.bundle_received |= result.bundle_received;

            if let Some(e) = self.writer.take_error() {
                debug!(error = %e, "Write failed");
                outcome.terminate = result.terminate;
                break;
            }
            if result.terminate.is_some() {
                outcome.terminate = result.terminate;
                break;
            }
        }

        outcome
    }

    #[cfg(test)]
    fn into_writer(self) -> W {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::VERSION_STRING;
    use crate::config::Config;
    use crate::runner::{CommandOutput, CommandRunner, ExternalCommand};
    use std::io::Cursor;
    use std::sync::Arc;

    struct NoopRunner;

    impl CommandRunner for NoopRunner {
        fn run(&self, _: &ExternalCommand) -> io::Result<CommandOutput> {
            Ok(CommandOutput {
                code: Some(0),
                stdout: String::new(),
            })
        }
    }

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let config = Config {
            output_dir: dir.to_path_buf(),
            ..Config::default()
        };
        Dispatcher::new(&config, Arc::new(NoopRunner))
    }

    fn serve(
        input: &[u8],
        force_listen: bool,
        max: usize,
    ) -> (String, SessionOutcome, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let mut session = Session::new(Cursor::new(input.to_vec()), Vec::new(), max);
        let outcome = session.serve(&d, force_listen);
        let output = String::from_utf8(session.into_writer()).unwrap();
        (output, outcome, dir)
    }

    #[test]
    fn test_multiple_commands_in_order() {
        let (output, outcome, _dir) = serve(b"VERSION\nFROBNICATE\nVERSION\n", false, 1024);
        assert_eq!(
            output,
            format!("OK\t{v}\nERR\tUnknown command\nOK\t{v}\n", v = VERSION_STRING)
        );
        assert_eq!(outcome, SessionOutcome::default());
    }

    #[test]
    fn test_bind_stops_reading_buffered_lines() {
        let (output, outcome, dir) = serve(b"BIND aGVsbG8=\nVERSION\n", false, 1024);
        assert_eq!(output, "OK\n");
        assert_eq!(outcome.terminate, Some(ExitStatus::Bind));
        assert!(outcome.bundle_received);
        assert_eq!(std::fs::read(dir.path().join("bind.tar.gz")).unwrap(), b"hello");
    }

    #[test]
    fn test_bind_with_force_listen_keeps_reading() {
        let (output, outcome, _dir) = serve(b"BIND aGVsbG8=\nVERSION\n", true, 1024);
        assert_eq!(output, format!("OK\nOK\t{}\n", VERSION_STRING));
        assert_eq!(outcome.terminate, None);
        assert!(outcome.bundle_received);
    }

    #[test]
    fn test_empty_line_ends_session() {
        let (output, outcome, _dir) = serve(b"\nVERSION\n", false, 1024);
        assert_eq!(output, "ERR\tInvalid command format\n");
        assert_eq!(outcome, SessionOutcome::default());
    }

    #[test]
    fn test_line_too_long() {
        let (output, _, _dir) = serve(b"BIND aGVsbG8gd29ybGQ=\nVERSION\n", false, 8);
        assert_eq!(output, "ERR\tLine too long\n");

        // Exactly at the limit is fine.
        let (output, _, _dir) = serve(b"VERSION\n", false, 7);
        assert_eq!(output, format!("OK\t{}\n", VERSION_STRING));
    }

    #[test]
    fn test_unbounded_line_limit() {
        let (output, _, _dir) = serve(b"VERSION\n", false, usize::MAX);
        assert_eq!(output, format!("OK\t{}\n", VERSION_STRING));
    }

    #[test]
    fn test_last_line_without_newline() {
        let (output, _, _dir) = serve(b"VERSION", false, 1024);
        assert_eq!(output, format!("OK\t{}\n", VERSION_STRING));
    }

    #[test]
    fn test_invalid_utf8_ends_session() {
        let (output, _, _dir) = serve(b"VERS\xffION\nVERSION\n", false, 1024);
        assert_eq!(output, "ERR\tInvalid command format\n");
    }

    #[test]
    fn test_write_failure_ends_session() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let input = Cursor::new(b"VERSION\nBIND aGVsbG8=\n".to_vec());
        let mut session = Session::new(input, Broken, 1024);
        let outcome = session.serve(&d, false);
        assert_eq!(outcome, SessionOutcome::default());
        assert!(!dir.path().join("bind.tar.gz").exists());
    }
}
