//! End-to-end provisioning runs over loopback TCP.

use bind_receiver::runner::{CommandOutput, CommandRunner, ExternalCommand};
use bind_receiver::{Config, ExitStatus, Server};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Records invocations and answers with a fixed exit code.
struct FakeRunner {
    code: i32,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn new(code: i32) -> Arc<Self> {
        Arc::new(Self {
            code,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &ExternalCommand) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            code: Some(self.code),
            stdout: format!("{} output\n", command.program),
        })
    }
}

fn config(dir: &Path, secs: u64, force_listen: bool) -> Config {
    Config {
        ip: "127.0.0.1".parse().unwrap(),
        port: 0,
        listen_duration: Duration::from_secs(secs),
        force_listen,
        output_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

fn start(config: Config, runner: Arc<dyn CommandRunner>) -> (SocketAddr, JoinHandle<ExitStatus>) {
    let server = Server::bind(config, runner).unwrap();
    let addr = server.local_addr().unwrap();
    (addr, thread::spawn(move || server.run()))
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self { stream, reader }
    }

    fn send(&mut self, line: &str) -> String {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
        self.read_reply()
    }

    fn read_reply(&mut self) -> String {
        let mut reply = String::new();
        self.reader.read_line(&mut reply).unwrap();
        reply
    }
}

#[test]
fn test_bind_hello_exits_with_bind_code() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, handle) = start(config(dir.path(), 2, false), FakeRunner::new(0));

    let mut client = Client::connect(addr);
    assert_eq!(client.send("BIND aGVsbG8="), "OK\n");

    let status = handle.join().unwrap();
    assert_eq!(status, ExitStatus::Bind);
    assert_eq!(status.code(), 2);
    assert_eq!(std::fs::read(dir.path().join("bind.tar.gz")).unwrap(), b"hello");
}

#[test]
fn test_no_connection_expires_without_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("bind.tar.gz");
    std::fs::write(&bundle, b"previous bundle").unwrap();

    let started = Instant::now();
    let (_addr, handle) = start(config(dir.path(), 1, false), FakeRunner::new(0));

    let status = handle.join().unwrap();
    assert_eq!(status, ExitStatus::ExpiredNoBundle);
    assert_eq!(status.code(), 5);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(std::fs::read(&bundle).unwrap(), b"previous bundle");
}

#[test]
fn test_force_listen_keeps_serving_until_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, handle) = start(config(dir.path(), 2, true), FakeRunner::new(0));

    let mut client = Client::connect(addr);
    assert_eq!(client.send("BIND aGVsbG8="), "OK\n");
    assert_eq!(client.send("VERSION"), "OK\tOpenIPC bind v0.1\n");
    drop(client);

    // A second controller is still served.
    let mut client = Client::connect(addr);
    assert_eq!(client.send("BIND d29ybGQ="), "OK\n");
    drop(client);

    assert_eq!(handle.join().unwrap(), ExitStatus::ExpiredWithBundle);
    assert_eq!(std::fs::read(dir.path().join("bind.tar.gz")).unwrap(), b"world");
}

#[test]
fn test_unknown_command_keeps_connection_open() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, handle) = start(config(dir.path(), 2, false), FakeRunner::new(0));

    let mut client = Client::connect(addr);
    assert_eq!(client.send("FROBNICATE"), "ERR\tUnknown command\n");
    assert_eq!(client.send("VERSION"), "OK\tOpenIPC bind v0.1\n");
    assert_eq!(client.send("VERSION"), "OK\tOpenIPC bind v0.1\n");
    drop(client);

    assert_eq!(handle.join().unwrap(), ExitStatus::ExpiredNoBundle);
}

#[test]
fn test_empty_bind_does_not_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, handle) = start(config(dir.path(), 2, false), FakeRunner::new(0));

    let mut client = Client::connect(addr);
    assert!(client.send("BIND").starts_with("ERR\t"));
    assert!(client.send("BIND   ").starts_with("ERR\t"));
    drop(client);

    assert_eq!(handle.join().unwrap(), ExitStatus::ExpiredNoBundle);
    assert!(!dir.path().join("bind.tar.gz").exists());
}

#[test]
fn test_unbind_success_exits_with_unbind_code() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new(0);
    let (addr, handle) = start(config(dir.path(), 5, false), runner.clone());

    let mut client = Client::connect(addr);
    assert_eq!(client.send("UNBIND"), "OK\tfirstboot output\n");

    assert_eq!(handle.join().unwrap(), ExitStatus::Unbind);
    assert_eq!(*runner.calls.lock().unwrap(), vec!["firstboot".to_string()]);
}

#[test]
fn test_unbind_exits_even_with_force_listen() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new(0);
    let started = Instant::now();
    let (addr, handle) = start(config(dir.path(), 10, true), runner.clone());

    let mut client = Client::connect(addr);
    assert_eq!(client.send("BIND aGVsbG8="), "OK\n");
    assert_eq!(client.send("UNBIND"), "OK\tfirstboot output\n");

    let status = handle.join().unwrap();
    assert_eq!(status, ExitStatus::Unbind);
    assert_eq!(status.code(), 3);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(*runner.calls.lock().unwrap(), vec!["firstboot".to_string()]);
}

#[test]
fn test_unbind_failure_allows_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, handle) = start(config(dir.path(), 2, false), FakeRunner::new(1));

    let mut client = Client::connect(addr);
    assert_eq!(client.send("UNBIND"), "ERR\tFactory reset failed: exit code 1\n");
    assert_eq!(client.send("UNBIND"), "ERR\tFactory reset failed: exit code 1\n");
    drop(client);

    assert_eq!(handle.join().unwrap(), ExitStatus::ExpiredNoBundle);
}

#[test]
fn test_info_is_single_line() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new(0);
    let (addr, handle) = start(config(dir.path(), 2, false), runner.clone());

    let mut client = Client::connect(addr);
    assert_eq!(client.send("INFO"), "OK\tipcinfo output | cat output\n");
    drop(client);

    assert_eq!(handle.join().unwrap(), ExitStatus::ExpiredNoBundle);
    assert_eq!(
        *runner.calls.lock().unwrap(),
        vec!["ipcinfo --long".to_string(), "cat /etc/os-release".to_string()]
    );
}
