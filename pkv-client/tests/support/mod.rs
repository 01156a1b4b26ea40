#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pkv_client::{Client, ClientConfig};

pub type Received = Arc<Mutex<Vec<Vec<Vec<u8>>>>>;

/// Scripted RESP server on a background thread. Serves one connection.
pub struct MockServer {
    pub addr: String,
    received: Received,
}

impl MockServer {
    /// Every command received so far, as argument vectors.
    pub fn received(&self) -> Vec<Vec<Vec<u8>>> {
        self.received.lock().expect("received lock").clone()
    }

    /// Number of received commands named `name`.
    pub fn count(&self, name: &[u8]) -> usize {
        self.received()
            .iter()
            .filter(|args| args.first().map(|arg| arg.eq_ignore_ascii_case(name)).unwrap_or(false))
            .count()
    }

    /// Polls until at least `n` commands arrived or `timeout` passes.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.received.lock().expect("received lock").len() >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Answers like a tiny key-value store.
    Kv,
    /// Reads commands and never answers.
    Silent,
    /// Answers like `Kv`, but only after sleeping for the given delay.
    Slow(Duration),
}

/// A server answering PING, ECHO, SET, GET, DEL, INCR, RPUSH and LRANGE.
pub fn spawn_kv_server() -> MockServer {
    spawn(Mode::Kv)
}

/// A server that accepts requests but never replies.
pub fn spawn_silent_server() -> MockServer {
    spawn(Mode::Silent)
}

/// A key-value server that waits `delay` before each answer.
pub fn spawn_slow_server(delay: Duration) -> MockServer {
    spawn(Mode::Slow(delay))
}

/// A server that accepts one connection and closes it at once.
pub fn spawn_closing_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        drop(stream);
    });
    addr
}

/// An address nothing listens on.
pub fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}

fn spawn(mode: Mode) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);

    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let reader = BufReader::new(stream.try_clone().expect("clone"));
        serve(reader, stream, mode, log);
    });

    MockServer { addr, received }
}

/// Same key-value server on a Unix-domain socket at `path`.
#[cfg(unix)]
pub fn spawn_unix_kv_server(path: &std::path::Path) -> Received {
    use std::os::unix::net::UnixListener;

    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).expect("bind unix");
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);

    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let reader = BufReader::new(stream.try_clone().expect("clone"));
        serve(reader, stream, Mode::Kv, log);
    });

    received
}

fn serve<R: BufRead, W: Write>(mut reader: R, mut writer: W, mode: Mode, log: Received) {
    let mut store = Store::default();
    loop {
        let args = match read_command(&mut reader) {
            Ok(args) => args,
            Err(_) => return,
        };
        log.lock().expect("received lock").push(args.clone());
        match mode {
            Mode::Silent => continue,
            Mode::Slow(delay) => thread::sleep(delay),
            Mode::Kv => {}
        }
        if store.respond(&args, &mut writer).is_err() {
            return;
        }
    }
}

#[derive(Default)]
struct Store {
    strings: HashMap<Vec<u8>, Vec<u8>>,
    lists: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

impl Store {
    fn respond(&mut self, args: &[Vec<u8>], out: &mut impl Write) -> io::Result<()> {
        let name = args[0].to_ascii_uppercase();
        match (name.as_slice(), args.len()) {
            (b"PING", 1) => write_simple(out, "PONG"),
            (b"ECHO", 2) => write_bulk(out, &args[1]),
            (b"SET", 3) => {
                self.strings.insert(args[1].clone(), args[2].clone());
                write_simple(out, "OK")
            }
            (b"GET", 2) => match self.strings.get(&args[1]) {
                Some(value) => write_bulk(out, value),
                None if self.lists.contains_key(&args[1]) => write_error(
                    out,
                    "WRONGTYPE Operation against a key holding the wrong kind of value",
                ),
                None => write_nil(out),
            },
            (b"DEL", n) if n >= 2 => {
                let mut removed = 0;
                for key in &args[1..] {
                    if self.strings.remove(key).is_some() || self.lists.remove(key).is_some() {
                        removed += 1;
                    }
                }
                write_integer(out, removed)
            }
            (b"INCR", 2) => {
                let current = self
                    .strings
                    .get(&args[1])
                    .and_then(|value| std::str::from_utf8(value).ok())
                    .and_then(|text| text.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + 1;
                self.strings.insert(args[1].clone(), next.to_string().into_bytes());
                write_integer(out, next)
            }
            (b"RPUSH", n) if n >= 3 => {
                let list = self.lists.entry(args[1].clone()).or_default();
                list.extend(args[2..].iter().cloned());
                write_integer(out, list.len() as i64)
            }
            (b"LRANGE", 4) => {
                let items = self.lists.get(&args[1]).cloned().unwrap_or_default();
                write_array(out, &items)
            }
            _ => write_error(
                out,
                &format!("ERR unknown command '{}'", String::from_utf8_lossy(&args[0])),
            ),
        }
    }
}

fn read_command<R: BufRead>(reader: &mut R) -> io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    if args.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty command"));
    }
    Ok(args)
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad length"))
}

fn write_simple(out: &mut impl Write, msg: &str) -> io::Result<()> {
    out.write_all(format!("+{msg}\r\n").as_bytes())?;
    out.flush()
}

fn write_error(out: &mut impl Write, msg: &str) -> io::Result<()> {
    out.write_all(format!("-{msg}\r\n").as_bytes())?;
    out.flush()
}

fn write_integer(out: &mut impl Write, value: i64) -> io::Result<()> {
    out.write_all(format!(":{value}\r\n").as_bytes())?;
    out.flush()
}

fn write_nil(out: &mut impl Write) -> io::Result<()> {
    out.write_all(b"$-1\r\n")?;
    out.flush()
}

fn encode_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

fn write_bulk(out: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let mut buf = Vec::new();
    encode_bulk(&mut buf, data);
    out.write_all(&buf)?;
    out.flush()
}

fn write_array(out: &mut impl Write, items: &[Vec<u8>]) -> io::Result<()> {
    let mut buf = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        encode_bulk(&mut buf, item);
    }
    out.write_all(&buf)?;
    out.flush()
}

/// Test logging; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test defaults: short grace, bounded blocking waits.
pub fn config(addr: &str) -> ClientConfig {
    ClientConfig {
        connect_timeout: Some(Duration::from_secs(2)),
        shutdown_grace: Duration::from_millis(200),
        blocking_timeout: Some(Duration::from_secs(5)),
        ..ClientConfig::tcp(addr)
    }
}

/// A started client for `addr`.
pub fn started_client(addr: &str) -> Client {
    init_tracing();
    let client = Client::new(config(addr));
    assert!(client.start(), "client failed to start");
    client
}
