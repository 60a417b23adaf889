//! Line-oriented TCP front-end.
//!
//! One command per line, one response line per command:
//!
//! ```text
//! get <key>            mget <key> <key> ...
//! set <key> <value>    upd <key> <value>
//! del <key>            mdel <key> <key> ...
//! all                  ping
//! ```
//!
//! `<value>` is the rest of the line, parsed as JSON when it is valid JSON and
//! stored as a string otherwise. Lines longer than [`MAX_LINE_BYTES`] get
//! `ERR line too long` and the connection is closed.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use store::{Store, StoreError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Longest accepted command line, newline excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

/// Read one line without buffering more than `MAX_LINE_BYTES + 1` bytes.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_BYTES {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line(String::from_utf8_lossy(buf).into_owned()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(String),
    MGet(Vec<String>),
    Set(String, Value),
    Upd(String, Value),
    Del(String),
    MDel(Vec<String>),
    All,
    Ping,
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn single_key(rest: &str, usage: &str) -> Result<String, String> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(key), None) => Ok(key.to_string()),
        _ => Err(format!("ERR usage: {usage}")),
    }
}

fn key_and_value(rest: &str, usage: &str) -> Result<(String, Value), String> {
    match rest.split_once(char::is_whitespace) {
        Some((key, value)) if !value.trim().is_empty() => Ok((key.to_string(), parse_value(value.trim()))),
        _ => Err(format!("ERR usage: {usage}")),
    }
}

fn key_list(rest: &str, usage: &str) -> Result<Vec<String>, String> {
    let keys: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
    if keys.is_empty() {
        return Err(format!("ERR usage: {usage}"));
    }
    Ok(keys)
}

/// Parse one protocol line. The error is the response line to send back.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "" => Err("ERR empty command".to_string()),
        "get" => single_key(rest, "get <key>").map(Command::Get),
        "mget" => key_list(rest, "mget <key> [key ...]").map(Command::MGet),
        "set" => key_and_value(rest, "set <key> <value>").map(|(k, v)| Command::Set(k, v)),
        "upd" => key_and_value(rest, "upd <key> <value>").map(|(k, v)| Command::Upd(k, v)),
        "del" => single_key(rest, "del <key>").map(Command::Del),
        "mdel" => key_list(rest, "mdel <key> [key ...]").map(Command::MDel),
        "all" => Ok(Command::All),
        "ping" => Ok(Command::Ping),
        _ => Err("ERR invalid command".to_string()),
    }
}

fn err_line(err: StoreError) -> String {
    format!("ERR {err}")
}

fn json_line<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("ERR encode: {e}"))
}

/// Run a parsed command against the store and render the response line.
pub async fn execute(store: &Store, command: Command) -> String {
    match command {
        Command::Get(key) => match store.read(&key).await {
            Ok(value) => json_line(&value),
            Err(e) => err_line(e),
        },
        Command::MGet(keys) => json_line(&store.read_many(&keys).await),
        Command::Set(key, value) => match store.create(key, value).await {
            Ok(entry) => format!("OK created {}", entry.key),
            Err(e) => err_line(e),
        },
        Command::Upd(key, value) => match store.update(key, value).await {
            Ok(entry) => format!("OK updated {}", entry.key),
            Err(e) => err_line(e),
        },
        Command::Del(key) => match store.delete(&key).await {
            Ok(entry) => format!("OK deleted {}", entry.key),
            Err(e) => err_line(e),
        },
        Command::MDel(keys) => json_line(&store.delete_many(&keys).await),
        Command::All => {
            let all: serde_json::Map<String, Value> = store.read_all().await.into_iter().collect();
            json_line(&all)
        }
        Command::Ping => "PONG".to_string(),
    }
}

pub async fn respond(store: &Store, line: &str) -> String {
    match parse_command(line) {
        Ok(command) => execute(store, command).await,
        Err(response) => response,
    }
}

async fn handle_connection(stream: TcpStream, store: Arc<Store>, mut shutdown: watch::Receiver<bool>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".into());
    info!(%peer, "accepted connection");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = read_line(&mut reader, &mut buf) => read,
        };
        let line = match read {
            Ok(LineRead::Line(line)) => line,
            Ok(LineRead::Eof) => break,
            Ok(LineRead::TooLong) => {
                warn!(%peer, limit = MAX_LINE_BYTES, "line too long; closing connection");
                let _ = writer.write_all(b"ERR line too long\n").await;
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        };

        let response = respond(&store, &line).await;
        debug!(%peer, command = %line, response = %response, "tcp command");
        let written = async {
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await
        };
        if let Err(e) = written.await {
            warn!(%peer, error = %e, "write failed");
            break;
        }
    }
    info!(%peer, "connection closed");
}

/// Accept connections until `shutdown` resolves, then wait for open
/// connections to finish their current command.
pub async fn serve<F>(listener: TcpListener, store: Arc<Store>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle_connection(stream, Arc::clone(&store), stop_rx.clone()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(open = connections.len(), "tcp listener stopped");
    let _ = stop_tx.send(true);
    while connections.join_next().await.is_some() {}
    Ok(())
}
