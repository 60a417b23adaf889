use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::info;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection to a TCP front-end speaking the line protocol.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self { lines: BufReader::new(reader).lines(), writer })
    }

    /// Send one command line and wait for its response line.
    pub async fn send(&mut self, command: &str) -> anyhow::Result<String> {
        self.writer.write_all(command.trim().as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        let line = tokio::time::timeout(RESPONSE_TIMEOUT, self.lines.next_line())
            .await
            .map_err(|_| anyhow!("server timeout"))??;
        line.ok_or_else(|| anyhow!("connection closed by remote host"))
    }
}

/// Run `;`-separated commands, printing each response.
pub async fn run_batch(addr: &str, commands: &str) -> anyhow::Result<()> {
    let mut client = Client::connect(addr).await?;
    for command in commands.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        println!("{}", client.send(command).await?);
    }
    Ok(())
}

/// Interactive prompt over stdin until EOF.
pub async fn run_interactive(addr: &str) -> anyhow::Result<()> {
    let mut client = Client::connect(addr).await?;
    info!(%addr, "connected");
    println!("Welcome to kvstore!");

    let mut stdout = tokio::io::stdout();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"$: ").await?;
        stdout.flush().await?;
        let Some(line) = input.next_line().await? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        println!("{}", client.send(&line).await?);
    }
}
