use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use common::utils::logging::{init_logging, LogFormat};
use configs::AppConfig;
use dotenvy::dotenv;
use server::{client, Protocol};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "kvstore", version, about = "JSON key/value store with snapshot persistence")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a server speaking HTTP or the TCP line protocol
    Server(ServerArgs),
    /// Talk to a TCP server, interactively or with a batch of commands
    Client(ClientArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    Http,
    Tcp,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Tcp => Protocol::Tcp,
        }
    }
}

#[derive(Args, Debug)]
struct ServerArgs {
    #[arg(value_enum)]
    protocol: ProtocolArg,
    #[arg(long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Snapshot file
    #[arg(short, long)]
    location: Option<String>,
    /// Load the snapshot file if present but never write it
    #[arg(short, long)]
    memory: bool,
    /// Snapshot after every mutation
    #[arg(short, long)]
    continuous_write: bool,
    /// Minimum minutes between snapshots
    #[arg(short = 'i', long)]
    write_interval: Option<u64>,
    /// Required Authorization key (HTTP)
    #[arg(short, long)]
    key: Option<String>,
    /// Admin listener for /healthz and /metrics (TCP)
    #[arg(long)]
    admin_addr: Option<String>,
    /// PEM certificate chain; with --private-key enables HTTPS (HTTP)
    #[arg(long)]
    certificate: Option<String>,
    /// PEM private key for --certificate
    #[arg(long)]
    private_key: Option<String>,
    /// Port of the HTTPS listener
    #[arg(long)]
    tls_port: Option<u16>,
    /// TOML config file; defaults to $CONFIG_PATH or kvstore.toml
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args, Debug)]
struct ClientArgs {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,
    #[arg(short, long, default_value_t = 8888)]
    port: u16,
    /// `;`-separated commands to run instead of the interactive prompt
    #[arg(short, long)]
    command: Option<String>,
}

impl ServerArgs {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut cfg = match &self.config {
            Some(path) => configs::load_from_file(path)?,
            None => configs::load_default()?,
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        self.apply_overrides(&mut cfg);
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut AppConfig) {
        if let Some(host) = &self.host {
            cfg.server.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(key) = &self.key {
            cfg.server.auth_key = Some(key.clone());
        }
        if let Some(addr) = &self.admin_addr {
            cfg.server.admin_addr = Some(addr.clone());
        }
        if let Some(cert) = &self.certificate {
            cfg.server.certificate = Some(cert.clone());
        }
        if let Some(key) = &self.private_key {
            cfg.server.private_key = Some(key.clone());
        }
        if let Some(port) = self.tls_port {
            cfg.server.tls_port = port;
        }
        if let Some(location) = &self.location {
            cfg.storage.location = location.clone();
        }
        if let Some(minutes) = self.write_interval {
            cfg.storage.write_interval_minutes = minutes;
        }
        cfg.storage.memory_only |= self.memory;
        cfg.storage.continuous_write |= self.continuous_write;
    }
}

fn runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(n) = worker_threads {
        builder.worker_threads(n);
    }
    builder.enable_all().build().context("build tokio runtime")
}

fn run_server(args: ServerArgs, service_id: Uuid) -> anyhow::Result<()> {
    let cfg = args.load_config()?;
    let protocol = Protocol::from(args.protocol);
    info!(
        service = "kvstore",
        event = "bootstrap",
        %service_id,
        %protocol,
        addr = %cfg.server.bind_addr(),
        tls_addr = ?cfg.server.tls_files().map(|_| cfg.server.tls_bind_addr()),
        location = %cfg.storage.location,
        memory_only = cfg.storage.memory_only,
        continuous_write = cfg.storage.continuous_write,
        write_interval_minutes = cfg.storage.write_interval_minutes,
        "starting server"
    );
    runtime(cfg.server.worker_threads)?.block_on(server::run(cfg, protocol))
}

fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let addr = format!("{}:{}", args.server, args.port);
    runtime(Some(1))?.block_on(async {
        match args.command.as_deref() {
            Some(commands) => client::run_batch(&addr, commands).await,
            None => client::run_interactive(&addr).await,
        }
    })
}

fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    let format = LogFormat::from_env_value(std::env::var("KVSTORE_LOG_FORMAT").ok().as_deref());
    init_logging(format);

    let service_id = Uuid::new_v4();
    let pid = std::process::id();
    std::panic::set_hook(Box::new(move |info| {
        error!(
            service = "kvstore",
            event = "panic",
            %service_id,
            pid,
            message = %info,
            "unhandled panic occurred"
        );
    }));

    let result = match cli.command {
        Command::Server(args) => {
            info!(service = "kvstore", event = "start", %service_id, pid, version = env!("CARGO_PKG_VERSION"), "kvstore starting");
            let result = run_server(args, service_id);
            info!(service = "kvstore", event = "stop", %service_id, pid, "kvstore stopped");
            result
        }
        Command::Client(args) => run_client(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "kvstore failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
