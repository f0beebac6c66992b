//! GridKV - A Key-Value Database Stored in a Cell Grid
//!
//! This is the main entry point for the GridKV server.
//! It loads the configuration, opens the database over an in-memory grid,
//! starts the admin console on stdin and serves clients until Ctrl+C.

use gridkv::config::Config;
use gridkv::console::Console;
use gridkv::grid::MemoryGrid;
use gridkv::permissions::PermissionStore;
use gridkv::server::{CommandServer, ServerContext};
use gridkv::storage::{CacheSweeper, SweeperConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line options. Anything given here overrides the config file.
#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    permissions: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    token: Option<String>,
}

impl Args {
    /// Parse options from command-line arguments
    fn parse() -> Self {
        let mut parsed = Args::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--config" | "-c" => parsed.config = Some(PathBuf::from(value_of(&args, i, flag))),
                "--permissions" => parsed.permissions = Some(PathBuf::from(value_of(&args, i, flag))),
                "--host" | "-h" => parsed.host = Some(value_of(&args, i, flag)),
                "--port" | "-p" => {
                    parsed.port = Some(value_of(&args, i, flag).parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    }));
                }
                "--token" | "-t" => parsed.token = Some(value_of(&args, i, flag)),
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("GridKV version {}", gridkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 2;
        }

        parsed
    }

    /// Loads the config file (or defaults) and applies the overrides.
    fn into_config(self) -> anyhow::Result<(Config, Option<PathBuf>, PathBuf)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(token) = self.token {
            config.server.auth_token = token;
        }
        config.validate()?;

        let permissions = self
            .permissions
            .unwrap_or_else(|| PathBuf::from("permissions.toml"));
        Ok((config, self.config, permissions))
    }
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

const WRITE_EXAMPLE: &str =
    r#"{"id":"1","auth":"secret","command":"WRITE","data":{"key":"name","value":"QXJpeg=="}}"#;
const READ_EXAMPLE: &str = r#"{"id":"2","auth":"secret","command":"READ","data":{"key":"name"}}"#;

fn print_help() {
    println!(
        r#"
GridKV - A Key-Value Database Stored in a Cell Grid

USAGE:
    gridkv [OPTIONS]

OPTIONS:
    -c, --config <FILE>        TOML configuration file
        --permissions <FILE>   Permission file (default: permissions.toml)
    -h, --host <HOST>          Host to bind to (default: {host})
    -p, --port <PORT>          Port to listen on (default: {port})
    -t, --token <TOKEN>        Auth token clients must send
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    gridkv                             # Start on {host}:{port}
    gridkv --config gridkv.toml        # Use a config file
    gridkv --port 4000 --token secret  # Override port and token

CONNECTING:
    Send one JSON object per line, values in base64:
    $ nc 127.0.0.1 {port}
    {write}
    {read}

CONSOLE:
    Type 'help' on stdin for admin commands.
"#,
        host = gridkv::DEFAULT_HOST,
        port = gridkv::DEFAULT_PORT,
        write = WRITE_EXAMPLE,
        read = READ_EXAMPLE,
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
   ██████╗ ██████╗ ██╗██████╗ ██╗  ██╗██╗   ██╗
  ██╔════╝ ██╔══██╗██║██╔══██╗██║ ██╔╝██║   ██║
  ██║  ███╗██████╔╝██║██║  ██║█████╔╝ ██║   ██║
  ██║   ██║██╔══██╗██║██║  ██║██╔═██╗ ╚██╗ ██╔╝
  ╚██████╔╝██║  ██║██║██████╔╝██║  ██╗ ╚████╔╝
   ╚═════╝ ╚═╝  ╚═╝╚═╝╚═════╝ ╚═╝  ╚═╝  ╚═══╝

GridKV v{} - Key-Value Database Stored in a Cell Grid
──────────────────────────────────────────────────────────────
Server starting on {}
Grid: {} cells in {} chunks, encoding {:?}, compression {}

Use Ctrl+C to shutdown gracefully.
"#,
        gridkv::VERSION,
        config.server.bind_address(),
        config.storage.bounds().total_cells(),
        config.storage.bounds().chunk_count(),
        config.storage.encoding,
        if config.storage.compression { "on" } else { "off" },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and load the config file
    let (config, config_path, permissions_path) = Args::parse().into_config()?;

    // Set up logging; RUST_LOG wins over logging.level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if config.server.auth_token == gridkv::config::ServerConfig::default().auth_token {
        tracing::warn!("Using the default auth token, set server.auth_token before exposing the server");
    }

    print_banner(&config);

    // Open the database over the configured region
    let grid = MemoryGrid::new(config.storage.bounds());
    let ctx = ServerContext::open(config, Box::new(grid))?;
    info!(
        capacity = ctx.db().estimated_capacity(),
        chunks = ctx.db().chunk_count(),
        "Database ready"
    );

    // Start the background cache sweeper
    let sweeper = CacheSweeper::start(Arc::clone(ctx.db()), SweeperConfig::default());
    info!("Background cache sweeper started");

    // Admin console on stdin
    let acl = Arc::new(PermissionStore::open(&permissions_path)?);
    let console = Console::new(Arc::clone(&ctx), acl, config_path);
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || console.run_stdin())?;

    let server = CommandServer::bind(Arc::clone(&ctx)).await?;

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    server.run_until(shutdown).await;

    sweeper.stop();
    let executor = ctx.executor().clone();
    tokio::task::spawn_blocking(move || executor.shutdown()).await?;

    info!("Server shutdown complete");
    Ok(())
}
