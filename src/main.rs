//! BlazeKV - A RESP-Compatible In-Memory Key-Value Server
//!
//! The binary entry point: parses flags, installs the stderr logger,
//! loads the previous snapshot, starts the background tickers and runs
//! the accept loop until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use blazekv::commands::CommandHandler;
use blazekv::config::ServerConfig;
use blazekv::connection::ConnectionStats;
use blazekv::persistence::{load_if_exists, SnapshotSaver};
use blazekv::server::{self, ClientRegistry};
use blazekv::storage::{KeyExpirer, Keyspace};
use blazekv::{DEFAULT_HOST, DEFAULT_PORT, SNAPSHOT_FILE};

/// Command-line configuration
struct CliConfig {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Maximum log level written to stderr
    log_level: Level,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: Level::INFO,
        }
    }
}

impl CliConfig {
    /// Parses `-h <ip>`, `-p <port>` and `-l <level>` from the command
    /// line. Invalid values print a diagnostic on stderr and exit 1.
    fn from_args() -> Self {
        let mut config = CliConfig::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-h" => {
                    if i + 1 >= args.len() {
                        eprintln!("Error: -h requires a value");
                        std::process::exit(1);
                    }
                    let host = &args[i + 1];
                    if host.parse::<std::net::IpAddr>().is_err() {
                        eprintln!("Error: invalid host ip address '{}'", host);
                        std::process::exit(1);
                    }
                    config.host = host.clone();
                    i += 2;
                }
                "-p" => {
                    if i + 1 >= args.len() {
                        eprintln!("Error: -p requires a value");
                        std::process::exit(1);
                    }
                    config.port = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number '{}'", args[i + 1]);
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "-l" => {
                    if i + 1 >= args.len() {
                        eprintln!("Error: -l requires a value");
                        std::process::exit(1);
                    }
                    config.log_level = match args[i + 1].to_lowercase().as_str() {
                        "debug" => Level::DEBUG,
                        "info" => Level::INFO,
                        "warn" => Level::WARN,
                        "error" => Level::ERROR,
                        other => {
                            eprintln!("Error: invalid logger level '{}'", other);
                            std::process::exit(1);
                        }
                    };
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("BlazeKV version {}", blazekv::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
BlazeKV - A RESP-compatible in-memory key-value server

USAGE:
    blazekv [OPTIONS]

OPTIONS:
    -h <IP>       Host address to bind to (default: localhost)
    -p <PORT>     Port to listen on (default: 6700)
    -l <LEVEL>    Log level: debug|info|warn|error (default: info)
    -v, --version Print version information
        --help    Print this help message

EXAMPLES:
    blazekv                   # Start on localhost:6700
    blazekv -p 6701           # Start on port 6701
    blazekv -h 0.0.0.0 -l debug

CONNECTING:
    Use redis-cli or any Redis client:
    $ redis-cli -p 6700
    localhost:6700> PING
    PONG
"#
    );
}

fn print_banner(config: &CliConfig) {
    println!(
        r#"
BlazeKV v{} - RESP-compatible in-memory key-value server
────────────────────────────────────────────────────────
Server starting on {}
Use Ctrl+C to shut down gracefully.
"#,
        blazekv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::from_args();

    // Structured logs go to stderr, keeping stdout for the banner
    FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    print_banner(&cli);

    let config = Arc::new(ServerConfig::default());
    let keyspace = Arc::new(Keyspace::new());
    let registry = Arc::new(ClientRegistry::new());
    let stats = Arc::new(ConnectionStats::new());
    let handler = CommandHandler::new(
        Arc::clone(&keyspace),
        Arc::clone(&registry),
        Arc::clone(&config),
    );

    // Rebuild state from the previous run, if any
    load_if_exists(SNAPSHOT_FILE, &handler, &keyspace).await;

    let _expirer = KeyExpirer::start(Arc::clone(&keyspace));
    let _saver = SnapshotSaver::start(
        Arc::clone(&keyspace),
        config.save_rules(),
        PathBuf::from(SNAPSHOT_FILE),
    );

    let listener = TcpListener::bind(cli.bind_address()).await?;
    info!(address = %cli.bind_address(), "initialized server");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server::listen(
        listener,
        handler,
        registry,
        stats,
        shutdown_rx,
    ));

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down gracefully...");
    let _ = shutdown_tx.send(true);
    server_task.await?;

    info!("server shutdown complete");
    Ok(())
}
