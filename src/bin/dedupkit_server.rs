//! dedupkit gRPC server
//!
//! Serves duplicate reports, merges and auto-clean over gRPC against a
//! persistent directory store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use dedupkit::storage::persistent::open_database;
use dedupkit::transport::DedupGrpcService;
use dedupkit::{DedupService, DetectionConfig, DirectoryStore, ServiceConfig};

/// Server configuration
struct Config {
    /// Address to bind to
    addr: SocketAddr,
    /// Data directory for persistent storage
    data_dir: PathBuf,
    /// Default match threshold
    threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 50052)),
            data_dir: PathBuf::from("./directory.dedup"),
            threshold: dedupkit::detect::DEFAULT_THRESHOLD,
        }
    }
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    if let Some(v) = args.get(i + 1) {
        v.clone()
    } else {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                let raw = value_of(&args, i, "--port");
                let port: u16 = raw.parse().unwrap_or_else(|_| {
                    eprintln!("error: invalid port number: {raw}");
                    std::process::exit(1);
                });
                config.addr.set_port(port);
                i += 2;
            }
            "--data-dir" | "-d" => {
                config.data_dir = PathBuf::from(value_of(&args, i, "--data-dir"));
                i += 2;
            }
            "--threshold" | "-t" => {
                let raw = value_of(&args, i, "--threshold");
                config.threshold = raw.parse().unwrap_or_else(|_| {
                    eprintln!("error: invalid threshold: {raw}");
                    std::process::exit(1);
                });
                i += 2;
            }
            "--help" | "-h" => {
                println!("dedupkit-server - duplicate detection and merge server");
                println!();
                println!("USAGE:");
                println!("    dedupkit-server [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -p, --port <PORT>         Port to listen on [default: 50052]");
                println!("    -d, --data-dir <DIR>      Data directory [default: ./directory.dedup]");
                println!("    -t, --threshold <T>       Default match threshold [default: 0.9]");
                println!("    -h, --help                Print help information");
                println!();
                println!("Log output is controlled by RUST_LOG (default: info).");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "opening directory"
    );

    // Holds an exclusive lock on the directory for the process lifetime.
    let store: Arc<dyn DirectoryStore> = Arc::new(open_database(&config.data_dir, None)?);

    let service = DedupService::with_config(
        store,
        ServiceConfig {
            detection: DetectionConfig::with_threshold(config.threshold),
        },
    )?;
    let svc = DedupGrpcService::new(Arc::new(service)).into_server();

    tracing::info!(addr = %config.addr, threshold = config.threshold, "serving gRPC");

    Server::builder()
        .add_service(svc)
        .serve_with_shutdown(config.addr, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("shut down");
    Ok(())
}
