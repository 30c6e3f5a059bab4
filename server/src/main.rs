use log::{error, info};
use server::config::{parse_args, ParsedArgs, ServerConfig};
use server::relay::RelaySession;
use server::Server;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Description reported to server browsers
const DESCRIPTION: &str = "relay server";

/// Parses the server options, then runs a dedicated relay server until Ctrl+C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let ParsedArgs {
        options,
        unknown,
        rejected,
    } = parse_args(std::env::args().skip(1));
    for arg in &unknown {
        error!("unknown command-line option: {}", arg);
    }
    for e in &rejected {
        error!("{}", e);
    }

    let config = ServerConfig::from_options(&options);
    for dir in config.package_dirs() {
        info!("Adding package directory {}", dir.display());
    }

    let session = RelaySession::new(DESCRIPTION, config.max_clients());
    let mut server: Server<RelaySession> = Server::new(session, config);

    // The flag is only read between ticks
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let result = server.init_server(true, true, &shutdown).await;
    server.cleanup();
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}
