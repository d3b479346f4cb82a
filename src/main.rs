//! FattyTraders -- Interactive Brokers session client.
//!
//! Two front ends over one session core:
//! - `menu`: the interactive text menu;
//! - `serve`: a JSON status API for polling dashboards.
//!
//! Both drive the built-in paper gateway, which stands in for TWS/Gateway.

mod menu;
mod models;
mod web;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fatty_traders_session::{PaperGateway, Session, SessionConfig};

/// FattyTraders -- Interactive Brokers session client.
#[derive(Parser, Debug)]
#[command(name = "fatty-traders", version)]
struct Args {
    /// JSON file with session settings (camelCase keys, durations in ms)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// IB TWS/Gateway host
    #[arg(long = "ib-host", global = true)]
    ib_host: Option<String>,

    /// IB TWS/Gateway port
    #[arg(long = "ib-port", global = true)]
    ib_port: Option<u16>,

    /// IB client ID
    #[arg(long = "ib-client-id", global = true)]
    ib_client_id: Option<i32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive text menu (default)
    Menu,
    /// JSON status API
    Serve {
        /// Web server port
        #[arg(long = "web-port", default_value_t = 5000)]
        web_port: u16,

        /// Connect to IB before serving
        #[arg(long)]
        connect: bool,
    },
}

/// Defaults, then the config file, then command-line flags.
fn load_config(args: &Args) -> Result<SessionConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("invalid config {}: {e}", path.display()))?
        }
        None => SessionConfig::default(),
    };
    if let Some(host) = &args.ib_host {
        config.host = host.clone();
    }
    if let Some(port) = args.ib_port {
        config.port = port;
    }
    if let Some(client_id) = args.ib_client_id {
        config.client_id = client_id;
    }
    Ok(config)
}

fn print_banner() {
    println!("========================================");
    println!("   FattyTraders Session Server");
    println!("   Interactive Brokers Integration");
    println!("   Version {}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
}

fn print_endpoints(port: u16) {
    println!();
    println!("API Endpoints:");
    println!("  Health Check:     GET  http://localhost:{port}/health");
    println!("  Status:           GET  http://localhost:{port}/api/status");
    println!("  Log:              GET  http://localhost:{port}/api/log?since=0");
    println!("  Connect:          POST http://localhost:{port}/api/connect");
    println!("  Disconnect:       POST http://localhost:{port}/api/disconnect");
    println!();
    println!("  Account:");
    println!("    Summary:        GET  http://localhost:{port}/api/account/summary");
    println!("    Refresh:        POST http://localhost:{port}/api/account/summary/refresh");
    println!("    Positions:      GET  http://localhost:{port}/api/account/positions");
    println!("    Refresh:        POST http://localhost:{port}/api/account/positions/refresh");
    println!();
    println!("  Market Data:");
    println!("    Quote:          GET  http://localhost:{port}/api/market/quote/{{tickerId}}");
    println!("    Ticks:          GET  http://localhost:{port}/api/market/ticks");
    println!("    Subscribe:      POST http://localhost:{port}/api/market/subscribe?tickerId=2&symbol=MSFT");
    println!("    Unsubscribe:    POST http://localhost:{port}/api/market/unsubscribe?tickerId=2");
    println!();
    println!("  Orders:");
    println!("    List Orders:    GET  http://localhost:{port}/api/order/list");
    println!("    Refresh:        POST http://localhost:{port}/api/order/refresh");
    println!("    Place Order:    POST http://localhost:{port}/api/order/place");
    println!("    Cancel Order:   POST http://localhost:{port}/api/order/cancel");
    println!();
    println!("Press Ctrl+C to stop the server...");
    println!();
}

fn run_menu(session: &Session<PaperGateway>) -> io::Result<()> {
    let stdin = io::stdin();
    menu::Menu::new(session, stdin.lock(), io::stdout()).run()
}

async fn run_server(
    session: Arc<Session<PaperGateway>>,
    web_port: u16,
    connect: bool,
) -> io::Result<()> {
    print_banner();

    if connect {
        let endpoint = session.endpoint();
        println!(
            "Connecting to IB TWS/Gateway at {}:{} (client ID: {})...",
            endpoint.host, endpoint.port, endpoint.client_id
        );
        let worker = Arc::clone(&session);
        match tokio::task::spawn_blocking(move || worker.connect_default()).await {
            Ok(Ok(())) => println!("Successfully connected to IB!"),
            Ok(Err(e)) => {
                eprintln!("Failed to connect to IB TWS/Gateway: {e}");
                eprintln!("The server starts anyway; POST /api/connect to retry.");
            }
            Err(e) => return Err(io::Error::other(e)),
        }
    }

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_tx = std::sync::Mutex::new(Some(shutdown_tx));
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, shutting down gracefully...");
        if let Some(tx) = shutdown_tx.lock().ok().and_then(|mut tx| tx.take()) {
            let _ = tx.send(());
        }
    })
    .map_err(|e| io::Error::other(e.to_string()))?;

    let app = web::create_router(Arc::clone(&session));
    print_endpoints(web_port);

    let addr = format!("0.0.0.0:{web_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await?;

    println!("Shutting down...");
    tokio::task::spawn_blocking(move || session.disconnect())
        .await
        .map_err(io::Error::other)?;
    println!("Shutdown complete. Goodbye!");
    Ok(())
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    let session = Arc::new(Session::new(PaperGateway::default(), config));

    let result = match args.command.unwrap_or(Command::Menu) {
        Command::Menu => run_menu(&session),
        Command::Serve { web_port, connect } => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .and_then(|rt| rt.block_on(run_server(Arc::clone(&session), web_port, connect))),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "fatty-traders",
            "--ib-port",
            "7497",
            "serve",
            "--web-port",
            "8080",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.port, 7497);
        assert_eq!(config.host, "127.0.0.1");
        assert!(matches!(args.command, Some(Command::Serve { web_port: 8080, connect: false })));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["fatty-traders", "--config", "/nonexistent/fatty.json"]);
        assert!(load_config(&args).unwrap_err().contains("cannot read"));
    }
}
