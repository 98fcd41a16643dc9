// server: impersonates the BeSMART cloud so the thermostats on the local
// network can be observed and controlled without internet access.

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

use server::restapi::REPLY_TIMEOUT;
use server::{AppState, Config, Db, Dispatcher, Sender, SharedShadow, Weather, build_router};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: bad configuration: {e}");
            std::process::exit(1);
        }
    };

    let default_filter = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "besim server starting");

    let db = match Db::open(&cfg.database) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = db.purge(server::db::DEFAULT_KEEP_DAYS) {
        eprintln!("FATAL: startup purge failed: {e}");
        std::process::exit(1);
    }

    let socket = match UdpSocket::bind(("0.0.0.0", cfg.udp_port)).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            eprintln!("FATAL: failed to bind UDP port {}: {e}", cfg.udp_port);
            std::process::exit(1);
        }
    };
    info!(port = cfg.udp_port, "UDP socket bound");

    let shadow = SharedShadow::default();
    let sender = Sender::new(socket.clone(), shadow.clone());
    let weather = Weather::new(cfg.latitude, cfg.longitude);

    tokio::spawn(Dispatcher::new(socket, shadow.clone(), sender.clone(), db.clone()).run());
    tokio::spawn(server::weather::run_sampler(weather.clone(), db.clone()));

    let state = Arc::new(AppState {
        shadow,
        sender,
        db,
        weather,
        reply_timeout: REPLY_TIMEOUT,
    });

    let listener = match TcpListener::bind((cfg.http_host.as_str(), cfg.http_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!(
                "FATAL: failed to bind HTTP {}:{}: {e}",
                cfg.http_host, cfg.http_port
            );
            std::process::exit(1);
        }
    };
    info!(host = %cfg.http_host, port = cfg.http_port, "HTTP server listening");

    if let Err(e) = axum::serve(listener, build_router(state)).await {
        eprintln!("FATAL: HTTP server failed: {e}");
        std::process::exit(1);
    }
}
