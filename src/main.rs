//! HearthLink - Device pairing and area-scoped credentials for
//! home-automation backends
//!
//! Pairs tablets and kiosks to the backend via a short-lived PIN, issues
//! each paired device a long-lived revocable credential, and keeps connected
//! devices in sync with admin-side changes over WebSocket.

use anyhow::Result;
use clap::Parser;
use hearthlink_auth::{AuthGate, PairingManager, SigningKeys, TokenService};
use hearthlink_core::Config;
use hearthlink_notify::NotificationRegistry;
use hearthlink_server::{create_router, create_rustls_config, AppState, TlsManager};
use hearthlink_store::ClientStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// HearthLink - pair devices and manage their area-scoped credentials
#[derive(Parser, Debug)]
#[command(name = "hearthlink")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8445")]
    port: u16,

    /// Data directory (default: ~/.config/hearthlink)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Admin username for the login endpoint
    #[arg(long, default_value = "admin")]
    admin_user: String,

    /// Admin password for the login endpoint
    #[arg(long, env = "HEARTHLINK_ADMIN_PASSWORD")]
    admin_password: String,

    /// Background sweep interval in seconds
    #[arg(long, default_value = "300")]
    sweep_interval: u64,

    /// Disable HTTPS (not recommended outside development)
    #[arg(long)]
    no_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("HearthLink v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?
            .join("hearthlink"),
    };

    let config = Config::new()
        .with_port(args.port)
        .with_admin_username(args.admin_user.clone())
        .with_sweep_interval_secs(args.sweep_interval);

    // Persistence and signing material
    info!("Initializing store at {:?}", data_dir);
    let store = Arc::new(ClientStore::with_path(data_dir.join("store.json")).await?);
    let keys = SigningKeys::load_or_generate(&data_dir)?;

    // Core services
    let tokens = Arc::new(TokenService::new(
        store.clone(),
        keys,
        config.client_token_ttl(),
        config.admin_token_ttl(),
    ));
    let registry = Arc::new(NotificationRegistry::new(
        store.clone(),
        Duration::from_millis(config.disconnect_grace_ms),
    ));
    let pairing = Arc::new(PairingManager::new(
        store.clone(),
        tokens.clone(),
        registry.clone(),
        &config,
    ));
    let gate = Arc::new(AuthGate::new(
        tokens.clone(),
        args.admin_user,
        &args.admin_password,
    ));

    let paired_count = store.client_count().await;
    info!("{} paired client(s)", paired_count);

    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        tokens.clone(),
        pairing.clone(),
        gate,
        registry,
    ));
    let router = create_router(state);

    // Background expiry sweep, cancelled on shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_handle = tokio::spawn(run_sweeps(
        pairing,
        tokens,
        config.sweep_interval_secs,
        shutdown_rx,
    ));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));

    if !args.no_tls {
        let (cert_pem, key_pem, fingerprint) = match (&args.cert, &args.key) {
            (Some(cert_path), Some(key_path)) => {
                info!("Loading TLS certificate from files");
                let cert = std::fs::read_to_string(cert_path)?;
                let key = std::fs::read_to_string(key_path)?;
                let fp = hearthlink_server::calculate_cert_fingerprint(&cert);
                (cert, key, fp)
            }
            _ => {
                let tls_manager = TlsManager::new(data_dir.clone())?;
                let mut hostnames = vec!["localhost".to_string()];
                if let Some(ip) = get_local_ip() {
                    hostnames.push(ip);
                }
                tls_manager.load_or_generate(&hostnames)?
            }
        };

        info!("Certificate fingerprint: {}", fingerprint);
        info!("Listening on https://{}", addr);

        let tls_config = create_rustls_config(&cert_pem, &key_pem).await?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let sweep_shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
            sweep_shutdown.send(true).ok();
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(router.into_make_service())
            .await?;
    } else {
        warn!("TLS disabled (--no-tls flag set)");
        info!("Listening on http://{}", addr);

        let sweep_shutdown = shutdown_tx.clone();
        let shutdown = async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
            sweep_shutdown.send(true).ok();
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
    }

    shutdown_tx.send(true).ok();
    sweep_handle.await.ok();

    info!("Goodbye!");
    Ok(())
}

/// Periodic expiry sweep for sessions and tokens
///
/// Failures are logged and retried on the next tick; nothing here is fatal.
async fn run_sweeps(
    pairing: Arc<PairingManager>,
    tokens: Arc<TokenService>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = pairing.sweep_sessions().await {
                    warn!("Session sweep failed: {}", e);
                }
                if let Err(e) = tokens.sweep_expired().await {
                    warn!("Token sweep failed: {}", e);
                }
            }
            _ = shutdown.changed() => {
                debug!("Sweep task stopping");
                break;
            }
        }
    }
}

/// Best-effort local IP discovery for the TLS certificate SANs
fn get_local_ip() -> Option<String> {
    use std::net::UdpSocket;

    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}
