//! gatepassd: serves the gatepass workflow over a local socket.
//!
//! Loads the policy, opens the SQLite store, then runs one loop that
//! dispatches client requests, sweeps overdue requests on a timer and
//! pushes state-change events to subscribers.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gatepass_api::{Event, EventPayload};
use gatepass_config::{load_config, Policy};
use gatepass_core::{GatepassEngine, LogNotifier};
use gatepass_ipc::{IpcServer, ServerMessage};
use gatepass_store::{SqliteStore, Store};
use gatepass_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// gatepassd - Campus exit-pass approval service
#[derive(Parser, Debug)]
#[command(name = "gatepassd")]
#[command(about = "Campus exit-pass approval service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/gatepass/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set GATEPASS_SOCKET env var)
    #[arg(short, long, env = "GATEPASS_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set GATEPASS_DATA_DIR env var)
    #[arg(short, long, env = "GATEPASS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// Main service state
struct Service {
    engine: Arc<GatepassEngine>,
    ipc: Arc<IpcServer>,
    sweep_interval: Duration,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = if args.config.exists() {
            let policy = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(config_path = %args.config.display(), "Configuration loaded");
            policy
        } else {
            warn!(
                config_path = %args.config.display(),
                "Config file not found, using defaults"
            );
            Policy::default()
        };

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.daemon.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.daemon.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Cannot create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("gatepassd.db");
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Cannot open gatepass database {:?}", db_path))?;
        let store: Arc<dyn Store> = Arc::new(store);
        info!(db_path = %db_path.display(), "Database open");

        let sweep_interval = policy.workflow.sweep_interval;
        info!(
            approval_base_url = %policy.notifications.approval_base_url,
            sweep_interval = %format_duration(sweep_interval),
            max_duration = %format_duration(policy.workflow.max_duration),
            "Workflow configured"
        );

        let engine = GatepassEngine::new(policy, store, Arc::new(LogNotifier));

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start()
            .await
            .with_context(|| format!("Failed to start IPC server on {:?}", socket_path))?;

        info!(socket_path = %socket_path.display(), "Accepting clients");

        Ok(Self {
            engine: Arc::new(engine),
            ipc: Arc::new(ipc),
            sweep_interval,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc = self.ipc.clone();
        let engine = self.engine.clone();
        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "Socket server stopped");
            }
        });

        let shutdown = shutdown_signal()?;
        tokio::pin!(shutdown);

        let mut sweep_timer = tokio::time::interval(self.sweep_interval);
        sweep_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Service running");

        loop {
            tokio::select! {
                received = &mut shutdown => {
                    info!(signal = received, "Stopping");
                    break;
                }

                // Periodic expiry sweep
                _ = sweep_timer.tick() => {
                    let sweeper = engine.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        sweeper.sweep_expired(gatepass_util::now())
                    })
                    .await;

                    match result {
                        Ok(Ok(count)) => debug!(count, "Sweep finished"),
                        Ok(Err(e)) => warn!(error = %e, "Sweep failed"),
                        Err(e) => error!(error = %e, "Sweep task panicked"),
                    }
                    Self::broadcast_core_events(&engine, &ipc);
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::on_message(&engine, &ipc, msg).await;
                }
            }
        }

        info!("Shutting down gatepassd");
        ipc.broadcast_event(Event::new(EventPayload::Shutdown));
        ipc.shutdown();

        info!("Stopped");
        Ok(())
    }

    async fn on_message(
        engine: &Arc<GatepassEngine>,
        ipc: &Arc<IpcServer>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request {
                client_id,
                peer,
                request,
            } => {
                let request_id = request.request_id;
                let worker = engine.clone();

                // SQLite calls block; keep them off the event loop
                let response = tokio::task::spawn_blocking(move || {
                    gatepassd::handle_request(&worker, client_id, peer, request, gatepass_util::now())
                })
                .await;

                let response = match response {
                    Ok(response) => response,
                    Err(e) => {
                        error!(client_id = %client_id, error = %e, "Request handler panicked");
                        gatepass_api::Response::error(
                            request_id,
                            gatepass_api::ErrorInfo::new(
                                gatepass_api::ErrorCode::InternalError,
                                "Internal error",
                            ),
                        )
                    }
                };

                if let Err(e) = ipc.send_response(&client_id, response).await {
                    debug!(client_id = %client_id, error = %e, "Failed to send response");
                }

                Self::broadcast_core_events(engine, ipc);
            }

            ServerMessage::ClientConnected { client_id, peer } => {
                let clients = ipc.client_count().await;
                debug!(
                    client_id = %client_id,
                    uid = ?peer.uid,
                    trusted = peer.trusted,
                    clients,
                    "Client registered"
                );
            }

            ServerMessage::ClientDisconnected { client_id } => {
                let clients = ipc.client_count().await;
                debug!(
                    client_id = %client_id,
                    clients,
                    "Client gone"
                );
            }
        }
    }

    fn broadcast_core_events(engine: &GatepassEngine, ipc: &IpcServer) {
        for event in engine.drain_events() {
            ipc.broadcast_event(Event::new(EventPayload::from(event)));
        }
    }
}

/// Resolves with the name of the first termination signal received
fn shutdown_signal() -> Result<impl std::future::Future<Output = &'static str>> {
    let mut term = signal(SignalKind::terminate()).context("Cannot watch SIGTERM")?;
    let mut int = signal(SignalKind::interrupt()).context("Cannot watch SIGINT")?;
    let mut hup = signal(SignalKind::hangup()).context("Cannot watch SIGHUP")?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = hup.recv() => "SIGHUP",
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "gatepassd starting");
    if gatepass_util::is_mock_time_active() {
        warn!(now = %gatepass_util::now(), "Mock time active; deadlines follow the shifted clock");
    }

    Service::new(&args).await?.run().await
}
