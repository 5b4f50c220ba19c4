mod commands;
pub mod core;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::AppState;
use crate::core::auth::{CredentialStore, FileCredentialStore};
use crate::core::config::{ConfigSource, FileConfigSource};
use crate::core::downloader::Downloader;
use crate::core::error::{PanelError, PanelResult};
use crate::core::events::{EventBroadcaster, LogBuffer};
use crate::core::http::build_http_client;
use crate::core::java::RuntimeProvisioner;
use crate::core::loaders::ArtifactProvisioner;
use crate::core::session::SessionController;
use crate::core::telemetry::{SysinfoProbe, TelemetryCollector};

pub fn run() {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("Ignoring unreadable .env file: {err}");
        }
    }

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,craftpanel_lib=debug")),
        )
        .init();

    info!("CraftPanel starting...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Could not start async runtime: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(serve()) {
        error!("CraftPanel stopped: {}", err);
        std::process::exit(1);
    }
}

async fn serve() -> PanelResult<()> {
    let file_config = FileConfigSource::from_env();
    let settings = file_config.snapshot_or_default();
    info!("Config file: {:?}", file_config.path());
    if settings.disable_frontend_auth {
        warn!("Frontend auth is disabled; every request is accepted");
    }
    let config: Arc<dyn ConfigSource> = Arc::new(file_config);

    let client = build_http_client()?;
    let downloader = Downloader::new(client);
    let runtimes = Arc::new(RuntimeProvisioner::new(
        settings.runtime_directory.clone(),
        downloader.clone(),
    ));
    let provisioner = Arc::new(ArtifactProvisioner::new(runtimes, downloader));

    let logs = Arc::new(LogBuffer::load(settings.logs_file.clone()).await);
    let telemetry = Arc::new(TelemetryCollector::new(
        Duration::from_secs(settings.history_retention_secs),
        Box::new(SysinfoProbe::default()),
    ));
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(settings.tokens_file.clone()));

    let controller = SessionController::new(
        config.clone(),
        provisioner,
        logs.clone(),
        telemetry.clone(),
    );
    let broadcaster =
        EventBroadcaster::new(logs, telemetry.clone(), credentials.clone(), config.clone());

    let state = AppState {
        controller: controller.clone(),
        telemetry: telemetry.clone(),
        broadcaster,
        credentials,
        config,
    };

    // Bind up front so a taken port fails startup instead of a detached task.
    let api_listener = bind_listener(settings.api_bind).await?;
    let stream_listener = bind_listener(settings.stream_bind).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = tokio::spawn(telemetry.run(
        Arc::new(controller.clone()),
        Duration::from_secs(settings.telemetry_interval_secs),
        shutdown_rx.clone(),
    ));

    let api = tokio::spawn(listen(
        "API",
        api_listener,
        commands::api_router(state.clone()),
        shutdown_rx.clone(),
    ));
    let stream = tokio::spawn(listen(
        "Stream",
        stream_listener,
        commands::stream_router(state),
        shutdown_rx,
    ));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for shutdown signal: {}", err);
    }
    info!("Shutdown requested");

    if controller.stop().await? {
        let mut states = controller.subscribe_state();
        let stopped = states.wait_for(|s| *s == crate::core::session::SessionState::Stopped);
        if tokio::time::timeout(Duration::from_secs(30), stopped).await.is_err() {
            warn!("Server did not stop within 30s, leaving it running");
        }
    }

    let _ = shutdown_tx.send(true);
    let (api, stream, _) = tokio::join!(api, stream, poller);
    for outcome in [api, stream] {
        match outcome {
            Ok(result) => result?,
            Err(err) => return Err(PanelError::Other(format!("listener task failed: {err}"))),
        }
    }
    Ok(())
}

async fn bind_listener(addr: SocketAddr) -> PanelResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| PanelError::Other(format!("bind {addr}: {e}")))
}

async fn listen(
    name: &'static str,
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> PanelResult<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| PanelError::Other(format!("{name} listener: {e}")))?;
    info!("{} listening on http://{}", name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| PanelError::Other(format!("serve {addr}: {e}")))
}
