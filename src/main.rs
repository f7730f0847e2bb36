use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use push_dispatch_service::backend::BackendRegistry;
use push_dispatch_service::config::Settings;
use push_dispatch_service::events::{BroadcastEventSink, DeliveryEvent};
use push_dispatch_service::server::{create_app, AppState};
use push_dispatch_service::service::PushService;
use push_dispatch_service::store::MemoryCredentialStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Collaborators. No network backends are linked in, so every slot holds
    // the null backend.
    let store = Arc::new(MemoryCredentialStore::new());
    let registry = Arc::new(BackendRegistry::new());
    let events = Arc::new(BroadcastEventSink::new());

    let event_log_handle = tokio::spawn(log_delivery_events(
        events.subscribe(),
        shutdown_tx.subscribe(),
    ));

    // Start the ingress and retry loops
    let (service, mut handles) = PushService::start(
        settings.dispatch.dispatcher_config(),
        settings.dispatch.ingress_capacity,
        registry,
        store.clone(),
        events,
        &shutdown_tx,
    );
    handles.push(event_log_handle);

    // Create Axum app
    let addr = settings.server_addr();
    let state = AppState::new(settings, service, store);
    let app = create_app(state);
    tracing::info!("Application state initialized");

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task failed");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Mirror delivery events into the debug log until shutdown.
async fn log_delivery_events(
    mut events: broadcast::Receiver<DeliveryEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            event = events.recv() => match event {
                Ok(event) => tracing::debug!(event = ?event, "Delivery event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Delivery event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the ingress, scheduler and event log loops
    let _ = shutdown_tx.send(());
}
