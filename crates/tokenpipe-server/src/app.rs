use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::api::{self, AppState};
use crate::chat::{ChatService, ServiceOptions};
use crate::config::Settings;
use crate::event_bus::EventBus;
use crate::generation::{self, GenerationCoordinator, TokenSource};
use crate::store::ChatStore;

/// The wired-up pipeline: store, bus, chat service and generation coordinator.
pub struct Pipeline {
    pub bus: EventBus,
    pub store: Arc<ChatStore>,
    pub chats: Arc<ChatService>,
    pub generations: Arc<GenerationCoordinator>,
}

impl Pipeline {
    /// Build and start every component. Must run inside a tokio runtime.
    pub fn start(source: Arc<dyn TokenSource>, options: ServiceOptions) -> Self {
        let bus = EventBus::new();
        let store = Arc::new(ChatStore::new());

        let chats = Arc::new(ChatService::new(store.clone(), bus.clone(), options));
        let generations = Arc::new(GenerationCoordinator::new(bus.clone(), source));
        chats.start();
        generations.start();

        Self {
            bus,
            store,
            chats,
            generations,
        }
    }

    /// Cancel in-flight generations and close the delivery queue.
    pub fn shutdown(&self) {
        self.generations.shutdown();
        self.chats.shutdown();
    }
}

/// Run the HTTP server until Ctrl-C.
pub async fn serve(settings: Settings) -> crate::Result<()> {
    let pipeline = Pipeline::start(
        generation::source_from_config(&settings.source),
        ServiceOptions {
            token_log_capacity: settings.token_log_capacity,
        },
    );
    info!(source = ?settings.source, "Pipeline started");

    let state = AppState::new(&pipeline, settings.clone())?;
    let addr = settings.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting server on http://{}", addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, shutting down pipeline");
    pipeline.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
