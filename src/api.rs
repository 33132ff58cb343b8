use std::sync::Arc;

use axum::Router;
use restream_engine::Restreamer;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::presets::PresetStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub engine: Arc<Restreamer>,
    pub presets: Arc<PresetStore>,
}

pub(crate) fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(crate::handler::restream::restream_router())
        .nest("/api/playback", crate::handler::playback::playback_router())
        .with_state(state)
}

pub(crate) fn start_api_server(
    bind: String,
    state: AppState,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = app_router(state);

        let listener = match TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Error binding API server to {}: {}", bind, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", bind);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
        log::info!("API server stopped");
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("Shutting down API server...");
        }
    }
}
