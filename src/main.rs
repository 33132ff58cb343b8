use std::sync::Arc;

use restream_engine::Restreamer;
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;
mod presets;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("restream_engine", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let engine = Arc::new(Restreamer::from_config(config.engine.clone()));
    let presets = Arc::new(presets::PresetStore::new(&config.presets_path));
    let state = api::AppState {
        engine: Arc::clone(&engine),
        presets,
    };

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    let server = api::start_api_server(config.bind.clone(), state, cancel_clone);

    if let Some(url) = config.initial_source.clone() {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            match engine.set_source(&url).await {
                Ok(url) => log::info!("initial source {} applied", url),
                Err(e) => log::error!("initial source {} failed: {}", url, e),
            }
        });
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    // ends the /mp3 bodies so the server can drain
    engine.shutdown().await;
    if let Err(e) = server.await {
        log::error!("API server task failed: {}", e);
    }

    std::process::exit(0);
}
