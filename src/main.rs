// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use genai_bff::config;
use genai_bff::proxy;
use genai_bff::token_cache;

use std::net::{IpAddr, SocketAddr};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "genai-bff", about = "GenAI backend-for-frontend with streaming output moderation")]
struct Cli {
    /// Path to the genai-bff.yaml config file
    #[arg(long, default_value = "genai-bff.yaml", env = "GENAI_BFF_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "GENAI_BFF_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let addr = SocketAddr::new(cli.bind, cli.port);
    tracing::info!(%addr, "genai-bff starting");

    let source = config::FileSource::new(&cli.config);
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %cli.config, "failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        llama_stack = %config.llama_stack.url,
        on_failure = ?config.moderation.on_failure,
        min_words = config.moderation.min_words,
        max_words = config.moderation.max_words,
        maas = config.maas.is_some(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let shutdown = CancellationToken::new();
    let (state, cache) = proxy::AppState::from_config(&config);
    let purge = match (cache, &config.maas) {
        (Some(cache), Some(maas)) => Some(token_cache::spawn_purge_task(
            cache,
            maas.cleanup_interval,
            shutdown.clone(),
        )),
        _ => None,
    };

    let app = proxy::build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "genai-bff listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await;

    shutdown.cancel();
    if let Some(purge) = purge {
        let _ = purge.await;
    }
    if let Err(e) = served {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
