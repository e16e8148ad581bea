#![deny(clippy::all)]

mod api;
mod app;
mod audio;
mod channel;
mod config;
mod display;
mod error;
mod events;
mod input;
mod navigation;
mod order;
mod pages;
mod room;
mod sampler;
mod session;
mod speech;
mod store;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::app::App;
use crate::channel::TungsteniteConnector;
use crate::config::Config;
use crate::error::AppError;
use crate::pages::PageContext;
use crate::sampler::CpalMicrophone;
use crate::store::AppStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr so they never interleave with page output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(Config::load().map_err(AppError::from)?);
    info!(
        base_url = %config.api.base_url,
        speech_enabled = config.speech.enabled,
        speech_key = config.speech.api_key.is_some(),
        "Configuration loaded"
    );

    let api = Arc::new(ApiClient::new(&config.api)?);
    let connector = Arc::new(TungsteniteConnector::new(config.channel.connect_timeout()));
    let microphone = Arc::new(CpalMicrophone::default());
    let speech_available = config.speech.enabled && config.speech.api_key.is_some();
    let store = AppStore::new(speech_available);
    let engines = speech::engine_factory(&config.speech);
    let input = input::spawn_stdin_reader().context("Failed to start keyboard input")?;

    let ctx = PageContext::new(config, api, store, connector, microphone, engines, input);
    App::new(ctx).run().await;

    info!("Goodbye");
    Ok(())
}
