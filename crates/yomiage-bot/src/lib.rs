//! Yomiage: a Discord bot that reads chat messages aloud in voice channels
//! using a VOICEVOX engine.
//!
//! [`run`] wires the stores, the VOICEVOX client and the songbird transport
//! into a [`SessionManager`], puts the [`router::EventRouter`] behind the
//! serenity event handler, and drives the gateway until shutdown.

pub mod commands;
pub mod config;
pub mod discord;
pub mod error;
pub mod health;
pub mod router;

use std::future::Future;
use std::sync::Arc;

use serenity::Client;
use songbird::{SerenityInit, Songbird};
use tokio::sync::watch;
use yomiage_store::{DictionaryStore, PreferenceStore};
use yomiage_voice::{SessionManager, VoicevoxClient};

pub use config::{load_config, Config, ConfigError};
pub use error::BotError;

use commands::CommandRegistry;
use discord::{Handler, SongbirdGateway};
use router::EventRouter;

/// Runs the bot until `shutdown` resolves or the gateway connection ends.
///
/// # Errors
///
/// Returns [`BotError::Client`] if the client cannot be built or the gateway
/// login fails.
pub async fn run(
    config: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BotError> {
    let preferences = Arc::new(PreferenceStore::load(&config.storage.preferences_path));
    let dictionary = Arc::new(DictionaryStore::load(&config.storage.dictionary_path));
    tracing::info!(
        preferences = preferences.len(),
        dictionary_entries = dictionary.len(),
        "loaded stores"
    );

    let synthesizer = Arc::new(VoicevoxClient::new(
        config.synthesis.base_url.clone(),
        config.synthesis.timeout(),
    ));
    let songbird = Songbird::serenity();
    let sessions = Arc::new(SessionManager::new(
        Arc::new(SongbirdGateway::new(Arc::clone(&songbird))),
        synthesizer,
        preferences,
        dictionary,
        config.session_settings(),
    ));
    let router = Arc::new(EventRouter::new(
        Arc::clone(&sessions),
        CommandRegistry::with_defaults(),
        config.phrases.clone(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);

    if config.health.enabled {
        let addr = config.health.addr();
        let mut stop = stop_rx.clone();
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            let stopped = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            if let Err(e) = health::serve(addr, sessions, stopped).await {
                tracing::error!(%addr, "health endpoint failed: {}", e);
            }
        });
    }

    let mut client = Client::builder(&config.discord.token, discord::intents())
        .event_handler(Handler::new(router))
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        shutdown.await;
        tracing::info!("shutting down discord client");
        let _ = stop_tx.send(true);
        shard_manager.shutdown_all().await;
    });

    tracing::info!(
        voicevox = %config.synthesis.base_url,
        auto_join = sessions.auto_join(),
        "starting yomiage bot"
    );
    client.start().await?;
    Ok(())
}
