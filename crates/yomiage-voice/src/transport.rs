//! Seams to the chat platform's voice transport.

use std::sync::Arc;

use async_trait::async_trait;
use yomiage_types::{ChannelId, GuildId};

use crate::error::VoiceError;
use crate::playback::CompletionSignal;

/// Establishes voice connections.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Joins `channel` in `guild` and returns the live connection.
    ///
    /// The implementation must complete `lost` if this connection drops
    /// without [`VoiceConnection::disconnect`] being called (the bot was
    /// kicked, the channel was deleted). Completing it after a requested
    /// disconnect is harmless.
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
        lost: CompletionSignal,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError>;
}

/// A live voice connection for one guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Starts streaming `audio` (an encoded audio file, WAV from VOICEVOX).
    ///
    /// The implementation must call [`CompletionSignal::complete`] once the
    /// player goes idle, whether the track ended, errored, or was stopped.
    async fn start(
        &self,
        audio: Vec<u8>,
        done: CompletionSignal,
    ) -> Result<Box<dyn TrackControl>, VoiceError>;

    /// Leaves the voice channel.
    async fn disconnect(&self) -> Result<(), VoiceError>;
}

/// Control over one started track.
pub trait TrackControl: Send + Sync {
    /// Forces the player to idle. Must not block.
    fn stop(&self);
}
