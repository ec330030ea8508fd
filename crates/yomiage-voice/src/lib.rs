//! Voice session and playback pipeline for the Yomiage reading bot.
//!
//! A [`SessionManager`] owns one [`GuildVoiceSession`] per connected guild.
//! Each session feeds a strict FIFO of [`SpeechRequest`]s to a single worker
//! task that synthesizes each request through a [`Synthesizer`] and plays it
//! on the session's [`VoiceConnection`], waiting for the playback slot to
//! free up before admitting the next one.
//!
//! The chat platform and the synthesis engine are reached only through the
//! traits in [`transport`] and [`synthesis`]; the bot crate supplies the
//! Discord and VOICEVOX implementations.
//!
//! [`SpeechRequest`]: yomiage_types::SpeechRequest

pub mod error;
pub mod playback;
pub mod prepare;
pub mod session;
pub mod synthesis;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod transport;

pub use error::VoiceError;
pub use playback::{CompletionSignal, Playback, PlaybackCompletion, PlaybackStopper};
pub use prepare::{prepare, TextPreparer};
pub use session::{GuildVoiceSession, SessionManager, SessionSettings, SpeakOutcome};
pub use synthesis::{
    SynthesisCause, SynthesisError, SynthesisStage, Synthesizer, VoicevoxClient,
};
pub use transport::{TrackControl, VoiceConnection, VoiceGateway};
