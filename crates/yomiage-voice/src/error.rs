use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("already connected to a voice channel in this guild")]
    AlreadyConnected,

    #[error("not connected to a voice channel in this guild")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("voice transport error: {0}")]
    Transport(String),
}
