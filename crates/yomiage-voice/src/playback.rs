//! Playback controller: drives one audio resource to completion or
//! cancellation and reports when the playback slot is free again.
//!
//! Natural completion and [`PlaybackStopper::stop`] resolve the same
//! one-shot signal, so whoever waits on a [`PlaybackCompletion`] only learns
//! that the slot is free, never why.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::VoiceError;
use crate::transport::{TrackControl, VoiceConnection};

/// Fires at most once, from whichever party reaches it first: the transport
/// reporting idle, or a stop request.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl CompletionSignal {
    /// Creates a signal and the receiver that resolves when it fires.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Fires the signal. Returns false if it had already fired.
    pub fn complete(&self) -> bool {
        let sender = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => {
                // The receiver may already be gone (worker aborted); the slot is
                // free either way.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

/// Starts `audio` on `connection`.
///
/// Exactly one playback may be active per connection; callers serialize
/// through the session queue, this function does not check.
pub async fn play(connection: &dyn VoiceConnection, audio: Vec<u8>) -> Result<Playback, VoiceError> {
    let bytes = audio.len();
    let (signal, rx) = CompletionSignal::new();
    let control = connection.start(audio, signal.clone()).await?;
    tracing::debug!(bytes, "playback started");

    Ok(Playback {
        stopper: PlaybackStopper {
            control: Arc::from(control),
            signal,
        },
        completion: PlaybackCompletion { rx },
    })
}

/// An in-flight playback.
pub struct Playback {
    stopper: PlaybackStopper,
    completion: PlaybackCompletion,
}

impl Playback {
    /// Splits into the cancel handle (kept by the session) and the awaitable
    /// completion (kept by the queue worker).
    pub fn into_parts(self) -> (PlaybackStopper, PlaybackCompletion) {
        (self.stopper, self.completion)
    }
}

/// Cancels a playback.
#[derive(Clone)]
pub struct PlaybackStopper {
    control: Arc<dyn TrackControl>,
    signal: CompletionSignal,
}

impl PlaybackStopper {
    /// Stops the track and resolves its completion immediately.
    pub fn stop(&self) {
        self.control.stop();
        if self.signal.complete() {
            tracing::debug!("playback stopped");
        }
    }

    /// True once the playback has completed or been stopped.
    pub fn is_finished(&self) -> bool {
        self.signal.is_complete()
    }
}

impl std::fmt::Debug for PlaybackStopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackStopper")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Resolves when the playback slot is free.
#[derive(Debug)]
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<()>,
}

impl PlaybackCompletion {
    pub async fn wait(self) {
        // A dropped sender means the transport went away; the slot is free.
        let _ = self.rx.await;
    }

    /// Waits at most `limit`. Returns false if the playback was still going.
    pub async fn wait_for(self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnection;
    use yomiage_types::{ChannelId, GuildId};

    fn connection() -> FakeConnection {
        FakeConnection::new(GuildId(1), ChannelId(2))
    }

    #[test]
    fn signal_fires_once() {
        let (signal, mut rx) = CompletionSignal::new();
        let other = signal.clone();

        assert!(signal.complete());
        assert!(!other.complete());
        assert!(other.is_complete());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn natural_end_resolves_completion() {
        let conn = connection();
        let playback = play(&conn, b"hello".to_vec()).await.expect("play should start");
        let (stopper, completion) = playback.into_parts();

        assert!(!stopper.is_finished());
        assert!(conn.finish_current());
        assert!(completion.wait_for(Duration::from_secs(1)).await);
        assert!(stopper.is_finished());
        assert_eq!(conn.stop_count(), 0);
    }

    #[tokio::test]
    async fn stop_resolves_the_same_completion() {
        let conn = connection();
        let playback = play(&conn, b"hello".to_vec()).await.expect("play should start");
        let (stopper, completion) = playback.into_parts();

        stopper.stop();
        assert!(completion.wait_for(Duration::from_secs(1)).await);
        assert_eq!(conn.stop_count(), 1);

        // A late idle report from the transport is a no-op.
        assert!(!conn.finish_current());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_when_transport_never_reports_idle() {
        let conn = connection();
        let playback = play(&conn, b"stuck".to_vec()).await.expect("play should start");
        let (_stopper, completion) = playback.into_parts();

        assert!(!completion.wait_for(Duration::from_secs(5)).await);
    }
}
