//! In-memory fakes for the transport and synthesis seams.
//!
//! [`FakeSynthesizer`] renders a request's text as its "audio" bytes, so a
//! test can read back what was played with [`FakeConnection::played_texts`].
//! Tracks started on a [`FakeConnection`] stay active until the test calls
//! [`FakeConnection::finish_current`] (or a stop arrives), unless the
//! connection was created with auto-finish enabled.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use yomiage_types::{ChannelId, GuildId, Speaker, SpeechRequest};

use crate::error::VoiceError;
use crate::playback::CompletionSignal;
use crate::synthesis::{SynthesisCause, SynthesisError, SynthesisStage, Synthesizer};
use crate::transport::{TrackControl, VoiceConnection, VoiceGateway};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Gateway ──────────────────────────────────────────────────────────

/// Hands out [`FakeConnection`]s and remembers them.
#[derive(Default)]
pub struct FakeGateway {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    fail_connect: AtomicBool,
    auto_finish: AtomicBool,
    start_delay: Mutex<Duration>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connections created from now on complete every track immediately.
    pub fn auto_finishing() -> Arc<Self> {
        let gateway = Self::default();
        gateway.auto_finish.store(true, Ordering::SeqCst);
        Arc::new(gateway)
    }

    /// Connections created from now on take `delay` to start each track.
    pub fn set_start_delay(&self, delay: Duration) {
        *lock(&self.start_delay) = delay;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        lock(&self.connections).last().cloned()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
        lost: CompletionSignal,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::Transport("connection refused".to_string()));
        }
        let connection = Arc::new(FakeConnection::new(guild, channel));
        connection
            .auto_finish
            .store(self.auto_finish.load(Ordering::SeqCst), Ordering::SeqCst);
        *lock(&connection.lost) = Some(lost);
        *lock(&connection.start_delay) = *lock(&self.start_delay);
        lock(&self.connections).push(Arc::clone(&connection));
        Ok(connection)
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// A track started on a [`FakeConnection`].
#[derive(Debug, Clone)]
pub struct FakeTrack {
    pub audio: Vec<u8>,
    pub signal: CompletionSignal,
}

/// Records every started track and how many overlapped.
pub struct FakeConnection {
    pub guild: GuildId,
    pub channel: ChannelId,
    tracks: Mutex<Vec<FakeTrack>>,
    max_concurrent: AtomicUsize,
    stops: Arc<AtomicUsize>,
    disconnected: AtomicBool,
    auto_finish: AtomicBool,
    lost: Mutex<Option<CompletionSignal>>,
    start_delay: Mutex<Duration>,
    changed: Notify,
}

impl FakeConnection {
    pub fn new(guild: GuildId, channel: ChannelId) -> Self {
        Self {
            guild,
            channel,
            tracks: Mutex::new(Vec::new()),
            max_concurrent: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            disconnected: AtomicBool::new(false),
            auto_finish: AtomicBool::new(false),
            lost: Mutex::new(None),
            start_delay: Mutex::new(Duration::ZERO),
            changed: Notify::new(),
        }
    }

    pub fn tracks(&self) -> Vec<FakeTrack> {
        lock(&self.tracks).clone()
    }

    pub fn track_count(&self) -> usize {
        lock(&self.tracks).len()
    }

    /// Audio of every started track, decoded as UTF-8 text.
    pub fn played_texts(&self) -> Vec<String> {
        lock(&self.tracks)
            .iter()
            .map(|t| String::from_utf8_lossy(&t.audio).into_owned())
            .collect()
    }

    /// Number of tracks started but not yet completed.
    pub fn active_count(&self) -> usize {
        lock(&self.tracks)
            .iter()
            .filter(|t| !t.signal.is_complete())
            .count()
    }

    /// Highest number of simultaneously active tracks ever observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Reports the oldest active track as finished. Returns false if none.
    pub fn finish_current(&self) -> bool {
        let tracks = lock(&self.tracks);
        let finished = tracks
            .iter()
            .find(|t| !t.signal.is_complete())
            .is_some_and(|t| t.signal.complete());
        drop(tracks);
        self.changed.notify_waiters();
        finished
    }

    /// Simulates the platform tearing the connection down (a moderator
    /// disconnecting the bot). Returns false if the loss was already reported.
    pub fn drop_connection(&self) -> bool {
        self.disconnected.store(true, Ordering::SeqCst);
        let reported = lock(&self.lost).as_ref().is_some_and(|lost| lost.complete());
        self.changed.notify_waiters();
        reported
    }

    /// Waits until at least `count` tracks have been started.
    pub async fn wait_for_tracks(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.track_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

struct FakeTrackControl {
    signal: CompletionSignal,
    stops: Arc<AtomicUsize>,
}

impl TrackControl for FakeTrackControl {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.signal.complete();
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn start(
        &self,
        audio: Vec<u8>,
        done: CompletionSignal,
    ) -> Result<Box<dyn TrackControl>, VoiceError> {
        let delay = *lock(&self.start_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.is_disconnected() {
            return Err(VoiceError::Transport("connection closed".to_string()));
        }
        {
            let mut tracks = lock(&self.tracks);
            let live = tracks.iter().filter(|t| !t.signal.is_complete()).count() + 1;
            self.max_concurrent.fetch_max(live, Ordering::SeqCst);
            tracks.push(FakeTrack {
                audio,
                signal: done.clone(),
            });
        }
        if self.auto_finish.load(Ordering::SeqCst) {
            done.complete();
        }
        self.changed.notify_waiters();

        Ok(Box::new(FakeTrackControl {
            signal: done,
            stops: Arc::clone(&self.stops),
        }))
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
        Ok(())
    }
}

// ── Synthesizer ──────────────────────────────────────────────────────

/// Echoes the request text back as audio and records every request.
#[derive(Default)]
pub struct FakeSynthesizer {
    requests: Mutex<Vec<SpeechRequest>>,
    failing: Mutex<HashSet<String>>,
    speakers: Mutex<Vec<Speaker>>,
}

impl FakeSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes synthesis of exactly `text` fail.
    pub fn fail_on(&self, text: &str) {
        lock(&self.failing).insert(text.to_string());
    }

    pub fn set_speakers(&self, speakers: Vec<Speaker>) {
        *lock(&self.speakers) = speakers;
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, SynthesisError> {
        lock(&self.requests).push(request.clone());
        if lock(&self.failing).contains(&request.text) {
            return Err(SynthesisError::new(
                SynthesisStage::Synthesis,
                SynthesisCause::Malformed("scripted failure".to_string()),
            ));
        }
        Ok(request.text.as_bytes().to_vec())
    }

    async fn speakers(&self) -> Result<Vec<Speaker>, SynthesisError> {
        Ok(lock(&self.speakers).clone())
    }
}
