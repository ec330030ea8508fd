//! Voice session manager: one reading session per guild.
//!
//! ```text
//!   Disconnected ──join──▶ Connected(reading) ──bye──▶ Leaving ──drained──▶ Disconnected
//! ```
//!
//! Every utterance for a guild goes through that session's FIFO queue and is
//! handled by a single worker task: synthesize, play, wait for the playback
//! slot to free up, then take the next request. Overlapping message bursts
//! therefore always play in arrival order and never overlap on the
//! connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use yomiage_store::{DictionaryStore, PreferenceStore};
use yomiage_types::{ChannelId, GuildId, SpeechRequest, UserId, UserPreference};

use crate::error::VoiceError;
use crate::playback::{self, CompletionSignal, PlaybackStopper};
use crate::prepare::TextPreparer;
use crate::synthesis::Synthesizer;
use crate::transport::{VoiceConnection, VoiceGateway};

/// Default upper bound on a single playback before it is force-stopped.
pub const DEFAULT_MAX_PLAYBACK: Duration = Duration::from_secs(300);

/// Behaviour knobs for the session manager.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Voice used for users without a stored preference.
    pub defaults: UserPreference,
    /// Spoken right after joining.
    pub join_phrase: String,
    /// Spoken right before leaving.
    pub leave_phrase: String,
    /// Playbacks still running after this long are stopped.
    pub max_playback: Duration,
    /// Initial value of the auto-join flag.
    pub auto_join: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            defaults: UserPreference::new(1, 1.0),
            join_phrase: "読み上げを開始します".to_string(),
            leave_phrase: "読み上げを終了します".to_string(),
            max_playback: DEFAULT_MAX_PLAYBACK,
            auto_join: true,
        }
    }
}

/// Result of [`SessionManager::speak`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// The utterance was appended to the session queue.
    Queued,
    /// No reading session, or nothing left to say after preparation.
    Ignored,
}

/// What a session's playback slot holds.
#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Idle,
    /// The transport is being asked to start a track. A skip that lands now
    /// stops the track as soon as it exists.
    Starting { skipped: bool },
    Playing(PlaybackStopper),
}

/// The single-occupancy playback slot of a session.
#[derive(Debug, Clone, Default)]
struct PlaybackSlot(Arc<Mutex<SlotState>>);

impl PlaybackSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims the slot before the transport starts a track.
    fn begin(&self) {
        *self.lock() = SlotState::Starting { skipped: false };
    }

    /// Records the started track, stopping it at once if it was skipped
    /// while starting.
    fn started(&self, stopper: &PlaybackStopper) {
        let mut state = self.lock();
        if matches!(*state, SlotState::Starting { skipped: true }) {
            *state = SlotState::Idle;
            drop(state);
            stopper.stop();
        } else {
            *state = SlotState::Playing(stopper.clone());
        }
    }

    fn clear(&self) {
        *self.lock() = SlotState::Idle;
    }

    /// Stops whatever is playing or starting. Returns false if the slot was
    /// free.
    fn skip(&self) -> bool {
        let mut state = self.lock();
        match std::mem::take(&mut *state) {
            SlotState::Playing(stopper) if !stopper.is_finished() => {
                drop(state);
                stopper.stop();
                true
            }
            SlotState::Starting { .. } => {
                *state = SlotState::Starting { skipped: true };
                true
            }
            _ => false,
        }
    }
}

/// Runtime state of one connected guild.
///
/// A session stays registered until its farewell has played, so `skip` keeps
/// working during `leave`; it only stops accepting new utterances.
pub struct GuildVoiceSession {
    guild: GuildId,
    channel: AtomicU64,
    connection: Arc<dyn VoiceConnection>,
    reading: AtomicBool,
    slot: PlaybackSlot,
    queue: Mutex<Option<mpsc::UnboundedSender<SpeechRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GuildVoiceSession {
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// The voice channel the bot is currently in.
    pub fn channel(&self) -> ChannelId {
        ChannelId(self.channel.load(Ordering::SeqCst))
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst)
    }

    fn enqueue(&self, request: SpeechRequest) -> bool {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.as_ref().is_some_and(|tx| tx.send(request).is_ok())
    }

    /// Drops the sender; the worker exits once the queue drains.
    fn close_queue(&self) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Stops everything at once: no more reading, no queued items, no
    /// playback.
    fn abandon(&self) {
        self.reading.store(false, Ordering::SeqCst);
        self.close_queue();
        self.slot.skip();
        if let Some(worker) = self.take_worker() {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for GuildVoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildVoiceSession")
            .field("guild", &self.guild)
            .field("channel", &self.channel())
            .field("reading", &self.is_reading())
            .field("slot", &*self.slot.lock())
            .finish()
    }
}

/// Session map plus one lifecycle lock per guild.
///
/// Join and leave for a guild hold that guild's lock from start to finish,
/// so they never interleave with each other; other guilds are unaffected.
#[derive(Default)]
struct Registry {
    /// Guards are only held for map operations, never across `.await`.
    sessions: RwLock<HashMap<GuildId, Arc<GuildVoiceSession>>>,
    lifecycles: Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Registry {
    fn get(&self, guild: GuildId) -> Option<Arc<GuildVoiceSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&guild)
            .cloned()
    }

    fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn insert(&self, session: Arc<GuildVoiceSession>) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.guild, session);
    }

    /// Unregisters `session`, unless its guild already has a different one.
    fn remove(&self, session: &Arc<GuildVoiceSession>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get(&session.guild) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&session.guild);
                true
            }
            _ => false,
        }
    }

    fn lifecycle(&self, guild: GuildId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.lifecycles.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(guild).or_default())
    }
}

/// Owns every guild session plus the process-wide auto-join flag.
pub struct SessionManager {
    gateway: Arc<dyn VoiceGateway>,
    synthesizer: Arc<dyn Synthesizer>,
    preferences: Arc<PreferenceStore>,
    dictionary: Arc<DictionaryStore>,
    settings: SessionSettings,
    auto_join: AtomicBool,
    registry: Arc<Registry>,
    /// Compiled dictionary, tagged with the dictionary revision it was built
    /// from.
    preparer: Mutex<Option<(u64, Arc<TextPreparer>)>>,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        synthesizer: Arc<dyn Synthesizer>,
        preferences: Arc<PreferenceStore>,
        dictionary: Arc<DictionaryStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            gateway,
            synthesizer,
            preferences,
            dictionary,
            auto_join: AtomicBool::new(settings.auto_join),
            settings,
            registry: Arc::new(Registry::default()),
            preparer: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    pub fn dictionary(&self) -> &Arc<DictionaryStore> {
        &self.dictionary
    }

    pub fn synthesizer(&self) -> &Arc<dyn Synthesizer> {
        &self.synthesizer
    }

    /// The session for `guild`, if connected. Includes a session that is
    /// still playing out its farewell.
    pub fn session(&self, guild: GuildId) -> Option<Arc<GuildVoiceSession>> {
        self.registry.get(guild)
    }

    pub fn is_reading(&self, guild: GuildId) -> bool {
        self.session(guild).is_some_and(|s| s.is_reading())
    }

    pub fn session_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.session(guild).map(|s| s.channel())
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    pub fn auto_join(&self) -> bool {
        self.auto_join.load(Ordering::SeqCst)
    }

    /// Flips the auto-join flag and returns the new value.
    pub fn toggle_auto_join(&self) -> bool {
        let enabled = !self.auto_join.fetch_xor(true, Ordering::SeqCst);
        tracing::info!(enabled, "auto-join toggled");
        enabled
    }

    /// Connects to `channel` and starts reading in `guild`.
    ///
    /// The confirmation phrase is queued in `user`'s voice. Waits for a
    /// `leave` already running in the same guild to finish.
    pub async fn join(
        &self,
        guild: GuildId,
        channel: ChannelId,
        user: UserId,
    ) -> Result<(), VoiceError> {
        let lifecycle = self.registry.lifecycle(guild);
        let _lifecycle = lifecycle.lock().await;
        if self.registry.get(guild).is_some() {
            return Err(VoiceError::AlreadyConnected);
        }

        let (lost, lost_rx) = CompletionSignal::new();
        let connection = self.gateway.connect(guild, channel, lost).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let slot = PlaybackSlot::default();
        let worker = QueueWorker {
            guild,
            rx,
            synthesizer: Arc::clone(&self.synthesizer),
            connection: Arc::clone(&connection),
            slot: slot.clone(),
            max_playback: self.settings.max_playback,
        };
        let handle = tokio::spawn(worker.run());

        let session = Arc::new(GuildVoiceSession {
            guild,
            channel: AtomicU64::new(channel.get()),
            connection,
            reading: AtomicBool::new(true),
            slot,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        });
        self.registry.insert(Arc::clone(&session));
        tokio::spawn(watch_connection(
            Arc::clone(&self.registry),
            Arc::downgrade(&session),
            lost_rx,
        ));

        tracing::info!(guild_id = %guild, channel_id = %channel, user_id = %user, "joined voice channel");

        let preference = self.preferences.resolve(user, self.settings.defaults);
        self.enqueue_prepared(&session, &self.settings.join_phrase, preference);
        Ok(())
    }

    /// Says the farewell phrase in `user`'s voice, then disconnects.
    ///
    /// Reading stops immediately; requests already queued before the
    /// farewell still play, in order, before the connection is torn down.
    /// They can still be skipped meanwhile.
    pub async fn leave(&self, guild: GuildId, user: UserId) -> Result<(), VoiceError> {
        let lifecycle = self.registry.lifecycle(guild);
        let _lifecycle = lifecycle.lock().await;
        let session = self.registry.get(guild).ok_or(VoiceError::NotConnected)?;

        session.reading.store(false, Ordering::SeqCst);
        let preference = self.preferences.resolve(user, self.settings.defaults);
        self.enqueue_prepared(&session, &self.settings.leave_phrase, preference);
        session.close_queue();

        if let Some(worker) = session.take_worker() {
            if let Err(e) = worker.await {
                tracing::warn!(guild_id = %guild, "queue worker ended abnormally: {}", e);
            }
        }
        self.registry.remove(&session);

        if let Err(e) = session.connection.disconnect().await {
            tracing::warn!(guild_id = %guild, "failed to disconnect voice: {}", e);
        }
        tracing::info!(guild_id = %guild, user_id = %user, "left voice channel");
        Ok(())
    }

    /// Records that the bot was moved to another channel by someone else.
    pub fn relocate(&self, guild: GuildId, channel: ChannelId) {
        if let Some(session) = self.session(guild) {
            let previous = session.channel.swap(channel.get(), Ordering::SeqCst);
            if previous != channel.get() {
                tracing::info!(guild_id = %guild, channel_id = %channel, "voice session moved");
            }
        }
    }

    /// Queues `raw_text` in `user`'s voice if `guild` is reading.
    pub fn speak(&self, guild: GuildId, user: UserId, raw_text: &str) -> SpeakOutcome {
        let Some(session) = self.session(guild).filter(|s| s.is_reading()) else {
            return SpeakOutcome::Ignored;
        };
        let preference = self.preferences.resolve(user, self.settings.defaults);
        self.enqueue_prepared(&session, raw_text, preference)
    }

    /// Cancels the utterance currently playing in `guild`.
    ///
    /// Queued requests are unaffected and start next.
    pub fn skip(&self, guild: GuildId) -> Result<(), VoiceError> {
        let session = self.session(guild).ok_or(VoiceError::NothingPlaying)?;
        if !session.slot.skip() {
            return Err(VoiceError::NothingPlaying);
        }
        tracing::info!(guild_id = %guild, "skipped current utterance");
        Ok(())
    }

    /// The compiled dictionary, rebuilt only after the dictionary changed.
    fn preparer(&self) -> Arc<TextPreparer> {
        let mut cached = self.preparer.lock().unwrap_or_else(|e| e.into_inner());
        // Read the revision first: entries newer than it only cause one
        // extra rebuild later.
        let revision = self.dictionary.revision();
        if let Some((seen, preparer)) = cached.as_ref() {
            if *seen == revision {
                return Arc::clone(preparer);
            }
        }
        let preparer = Arc::new(TextPreparer::new(&self.dictionary.entries()));
        *cached = Some((revision, Arc::clone(&preparer)));
        preparer
    }

    fn enqueue_prepared(
        &self,
        session: &GuildVoiceSession,
        raw_text: &str,
        preference: UserPreference,
    ) -> SpeakOutcome {
        let text = self.preparer().apply(raw_text);
        if text.trim().is_empty() {
            return SpeakOutcome::Ignored;
        }

        let request = SpeechRequest::new(text, preference);
        if session.enqueue(request) {
            tracing::debug!(
                guild_id = %session.guild,
                speaker_id = preference.speaker_id,
                speed = preference.speed,
                "queued utterance"
            );
            SpeakOutcome::Queued
        } else {
            SpeakOutcome::Ignored
        }
    }
}

/// Drops `session` if its connection reports it was torn down from outside
/// (for example a moderator disconnected the bot). Nothing is spoken.
///
/// Only ever touches the session that owns the connection, so a late report
/// from an old connection cannot drop a newer session in the same guild.
async fn watch_connection(
    registry: Arc<Registry>,
    session: Weak<GuildVoiceSession>,
    lost: oneshot::Receiver<()>,
) {
    // Err: the connection was dropped without ever reporting a loss.
    if lost.await.is_err() {
        return;
    }
    let Some(session) = session.upgrade() else {
        return;
    };
    let lifecycle = registry.lifecycle(session.guild);
    let _lifecycle = lifecycle.lock().await;
    if !registry.remove(&session) {
        return;
    }

    session.abandon();
    // Clears whatever the transport still keeps for this guild.
    if let Err(e) = session.connection.disconnect().await {
        tracing::debug!(guild_id = %session.guild, "cleanup after lost connection failed: {}", e);
    }
    tracing::info!(guild_id = %session.guild, "voice connection lost, session dropped");
}

/// The consumer side of a session queue.
struct QueueWorker {
    guild: GuildId,
    rx: mpsc::UnboundedReceiver<SpeechRequest>,
    synthesizer: Arc<dyn Synthesizer>,
    connection: Arc<dyn VoiceConnection>,
    slot: PlaybackSlot,
    max_playback: Duration,
}

impl QueueWorker {
    async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            let audio = match self.synthesizer.synthesize(&request).await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(
                        guild_id = %self.guild,
                        speaker_id = request.speaker_id,
                        "dropping utterance, synthesis failed: {}",
                        e
                    );
                    continue;
                }
            };

            self.slot.begin();
            let playback = match playback::play(self.connection.as_ref(), audio).await {
                Ok(playback) => playback,
                Err(e) => {
                    self.slot.clear();
                    tracing::warn!(guild_id = %self.guild, "dropping utterance, playback failed: {}", e);
                    continue;
                }
            };

            let (stopper, completion) = playback.into_parts();
            self.slot.started(&stopper);
            if !completion.wait_for(self.max_playback).await {
                tracing::warn!(
                    guild_id = %self.guild,
                    limit_secs = self.max_playback.as_secs(),
                    "playback did not finish in time, stopping it"
                );
                stopper.stop();
            }
            self.slot.clear();
        }
        tracing::debug!(guild_id = %self.guild, "session queue closed");
    }
}

#[cfg(test)]
mod tests;
