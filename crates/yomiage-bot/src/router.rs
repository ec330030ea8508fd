//! Routes platform events to the session manager.
//!
//! Events arrive here already stripped of platform types, so the auto-join
//! policy and presence announcements are testable without a gateway.

use std::sync::Arc;

use yomiage_types::{ChannelId, GuildId, UserId};
use yomiage_voice::{SessionManager, SpeakOutcome, VoiceError};

use crate::commands::{CommandRegistry, Invocation, Reply};
use crate::config::PhrasesConfig;

/// A text message posted somewhere the bot can see.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// `None` for direct messages.
    pub guild: Option<GuildId>,
    pub author: UserId,
    pub author_is_bot: bool,
    /// Voice channel the author is in, if any.
    pub author_voice_channel: Option<ChannelId>,
    pub text: String,
}

/// A member's voice channel changed.
#[derive(Debug, Clone)]
pub struct PresenceChange {
    pub guild: GuildId,
    pub user: UserId,
    pub display_name: String,
    pub is_bot: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

/// What [`EventRouter::on_presence`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceOutcome {
    Ignored,
    AnnouncedJoin,
    AnnouncedLeave,
    /// The bot itself was moved to another channel.
    SessionMoved,
}

pub struct EventRouter {
    sessions: Arc<SessionManager>,
    commands: CommandRegistry,
    phrases: PhrasesConfig,
}

impl EventRouter {
    pub fn new(
        sessions: Arc<SessionManager>,
        commands: CommandRegistry,
        phrases: PhrasesConfig,
    ) -> Self {
        Self {
            sessions,
            commands,
            phrases,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Reads a message aloud, joining the author's channel first when
    /// auto-join applies.
    pub async fn on_message(&self, event: &MessageEvent) -> SpeakOutcome {
        if event.author_is_bot {
            return SpeakOutcome::Ignored;
        }
        let Some(guild) = event.guild else {
            return SpeakOutcome::Ignored;
        };

        if !self.sessions.is_reading(guild) && self.sessions.auto_join() {
            if let Some(channel) = event.author_voice_channel {
                match self.sessions.join(guild, channel, event.author).await {
                    Ok(()) => {
                        tracing::info!(guild_id = %guild, channel_id = %channel, "auto-joined voice channel");
                    }
                    // Lost a race with /join or another message.
                    Err(VoiceError::AlreadyConnected) => {}
                    Err(e) => {
                        tracing::warn!(guild_id = %guild, channel_id = %channel, "auto-join failed: {}", e);
                        return SpeakOutcome::Ignored;
                    }
                }
            }
        }

        self.sessions.speak(guild, event.author, &event.text)
    }

    /// Announces members entering or leaving the session's channel and
    /// follows the bot when it is moved.
    ///
    /// The bot's own disconnects are not handled here: the event cannot tell
    /// an old call from a new one, so the voice connection reports its own
    /// loss to the session manager instead.
    pub fn on_presence(&self, change: &PresenceChange, bot_user: UserId) -> PresenceOutcome {
        let guild = change.guild;

        if change.user == bot_user {
            return match change.new_channel {
                Some(channel) if self.sessions.session_channel(guild).is_some() => {
                    self.sessions.relocate(guild, channel);
                    PresenceOutcome::SessionMoved
                }
                _ => PresenceOutcome::Ignored,
            };
        }

        if change.is_bot || change.old_channel == change.new_channel {
            return PresenceOutcome::Ignored;
        }
        let Some(session_channel) = self.sessions.session_channel(guild) else {
            return PresenceOutcome::Ignored;
        };

        let (text, outcome) = if change.new_channel == Some(session_channel) {
            (
                self.phrases.member_joined(&change.display_name),
                PresenceOutcome::AnnouncedJoin,
            )
        } else if change.old_channel == Some(session_channel) {
            (
                self.phrases.member_left(&change.display_name),
                PresenceOutcome::AnnouncedLeave,
            )
        } else {
            return PresenceOutcome::Ignored;
        };

        match self.sessions.speak(guild, change.user, &text) {
            SpeakOutcome::Queued => outcome,
            SpeakOutcome::Ignored => PresenceOutcome::Ignored,
        }
    }

    /// Runs a slash command.
    pub async fn on_command(&self, invocation: &Invocation) -> Reply {
        match self.commands.dispatch(&self.sessions, invocation).await {
            Some(reply) => reply,
            None => {
                tracing::warn!(command = %invocation.name, "unknown command");
                Reply::text("不明なコマンドです")
            }
        }
    }
}
