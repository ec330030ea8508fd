//! Slash commands, independent of the chat platform.
//!
//! Each command is a [`CommandHandler`] that declares its own
//! [`CommandSpec`] and turns an [`Invocation`] into a [`Reply`]. The
//! [`CommandRegistry`] maps names to handlers; the Discord adapter only
//! converts specs into platform registrations and platform payloads into
//! invocations.

mod handlers;
pub mod speakers;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use yomiage_types::{ChannelId, GuildId, UserId};
use yomiage_voice::SessionManager;

pub use handlers::{
    AutoJoinCommand, ByeCommand, DictCommand, HelpCommand, JoinCommand, SkipCommand,
    SpeedCommand, VoiceCommand,
};

/// Discord's limit on a plain message body, in characters.
pub const MESSAGE_LIMIT: usize = 2000;

// ── Declarations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Integer,
    Number,
    String,
    SubCommand,
}

/// One declared option (or subcommand, with its own options).
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub options: Vec<OptionSpec>,
}

impl OptionSpec {
    pub fn new(kind: OptionKind, name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
            options: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }
}

/// Declaration of a top-level command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<OptionSpec>,
}

impl CommandSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            options: Vec::new(),
        }
    }

    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }
}

// ── Invocations ──────────────────────────────────────────────────────

/// A parsed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Integer(i64),
    Number(f64),
    String(String),
}

/// A command as invoked by a user, with subcommand options flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub subcommand: Option<String>,
    pub args: Vec<(String, ArgValue)>,
    /// `None` when invoked outside a guild.
    pub guild: Option<GuildId>,
    pub user: UserId,
    /// Voice channel the invoker is in, if any.
    pub voice_channel: Option<ChannelId>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, user: UserId) -> Self {
        Self {
            name: name.into(),
            subcommand: None,
            args: Vec::new(),
            guild: None,
            user,
            voice_channel: None,
        }
    }

    pub fn in_guild(mut self, guild: GuildId) -> Self {
        self.guild = Some(guild);
        self
    }

    pub fn in_voice(mut self, channel: ChannelId) -> Self {
        self.voice_channel = Some(channel);
        self
    }

    pub fn subcommand(mut self, name: impl Into<String>) -> Self {
        self.subcommand = Some(name.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.args.push((name.into(), value));
        self
    }

    fn value(&self, name: &str) -> Option<&ArgValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            ArgValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numbers also accept integer payloads.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            ArgValue::Number(v) => Some(*v),
            ArgValue::Integer(v) => Some(*v as f64),
            ArgValue::String(_) => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.value(name)? {
            ArgValue::String(v) => Some(v),
            _ => None,
        }
    }
}

// ── Replies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedReply {
    pub title: String,
    pub colour: u32,
    pub fields: Vec<EmbedField>,
}

/// What a command answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Embed(EmbedReply),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Embed(_) => None,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn spec(&self) -> CommandSpec;

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply;
}

/// Name → handler table, in registration order.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: IndexMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command the bot offers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(JoinCommand);
        registry.register(ByeCommand);
        registry.register(VoiceCommand);
        registry.register(SpeedCommand);
        registry.register(DictCommand);
        registry.register(AutoJoinCommand);
        registry.register(SkipCommand);
        registry.register(HelpCommand);
        registry
    }

    /// Adds `handler`, replacing any handler with the same name.
    pub fn register(&mut self, handler: impl CommandHandler + 'static) {
        let name = handler.spec().name;
        self.handlers.insert(name, Arc::new(handler));
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.handlers.values().map(|h| h.spec()).collect()
    }

    /// Runs the handler for `invocation.name`. `None` for unknown commands.
    pub async fn dispatch(
        &self,
        sessions: &SessionManager,
        invocation: &Invocation,
    ) -> Option<Reply> {
        let handler = self.handlers.get(invocation.name.as_str())?;
        tracing::debug!(
            command = %invocation.name,
            subcommand = invocation.subcommand.as_deref().unwrap_or(""),
            user_id = %invocation.user,
            "dispatching command"
        );
        Some(handler.handle(sessions, invocation).await)
    }
}
