//! Discord adapter: serenity gateway events in, songbird voice out.
//!
//! Nothing outside this module names a serenity or songbird type.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    ChannelId as DiscordChannelId, Command, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateEmbed, EditInteractionResponse, EventHandler,
    GatewayIntents, GuildId as DiscordGuildId, Interaction, Message, Ready, ResolvedOption,
    ResolvedValue, UserId as DiscordUserId, VoiceState,
};
use songbird::input::Input;
use songbird::tracks::TrackHandle;
use songbird::{Call, CoreEvent, Event, EventContext, Songbird, TrackEvent};
use tokio::sync::Mutex;
use yomiage_types::{ChannelId, GuildId, UserId};
use yomiage_voice::{CompletionSignal, TrackControl, VoiceConnection, VoiceError, VoiceGateway};

use crate::commands::{ArgValue, CommandSpec, EmbedReply, Invocation, OptionKind, OptionSpec, Reply};
use crate::router::{EventRouter, MessageEvent, PresenceChange};

/// Gateway intents the bot needs: guild and voice-state caches plus message
/// content for reading.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
}

// ── Command conversion ───────────────────────────────────────────────

pub fn create_command(spec: &CommandSpec) -> CreateCommand {
    spec.options.iter().fold(
        CreateCommand::new(spec.name).description(spec.description),
        |command, option| command.add_option(create_option(option)),
    )
}

fn create_option(spec: &OptionSpec) -> CreateCommandOption {
    let kind = match spec.kind {
        OptionKind::Integer => CommandOptionType::Integer,
        OptionKind::Number => CommandOptionType::Number,
        OptionKind::String => CommandOptionType::String,
        OptionKind::SubCommand => CommandOptionType::SubCommand,
    };
    let option = CreateCommandOption::new(kind, spec.name, spec.description);
    let option = if spec.required {
        option.required(true)
    } else {
        option
    };
    spec.options
        .iter()
        .fold(option, |option, sub| option.add_sub_option(create_option(sub)))
}

fn invocation(command: &CommandInteraction, voice_channel: Option<ChannelId>) -> Invocation {
    let mut invocation = Invocation::new(command.data.name.clone(), UserId(command.user.id.get()));
    invocation.guild = command.guild_id.map(|g| GuildId(g.get()));
    invocation.voice_channel = voice_channel;
    for option in command.data.options() {
        collect_option(&mut invocation, option);
    }
    invocation
}

fn collect_option(invocation: &mut Invocation, option: ResolvedOption<'_>) {
    let value = match option.value {
        ResolvedValue::SubCommand(options) => {
            invocation.subcommand = Some(option.name.to_string());
            for sub in options {
                collect_option(invocation, sub);
            }
            return;
        }
        ResolvedValue::Integer(v) => ArgValue::Integer(v),
        ResolvedValue::Number(v) => ArgValue::Number(v),
        ResolvedValue::String(v) => ArgValue::String(v.to_string()),
        _ => return,
    };
    invocation.args.push((option.name.to_string(), value));
}

fn create_embed(embed: EmbedReply) -> CreateEmbed {
    CreateEmbed::new()
        .title(embed.title)
        .colour(embed.colour)
        .fields(embed.fields.into_iter().map(|f| (f.name, f.value, false)))
}

fn edit_response(reply: Reply) -> EditInteractionResponse {
    match reply {
        Reply::Text(text) => EditInteractionResponse::new().content(text),
        Reply::Embed(embed) => EditInteractionResponse::new().embed(create_embed(embed)),
    }
}

/// The voice channel `user` is in, from the gateway cache.
fn voice_channel_of(ctx: &Context, guild: DiscordGuildId, user: DiscordUserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild)?;
    guild
        .voice_states
        .get(&user)
        .and_then(|state| state.channel_id)
        .map(|channel| ChannelId(channel.get()))
}

// ── Gateway events ───────────────────────────────────────────────────

/// serenity event handler feeding the [`EventRouter`].
pub struct Handler {
    router: Arc<EventRouter>,
}

impl Handler {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected to Discord");

        let commands = self
            .router
            .commands()
            .specs()
            .iter()
            .map(create_command)
            .collect();
        match Command::set_global_commands(&ctx.http, commands).await {
            Ok(registered) => tracing::info!(count = registered.len(), "registered slash commands"),
            Err(e) => tracing::error!("failed to register slash commands: {}", e),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let voice_channel = command
            .guild_id
            .and_then(|guild| voice_channel_of(&ctx, guild, command.user.id));
        let invocation = invocation(&command, voice_channel);

        // join/bye can outlast the initial response window.
        if let Err(e) = command.defer(&ctx.http).await {
            tracing::warn!(command = %invocation.name, "failed to acknowledge command: {}", e);
            return;
        }
        let reply = self.router.on_command(&invocation).await;
        if let Err(e) = command.edit_response(&ctx.http, edit_response(reply)).await {
            tracing::warn!(command = %invocation.name, "failed to send command reply: {}", e);
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let author_voice_channel = msg
            .guild_id
            .and_then(|guild| voice_channel_of(&ctx, guild, msg.author.id));
        let event = MessageEvent {
            guild: msg.guild_id.map(|g| GuildId(g.get())),
            author: UserId(msg.author.id.get()),
            author_is_bot: msg.author.bot,
            author_voice_channel,
            text: msg.content,
        };
        self.router.on_message(&event).await;
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild) = new.guild_id else {
            return;
        };
        let (display_name, is_bot) = match &new.member {
            Some(member) => (member.display_name().to_string(), member.user.bot),
            None => (new.user_id.to_string(), false),
        };
        let change = PresenceChange {
            guild: GuildId(guild.get()),
            user: UserId(new.user_id.get()),
            display_name,
            is_bot,
            old_channel: old
                .and_then(|state| state.channel_id)
                .map(|c| ChannelId(c.get())),
            new_channel: new.channel_id.map(|c| ChannelId(c.get())),
        };
        let bot_user = UserId(ctx.cache.current_user().id.get());

        let outcome = self.router.on_presence(&change, bot_user);
        tracing::debug!(guild_id = %change.guild, user_id = %change.user, ?outcome, "voice state update");
    }
}

// ── Voice transport ──────────────────────────────────────────────────

/// Opens songbird calls.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
        lost: CompletionSignal,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        let guild_id = DiscordGuildId::new(guild.get());
        let channel_id = DiscordChannelId::new(channel.get());

        match self.manager.join(guild_id, channel_id).await {
            Ok(call) => {
                call.lock()
                    .await
                    .add_global_event(Event::Core(CoreEvent::DriverDisconnect), ConnectionLost(lost));
                Ok(Arc::new(SongbirdConnection {
                    manager: Arc::clone(&self.manager),
                    guild: guild_id,
                    call,
                }))
            }
            Err(e) => {
                // A failed join can leave a half-open call behind.
                if let Err(cleanup) = self.manager.remove(guild_id).await {
                    tracing::debug!(guild_id = %guild, "no call to clean up after failed join: {}", cleanup);
                }
                Err(VoiceError::Transport(e.to_string()))
            }
        }
    }
}

/// One guild's songbird call.
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild: DiscordGuildId,
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn start(
        &self,
        audio: Vec<u8>,
        done: CompletionSignal,
    ) -> Result<Box<dyn TrackControl>, VoiceError> {
        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(Input::from(audio))
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(Event::Track(event), TrackIdle(done.clone())) {
                // The track is already gone, so no event will ever arrive.
                tracing::debug!(guild_id = %self.guild, "track ended before events were attached: {}", e);
                done.complete();
            }
        }
        Ok(Box::new(SongbirdTrack(handle)))
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.manager
            .remove(self.guild)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }
}

/// Fires the completion signal when the track stops or fails.
struct TrackIdle(CompletionSignal);

#[async_trait]
impl songbird::EventHandler for TrackIdle {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.0.complete();
        None
    }
}

/// Reports that this call's driver dropped out of the channel.
struct ConnectionLost(CompletionSignal);

#[async_trait]
impl songbird::EventHandler for ConnectionLost {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            tracing::debug!(kind = ?data.kind, reason = ?data.reason, "voice driver disconnected");
        }
        self.0.complete();
        Some(Event::Cancel)
    }
}

struct SongbirdTrack(TrackHandle);

impl TrackControl for SongbirdTrack {
    fn stop(&self) {
        if let Err(e) = self.0.stop() {
            tracing::debug!("track already finished: {}", e);
        }
    }
}
