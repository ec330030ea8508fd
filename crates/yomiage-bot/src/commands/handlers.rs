//! The bot's commands.

use async_trait::async_trait;
use yomiage_store::StoreError;
use yomiage_types::GuildId;
use yomiage_voice::{SessionManager, VoiceError};

use super::speakers::speaker_fields;
use super::{
    CommandHandler, CommandSpec, EmbedField, EmbedReply, Invocation, OptionKind, OptionSpec,
    Reply, MESSAGE_LIMIT,
};

const GUILD_ONLY: &str = "このコマンドはサーバー内でのみ使用できます。";

const SPEAKER_LIST_COLOUR: u32 = 0x0099ff;
const HELP_COLOUR: u32 = 0x00ff00;

/// Longest stretch of user input echoed back in a confirmation.
const ECHO_LIMIT: usize = 200;

fn guild_of(invocation: &Invocation) -> Result<GuildId, Reply> {
    invocation.guild.ok_or_else(|| Reply::text(GUILD_ONLY))
}

/// Reply for a store mutation. A failed save keeps the in-memory change, so
/// the confirmation is still sent, with a note.
fn saved(result: Result<(), StoreError>, confirmation: String) -> Reply {
    match result {
        Ok(()) => Reply::Text(confirmation),
        Err(e) => {
            tracing::error!("failed to persist change: {}", e);
            Reply::Text(format!("{}（ただし設定の保存に失敗しました）", confirmation))
        }
    }
}

/// `text` cut to [`ECHO_LIMIT`] chars, with an ellipsis when cut.
fn echo(text: &str) -> String {
    if text.chars().count() <= ECHO_LIMIT {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(ECHO_LIMIT - 1).collect();
    clipped.push('…');
    clipped
}

// ── join / bye ───────────────────────────────────────────────────────

pub struct JoinCommand;

#[async_trait]
impl CommandHandler for JoinCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("join", "ボイスチャンネルに参加し、読み上げを開始します")
    }

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply {
        let guild = match guild_of(invocation) {
            Ok(guild) => guild,
            Err(reply) => return reply,
        };
        let Some(channel) = invocation.voice_channel else {
            return Reply::text("ボイスチャンネルに接続してから使用してください。");
        };

        match sessions.join(guild, channel, invocation.user).await {
            Ok(()) => Reply::text("ボイスチャンネルに参加しました。読み上げを開始します。"),
            Err(VoiceError::AlreadyConnected) => {
                Reply::text("既にボイスチャンネルに接続しています。")
            }
            Err(e) => {
                tracing::warn!(guild_id = %guild, channel_id = %channel, "join failed: {}", e);
                Reply::text("ボイスチャンネルへの接続に失敗しました。")
            }
        }
    }
}

pub struct ByeCommand;

#[async_trait]
impl CommandHandler for ByeCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("bye", "ボイスチャンネルから退出し、読み上げを終了します")
    }

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply {
        let guild = match guild_of(invocation) {
            Ok(guild) => guild,
            Err(reply) => return reply,
        };

        match sessions.leave(guild, invocation.user).await {
            Ok(()) => Reply::text("ボイスチャンネルから退出しました"),
            Err(VoiceError::NotConnected) => Reply::text("ボイスチャンネルに接続していません"),
            Err(e) => {
                tracing::warn!(guild_id = %guild, "leave failed: {}", e);
                Reply::text("ボイスチャンネルからの退出に失敗しました")
            }
        }
    }
}

// ── voice / speed ────────────────────────────────────────────────────

pub struct VoiceCommand;

#[async_trait]
impl CommandHandler for VoiceCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("voice", "話者を変更または一覧を表示します").option(OptionSpec::new(
            OptionKind::Integer,
            "id",
            "話者ID（省略すると一覧を表示）",
        ))
    }

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply {
        let Some(raw_id) = invocation.integer("id") else {
            return speaker_list(sessions).await;
        };
        let Ok(speaker_id) = u32::try_from(raw_id) else {
            return Reply::text("話者IDは0以上の整数で指定してください");
        };

        let result = sessions
            .preferences()
            .set_speaker(invocation.user, speaker_id);
        tracing::info!(user_id = %invocation.user, speaker_id, "speaker changed");
        saved(result, format!("あなたの話者を{}に変更しました", speaker_id))
    }
}

async fn speaker_list(sessions: &SessionManager) -> Reply {
    match sessions.synthesizer().speakers().await {
        Ok(speakers) => Reply::Embed(EmbedReply {
            title: "利用可能な話者一覧".to_string(),
            colour: SPEAKER_LIST_COLOUR,
            fields: speaker_fields(&speakers),
        }),
        Err(e) => {
            tracing::warn!("failed to fetch speakers: {}", e);
            Reply::text("話者リストの取得に失敗しました")
        }
    }
}

pub struct SpeedCommand;

#[async_trait]
impl CommandHandler for SpeedCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("speed", "読み上げ速度を変更します").option(
            OptionSpec::new(OptionKind::Number, "value", "速度（例: 1.5）").required(),
        )
    }

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply {
        const INVALID: &str = "有効な速度を指定してください（0より大きい数値）";
        let Some(speed) = invocation.number("value") else {
            return Reply::text(INVALID);
        };

        match sessions.preferences().set_speed(invocation.user, speed) {
            Err(StoreError::InvalidValue(_)) => Reply::text(INVALID),
            result => {
                tracing::info!(user_id = %invocation.user, speed, "speed changed");
                saved(result, format!("あなたの読み上げ速度を{}に変更しました", speed))
            }
        }
    }
}

// ── dict ─────────────────────────────────────────────────────────────

pub struct DictCommand;

#[async_trait]
impl CommandHandler for DictCommand {
    fn spec(&self) -> CommandSpec {
        let key = || OptionSpec::new(OptionKind::String, "key", "キー").required();
        CommandSpec::new("dict", "辞書を操作します")
            .option(
                OptionSpec::new(OptionKind::SubCommand, "add", "辞書に単語を追加します")
                    .option(key())
                    .option(OptionSpec::new(OptionKind::String, "value", "値").required()),
            )
            .option(
                OptionSpec::new(OptionKind::SubCommand, "remove", "辞書から単語を削除します")
                    .option(key()),
            )
            .option(OptionSpec::new(
                OptionKind::SubCommand,
                "list",
                "辞書の内容を表示します",
            ))
    }

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply {
        let dictionary = sessions.dictionary();
        match invocation.subcommand.as_deref() {
            Some("add") => {
                let key = invocation.string("key").unwrap_or_default();
                let value = invocation.string("value").unwrap_or_default();
                match dictionary.add(key, value) {
                    Err(StoreError::InvalidValue(_)) => {
                        Reply::text("キーを空にすることはできません")
                    }
                    result => saved(
                        result,
                        format!("辞書に \"{}\" => \"{}\" を追加しました", echo(key), echo(value)),
                    ),
                }
            }
            Some("remove") => {
                let key = invocation.string("key").unwrap_or_default();
                let shown = echo(key);
                match dictionary.remove(key) {
                    Ok(true) => Reply::Text(format!("辞書から \"{}\" を削除しました", shown)),
                    Ok(false) => Reply::Text(format!("\"{}\" は辞書に存在しません", shown)),
                    Err(e) => saved(Err(e), format!("辞書から \"{}\" を削除しました", shown)),
                }
            }
            Some("list") => dictionary_listing(&dictionary.entries()),
            _ => Reply::text("サブコマンドを指定してください（add / remove / list）"),
        }
    }
}

/// `key => value` lines under a heading, cut to the message limit.
fn dictionary_listing(entries: &[(String, String)]) -> Reply {
    if entries.is_empty() {
        return Reply::text("辞書は空です");
    }

    const HEADING: &str = "辞書の内容:";
    const ELLIPSIS: &str = "\n…";
    let budget = MESSAGE_LIMIT - ELLIPSIS.chars().count();

    let mut text = HEADING.to_string();
    let mut used = HEADING.chars().count();
    for (key, value) in entries {
        let line = format!("\n{} => {}", key, value);
        let len = line.chars().count();
        if used + len > budget {
            text.push_str(ELLIPSIS);
            break;
        }
        text.push_str(&line);
        used += len;
    }
    Reply::Text(text)
}

// ── autojoin / skip / help ───────────────────────────────────────────

pub struct AutoJoinCommand;

#[async_trait]
impl CommandHandler for AutoJoinCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("autojoin", "自動参加機能のオン/オフを切り替えます")
    }

    async fn handle(&self, sessions: &SessionManager, _invocation: &Invocation) -> Reply {
        let state = if sessions.toggle_auto_join() { "オン" } else { "オフ" };
        Reply::Text(format!("自動参加機能を{}にしました。", state))
    }
}

pub struct SkipCommand;

#[async_trait]
impl CommandHandler for SkipCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("skip", "現在読み上げているメッセージをスキップします")
    }

    async fn handle(&self, sessions: &SessionManager, invocation: &Invocation) -> Reply {
        let guild = match guild_of(invocation) {
            Ok(guild) => guild,
            Err(reply) => return reply,
        };
        match sessions.skip(guild) {
            Ok(()) => Reply::text("現在の読み上げをスキップしました。"),
            Err(_) => Reply::text("現在読み上げている音声はありません。"),
        }
    }
}

const HELP_ENTRIES: &[(&str, &str)] = &[
    ("/join", "ボイスチャンネルに参加し、読み上げを開始します"),
    ("/bye", "ボイスチャンネルから退出し、読み上げを終了します"),
    ("/voice", "利用可能な話者の一覧を表示します"),
    ("/voice [id]", "指定した話者IDに変更します"),
    ("/speed <value>", "読み上げ速度を変更します"),
    ("/dict add <key> <value>", "辞書に単語を追加します"),
    ("/dict remove <key>", "辞書から単語を削除します"),
    ("/dict list", "辞書の内容を表示します"),
    ("/autojoin", "自動参加機能のオン/オフを切り替えます"),
    ("/skip", "現在読み上げているメッセージをスキップします"),
    ("/help", "このヘルプメッセージを表示します"),
];

pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("help", "ヘルプメッセージを表示します")
    }

    async fn handle(&self, _sessions: &SessionManager, _invocation: &Invocation) -> Reply {
        Reply::Embed(EmbedReply {
            title: "VOICEVOX読み上げボットのコマンド一覧".to_string(),
            colour: HELP_COLOUR,
            fields: HELP_ENTRIES
                .iter()
                .map(|(name, value)| EmbedField {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        })
    }
}
