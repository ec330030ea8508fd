//! Bot configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use yomiage_types::{is_valid_speed, UserPreference};
use yomiage_voice::SessionSettings;

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Chat platform credentials.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// VOICEVOX engine settings.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Voice used for users who never ran `/voice` or `/speed`.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Where preferences and the dictionary are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Voice session behaviour.
    #[serde(default)]
    pub session: SessionConfig,

    /// Spoken phrases.
    #[serde(default)]
    pub phrases: PhrasesConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional HTTP health endpoint.
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Clone, Default, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. Required.
    #[serde(default)]
    pub token: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &if self.token.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL of the VOICEVOX engine.
    #[serde(default = "default_voicevox_url")]
    pub base_url: String,

    /// Bound on each engine round trip, in seconds.
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_speaker_id")]
    pub speaker_id: u32,

    #[serde(default = "default_speed")]
    pub speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_preferences_path")]
    pub preferences_path: String,

    #[serde(default = "default_dictionary_path")]
    pub dictionary_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Initial state of the auto-join flag.
    #[serde(default = "default_true")]
    pub auto_join: bool,

    /// Playbacks still running after this many seconds are stopped.
    #[serde(default = "default_max_playback_secs")]
    pub max_playback_secs: u64,
}

/// Phrases spoken by the bot. `{name}` in the member phrases is replaced
/// with the member's display name.
#[derive(Debug, Clone, Deserialize)]
pub struct PhrasesConfig {
    #[serde(default = "default_join_phrase")]
    pub join: String,

    #[serde(default = "default_leave_phrase")]
    pub leave: String,

    #[serde(default = "default_member_joined")]
    pub member_joined: String,

    #[serde(default = "default_member_left")]
    pub member_left: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "yomiage_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_voicevox_url() -> String {
    "http://127.0.0.1:50021".to_string()
}

fn default_synthesis_timeout_secs() -> u64 {
    30
}

fn default_speaker_id() -> u32 {
    1
}

fn default_speed() -> f64 {
    1.0
}

fn default_preferences_path() -> String {
    "userSettings.json".to_string()
}

fn default_dictionary_path() -> String {
    "dictionary.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_playback_secs() -> u64 {
    300
}

fn default_join_phrase() -> String {
    "読み上げを開始します".to_string()
}

fn default_leave_phrase() -> String {
    "読み上げを終了します".to_string()
}

fn default_member_joined() -> String {
    "{name}さんが参加しました".to_string()
}

fn default_member_left() -> String {
    "{name}さんが退出しました".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_voicevox_url(),
            timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            speaker_id: default_speaker_id(),
            speed: default_speed(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preferences_path: default_preferences_path(),
            dictionary_path: default_dictionary_path(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_join: true,
            max_playback_secs: default_max_playback_secs(),
        }
    }
}

impl Default for PhrasesConfig {
    fn default() -> Self {
        Self {
            join: default_join_phrase(),
            leave: default_leave_phrase(),
            member_joined: default_member_joined(),
            member_left: default_member_left(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DefaultsConfig {
    pub fn preference(&self) -> UserPreference {
        UserPreference::new(self.speaker_id, self.speed)
    }
}

impl PhrasesConfig {
    pub fn member_joined(&self, name: &str) -> String {
        self.member_joined.replace("{name}", name)
    }

    pub fn member_left(&self, name: &str) -> String {
        self.member_left.replace("{name}", name)
    }
}

impl HealthConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Config {
    /// Settings handed to the session manager.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            defaults: self.defaults.preference(),
            join_phrase: self.phrases.join.clone(),
            leave_phrase: self.phrases.leave.clone(),
            max_playback: Duration::from_secs(self.session.max_playback_secs),
            auto_join: self.session.auto_join,
        }
    }

    /// Rejects values the bot cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "discord.token must be set (or YOMIAGE_DISCORD_TOKEN)".to_string(),
            ));
        }
        if !is_valid_speed(self.defaults.speed) {
            return Err(ConfigError::Invalid(format!(
                "defaults.speed must be a positive number, got {}",
                self.defaults.speed
            )));
        }
        if self.synthesis.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "synthesis.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.max_playback_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.max_playback_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// validates it.
///
/// Environment variable overrides:
/// - `YOMIAGE_DISCORD_TOKEN` overrides `discord.token`
/// - `YOMIAGE_VOICEVOX_URL` overrides `synthesis.base_url`
/// - `YOMIAGE_LOG_LEVEL` overrides `logging.level`
/// - `YOMIAGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the result fails [`Config::validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = read_config(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn read_config(path: Option<&str>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::FileRead(e)),
        },
        None => Ok(Config::default()),
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(token) = var("YOMIAGE_DISCORD_TOKEN") {
        config.discord.token = token;
    }
    if let Some(url) = var("YOMIAGE_VOICEVOX_URL") {
        config.synthesis.base_url = url;
    }
    if let Some(level) = var("YOMIAGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("YOMIAGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
