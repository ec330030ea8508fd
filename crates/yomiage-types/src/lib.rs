//! Shared types for the Yomiage reading bot.
//!
//! Identifiers, per-user voice preferences, synthesis requests and the
//! speaker catalog shape live here so that the store, voice and bot crates
//! agree on them without depending on each other or on the chat platform.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod speaker;

pub use speaker::{Speaker, SpeakerStyle};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw numeric identifier.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake!(
    /// A guild (community server). One voice session may exist per guild.
    GuildId
);
snowflake!(
    /// A voice or text channel inside a guild.
    ChannelId
);
snowflake!(
    /// A chat-platform user.
    UserId
);

/// Fully resolved voice settings for a user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    /// VOICEVOX style id used to voice this user's messages.
    pub speaker_id: u32,
    /// Speech rate multiplier (1.0 is normal).
    pub speed: f64,
}

impl UserPreference {
    pub fn new(speaker_id: u32, speed: f64) -> Self {
        Self { speaker_id, speed }
    }
}

/// A preference as persisted on disk.
///
/// `/voice` and `/speed` each write only their own field, so either may be
/// absent; absent fields fall back to the configured defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPreference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl StoredPreference {
    /// Fills absent fields from `defaults`.
    pub fn resolve(&self, defaults: UserPreference) -> UserPreference {
        UserPreference {
            speaker_id: self.speaker_id.unwrap_or(defaults.speaker_id),
            speed: self.speed.unwrap_or(defaults.speed),
        }
    }
}

impl From<UserPreference> for StoredPreference {
    fn from(pref: UserPreference) -> Self {
        Self {
            speaker_id: Some(pref.speaker_id),
            speed: Some(pref.speed),
        }
    }
}

/// A single utterance ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub speaker_id: u32,
    pub speed: f64,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, preference: UserPreference) -> Self {
        Self {
            text: text.into(),
            speaker_id: preference.speaker_id,
            speed: preference.speed,
        }
    }
}

/// Returns true when `speed` is usable as a synthesis speed scale.
pub fn is_valid_speed(speed: f64) -> bool {
    speed.is_finite() && speed > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_preference_fills_missing_fields() {
        let defaults = UserPreference::new(1, 1.0);

        let only_speaker = StoredPreference {
            speaker_id: Some(3),
            speed: None,
        };
        assert_eq!(only_speaker.resolve(defaults), UserPreference::new(3, 1.0));

        let only_speed = StoredPreference {
            speaker_id: None,
            speed: Some(1.5),
        };
        assert_eq!(only_speed.resolve(defaults), UserPreference::new(1, 1.5));

        assert_eq!(StoredPreference::default().resolve(defaults), defaults);
    }

    #[test]
    fn stored_preference_uses_camel_case_on_disk() {
        let stored = StoredPreference::from(UserPreference::new(3, 1.5));
        let json = serde_json::to_value(stored).expect("should serialize");
        assert_eq!(json, serde_json::json!({ "speakerId": 3, "speed": 1.5 }));

        let partial: StoredPreference =
            serde_json::from_str(r#"{"speed": 2.0}"#).expect("should parse partial entry");
        assert_eq!(partial.speaker_id, None);
        assert_eq!(partial.speed, Some(2.0));
    }

    #[test]
    fn speed_validation() {
        assert!(is_valid_speed(1.5));
        assert!(is_valid_speed(0.1));
        assert!(!is_valid_speed(0.0));
        assert!(!is_valid_speed(-1.0));
        assert!(!is_valid_speed(f64::NAN));
        assert!(!is_valid_speed(f64::INFINITY));
    }

    #[test]
    fn ids_are_transparent_in_json() {
        let id = UserId(1234567890123);
        assert_eq!(serde_json::to_string(&id).expect("should serialize"), "1234567890123");
        assert_eq!(id.to_string(), "1234567890123");
    }
}
