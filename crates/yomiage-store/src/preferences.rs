//! Per-user speaker and speed preferences.

use std::path::Path;

use yomiage_types::{is_valid_speed, StoredPreference, UserId, UserPreference};

use crate::error::StoreError;
use crate::map::JsonMapStore;

/// User id → preference, persisted as
/// `{ "<userId>": { "speakerId": <int>, "speed": <real> } }`.
#[derive(Debug)]
pub struct PreferenceStore {
    inner: JsonMapStore<StoredPreference>,
}

impl PreferenceStore {
    pub fn load(path: impl AsRef<Path>) -> Self {
        Self {
            inner: JsonMapStore::load(path),
        }
    }

    /// The stored preference, with any missing field filled from `defaults`.
    /// Returns `None` when the user has never set anything.
    pub fn get(&self, user: UserId, defaults: UserPreference) -> Option<UserPreference> {
        self.inner
            .get(&user.to_string())
            .map(|stored| stored.resolve(defaults))
    }

    /// The effective preference for `user`, falling back to `defaults`.
    pub fn resolve(&self, user: UserId, defaults: UserPreference) -> UserPreference {
        self.get(user, defaults).unwrap_or(defaults)
    }

    /// Stores both fields at once.
    pub fn set(&self, user: UserId, preference: UserPreference) -> Result<(), StoreError> {
        if !is_valid_speed(preference.speed) {
            return Err(StoreError::InvalidValue(format!(
                "speed must be a positive number, got {}",
                preference.speed
            )));
        }
        self.inner
            .set(user.to_string(), StoredPreference::from(preference))
    }

    /// Sets only the speaker, keeping any stored speed.
    pub fn set_speaker(&self, user: UserId, speaker_id: u32) -> Result<(), StoreError> {
        self.inner
            .update(user.to_string(), |current| StoredPreference {
                speaker_id: Some(speaker_id),
                ..current.copied().unwrap_or_default()
            })
            .map(|_| ())
    }

    /// Sets only the speed, keeping any stored speaker.
    ///
    /// A zero, negative or non-finite speed is rejected without touching the
    /// store.
    pub fn set_speed(&self, user: UserId, speed: f64) -> Result<(), StoreError> {
        if !is_valid_speed(speed) {
            return Err(StoreError::InvalidValue(format!(
                "speed must be a positive number, got {speed}"
            )));
        }
        self.inner
            .update(user.to_string(), |current| StoredPreference {
                speed: Some(speed),
                ..current.copied().unwrap_or_default()
            })
            .map(|_| ())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
