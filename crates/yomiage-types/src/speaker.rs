//! Speaker catalog entries as reported by the synthesis engine.

use serde::{Deserialize, Serialize};

/// A voice character offered by the engine, with one or more styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    #[serde(default)]
    pub styles: Vec<SpeakerStyle>,
}

/// A selectable style. Its `id` is what users pass to `/voice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerStyle {
    pub name: String,
    pub id: u32,
}
