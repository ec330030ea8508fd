//! Flat JSON key-value persistence for user preferences and the
//! pronunciation dictionary.
//!
//! Both stores are whole-file JSON objects that are rewritten on every
//! mutation. A missing or unreadable file at startup is not an error: the
//! store starts empty and the file is created on the first write.

pub mod dictionary;
pub mod error;
pub mod map;
pub mod preferences;

pub use dictionary::DictionaryStore;
pub use error::StoreError;
pub use map::JsonMapStore;
pub use preferences::PreferenceStore;
