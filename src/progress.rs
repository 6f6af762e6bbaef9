//! Player progress: current segment plus persistent flags.

use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CURRENT_SEGMENT_KEY: &str = "CurrentSegment";
pub const GAME_FLAGS_KEY: &str = "GameFlags";

/// Flag present (and false) in a fresh playthrough.
pub const DEFAULT_FLAG: &str = "hasApproachedDoor";

/// Named booleans recording player decisions.
///
/// Flags only ever go from unset/false to true during play; clearing happens
/// solely through a progress reset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(BTreeMap<String, bool>);

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// True only if the flag exists and is set.
    pub fn is_set(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Set a flag. Returns true when this changed its value.
    pub fn set(&mut self, name: &str) -> bool {
        !self.0.insert(name.to_string(), true).unwrap_or(false)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: bool) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Flags a new game starts with.
    pub fn defaults() -> Self {
        let mut flags = Self::new();
        flags.insert(DEFAULT_FLAG, false);
        flags
    }
}

impl FromIterator<(String, bool)> for Flags {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub current_segment_index: usize,
    pub flags: Flags,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            current_segment_index: 0,
            flags: Flags::defaults(),
        }
    }
}

/// Saves and restores [`Progress`] through a [`KeyValueStore`].
///
/// Storage trouble never surfaces to the caller: reads fall back to defaults
/// and failed flushes leave the values in memory only, with a warning.
pub struct ProgressStore<S> {
    store: S,
}

impl<S: KeyValueStore> ProgressStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Restore saved progress, substituting defaults for anything missing or corrupt.
    pub fn load(&self) -> Progress {
        let defaults = Progress::default();

        let current_segment_index = match self.store.get_int(CURRENT_SEGMENT_KEY) {
            Some(index) => match usize::try_from(index) {
                Ok(index) => {
                    tracing::info!("Loaded progress: segment {}", index);
                    index
                }
                Err(_) => {
                    tracing::warn!("Saved segment index {} is negative, using 0", index);
                    defaults.current_segment_index
                }
            },
            None => {
                if self.store.has_key(CURRENT_SEGMENT_KEY) {
                    tracing::warn!("Saved segment index is not an integer, using 0");
                } else {
                    tracing::info!("No saved progress found, starting from segment 0");
                }
                defaults.current_segment_index
            }
        };

        let flags = match self.store.get_string(GAME_FLAGS_KEY) {
            Some(json) => match serde_json::from_str::<Flags>(&json) {
                Ok(flags) => {
                    tracing::info!("Loaded {} game flags", flags.len());
                    flags
                }
                Err(e) => {
                    tracing::warn!("Saved game flags are corrupt ({}), using defaults", e);
                    defaults.flags
                }
            },
            None => {
                tracing::debug!("No saved game flags, using defaults");
                defaults.flags
            }
        };

        Progress {
            current_segment_index,
            flags,
        }
    }

    /// Persist index and flags with a single flush.
    pub fn save(&mut self, progress: &Progress) {
        let flags_json = match serde_json::to_string(&progress.flags) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Could not encode game flags, progress not saved: {}", e);
                return;
            }
        };
        let index = i64::try_from(progress.current_segment_index).unwrap_or(i64::MAX);

        self.store.set_int(CURRENT_SEGMENT_KEY, index);
        self.store.set_string(GAME_FLAGS_KEY, &flags_json);

        match self.store.flush() {
            Ok(()) => tracing::debug!(
                "Progress saved: segment {}, flags: {}",
                progress.current_segment_index,
                progress.flags.len()
            ),
            Err(e) => tracing::warn!("Progress kept in memory only, flush failed: {}", e),
        }
    }

    /// Forget saved progress and return the defaults.
    pub fn reset(&mut self) -> Progress {
        self.store.delete_key(CURRENT_SEGMENT_KEY);
        self.store.delete_key(GAME_FLAGS_KEY);
        if let Err(e) = self.store.flush() {
            tracing::warn!("Progress reset kept in memory only, flush failed: {}", e);
        }
        tracing::info!("Progress reset to beginning");
        Progress::default()
    }
}
