//! Audio asset keys
//!
//! A word maps to an ordered list of candidate cache keys. The canonical
//! layout is tiered by card level (`/audio/L1audio/cat.mp3`); the flat
//! `/audio/cat.mp3` layout is kept as the last candidate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bodies shorter than this are treated as corrupt
pub const MIN_VALID_CLIP_BYTES: usize = 1000;

/// Card difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    L1,
    L2,
    L3,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::L1, Level::L2, Level::L3];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::L1 => "L1",
            Level::L2 => "L2",
            Level::L3 => "L3",
        }
    }

    /// Directory holding this level's clips
    pub fn audio_dir(self) -> &'static str {
        match self {
            Level::L1 => "L1audio",
            Level::L2 => "L2audio",
            Level::L3 => "L3audio",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L1" => Ok(Level::L1),
            "L2" => Ok(Level::L2),
            "L3" => Ok(Level::L3),
            other => Err(format!("unknown level '{}'", other)),
        }
    }
}

/// Lowercase, trimmed form used for every lookup
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Flat legacy key: `/audio/{word}.mp3`
pub fn legacy_key(word: &str) -> String {
    format!("/audio/{}.mp3", normalize_word(word))
}

/// Tiered key: `/audio/L{n}audio/{word}.mp3`
pub fn level_key(word: &str, level: Level) -> String {
    format!("/audio/{}/{}.mp3", level.audio_dir(), normalize_word(word))
}

/// Ordered candidate keys for a word
///
/// L1, L2, L3 with `level` (when known) moved to the front, then the legacy
/// flat key.
pub fn candidate_keys(word: &str, level: Option<Level>) -> Vec<String> {
    let mut levels: Vec<Level> = Level::ALL.to_vec();
    if let Some(first) = level {
        levels.retain(|l| *l != first);
        levels.insert(0, first);
    }

    let mut keys: Vec<String> = levels.into_iter().map(|l| level_key(word, l)).collect();
    keys.push(legacy_key(word));
    keys
}

/// Word named by an audio key, if it is one
pub fn word_from_key(key: &str) -> Option<String> {
    let path = key.split(['?', '#']).next()?;
    if !path.starts_with("/audio/") {
        return None;
    }
    let file = path.rsplit('/').next()?;
    let word = file.strip_suffix(".mp3")?;
    (!word.is_empty()).then(|| normalize_word(word))
}

/// Whether a body is large enough to be a real clip
pub fn is_valid_clip(data: &[u8]) -> bool {
    !data.is_empty() && data.len() >= MIN_VALID_CLIP_BYTES
}
