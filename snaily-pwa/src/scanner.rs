//! Card payload contract
//!
//! A phonics card encodes `snailyqr` + level (`L1`..`L3`) + the word, e.g.
//! `snailyqrL1cat`. Anything else is rejected without side effects.

use crate::audio::Level;
use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const CARD_PATTERN: &str = r"^snailyqr(L[1-3])([a-zA-Z]+)$";

fn card_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(CARD_PATTERN).ok())
        .as_ref()
        .ok_or_else(|| Error::Internal(format!("invalid card pattern {}", CARD_PATTERN)))
}

/// A validated card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardPayload {
    pub level: Level,
    /// Lowercased word
    pub word: String,
    /// The payload exactly as scanned
    pub raw: String,
}

/// Validate a decoded QR payload
pub fn parse_card(payload: &str) -> Result<CardPayload> {
    // Matched as scanned; surrounding whitespace is not a card
    let captures = card_pattern()?
        .captures(payload)
        .ok_or_else(|| Error::UnrecognizedCard(payload.to_string()))?;

    let level = captures[1]
        .parse::<Level>()
        .map_err(|_| Error::UnrecognizedCard(payload.to_string()))?;

    Ok(CardPayload {
        level,
        word: captures[2].to_ascii_lowercase(),
        raw: payload.to_string(),
    })
}
