//! Identifier utilities
//!
//! Event and session identifiers are derived from the current time plus a
//! short random suffix: `{prefix}_{epoch_ms}_{9 base36 chars}`.

use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix appended to generated identifiers
pub const RANDOM_SUFFIX_LEN: usize = 9;

/// Generate `len` random lowercase base36 characters
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// Generate a time+random identifier with the given prefix
pub fn generate(prefix: &str) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        crate::time::now_millis(),
        random_base36(RANDOM_SUFFIX_LEN)
    )
}

/// Generate a session identifier, stable for one process lifetime by convention
pub fn generate_session_id() -> String {
    generate("session")
}
