//! Store key layout.
//!
//! Everything the broker writes lives under one shared prefix so a store
//! can host other tenants without collisions:
//! * `drover_session_set`: index of active session ids
//! * `drover_session_{id}`: per-session field hash
//! * `drover_session_{id}_tags`: per-session tag set

const PREFIX: &str = "drover";

/// Key of the set holding every active session id.
pub fn session_set() -> String {
	format!("{PREFIX}_session_set")
}

/// Key of the field hash for one session.
pub fn session(id: &str) -> String {
	format!("{PREFIX}_session_{id}")
}

/// Key of the tag set for one session.
pub fn session_tags(id: &str) -> String {
	format!("{PREFIX}_session_{id}_tags")
}
