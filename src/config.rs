use std::path::PathBuf;
use std::time::Duration;

use crate::cache::keys;

#[derive(Debug, Clone)]
pub struct TutorConfig {
    pub log_level: String,
    /// Knowledge, content, memory and store lookups.
    pub lookup_timeout: Duration,
    pub classify_timeout: Duration,
    pub generation_timeout: Duration,
    /// Upper bound on any single step, on top of the per-call budgets.
    pub step_timeout: Duration,
    /// Upper bound on a whole turn before the fixed fallback response is used.
    pub turn_timeout: Duration,
    pub max_message_chars: usize,
    pub max_history_chars: usize,
    pub session_memory_turns: usize,
    pub session_ttl: Duration,
    pub readiness_ttl: Duration,
    pub rotation_ttl: Duration,
    pub max_mastery_concepts: usize,
    pub redis_url: Option<String>,
    pub knowledge_base_path: Option<PathBuf>,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            lookup_timeout: Duration::from_millis(4_000),
            classify_timeout: Duration::from_millis(5_000),
            generation_timeout: Duration::from_millis(30_000),
            step_timeout: Duration::from_millis(45_000),
            turn_timeout: Duration::from_millis(60_000),
            max_message_chars: 4_000,
            max_history_chars: 6_000,
            session_memory_turns: 10,
            session_ttl: keys::SESSION_TTL,
            readiness_ttl: keys::READINESS_TTL,
            rotation_ttl: keys::ROTATION_TTL,
            max_mastery_concepts: 3,
            redis_url: None,
            knowledge_base_path: None,
        }
    }
}

impl TutorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env_string("RUST_LOG").unwrap_or(defaults.log_level),
            lookup_timeout: env_millis("TUTOR_LOOKUP_TIMEOUT_MS").unwrap_or(defaults.lookup_timeout),
            classify_timeout: env_millis("TUTOR_CLASSIFY_TIMEOUT_MS")
                .unwrap_or(defaults.classify_timeout),
            generation_timeout: env_millis("TUTOR_GENERATION_TIMEOUT_MS")
                .unwrap_or(defaults.generation_timeout),
            step_timeout: env_millis("TUTOR_STEP_TIMEOUT_MS").unwrap_or(defaults.step_timeout),
            turn_timeout: env_millis("TUTOR_TURN_TIMEOUT_MS").unwrap_or(defaults.turn_timeout),
            max_message_chars: env_parse("TUTOR_MAX_MESSAGE_CHARS")
                .unwrap_or(defaults.max_message_chars),
            max_history_chars: env_parse("TUTOR_MAX_HISTORY_CHARS")
                .unwrap_or(defaults.max_history_chars),
            session_memory_turns: env_parse("TUTOR_SESSION_MEMORY_TURNS")
                .unwrap_or(defaults.session_memory_turns),
            session_ttl: env_secs("TUTOR_SESSION_TTL_SECS").unwrap_or(defaults.session_ttl),
            readiness_ttl: env_secs("TUTOR_READINESS_TTL_SECS").unwrap_or(defaults.readiness_ttl),
            rotation_ttl: env_secs("TUTOR_ROTATION_TTL_SECS").unwrap_or(defaults.rotation_ttl),
            max_mastery_concepts: env_parse("TUTOR_MAX_MASTERY_CONCEPTS")
                .unwrap_or(defaults.max_mastery_concepts),
            redis_url: env_string("REDIS_URL"),
            knowledge_base_path: env_string("KNOWLEDGE_BASE_PATH").map(PathBuf::from),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.trim().parse().ok()
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
