use std::time::Duration;

pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60);
pub const READINESS_TTL: Duration = Duration::from_secs(60);
pub const ROTATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub fn session_key(conversation_id: &str) -> String {
    format!("session:{}", conversation_id)
}

pub fn readiness_key(learner_id: &str, topic_id: &str) -> String {
    format!("readiness:{}:{}", learner_id, topic_id)
}

pub fn rotation_key(learner_id: &str, topic_id: &str) -> String {
    format!("rotation:{}:{}", learner_id, topic_id)
}
