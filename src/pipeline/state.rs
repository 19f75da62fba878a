use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::services::generator::UsageMetadata;
use crate::tutor::mastery::Stakes;
use crate::tutor::types::{
    Concept, ExplanationStyle, MemoryTurn, MasteryUpdate, PathDecision, QualityLabel,
    ReadinessSnapshot,
};

pub const FALLBACK_RESPONSE: &str = "I'm having trouble putting together a full answer right now. Could you rephrase your question or try again in a moment?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    LogInput,
    Validate,
    RetrieveKnowledge,
    RetrieveMemory,
    Condense,
    Classify,
    Generate,
    UpdateMastery,
    ComputeReadiness,
    Decide,
    LogOutput,
}

impl StepName {
    pub const ORDER: [StepName; 11] = [
        StepName::LogInput,
        StepName::Validate,
        StepName::RetrieveKnowledge,
        StepName::RetrieveMemory,
        StepName::Condense,
        StepName::Classify,
        StepName::Generate,
        StepName::UpdateMastery,
        StepName::ComputeReadiness,
        StepName::Decide,
        StepName::LogOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogInput => "log_input",
            Self::Validate => "validate",
            Self::RetrieveKnowledge => "retrieve_knowledge",
            Self::RetrieveMemory => "retrieve_memory",
            Self::Condense => "condense",
            Self::Classify => "classify",
            Self::Generate => "generate",
            Self::UpdateMastery => "update_mastery",
            Self::ComputeReadiness => "compute_readiness",
            Self::Decide => "decide",
            Self::LogOutput => "log_output",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: StepName,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `conv-` plus the first 16 hex chars of SHA-256 over `learner:topic`.
pub fn derive_conversation_id(learner_id: &str, topic_id: &str) -> String {
    let digest = Sha256::digest(format!("{learner_id}:{topic_id}").as_bytes());
    format!("conv-{}", &hex::encode(digest)[..16])
}

/// Per-turn record, exclusively owned by one pipeline run.
#[derive(Debug, Clone)]
pub struct TurnState {
    pub learner_id: String,
    pub topic_id: String,
    pub conversation_id: String,
    pub trace_id: String,
    pub started_at: DateTime<Utc>,

    pub message: String,
    pub style: ExplanationStyle,
    pub stakes: Stakes,

    pub content: String,
    /// Concepts the message is about, best match first.
    pub concepts: Vec<Concept>,
    /// Every concept id of the topic, sorted.
    pub topic_concept_ids: Vec<String>,
    pub history: Vec<MemoryTurn>,
    pub condensed_history: String,

    pub label: QualityLabel,
    pub response: Option<String>,
    pub usage: Option<UsageMetadata>,
    pub mastery_updates: Vec<MasteryUpdate>,
    pub readiness: Option<ReadinessSnapshot>,
    pub decision: Option<PathDecision>,

    pub message_truncated: bool,
    pub history_condensed: bool,
    pub degraded: bool,
    pub step_reports: Vec<StepReport>,
}

impl TurnState {
    pub fn new(
        learner_id: impl Into<String>,
        topic_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let learner_id = learner_id.into();
        let topic_id = topic_id.into();
        let conversation_id = derive_conversation_id(&learner_id, &topic_id);
        Self {
            learner_id,
            topic_id,
            conversation_id,
            trace_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            message: message.into(),
            style: ExplanationStyle::default(),
            stakes: Stakes::default(),
            content: String::new(),
            concepts: Vec::new(),
            topic_concept_ids: Vec::new(),
            history: Vec::new(),
            condensed_history: String::new(),
            label: QualityLabel::Neutral,
            response: None,
            usage: None,
            mastery_updates: Vec::new(),
            readiness: None,
            decision: None,
            message_truncated: false,
            history_condensed: false,
            degraded: false,
            step_reports: Vec::new(),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_style(mut self, style: ExplanationStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_stakes(mut self, stakes: Stakes) -> Self {
        self.stakes = stakes;
        self
    }

    pub fn merge(&mut self, update: TurnUpdate) {
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(concepts) = update.concepts {
            self.concepts = concepts;
        }
        if let Some(ids) = update.topic_concept_ids {
            self.topic_concept_ids = ids;
        }
        if let Some(history) = update.history {
            self.history = history;
        }
        if let Some(condensed) = update.condensed_history {
            self.condensed_history = condensed;
        }
        if let Some(label) = update.label {
            self.label = label;
        }
        if let Some(response) = update.response {
            self.response = Some(response);
        }
        if let Some(usage) = update.usage {
            self.usage = Some(usage);
        }
        if let Some(updates) = update.mastery_updates {
            self.mastery_updates = updates;
        }
        if let Some(readiness) = update.readiness {
            self.readiness = Some(readiness);
        }
        if let Some(decision) = update.decision {
            self.decision = Some(decision);
        }
        self.message_truncated |= update.message_truncated;
        self.history_condensed |= update.history_condensed;
        self.degraded |= update.degraded;
    }

    /// Generated text, or the fixed fallback when generation never landed.
    pub fn response_text(&self) -> &str {
        self.response.as_deref().unwrap_or(FALLBACK_RESPONSE)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = StepName> + '_ {
        self.step_reports
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.step)
    }
}

/// Partial result of one step. `None` leaves the field untouched; the flags
/// only ever switch on.
#[derive(Debug, Clone, Default)]
pub struct TurnUpdate {
    pub message: Option<String>,
    pub content: Option<String>,
    pub concepts: Option<Vec<Concept>>,
    pub topic_concept_ids: Option<Vec<String>>,
    pub history: Option<Vec<MemoryTurn>>,
    pub condensed_history: Option<String>,
    pub label: Option<QualityLabel>,
    pub response: Option<String>,
    pub usage: Option<UsageMetadata>,
    pub mastery_updates: Option<Vec<MasteryUpdate>>,
    pub readiness: Option<ReadinessSnapshot>,
    pub decision: Option<PathDecision>,
    pub message_truncated: bool,
    pub history_condensed: bool,
    pub degraded: bool,
}

impl TurnUpdate {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_deterministic() {
        let a = derive_conversation_id("learner-1", "fractions");
        let b = derive_conversation_id("learner-1", "fractions");
        let c = derive_conversation_id("learner-1", "algebra");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("conv-"));
        assert_eq!(a.len(), "conv-".len() + 16);
    }

    #[test]
    fn merge_only_touches_set_fields() {
        let mut state = TurnState::new("u1", "t1", "  hello  ");
        state.merge(TurnUpdate {
            message: Some("hello".to_string()),
            label: Some(QualityLabel::Good),
            degraded: true,
            ..TurnUpdate::empty()
        });
        state.merge(TurnUpdate::empty());

        assert_eq!(state.message, "hello");
        assert_eq!(state.label, QualityLabel::Good);
        assert!(state.degraded);
        assert!(state.concepts.is_empty());
        assert_eq!(state.response_text(), FALLBACK_RESPONSE);
    }

    #[test]
    fn step_order_is_fixed() {
        assert_eq!(StepName::ORDER.first(), Some(&StepName::LogInput));
        assert_eq!(StepName::ORDER.last(), Some(&StepName::LogOutput));
        let classify = StepName::ORDER
            .iter()
            .position(|s| *s == StepName::Classify)
            .unwrap();
        let mastery = StepName::ORDER
            .iter()
            .position(|s| *s == StepName::UpdateMastery)
            .unwrap();
        assert!(classify < mastery);
    }
}
