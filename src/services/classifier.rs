use async_trait::async_trait;

use super::llm_provider::{ChatRequest, LlmClient};
use super::CollaboratorError;
use crate::tutor::types::QualityLabel;

#[async_trait]
pub trait QualityClassifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<QualityLabel, CollaboratorError>;
}

const CONFUSION_MARKERS: &[&str] = &[
    "don't understand",
    "dont understand",
    "do not understand",
    "confused",
    "no idea",
    "i'm lost",
    "im lost",
    "makes no sense",
    "doesn't make sense",
];

const REASONING_MARKERS: &[&str] = &[
    "because",
    "therefore",
    "which means",
    "so that",
    "this implies",
    "since",
];

/// Offline classifier over the coarse good/neutral/confused labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn label_for(message: &str) -> QualityLabel {
        let lowered = message.to_lowercase();
        if CONFUSION_MARKERS.iter().any(|m| lowered.contains(m)) {
            QualityLabel::Confused
        } else if REASONING_MARKERS.iter().any(|m| lowered.contains(m)) {
            QualityLabel::Good
        } else {
            QualityLabel::Neutral
        }
    }
}

#[async_trait]
impl QualityClassifier for KeywordClassifier {
    async fn classify(&self, message: &str) -> Result<QualityLabel, CollaboratorError> {
        Ok(Self::label_for(message))
    }
}

pub struct LlmQualityClassifier {
    llm: LlmClient,
}

impl LlmQualityClassifier {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn system_prompt() -> String {
        let labels: Vec<&str> = QualityLabel::all()
            .iter()
            .filter(|l| {
                !matches!(
                    l,
                    QualityLabel::Good | QualityLabel::Neutral | QualityLabel::Confused
                )
            })
            .map(QualityLabel::as_str)
            .collect();
        format!(
            "Classify the reasoning quality of the learner's message. Reply with exactly one label from: {}, neutral.",
            labels.join(", ")
        )
    }
}

#[async_trait]
impl QualityClassifier for LlmQualityClassifier {
    async fn classify(&self, message: &str) -> Result<QualityLabel, CollaboratorError> {
        if !self.llm.is_configured() {
            return Err(CollaboratorError::Unavailable("llm not configured".to_string()));
        }
        let request = ChatRequest::new(Self::system_prompt(), message)
            .temperature(0.0)
            .max_tokens(8);
        let raw = self.llm.complete(&request).await?.text;
        let first_line = raw.lines().next().unwrap_or_default();
        QualityLabel::parse(first_line)
            .ok_or_else(|| CollaboratorError::UnexpectedOutput(format!("unknown label: {first_line}")))
    }
}
