use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::llm_provider::{ChatRequest, LlmClient};
use super::CollaboratorError;
use crate::tutor::types::{Concept, ExplanationStyle, QualityLabel};

/// Everything retrieved for a turn that the generator may draw on.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationContext {
    pub topic_id: String,
    pub content: String,
    pub concepts: Vec<Concept>,
    pub history: String,
    pub style: ExplanationStyle,
    pub label: QualityLabel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub model: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: UsageMetadata,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        message: &str,
        context: &GenerationContext,
    ) -> Result<Generation, CollaboratorError>;

    /// Condenses conversation history. Generators that cannot summarize
    /// report `Unavailable` and the caller truncates instead.
    async fn summarize(&self, _history: &str, _max_chars: usize) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable(
            "summarization not supported".to_string(),
        ))
    }
}

pub struct LlmContentGenerator {
    llm: LlmClient,
}

impl LlmContentGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn ensure_configured(&self) -> Result<(), CollaboratorError> {
        if self.llm.is_configured() {
            Ok(())
        } else {
            Err(CollaboratorError::Unavailable("llm not configured".to_string()))
        }
    }

    fn system_prompt(context: &GenerationContext) -> String {
        let mut prompt = format!(
            "You are a patient tutor. Explanation style: {}. The learner's latest reasoning was assessed as: {}.",
            context.style.as_str(),
            context.label
        );
        if !context.concepts.is_empty() {
            prompt.push_str("\nRelevant concepts:");
            for concept in &context.concepts {
                prompt.push_str(&format!("\n- {}: {}", concept.name, concept.description));
            }
        }
        if !context.content.is_empty() {
            prompt.push_str("\nReference material:\n");
            prompt.push_str(&context.content);
        }
        if !context.history.is_empty() {
            prompt.push_str("\nConversation so far:\n");
            prompt.push_str(&context.history);
        }
        prompt
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate(
        &self,
        message: &str,
        context: &GenerationContext,
    ) -> Result<Generation, CollaboratorError> {
        self.ensure_configured()?;
        let request = ChatRequest::new(Self::system_prompt(context), message);
        let completion = self.llm.complete(&request).await?;
        Ok(Generation {
            text: completion.text,
            usage: completion.usage,
        })
    }

    async fn summarize(&self, history: &str, max_chars: usize) -> Result<String, CollaboratorError> {
        self.ensure_configured()?;
        let system = format!(
            "Summarize this tutoring conversation in at most {max_chars} characters, keeping open questions and misconceptions."
        );
        let request = ChatRequest::new(system, history).temperature(0.2);
        let summary = self.llm.complete(&request).await?;
        Ok(summary.text.chars().take(max_chars).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_provider::LlmConfig;

    #[test]
    fn prompt_includes_available_context() {
        let context = GenerationContext {
            topic_id: "fractions".to_string(),
            content: "A fraction has a numerator and a denominator.".to_string(),
            concepts: vec![Concept {
                id: "c1".to_string(),
                name: "Equivalent fractions".to_string(),
                description: "Same value, different form".to_string(),
            }],
            history: String::new(),
            style: ExplanationStyle::Socratic,
            label: QualityLabel::Partial,
        };
        let prompt = LlmContentGenerator::system_prompt(&context);
        assert!(prompt.contains("socratic"));
        assert!(prompt.contains("partial"));
        assert!(prompt.contains("Equivalent fractions"));
        assert!(prompt.contains("numerator"));
        assert!(!prompt.contains("Conversation so far"));
    }

    #[tokio::test]
    async fn unconfigured_llm_is_unavailable() {
        let generator = LlmContentGenerator::new(LlmClient::new(LlmConfig::default()));
        let err = generator
            .generate("hello", &GenerationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));

        let err = generator.summarize("Learner: hi", 100).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }
}
