pub mod classifier;
pub mod generator;
pub mod knowledge;
pub mod llm_provider;
pub mod store;
pub mod tutor;

use thiserror::Error;

pub use classifier::{KeywordClassifier, LlmQualityClassifier, QualityClassifier};
pub use generator::{ContentGenerator, Generation, GenerationContext, LlmContentGenerator, UsageMetadata};
pub use knowledge::{ConceptFilter, InMemoryKnowledgeBase, KnowledgeRetriever};
pub use store::{InMemoryStore, PersistentStore};
pub use tutor::{TurnRequest, TurnResponse, TutorService};

/// Failure of an external collaborator. Recovered at the call site.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("llm call failed: {0}")]
    Llm(#[from] llm_provider::LlmError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected output: {0}")]
    UnexpectedOutput(String),
}
