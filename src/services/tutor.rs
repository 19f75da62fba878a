//! Turn entry point. Whatever happens inside, the caller gets a well-formed
//! [`TurnResponse`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    CollaboratorError, ContentGenerator, InMemoryKnowledgeBase, InMemoryStore, KeywordClassifier,
    LlmContentGenerator, LlmQualityClassifier, QualityClassifier,
};
use super::llm_provider::LlmClient;
use crate::cache::{keys, Cache};
use crate::config::TutorConfig;
use crate::core::{FanoutTelemetry, StepMetricsRegistry, StepStatus, TelemetrySink, TracingTelemetry};
use crate::pipeline::{
    derive_conversation_id, PipelineDeps, PipelineError, TurnPipeline, TurnState,
    FALLBACK_RESPONSE,
};
use crate::tutor::mastery::Stakes;
use crate::tutor::types::{
    ExplanationStyle, MasteryUpdate, PathDecision, QualityLabel, ReadinessSnapshot,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub learner_id: Option<String>,
    pub topic_id: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub style: Option<ExplanationStyle>,
    #[serde(default)]
    pub marks: Option<f64>,
    #[serde(default)]
    pub difficulty: Option<u8>,
}

impl TurnRequest {
    pub fn new(
        learner_id: impl Into<String>,
        topic_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            learner_id: Some(learner_id.into()),
            topic_id: Some(topic_id.into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Builds the initial turn state. The conversation id is derived from
    /// learner and topic when absent; the trace id is generated when absent.
    pub fn into_state(self) -> Result<TurnState, PipelineError> {
        let learner_id = required(self.learner_id, "learner_id")?;
        let topic_id = required(self.topic_id, "topic_id")?;
        let message = self.message.ok_or(PipelineError::MissingField("message"))?;

        let mut state = TurnState::new(learner_id, topic_id, message)
            .with_style(self.style.unwrap_or_default())
            .with_stakes(Stakes::new(self.marks, self.difficulty));
        if let Some(conversation_id) = self.conversation_id.filter(|c| !c.trim().is_empty()) {
            state = state.with_conversation_id(conversation_id);
        }
        if let Some(trace_id) = self.trace_id.filter(|t| !t.trim().is_empty()) {
            state = state.with_trace_id(trace_id);
        }
        Ok(state)
    }
}

/// Conversation id for a response to a request that never became a turn.
/// Blank ids are ignored the same way [`TurnRequest::into_state`] ignores them.
fn fallback_conversation_id(request: &TurnRequest) -> String {
    let explicit = request
        .conversation_id
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string);
    match (&request.learner_id, &request.topic_id) {
        (Some(learner), Some(topic)) => {
            explicit.unwrap_or_else(|| derive_conversation_id(learner.trim(), topic.trim()))
        }
        _ => explicit.unwrap_or_default(),
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PipelineError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(PipelineError::MissingField(field))
}

/// Same shape for normal and degraded turns; neutral values fill whatever a
/// failed step could not produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub response: String,
    pub reasoning_label: QualityLabel,
    pub mastery_updates: Vec<MasteryUpdate>,
    pub readiness: Option<ReadinessSnapshot>,
    pub decision: Option<PathDecision>,
    pub recommended_concept_id: Option<String>,
    pub conversation_id: String,
    pub trace_id: String,
    pub message_truncated: bool,
    pub degraded: bool,
}

impl TurnResponse {
    pub fn fallback(conversation_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            response: FALLBACK_RESPONSE.to_string(),
            reasoning_label: QualityLabel::Neutral,
            mastery_updates: Vec::new(),
            readiness: None,
            decision: None,
            recommended_concept_id: None,
            conversation_id: conversation_id.into(),
            trace_id: trace_id.into(),
            message_truncated: false,
            degraded: true,
        }
    }
}

impl From<TurnState> for TurnResponse {
    fn from(state: TurnState) -> Self {
        let response = state.response_text().to_string();
        let recommended_concept_id = state
            .decision
            .as_ref()
            .and_then(|d| d.recommended_concept_id.clone());
        Self {
            response,
            reasoning_label: state.label,
            mastery_updates: state.mastery_updates,
            readiness: state.readiness,
            decision: state.decision,
            recommended_concept_id,
            conversation_id: state.conversation_id,
            trace_id: state.trace_id,
            message_truncated: state.message_truncated,
            degraded: state.degraded,
        }
    }
}

pub struct TutorService {
    pipeline: TurnPipeline,
    metrics: Option<Arc<StepMetricsRegistry>>,
}

impl TutorService {
    pub fn new(pipeline: TurnPipeline) -> Self {
        Self {
            pipeline,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<StepMetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wires the concrete collaborators: redis or in-process cache, the JSON
    /// knowledge base, the LLM generator, and the LLM classifier when an API
    /// key is configured (keyword heuristics otherwise).
    pub async fn from_config(config: TutorConfig) -> Result<Self, CollaboratorError> {
        let cache = Cache::connect(config.redis_url.as_deref()).await;

        let knowledge = match config.knowledge_base_path.as_ref() {
            Some(path) => {
                let kb = InMemoryKnowledgeBase::load(path).await?;
                tracing::info!(path = %path.display(), topics = kb.topic_count(), "knowledge base loaded");
                kb
            }
            None => {
                tracing::warn!("KNOWLEDGE_BASE_PATH not set, knowledge base is empty");
                InMemoryKnowledgeBase::new()
            }
        };

        let llm = LlmClient::from_env();
        let classifier: Arc<dyn QualityClassifier> = if llm.is_configured() {
            Arc::new(LlmQualityClassifier::new(llm.clone()))
        } else {
            tracing::warn!("LLM not configured, using keyword classifier");
            Arc::new(KeywordClassifier)
        };
        let generator: Arc<dyn ContentGenerator> = Arc::new(LlmContentGenerator::new(llm));

        let metrics = Arc::new(StepMetricsRegistry::new());
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(FanoutTelemetry::new(vec![
            Arc::new(TracingTelemetry),
            Arc::clone(&metrics) as Arc<dyn TelemetrySink>,
        ]));

        let deps = PipelineDeps {
            generator,
            retriever: Arc::new(knowledge),
            classifier,
            store: Arc::new(InMemoryStore::new()),
            telemetry: Some(telemetry),
        };

        tracing::info!(cache = cache.backend_name(), "tutor service ready");
        Ok(Self::new(TurnPipeline::new(config, deps, cache)).with_metrics(metrics))
    }

    pub fn pipeline(&self) -> &TurnPipeline {
        &self.pipeline
    }

    /// Processes one turn. Never fails: a request missing required fields,
    /// a crashed run, or a run over the turn budget all produce the fallback
    /// response.
    pub async fn process_turn(&self, request: TurnRequest) -> TurnResponse {
        let fallback_conversation = fallback_conversation_id(&request);

        let state = match request.into_state() {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(error = %err, "turn rejected, returning fallback");
                return TurnResponse::fallback(fallback_conversation, uuid::Uuid::new_v4().to_string());
            }
        };

        let conversation_id = state.conversation_id.clone();
        let trace_id = state.trace_id.clone();
        match self.run(state).await {
            Ok(state) => TurnResponse::from(state),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    conversation_id = %conversation_id,
                    trace_id = %trace_id,
                    "pipeline failed, returning fallback"
                );
                TurnResponse::fallback(conversation_id, trace_id)
            }
        }
    }

    async fn run(&self, state: TurnState) -> Result<TurnState, PipelineError> {
        let pipeline = self.pipeline.clone();
        let budget = self.pipeline.config().turn_timeout;
        let handle = tokio::spawn(async move { pipeline.run(state).await });

        if budget.is_zero() {
            return Ok(handle.await?);
        }
        match tokio::time::timeout(budget, handle).await {
            Ok(joined) => Ok(joined?),
            Err(_) => Err(PipelineError::Timeout(budget)),
        }
    }

    /// Last readiness snapshot written for the pair, while it is fresh.
    pub async fn cached_readiness(
        &self,
        learner_id: &str,
        topic_id: &str,
    ) -> Option<ReadinessSnapshot> {
        self.pipeline
            .cache()
            .get(&keys::readiness_key(learner_id, topic_id))
            .await
    }

    pub fn metrics(&self) -> Vec<StepStatus> {
        self.metrics
            .as_ref()
            .map(|m| m.snapshot())
            .unwrap_or_default()
    }

    /// Waits for every deferred write dispatched so far.
    pub async fn shutdown(&self) {
        let deferred = self.pipeline.deferred();
        tracing::info!(in_flight = deferred.in_flight(), "draining deferred writes");
        deferred.wait_idle().await;
    }
}
