use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;

use super::state::{StepName, StepReport, TurnState, TurnUpdate};
use super::StepError;
use crate::cache::Cache;
use crate::config::TutorConfig;
use crate::core::{DeferredQueue, StepTelemetry, TelemetrySink};
use crate::services::{ContentGenerator, KnowledgeRetriever, PersistentStore, QualityClassifier};
use crate::tutor::{LearningPathEngine, RotationStore, SessionMemory};

/// External collaborators a pipeline is wired with.
#[derive(Clone)]
pub struct PipelineDeps {
    pub generator: Arc<dyn ContentGenerator>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub classifier: Arc<dyn QualityClassifier>,
    pub store: Arc<dyn PersistentStore>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
}

#[derive(Debug)]
pub enum StepOutcome {
    Applied(TurnUpdate),
    Failed(StepError),
}

#[derive(Clone)]
pub struct TurnPipeline {
    pub(super) config: Arc<TutorConfig>,
    pub(super) generator: Arc<dyn ContentGenerator>,
    pub(super) retriever: Arc<dyn KnowledgeRetriever>,
    pub(super) classifier: Arc<dyn QualityClassifier>,
    pub(super) store: Arc<dyn PersistentStore>,
    pub(super) telemetry: Option<Arc<dyn TelemetrySink>>,
    pub(super) cache: Cache,
    pub(super) session: SessionMemory,
    pub(super) engine: LearningPathEngine,
    pub(super) deferred: DeferredQueue,
}

impl TurnPipeline {
    pub fn new(config: TutorConfig, deps: PipelineDeps, cache: Cache) -> Self {
        let session = SessionMemory::new(
            cache.clone(),
            config.session_memory_turns,
            config.session_ttl,
        );
        let engine = LearningPathEngine::new(RotationStore::new(cache.clone(), config.rotation_ttl));
        Self {
            config: Arc::new(config),
            generator: deps.generator,
            retriever: deps.retriever,
            classifier: deps.classifier,
            store: deps.store,
            telemetry: deps.telemetry,
            cache,
            session,
            engine,
            deferred: DeferredQueue::new(),
        }
    }

    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn session(&self) -> &SessionMemory {
        &self.session
    }

    pub fn engine(&self) -> &LearningPathEngine {
        &self.engine
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Runs every step in order. Always returns a final state; failed steps
    /// leave their fields at the neutral defaults and mark the turn degraded.
    pub async fn run(&self, mut state: TurnState) -> TurnState {
        tracing::debug!(
            learner_id = %state.learner_id,
            topic_id = %state.topic_id,
            conversation_id = %state.conversation_id,
            trace_id = %state.trace_id,
            "turn started"
        );

        for step in StepName::ORDER {
            let started = Instant::now();
            let outcome = isolate(self.config.step_timeout, self.run_step(step, &state)).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match outcome {
                StepOutcome::Applied(update) => {
                    state.merge(update);
                    None
                }
                StepOutcome::Failed(err) => {
                    tracing::warn!(
                        step = step.as_str(),
                        learner_id = %state.learner_id,
                        topic_id = %state.topic_id,
                        conversation_id = %state.conversation_id,
                        trace_id = %state.trace_id,
                        error = %err,
                        "step failed, continuing with neutral output"
                    );
                    state.degraded = true;
                    Some(err.to_string())
                }
            };

            self.report(step, &state.trace_id, duration_ms, error.clone());
            state.step_reports.push(StepReport {
                step,
                duration_ms,
                success: error.is_none(),
                error,
            });
        }

        state
    }

    async fn run_step(&self, step: StepName, state: &TurnState) -> Result<TurnUpdate, StepError> {
        match step {
            StepName::LogInput => self.log_input(state).await,
            StepName::Validate => self.validate(state).await,
            StepName::RetrieveKnowledge => self.retrieve_knowledge(state).await,
            StepName::RetrieveMemory => self.retrieve_memory(state).await,
            StepName::Condense => self.condense(state).await,
            StepName::Classify => self.classify(state).await,
            StepName::Generate => self.generate(state).await,
            StepName::UpdateMastery => self.update_mastery(state).await,
            StepName::ComputeReadiness => self.compute_readiness(state).await,
            StepName::Decide => self.decide(state).await,
            StepName::LogOutput => self.log_output(state).await,
        }
    }

    fn report(&self, step: StepName, trace_id: &str, duration_ms: u64, error: Option<String>) {
        let Some(sink) = self.telemetry.clone() else {
            return;
        };
        let event = StepTelemetry {
            step: step.as_str(),
            trace_id: trace_id.to_string(),
            duration_ms,
            success: error.is_none(),
            error,
        };
        self.deferred.dispatch("step_telemetry", async move {
            sink.record(&event);
            Ok::<(), Infallible>(())
        });
    }
}

/// Drives one step to an explicit outcome: panics and budget overruns become
/// `Failed` instead of unwinding into the executor.
pub(super) async fn isolate<F>(budget: Duration, step: F) -> StepOutcome
where
    F: Future<Output = Result<TurnUpdate, StepError>>,
{
    let caught = AssertUnwindSafe(step).catch_unwind();
    let result = if budget.is_zero() {
        Ok(caught.await)
    } else {
        tokio::time::timeout(budget, caught).await
    };

    match result {
        Ok(Ok(Ok(update))) => StepOutcome::Applied(update),
        Ok(Ok(Err(err))) => StepOutcome::Failed(err),
        Ok(Err(payload)) => StepOutcome::Failed(StepError::Panicked(panic_message(payload))),
        Err(_) => StepOutcome::Failed(StepError::Timeout(budget)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
