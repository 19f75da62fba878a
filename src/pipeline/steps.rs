//! The eleven turn steps. Each reads the running state and returns only the
//! fields it owns; external calls go through the timeout guard and writes go
//! through the deferred queue.

use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use super::executor::TurnPipeline;
use super::state::{TurnState, TurnUpdate, FALLBACK_RESPONSE};
use super::StepError;
use crate::cache::keys;
use crate::core::{guarded_outcome, GuardOutcome};
use crate::services::store::{MasteryRecord, MessageRecord, MessageRole, TrendRecord, WeaknessRecord};
use crate::services::{ConceptFilter, GenerationContext};
use crate::tutor::learning_path::focus_concept;
use crate::tutor::mastery::{apply_delta, compute_delta, describe_delta, BASELINE_MASTERY};
use crate::tutor::readiness::compute_snapshot;
use crate::tutor::session_memory::{render_history, truncate_history};
use crate::tutor::types::{MasteryUpdate, MemoryTurn, QualityLabel};
use crate::tutor::ConceptGraph;

impl TurnPipeline {
    pub(super) async fn log_input(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let record = MessageRecord {
            conversation_id: state.conversation_id.clone(),
            sequence: state.started_at.timestamp_micros(),
            trace_id: state.trace_id.clone(),
            learner_id: state.learner_id.clone(),
            topic_id: state.topic_id.clone(),
            role: MessageRole::Learner,
            content: state.message.clone(),
            label: None,
            created_at: state.started_at,
        };
        let store = Arc::clone(&self.store);
        self.deferred
            .dispatch("log_input", async move { store.upsert_message(record).await });
        Ok(TurnUpdate::empty())
    }

    /// Oversized messages are cut on a char boundary, never rejected.
    pub(super) async fn validate(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let trimmed = state.message.trim();
        let max = self.config.max_message_chars;

        if max > 0 && trimmed.chars().count() > max {
            tracing::info!(
                trace_id = %state.trace_id,
                max_chars = max,
                "message truncated"
            );
            return Ok(TurnUpdate {
                message: Some(trimmed.chars().take(max).collect()),
                message_truncated: true,
                ..TurnUpdate::empty()
            });
        }

        Ok(TurnUpdate {
            message: Some(trimmed.to_string()),
            ..TurnUpdate::empty()
        })
    }

    pub(super) async fn retrieve_knowledge(
        &self,
        state: &TurnState,
    ) -> Result<TurnUpdate, StepError> {
        let budget = self.config.lookup_timeout;
        let topic_filter = ConceptFilter::topic(state.topic_id.clone());

        let matched = {
            let retriever = Arc::clone(&self.retriever);
            let query = state.message.clone();
            let filter = topic_filter
                .clone()
                .with_limit(self.config.max_mastery_concepts.max(1));
            guarded_outcome("retrieve_concepts", budget, async move {
                if query.is_empty() {
                    return Ok(Vec::new());
                }
                retriever.retrieve_concepts(&query, &filter).await
            })
        };
        let topic_concepts = {
            let retriever = Arc::clone(&self.retriever);
            guarded_outcome("retrieve_topic_concepts", budget, async move {
                retriever.retrieve_concepts("", &topic_filter).await
            })
        };
        let content = {
            let retriever = Arc::clone(&self.retriever);
            let topic_id = state.topic_id.clone();
            guarded_outcome("retrieve_content", budget, async move {
                retriever.retrieve_content(&topic_id).await
            })
        };

        let (matched, topic_concepts, content) = tokio::join!(matched, topic_concepts, content);
        let degraded =
            !(matched.is_completed() && topic_concepts.is_completed() && content.is_completed());

        let matched = matched.unwrap_or_default();
        let mut topic_ids: Vec<String> = topic_concepts
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.id)
            .chain(matched.iter().map(|c| c.id.clone()))
            .collect();
        topic_ids.sort();
        topic_ids.dedup();

        tracing::debug!(
            trace_id = %state.trace_id,
            matched = matched.len(),
            topic_concepts = topic_ids.len(),
            "knowledge retrieved"
        );

        Ok(TurnUpdate {
            content: Some(content.unwrap_or_default()),
            concepts: Some(matched),
            topic_concept_ids: Some(topic_ids),
            degraded,
            ..TurnUpdate::empty()
        })
    }

    pub(super) async fn retrieve_memory(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let memory = self.session.clone();
        let conversation_id = state.conversation_id.clone();
        let outcome = guarded_outcome("retrieve_memory", self.config.lookup_timeout, async move {
            Ok::<_, Infallible>(memory.recent(&conversation_id).await)
        })
        .await;

        let degraded = !outcome.is_completed();
        Ok(TurnUpdate {
            history: Some(outcome.unwrap_or_default()),
            degraded,
            ..TurnUpdate::empty()
        })
    }

    /// History over the limit is summarized by the generator, or truncated to
    /// the newest turns when summarizing is unavailable.
    pub(super) async fn condense(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let rendered = render_history(&state.history);
        let max = self.config.max_history_chars;
        if max == 0 || rendered.chars().count() <= max {
            return Ok(TurnUpdate {
                condensed_history: Some(rendered),
                ..TurnUpdate::empty()
            });
        }

        let generator = Arc::clone(&self.generator);
        let summary = guarded_outcome("summarize_history", self.config.lookup_timeout, async move {
            generator.summarize(&rendered, max).await
        })
        .await;

        let condensed = match summary {
            GuardOutcome::Completed(text) if !text.trim().is_empty() => {
                text.trim().chars().take(max).collect()
            }
            _ => {
                tracing::debug!(trace_id = %state.trace_id, "summary unavailable, truncating history");
                truncate_history(&state.history, max)
            }
        };

        Ok(TurnUpdate {
            condensed_history: Some(condensed),
            history_condensed: true,
            ..TurnUpdate::empty()
        })
    }

    /// With no concept to attribute the message to there is nothing to grade.
    pub(super) async fn classify(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        if state.concepts.is_empty() || state.message.is_empty() {
            return Ok(TurnUpdate {
                label: Some(QualityLabel::Neutral),
                ..TurnUpdate::empty()
            });
        }

        let classifier = Arc::clone(&self.classifier);
        let message = state.message.clone();
        let outcome = guarded_outcome("classify", self.config.classify_timeout, async move {
            classifier.classify(&message).await
        })
        .await;

        let degraded = !outcome.is_completed();
        Ok(TurnUpdate {
            label: Some(outcome.unwrap_or(QualityLabel::Neutral)),
            degraded,
            ..TurnUpdate::empty()
        })
    }

    pub(super) async fn generate(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let context = GenerationContext {
            topic_id: state.topic_id.clone(),
            content: state.content.clone(),
            concepts: state.concepts.clone(),
            history: state.condensed_history.clone(),
            style: state.style,
            label: state.label,
        };
        let generator = Arc::clone(&self.generator);
        let message = state.message.clone();
        let outcome = guarded_outcome("generate", self.config.generation_timeout, async move {
            generator.generate(&message, &context).await
        })
        .await;

        match outcome {
            GuardOutcome::Completed(generation) if !generation.text.trim().is_empty() => {
                Ok(TurnUpdate {
                    response: Some(generation.text),
                    usage: Some(generation.usage),
                    ..TurnUpdate::empty()
                })
            }
            _ => Ok(TurnUpdate {
                response: Some(FALLBACK_RESPONSE.to_string()),
                degraded: true,
                ..TurnUpdate::empty()
            }),
        }
    }

    /// One update per matched concept. The score each update starts from is
    /// carried in the update so readiness never reads back this turn's write.
    pub(super) async fn update_mastery(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let delta = compute_delta(state.label, state.stakes);
        if delta == 0.0 || state.concepts.is_empty() {
            return Ok(TurnUpdate {
                mastery_updates: Some(Vec::new()),
                ..TurnUpdate::empty()
            });
        }

        let budget = self.config.lookup_timeout;
        let reads = state.concepts.iter().map(|concept| {
            let store = Arc::clone(&self.store);
            let learner_id = state.learner_id.clone();
            let concept_id = concept.id.clone();
            async move {
                let lookup_id = concept_id.clone();
                let outcome = guarded_outcome("read_mastery", budget, async move {
                    store.get_mastery(&learner_id, &lookup_id).await
                })
                .await;
                (concept_id, outcome)
            }
        });

        let reason = describe_delta(state.label, state.stakes);
        let now = Utc::now();
        let mut degraded = false;
        let mut updates = Vec::with_capacity(state.concepts.len());

        for (concept_id, outcome) in join_all(reads).await {
            let previous = match outcome {
                GuardOutcome::Completed(score) => score.unwrap_or(BASELINE_MASTERY),
                _ => {
                    tracing::warn!(
                        trace_id = %state.trace_id,
                        learner_id = %state.learner_id,
                        concept_id = %concept_id,
                        "mastery unreadable, skipping update"
                    );
                    degraded = true;
                    continue;
                }
            };
            let updated = apply_delta(previous, delta);
            self.persist_mastery(state, &concept_id, updated, delta, &reason, now);
            updates.push(MasteryUpdate {
                concept_id,
                delta,
                reason: reason.clone(),
                previous,
                updated,
            });
        }

        Ok(TurnUpdate {
            mastery_updates: Some(updates),
            degraded,
            ..TurnUpdate::empty()
        })
    }

    fn persist_mastery(
        &self,
        state: &TurnState,
        concept_id: &str,
        score: f64,
        delta: f64,
        reason: &str,
        now: chrono::DateTime<Utc>,
    ) {
        let mastery = MasteryRecord {
            learner_id: state.learner_id.clone(),
            concept_id: concept_id.to_string(),
            score,
            updated_at: now,
        };
        let store = Arc::clone(&self.store);
        self.deferred
            .dispatch("upsert_mastery", async move { store.upsert_mastery(mastery).await });

        let trend = TrendRecord {
            learner_id: state.learner_id.clone(),
            concept_id: concept_id.to_string(),
            score,
            delta,
            reason: reason.to_string(),
            recorded_at: now,
        };
        let store = Arc::clone(&self.store);
        self.deferred
            .dispatch("insert_trend", async move { store.insert_trend(trend).await });

        if delta < 0.0 {
            let weakness = WeaknessRecord {
                learner_id: state.learner_id.clone(),
                concept_id: concept_id.to_string(),
                label: state.label.as_str().to_string(),
                score,
                occurrences: 1,
                last_seen_at: now,
            };
            let store = Arc::clone(&self.store);
            self.deferred
                .dispatch("upsert_weakness", async move { store.upsert_weakness(weakness).await });
        }
    }

    pub(super) async fn compute_readiness(
        &self,
        state: &TurnState,
    ) -> Result<TurnUpdate, StepError> {
        let store = Arc::clone(&self.store);
        let learner_id = state.learner_id.clone();
        let concept_ids = state.topic_concept_ids.clone();
        let pending = state.mastery_updates.clone();
        let outcome = guarded_outcome("compute_readiness", self.config.lookup_timeout, async move {
            Ok::<_, Infallible>(
                compute_snapshot(store.as_ref(), &learner_id, &concept_ids, &pending).await,
            )
        })
        .await;

        let GuardOutcome::Completed(snapshot) = outcome else {
            return Ok(TurnUpdate {
                degraded: true,
                ..TurnUpdate::empty()
            });
        };

        if snapshot.is_usable() {
            let cache = self.cache.clone();
            let key = keys::readiness_key(&state.learner_id, &state.topic_id);
            let ttl = self.config.readiness_ttl;
            let cached = snapshot.clone();
            self.deferred.dispatch("cache_readiness", async move {
                cache.set(&key, &cached, ttl).await;
                Ok::<(), Infallible>(())
            });
        }

        Ok(TurnUpdate {
            readiness: Some(snapshot),
            ..TurnUpdate::empty()
        })
    }

    pub(super) async fn decide(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let mut graph = ConceptGraph::new();
        let mut degraded = false;

        let focus = state
            .readiness
            .as_ref()
            .and_then(focus_concept)
            .map(str::to_string);
        if let Some(focus) = focus {
            let retriever = Arc::clone(&self.retriever);
            let lookup_id = focus.clone();
            let outcome = guarded_outcome("concept_relations", self.config.lookup_timeout, async move {
                retriever.concept_relations(&lookup_id).await
            })
            .await;
            degraded = !outcome.is_completed();
            graph.insert(focus, outcome.unwrap_or_default());
        }

        let decision = self
            .engine
            .decide(
                &state.learner_id,
                &state.topic_id,
                state.readiness.as_ref(),
                &state.topic_concept_ids,
                &graph,
            )
            .await;

        tracing::debug!(
            trace_id = %state.trace_id,
            decision = decision.decision.as_str(),
            concept_id = decision.recommended_concept_id.as_deref().unwrap_or(""),
            "next step decided"
        );

        Ok(TurnUpdate {
            decision: Some(decision),
            degraded,
            ..TurnUpdate::empty()
        })
    }

    pub(super) async fn log_output(&self, state: &TurnState) -> Result<TurnUpdate, StepError> {
        let response = state.response_text().to_string();
        let now = Utc::now();

        let record = MessageRecord {
            conversation_id: state.conversation_id.clone(),
            sequence: state.started_at.timestamp_micros() + 1,
            trace_id: state.trace_id.clone(),
            learner_id: state.learner_id.clone(),
            topic_id: state.topic_id.clone(),
            role: MessageRole::Tutor,
            content: response.clone(),
            label: Some(state.label.as_str().to_string()),
            created_at: now,
        };
        let store = Arc::clone(&self.store);
        self.deferred
            .dispatch("log_output", async move { store.upsert_message(record).await });

        let memory = self.session.clone();
        let conversation_id = state.conversation_id.clone();
        let turn = MemoryTurn {
            message: state.message.clone(),
            response,
            label: state.label,
            at: now,
        };
        self.deferred.dispatch("session_memory", async move {
            memory.append(&conversation_id, turn).await;
            Ok::<(), Infallible>(())
        });

        tracing::info!(
            learner_id = %state.learner_id,
            topic_id = %state.topic_id,
            trace_id = %state.trace_id,
            label = state.label.as_str(),
            mastery_updates = state.mastery_updates.len(),
            degraded = state.degraded,
            "turn completed"
        );
        Ok(TurnUpdate::empty())
    }
}
