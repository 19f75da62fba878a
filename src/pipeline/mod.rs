//! Turn-processing pipeline.
//!
//! One [`TurnState`] per inbound turn, owned by a single run. Steps execute
//! in the fixed order of [`StepName::ORDER`]; each returns a partial
//! [`TurnUpdate`] that is merged before the next step starts. A failed step
//! contributes nothing and the turn carries on.

mod executor;
mod state;
mod steps;

use std::time::Duration;

use thiserror::Error;

pub use executor::{PipelineDeps, StepOutcome, TurnPipeline};
pub use state::{
    derive_conversation_id, StepName, StepReport, TurnState, TurnUpdate, FALLBACK_RESPONSE,
};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("step exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("step panicked: {0}")]
    Panicked(String),
    #[error("dependency unavailable: {0}")]
    Dependency(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// The executor could not produce a final state; callers answer with the
/// fixed fallback response.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("turn exceeded its {0:?} budget")]
    Timeout(Duration),
}
