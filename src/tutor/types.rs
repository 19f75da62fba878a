use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of reasoning-quality labels a classifier may emit.
///
/// The fine-grained labels and the coarse `good`/`neutral`/`confused` set
/// share one enum so either classifier family plugs in unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Correct,
    Partial,
    MildConfusion,
    Wrong,
    HighConfusion,
    Misconception,
    Good,
    #[default]
    Neutral,
    Confused,
}

impl QualityLabel {
    pub fn all() -> &'static [QualityLabel] {
        &[
            QualityLabel::Correct,
            QualityLabel::Partial,
            QualityLabel::MildConfusion,
            QualityLabel::Wrong,
            QualityLabel::HighConfusion,
            QualityLabel::Misconception,
            QualityLabel::Good,
            QualityLabel::Neutral,
            QualityLabel::Confused,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Partial => "partial",
            Self::MildConfusion => "mild_confusion",
            Self::Wrong => "wrong",
            Self::HighConfusion => "high_confusion",
            Self::Misconception => "misconception",
            Self::Good => "good",
            Self::Neutral => "neutral",
            Self::Confused => "confused",
        }
    }

    /// Lenient parse of classifier output: case, spaces and hyphens are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.')
            .to_lowercase()
            .replace([' ', '-'], "_");
        Self::all()
            .iter()
            .copied()
            .find(|label| label.as_str() == normalized)
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pedagogical band, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessLevel {
    ReviewPrerequisites,
    NeedsReinforcement,
    AlmostReady,
    Ready,
}

impl ReadinessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReviewPrerequisites => "review_prerequisites",
            Self::NeedsReinforcement => "needs_reinforcement",
            Self::AlmostReady => "almost_ready",
            Self::Ready => "ready",
        }
    }
}

/// Aggregated readiness. `Unknown` is never produced from a non-empty set of levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverallReadiness {
    ReviewPrerequisites,
    NeedsReinforcement,
    AlmostReady,
    Ready,
    #[default]
    Unknown,
}

impl OverallReadiness {
    pub fn level(&self) -> Option<ReadinessLevel> {
        match self {
            Self::ReviewPrerequisites => Some(ReadinessLevel::ReviewPrerequisites),
            Self::NeedsReinforcement => Some(ReadinessLevel::NeedsReinforcement),
            Self::AlmostReady => Some(ReadinessLevel::AlmostReady),
            Self::Ready => Some(ReadinessLevel::Ready),
            Self::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.level() {
            Some(level) => level.as_str(),
            None => "unknown",
        }
    }
}

impl From<ReadinessLevel> for OverallReadiness {
    fn from(level: ReadinessLevel) -> Self {
        match level {
            ReadinessLevel::ReviewPrerequisites => Self::ReviewPrerequisites,
            ReadinessLevel::NeedsReinforcement => Self::NeedsReinforcement,
            ReadinessLevel::AlmostReady => Self::AlmostReady,
            ReadinessLevel::Ready => Self::Ready,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptReadiness {
    pub concept_id: String,
    pub mastery: f64,
    pub level: ReadinessLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSnapshot {
    pub concepts: Vec<ConceptReadiness>,
    pub overall: OverallReadiness,
    pub average_mastery: f64,
    pub minimum_mastery: f64,
}

impl ReadinessSnapshot {
    pub fn concept(&self, concept_id: &str) -> Option<&ConceptReadiness> {
        self.concepts.iter().find(|c| c.concept_id == concept_id)
    }

    pub fn is_usable(&self) -> bool {
        self.overall != OverallReadiness::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryUpdate {
    pub concept_id: String,
    pub delta: f64,
    pub reason: String,
    /// Score read before this turn's write was dispatched.
    pub previous: f64,
    pub updated: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConceptRelations {
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub next: Vec<String>,
}

impl ConceptRelations {
    pub fn is_empty(&self) -> bool {
        self.prerequisites.is_empty() && self.next.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathDecisionKind {
    ExploreTopic,
    LearnNextConcept,
    Reinforce,
    ReviewPrerequisite,
    Advance,
}

impl PathDecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExploreTopic => "explore_topic",
            Self::LearnNextConcept => "learn_next_concept",
            Self::Reinforce => "reinforce",
            Self::ReviewPrerequisite => "review_prerequisite",
            Self::Advance => "advance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionDetails {
    pub reason: String,
    pub readiness: OverallReadiness,
    pub focus_concept_id: Option<String>,
    pub rotation_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathDecision {
    pub decision: PathDecisionKind,
    pub recommended_concept_id: Option<String>,
    pub details: DecisionDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationStyle {
    #[default]
    Standard,
    Simple,
    Detailed,
    Socratic,
}

impl ExplanationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Simple => "simple",
            Self::Detailed => "detailed",
            Self::Socratic => "socratic",
        }
    }
}

/// One remembered exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTurn {
    pub message: String,
    pub response: String,
    pub label: QualityLabel,
    pub at: DateTime<Utc>,
}
