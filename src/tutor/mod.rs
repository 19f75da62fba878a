pub mod learning_path;
pub mod mastery;
pub mod readiness;
pub mod rotation;
pub mod session_memory;
pub mod types;

pub use learning_path::{ConceptGraph, LearningPathEngine};
pub use rotation::{RotationPick, RotationStore};
pub use session_memory::SessionMemory;
