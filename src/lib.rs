pub mod cache;
pub mod config;
pub mod core;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod tutor;

pub use pipeline::{TurnPipeline, TurnState};
pub use services::{TurnRequest, TurnResponse, TutorService};
