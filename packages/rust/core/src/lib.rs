//! Core assessment pipeline and domain logic for aivis.
//!
//! This crate ties together the knowledge context, question generation,
//! the answer engine, and response analysis into one end-to-end
//! workflow ([`pipeline::Orchestrator`]).

pub mod aggregate;
pub mod analyzer;
pub mod context;
pub mod pipeline;
pub mod questions;
pub mod status;
pub mod urls;

pub use analyzer::{MentionMatcher, ResponseAnalyzer, analyze};
pub use context::build_context;
pub use pipeline::{
    AssessmentProgress, AssessmentRequest, Orchestrator, PipelineConfig, SilentProgress,
};
pub use questions::{QuestionDraft, QuestionOptions, QuestionStream, generate};
pub use status::{get_status, load_results};
