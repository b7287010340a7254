//! Shared types, error model, and configuration for aivis.
//!
//! This crate is the foundation depended on by all other aivis crates.
//! It provides:
//! - [`AivisError`]: the unified error type
//! - Domain types ([`AssessmentRun`], [`CompanyContext`], [`QuestionAnalysis`], [`RunId`])
//! - Configuration ([`AppConfig`], [`EngineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnswerEngineConfig, AppConfig, DefaultsConfig, EngineConfig, RetryConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_path,
};
pub use error::{AivisError, Result};
pub use types::{
    AssessmentResults, AssessmentRun, AssessmentStatus, Citation, CitationBucket, CitationStats,
    CompanyContext, CompanyRecord, Competitor, CompetitorSnapshot, KnowledgeItem, Progress,
    ProgressStage, Question, QuestionAnalysis, QuestionStatus, QuestionType, RunId, RunStatus,
    RunSummary,
};
