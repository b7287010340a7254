//! Core domain types for AI visibility assessments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AivisError;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for assessment run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Kind of probe question sent to the answer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Asks about the company by name.
    DirectConversational,
    /// Puts the company next to a named competitor.
    Comparison,
    /// Asks about the category without naming the company.
    Indirect,
    /// Asks how to solve a use case or pain point.
    UseCase,
    /// Asks on behalf of a target persona.
    Persona,
    /// Asks for alternatives to a competitor.
    Alternatives,
}

impl QuestionType {
    /// Every question type, in default generation order.
    pub const ALL: [QuestionType; 6] = [
        Self::DirectConversational,
        Self::Comparison,
        Self::Indirect,
        Self::UseCase,
        Self::Persona,
        Self::Alternatives,
    ];

    /// Stable storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectConversational => "direct_conversational",
            Self::Comparison => "comparison",
            Self::Indirect => "indirect",
            Self::UseCase => "use_case",
            Self::Persona => "persona",
            Self::Alternatives => "alternatives",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = AivisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| AivisError::validation(format!("unknown question type '{s}'")))
    }
}

/// Lifecycle status of an assessment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal runs are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AivisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AivisError::validation(format!("unknown run status '{other}'"))),
        }
    }
}

/// Coarse pipeline stage shown alongside the progress percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Setup,
    Questions,
    Querying,
    Analyzing,
    Complete,
    Error,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Questions => "questions",
            Self::Querying => "querying",
            Self::Analyzing => "analyzing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStage {
    type Err = AivisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setup" => Ok(Self::Setup),
            "questions" => Ok(Self::Questions),
            "querying" => Ok(Self::Querying),
            "analyzing" => Ok(Self::Analyzing),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            other => Err(AivisError::validation(format!(
                "unknown progress stage '{other}'"
            ))),
        }
    }
}

/// Per-question processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Failed,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QuestionStatus {
    type Err = AivisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "answered" => Ok(Self::Answered),
            "failed" => Ok(Self::Failed),
            other => Err(AivisError::validation(format!(
                "unknown question status '{other}'"
            ))),
        }
    }
}

/// Ownership relationship between a cited source and the assessed company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationBucket {
    /// The company's primary domain.
    Owned,
    /// A company-controlled subdomain or property.
    Operated,
    /// Unaffiliated third party.
    Earned,
    /// A competitor's domain.
    Competitor,
}

impl CitationBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Operated => "operated",
            Self::Earned => "earned",
            Self::Competitor => "competitor",
        }
    }
}

impl fmt::Display for CitationBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationBucket {
    type Err = AivisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owned" => Ok(Self::Owned),
            "operated" => Ok(Self::Operated),
            "earned" => Ok(Self::Earned),
            "competitor" => Ok(Self::Competitor),
            other => Err(AivisError::validation(format!(
                "unknown citation bucket '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Company knowledge
// ---------------------------------------------------------------------------

/// Stored company identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: String,
    pub name: String,
    /// Primary domain, e.g. `acme.dev`.
    pub domain: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_model: Option<String>,
}

/// A loosely-typed fact about a company, as stored in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub company_id: String,
    /// Free-form category name (`competitors`, `personas`, ...).
    pub category: String,
    /// Arbitrary JSON payload; shape varies by category and source.
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A competitor named in the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Typed snapshot of everything known about a company, built fresh per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyContext {
    pub company_id: String,
    pub name: String,
    pub domain: String,
    pub aliases: Vec<String>,
    pub industry: Option<String>,
    pub business_model: Option<String>,
    pub overview: Vec<String>,
    pub positioning: Vec<String>,
    pub pain_points: Vec<String>,
    pub product_features: Vec<String>,
    pub use_cases: Vec<String>,
    pub brand_voice: Vec<String>,
    pub competitors: Vec<Competitor>,
    /// Company-controlled properties off the primary domain (`github.com/acme`).
    pub operated_properties: Vec<String>,
    pub personas: Vec<String>,
    pub keywords: Vec<String>,
    pub value_propositions: Vec<String>,
    /// Diagnostic measure of available knowledge, 0–100.
    pub richness_score: u32,
}

// ---------------------------------------------------------------------------
// Questions and analyses
// ---------------------------------------------------------------------------

/// A probe question belonging to one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub run_id: RunId,
    /// 1-based position within the run.
    pub sequence: u32,
    pub question_type: QuestionType,
    pub text: String,
    pub status: QuestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// A cited source attached to one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub bucket: CitationBucket,
    /// Prominence within the answer, 0–1.
    pub influence: f64,
    /// Topical overlap with the question, 0–1.
    pub relevance: f64,
}

/// Analysis of one answer-engine response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    pub id: String,
    pub question_id: String,
    pub run_id: RunId,
    pub answer_text: String,
    pub mention_detected: bool,
    /// Names of competitors the answer mentions.
    #[serde(default)]
    pub competitor_mentions: Vec<String>,
    pub citations: Vec<Citation>,
    /// 0–100.
    pub score: f64,
    pub analyzed_at: DateTime<Utc>,
}

/// Citation totals for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationStats {
    pub total: usize,
    pub owned: usize,
    pub operated: usize,
    pub earned: usize,
    pub competitor: usize,
    pub avg_influence: f64,
    pub avg_relevance: f64,
}

/// Per-competitor benchmark for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSnapshot {
    pub run_id: RunId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub mention_count: usize,
    pub citation_count: usize,
    /// 0–100.
    pub visibility_score: f64,
    /// 1 = most visible.
    pub rank: u32,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// A durable progress checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub percentage: u8,
    pub stage: ProgressStage,
    pub message: String,
}

impl Progress {
    pub fn new(percentage: u8, stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            percentage: percentage.min(100),
            stage,
            message: message.into(),
        }
    }
}

/// Aggregates written when a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_score: f64,
    pub mention_rate: f64,
    pub questions_total: usize,
    pub questions_analyzed: usize,
    pub questions_failed: usize,
    pub citation_stats: CitationStats,
    pub message: String,
}

/// The aggregate root of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRun {
    pub id: RunId,
    pub company_id: String,
    pub status: RunStatus,
    pub progress_percentage: u8,
    pub progress_stage: ProgressStage,
    pub progress_message: String,
    pub total_score: Option<f64>,
    pub mention_rate: Option<f64>,
    pub questions_total: usize,
    pub questions_analyzed: usize,
    pub questions_failed: usize,
    pub citation_stats: Option<CitationStats>,
    pub richness_score: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl AssessmentRun {
    /// A freshly requested run, not yet picked up by the orchestrator.
    pub fn pending(company_id: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            company_id: company_id.into(),
            status: RunStatus::Pending,
            progress_percentage: 0,
            progress_stage: ProgressStage::Setup,
            progress_message: "Assessment queued".into(),
            total_score: None,
            mention_rate: None,
            questions_total: 0,
            questions_analyzed: 0,
            questions_failed: 0,
            citation_stats: None,
            richness_score: None,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// Status-poll view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentStatus {
    pub run_id: RunId,
    pub status: RunStatus,
    pub progress_percentage: u8,
    pub progress_stage: ProgressStage,
    pub progress_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// True once the full result bundle can be loaded.
    pub results_ready: bool,
}

impl From<&AssessmentRun> for AssessmentStatus {
    fn from(run: &AssessmentRun) -> Self {
        Self {
            run_id: run.id.clone(),
            status: run.status,
            progress_percentage: run.progress_percentage,
            progress_stage: run.progress_stage,
            progress_message: run.progress_message.clone(),
            error_message: run.error_message.clone(),
            results_ready: run.status == RunStatus::Completed,
        }
    }
}

/// Everything needed to display a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResults {
    pub run: AssessmentRun,
    pub questions: Vec<Question>,
    pub analyses: Vec<QuestionAnalysis>,
    pub competitors: Vec<CompetitorSnapshot>,
}
