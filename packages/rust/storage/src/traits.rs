//! Persistence seams used by the assessment pipeline.
//!
//! Both traits are object-safe so the orchestrator can hold
//! `Arc<dyn RunStore>` and tests can substitute fault-injecting stores.

use async_trait::async_trait;

use aivis_shared::{
    AssessmentRun, CompanyRecord, CompetitorSnapshot, KnowledgeItem, Progress, Question,
    QuestionAnalysis, Result, RunId, RunSummary,
};

/// Durable record of assessment runs, their questions, and analyses.
///
/// Every write is scoped to one run id. Progress writes never lower the
/// stored percentage, and writes against a terminal run are rejected.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run in `pending` state.
    async fn create_run(&self, run: &AssessmentRun) -> Result<()>;

    /// Move a `pending` run to `running`.
    async fn mark_running(&self, run_id: &RunId, progress: &Progress) -> Result<()>;

    /// Store the context richness diagnostic for a run.
    async fn record_richness(&self, run_id: &RunId, richness_score: u32) -> Result<()>;

    /// Append the generated question batch and set `questions_total`.
    async fn insert_questions(
        &self,
        run_id: &RunId,
        questions: &[Question],
        progress: &Progress,
    ) -> Result<()>;

    /// Update progress on a `running` run.
    async fn update_progress(&self, run_id: &RunId, progress: &Progress) -> Result<()>;

    /// Store one analysis, mark its question answered, and checkpoint progress.
    async fn record_analysis(&self, analysis: &QuestionAnalysis, progress: &Progress)
    -> Result<()>;

    /// Mark one question failed and checkpoint progress.
    async fn record_question_failure(
        &self,
        run_id: &RunId,
        question_id: &str,
        reason: &str,
        progress: &Progress,
    ) -> Result<()>;

    /// Terminal write: `completed` with aggregates and competitor snapshots.
    async fn complete_run(
        &self,
        run_id: &RunId,
        summary: &RunSummary,
        snapshots: &[CompetitorSnapshot],
    ) -> Result<()>;

    /// Terminal write: `failed` with an error message.
    async fn fail_run(&self, run_id: &RunId, error_message: &str) -> Result<()>;

    async fn get_run(&self, run_id: &RunId) -> Result<Option<AssessmentRun>>;

    /// Questions of a run ordered by sequence.
    async fn list_questions(&self, run_id: &RunId) -> Result<Vec<Question>>;

    /// Analyses of a run ordered by question sequence, citations included.
    async fn list_analyses(&self, run_id: &RunId) -> Result<Vec<QuestionAnalysis>>;

    /// Competitor snapshots of a run ordered by rank.
    async fn list_competitor_snapshots(&self, run_id: &RunId) -> Result<Vec<CompetitorSnapshot>>;

    /// Runs for a company, newest first.
    async fn list_runs(&self, company_id: &str) -> Result<Vec<AssessmentRun>>;
}

/// Read access to stored company knowledge.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn get_company(&self, company_id: &str) -> Result<Option<CompanyRecord>>;

    /// All knowledge items for a company, oldest first.
    async fn list_knowledge_items(&self, company_id: &str) -> Result<Vec<KnowledgeItem>>;
}
