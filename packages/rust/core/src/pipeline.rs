//! End-to-end assessment: self-test → context → questions → query → aggregate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use aivis_engine::{AnswerEngine, RawAnswer, RetryPolicy};
use aivis_shared::{
    AivisError, AppConfig, AssessmentResults, AssessmentRun, CompanyContext, Progress,
    ProgressStage, Question, QuestionAnalysis, QuestionType, Result, RunId, RunStatus,
};
use aivis_storage::{KnowledgeSource, RunStore};

use crate::aggregate;
use crate::analyzer::ResponseAnalyzer;
use crate::context::build_context;
use crate::questions::{self, QuestionOptions};
use crate::status::load_results;

/// Progress checkpoints, in percent.
const SETUP_PCT: u8 = 5;
const QUESTIONS_PCT: u8 = 10;
const QUERY_SPAN_PCT: usize = 80;
const ANALYZING_PCT: u8 = 95;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum answer engine calls in flight per run.
    pub concurrency: usize,
    /// Budget for one question, retries included.
    pub question_timeout: Duration,
    pub retry: RetryPolicy,
    /// Question count when the request does not set one.
    pub question_count: usize,
    /// Question types when the request does not set them.
    pub allowed_types: Vec<QuestionType>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.defaults.concurrency,
            question_timeout: Duration::from_secs(config.answer_engine.question_timeout_secs),
            retry: RetryPolicy::from(&config.retry),
            question_count: config.defaults.question_count,
            allowed_types: config.defaults.allowed_types.clone(),
        }
    }
}

/// What to assess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentRequest {
    pub company_id: String,
    /// Display name; overrides the stored name when non-empty.
    pub company_name: String,
    /// Primary domain; overrides the stored domain when non-empty.
    pub company_domain: String,
    pub question_count: Option<usize>,
    pub allowed_types: Option<Vec<QuestionType>>,
}

impl AssessmentRequest {
    /// Request for a stored company using its stored identity and the
    /// configured defaults.
    pub fn for_company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            company_name: String::new(),
            company_domain: String::new(),
            question_count: None,
            allowed_types: None,
        }
    }

    fn apply_identity(&self, context: &mut CompanyContext) {
        let name = self.company_name.trim();
        if !name.is_empty() && name != context.name {
            let stored = std::mem::replace(&mut context.name, name.to_string());
            if !stored.is_empty() && !context.aliases.iter().any(|a| a.eq_ignore_ascii_case(&stored)) {
                context.aliases.push(stored);
            }
        }
        let domain = crate::urls::normalize_domain(&self.company_domain);
        if !domain.is_empty() {
            context.domain = domain;
        }
    }
}

/// Progress callback invoked after each durable checkpoint.
pub trait AssessmentProgress: Send + Sync {
    /// A checkpoint has been persisted.
    fn checkpoint(&self, run_id: &RunId, progress: &Progress);
    /// The run has been marked failed.
    fn failed(&self, run_id: &RunId, message: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl AssessmentProgress for SilentProgress {
    fn checkpoint(&self, _run_id: &RunId, _progress: &Progress) {}
    fn failed(&self, _run_id: &RunId, _message: &str) {}
}

/// Drives assessment runs from `pending` to a terminal state.
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    knowledge: Arc<dyn KnowledgeSource>,
    engine: Arc<dyn AnswerEngine>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        knowledge: Arc<dyn KnowledgeSource>,
        engine: Arc<dyn AnswerEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            knowledge,
            engine,
            config,
        }
    }

    /// Persist a new `pending` run.
    pub async fn create_run(&self, request: &AssessmentRequest) -> Result<RunId> {
        if request.company_id.trim().is_empty() {
            return Err(AivisError::validation("company id is required"));
        }
        if request.question_count == Some(0) {
            return Err(AivisError::validation("question count must be at least 1"));
        }
        let run = AssessmentRun::pending(request.company_id.trim());
        self.store.create_run(&run).await?;
        info!(run_id = %run.id, company = %run.company_id, "assessment run created");
        Ok(run.id)
    }

    /// Create a run and drive it to completion on the current task.
    pub async fn run(
        &self,
        request: &AssessmentRequest,
        progress: &dyn AssessmentProgress,
    ) -> Result<AssessmentResults> {
        let run_id = self.create_run(request).await?;
        self.execute(&run_id, request, progress).await
    }

    /// Create a run and drive it on a spawned task.
    ///
    /// Returns as soon as the run is persisted; callers poll
    /// [`crate::status::get_status`] or await the handle.
    pub async fn start(
        self: &Arc<Self>,
        request: AssessmentRequest,
        progress: Arc<dyn AssessmentProgress>,
    ) -> Result<(RunId, JoinHandle<Result<AssessmentResults>>)> {
        let run_id = self.create_run(&request).await?;
        let this = Arc::clone(self);
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            this.execute(&task_run_id, &request, progress.as_ref()).await
        });
        Ok((run_id, handle))
    }

    /// Drive an existing `pending` run to a terminal state.
    ///
    /// On any failure the run is marked `failed` (best effort) and the
    /// error is returned; analyses persisted before the failure remain.
    #[instrument(skip_all, fields(run_id = %run_id, company = %request.company_id))]
    pub async fn execute(
        &self,
        run_id: &RunId,
        request: &AssessmentRequest,
        progress: &dyn AssessmentProgress,
    ) -> Result<AssessmentResults> {
        let start = Instant::now();

        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AivisError::not_found(format!("run {run_id}")))?;
        if run.status != RunStatus::Pending {
            return Err(AivisError::validation(format!(
                "run {run_id} is {}, only pending runs can be executed",
                run.status.as_str()
            )));
        }

        // --- Phase 0: Self-test ---
        let report = self.engine.test_connectivity().await;
        if !report.success {
            let errors = report.errors.join("; ");
            self.fail(run_id, &format!("answer engine connectivity check failed: {errors}"), progress)
                .await;
            return Err(AivisError::Unavailable(errors));
        }
        debug!(latency_ms = report.latency_ms, "answer engine reachable");

        match self.drive(run_id, request, progress).await {
            Ok(results) => {
                info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    score = results.run.total_score.unwrap_or_default(),
                    "assessment completed"
                );
                Ok(results)
            }
            Err(e) => {
                self.fail(run_id, &e.to_string(), progress).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        run_id: &RunId,
        request: &AssessmentRequest,
        progress: &dyn AssessmentProgress,
    ) -> Result<AssessmentResults> {
        // --- Phase 1: Context ---
        let checkpoint = Progress::new(SETUP_PCT, ProgressStage::Setup, "Building company context");
        self.store.mark_running(run_id, &checkpoint).await?;
        progress.checkpoint(run_id, &checkpoint);

        let mut context = build_context(self.knowledge.as_ref(), &request.company_id).await?;
        request.apply_identity(&mut context);
        self.store
            .record_richness(run_id, context.richness_score)
            .await?;

        // --- Phase 2: Questions ---
        let options = QuestionOptions {
            count: request.question_count.unwrap_or(self.config.question_count),
            allowed_types: request
                .allowed_types
                .clone()
                .unwrap_or_else(|| self.config.allowed_types.clone()),
        };
        let questions: Vec<Question> = questions::generate(&context, &options)
            .map(|draft| draft.into_question(run_id))
            .collect();
        if questions.is_empty() {
            return Err(AivisError::validation(
                "no questions could be generated from the company knowledge for the requested types",
            ));
        }

        let checkpoint = Progress::new(
            QUESTIONS_PCT,
            ProgressStage::Questions,
            format!("Generated {} questions", questions.len()),
        );
        self.store
            .insert_questions(run_id, &questions, &checkpoint)
            .await?;
        progress.checkpoint(run_id, &checkpoint);
        info!(count = questions.len(), "questions generated");

        // --- Phase 3: Query + analyze ---
        let analyzer = Arc::new(ResponseAnalyzer::new(&context));
        let (analyses, failed) = self
            .query_all(run_id, &questions, analyzer, progress)
            .await?;

        if analyses.is_empty() {
            return Err(AivisError::Unavailable(format!(
                "all {} questions failed to get an answer",
                questions.len()
            )));
        }

        // --- Phase 4: Aggregate ---
        let checkpoint = Progress::new(ANALYZING_PCT, ProgressStage::Analyzing, "Aggregating results");
        self.store.update_progress(run_id, &checkpoint).await?;
        progress.checkpoint(run_id, &checkpoint);

        let summary = aggregate::summarize(questions.len(), &analyses, failed);
        let snapshots = aggregate::competitor_snapshots(run_id, &context, &analyses);
        self.store
            .complete_run(run_id, &summary, &snapshots)
            .await?;
        progress.checkpoint(
            run_id,
            &Progress::new(100, ProgressStage::Complete, summary.message.clone()),
        );

        load_results(self.store.as_ref(), run_id).await
    }

    /// Ask every question with bounded parallelism, persisting each result
    /// as it lands. Returns the analyses (in question order) and the
    /// number of failed questions.
    async fn query_all(
        &self,
        run_id: &RunId,
        questions: &[Question],
        analyzer: Arc<ResponseAnalyzer>,
        progress: &dyn AssessmentProgress,
    ) -> Result<(Vec<QuestionAnalysis>, usize)> {
        let total = questions.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for question in questions.iter().cloned() {
            let engine = Arc::clone(&self.engine);
            let analyzer = Arc::clone(&analyzer);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.config.retry.clone();
            let budget = self.config.question_timeout;

            tasks.spawn(async move {
                let outcome = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| AivisError::Unavailable(format!("query slots closed: {e}")))?;
                    let answer =
                        ask_with_budget(engine.as_ref(), &retry, budget, &question.text).await?;
                    Ok::<_, AivisError>(analyzer.analyze(&answer, &question))
                }
                .await;
                (question.id, outcome)
            });
        }

        let mut analyses = Vec::with_capacity(total);
        let mut failed = 0;
        let mut done = 0;

        while let Some(joined) = tasks.join_next().await {
            let (question_id, outcome) = joined
                .map_err(|e| AivisError::Unavailable(format!("query task aborted: {e}")))?;
            done += 1;
            let checkpoint = Progress::new(
                QUESTIONS_PCT + (QUERY_SPAN_PCT * done / total) as u8,
                ProgressStage::Querying,
                format!("Analyzed {done} of {total} questions"),
            );

            match outcome {
                Ok(analysis) => {
                    self.store.record_analysis(&analysis, &checkpoint).await?;
                    analyses.push(analysis);
                }
                Err(e) => {
                    warn!(question = %question_id, error = %e, "question failed");
                    failed += 1;
                    self.store
                        .record_question_failure(run_id, &question_id, &e.to_string(), &checkpoint)
                        .await?;
                }
            }
            progress.checkpoint(run_id, &checkpoint);
        }

        let order: HashMap<&str, u32> = questions
            .iter()
            .map(|q| (q.id.as_str(), q.sequence))
            .collect();
        analyses.sort_by_key(|a| order.get(a.question_id.as_str()).copied().unwrap_or(u32::MAX));
        Ok((analyses, failed))
    }

    async fn fail(&self, run_id: &RunId, message: &str, progress: &dyn AssessmentProgress) {
        warn!(%run_id, error = message, "assessment failed");
        match self.store.fail_run(run_id, message).await {
            Ok(()) => progress.failed(run_id, message),
            Err(e) => error!(%run_id, error = %e, "could not mark run failed"),
        }
    }
}

/// One question: retry-wrapped `ask` under a single time budget.
async fn ask_with_budget(
    engine: &dyn AnswerEngine,
    retry: &RetryPolicy,
    budget: Duration,
    question: &str,
) -> Result<RawAnswer> {
    let attempts = retry.run(|attempt| {
        debug!(attempt, "asking answer engine");
        engine.ask(question)
    });
    tokio::time::timeout(budget, attempts)
        .await
        .unwrap_or(Err(AivisError::Timeout(budget)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use aivis_engine::{ConnectivityReport, RawCitation};
    use aivis_shared::{
        CitationBucket, CompanyRecord, CompetitorSnapshot, QuestionStatus, RunSummary,
    };
    use aivis_storage::Storage;

    use super::*;
    use crate::status::get_status;

    /// Scripted answer engine.
    #[derive(Default)]
    struct FakeEngine {
        offline: bool,
        /// Question texts containing any of these always fail with a 503.
        failing: Vec<String>,
        /// Question texts containing any of these never answer in time.
        hanging: Vec<String>,
        calls: AtomicUsize,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl AnswerEngine for FakeEngine {
        async fn ask(&self, question: &str) -> Result<RawAnswer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hanging.iter().any(|h| question.contains(h.as_str())) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.failing.iter().any(|f| question.contains(f.as_str())) {
                return Err(AivisError::Upstream {
                    status: 503,
                    message: "overloaded".into(),
                });
            }
            Ok(RawAnswer {
                text: "Acme Corp is a strong option [1]. Riva is also popular [2].".into(),
                citations: vec![
                    RawCitation::new("https://acme.dev/blog"),
                    RawCitation::new("https://riva.ai/compare"),
                ],
            })
        }

        async fn test_connectivity(&self) -> ConnectivityReport {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.offline {
                ConnectivityReport::from_errors(vec!["answer engine API key is not set".into()], 0)
            } else {
                ConnectivityReport::from_errors(vec![], 1)
            }
        }
    }

    /// Records checkpoints and failures.
    #[derive(Default)]
    struct RecordingProgress {
        percentages: Mutex<Vec<u8>>,
        failures: Mutex<Vec<String>>,
    }

    impl AssessmentProgress for RecordingProgress {
        fn checkpoint(&self, _run_id: &RunId, progress: &Progress) {
            self.percentages.lock().unwrap().push(progress.percentage);
        }
        fn failed(&self, _run_id: &RunId, message: &str) {
            self.failures.lock().unwrap().push(message.to_string());
        }
    }

    /// Delegating store that starts failing `record_analysis` after a number of calls.
    struct FlakyStore {
        inner: Arc<Storage>,
        analyses_allowed: usize,
        analyses_seen: AtomicUsize,
    }

    #[async_trait]
    impl RunStore for FlakyStore {
        async fn create_run(&self, run: &AssessmentRun) -> Result<()> {
            self.inner.create_run(run).await
        }
        async fn mark_running(&self, run_id: &RunId, progress: &Progress) -> Result<()> {
            self.inner.mark_running(run_id, progress).await
        }
        async fn record_richness(&self, run_id: &RunId, richness_score: u32) -> Result<()> {
            self.inner.record_richness(run_id, richness_score).await
        }
        async fn insert_questions(
            &self,
            run_id: &RunId,
            questions: &[Question],
            progress: &Progress,
        ) -> Result<()> {
            self.inner.insert_questions(run_id, questions, progress).await
        }
        async fn update_progress(&self, run_id: &RunId, progress: &Progress) -> Result<()> {
            self.inner.update_progress(run_id, progress).await
        }
        async fn record_analysis(
            &self,
            analysis: &QuestionAnalysis,
            progress: &Progress,
        ) -> Result<()> {
            if self.analyses_seen.fetch_add(1, Ordering::SeqCst) >= self.analyses_allowed {
                return Err(AivisError::Storage("disk I/O error".into()));
            }
            self.inner.record_analysis(analysis, progress).await
        }
        async fn record_question_failure(
            &self,
            run_id: &RunId,
            question_id: &str,
            reason: &str,
            progress: &Progress,
        ) -> Result<()> {
            self.inner
                .record_question_failure(run_id, question_id, reason, progress)
                .await
        }
        async fn complete_run(
            &self,
            run_id: &RunId,
            summary: &RunSummary,
            snapshots: &[CompetitorSnapshot],
        ) -> Result<()> {
            self.inner.complete_run(run_id, summary, snapshots).await
        }
        async fn fail_run(&self, run_id: &RunId, error_message: &str) -> Result<()> {
            self.inner.fail_run(run_id, error_message).await
        }
        async fn get_run(&self, run_id: &RunId) -> Result<Option<AssessmentRun>> {
            self.inner.get_run(run_id).await
        }
        async fn list_questions(&self, run_id: &RunId) -> Result<Vec<Question>> {
            self.inner.list_questions(run_id).await
        }
        async fn list_analyses(&self, run_id: &RunId) -> Result<Vec<QuestionAnalysis>> {
            self.inner.list_analyses(run_id).await
        }
        async fn list_competitor_snapshots(
            &self,
            run_id: &RunId,
        ) -> Result<Vec<CompetitorSnapshot>> {
            self.inner.list_competitor_snapshots(run_id).await
        }
        async fn list_runs(&self, company_id: &str) -> Result<Vec<AssessmentRun>> {
            self.inner.list_runs(company_id).await
        }
    }

    async fn seeded_storage() -> Arc<Storage> {
        let path = std::env::temp_dir().join(format!("aivis_pipeline_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&path).await.expect("open test db");
        storage
            .upsert_company(&CompanyRecord {
                id: "acme".into(),
                name: "Acme Corp".into(),
                domain: "acme.dev".into(),
                aliases: vec![],
                industry: Some("code review".into()),
                business_model: None,
            })
            .await
            .unwrap();
        storage
            .insert_knowledge_item("acme", "competitors", &json!(["riva.ai", "nimbus.ai"]))
            .await
            .unwrap();
        storage
            .insert_knowledge_item("acme", "features", &json!(["inline suggestions"]))
            .await
            .unwrap();
        storage
            .insert_knowledge_item("acme", "personas", &json!(["engineering manager"]))
            .await
            .unwrap();
        Arc::new(storage)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            concurrency: 3,
            question_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
            question_count: 5,
            allowed_types: QuestionType::ALL.to_vec(),
        }
    }

    fn orchestrator(store: Arc<dyn RunStore>, storage: Arc<Storage>, engine: Arc<FakeEngine>) -> Orchestrator {
        Orchestrator::new(store, storage, engine, config())
    }

    fn request() -> AssessmentRequest {
        AssessmentRequest {
            company_id: "acme".into(),
            company_name: "Acme Corp".into(),
            company_domain: "https://acme.dev".into(),
            question_count: Some(5),
            allowed_types: None,
        }
    }

    /// Texts of the questions a run for [`request`] will ask.
    async fn planned_questions(storage: &Storage) -> Vec<String> {
        let context = build_context(storage, "acme").await.unwrap();
        let options = QuestionOptions { count: 5, allowed_types: QuestionType::ALL.to_vec() };
        questions::generate(&context, &options).map(|d| d.text).collect()
    }

    #[tokio::test]
    async fn completes_and_reports_monotonic_progress() {
        let storage = seeded_storage().await;
        let engine = Arc::new(FakeEngine::default());
        let orch = orchestrator(storage.clone(), storage.clone(), engine.clone());
        let progress = RecordingProgress::default();

        let results = orch.run(&request(), &progress).await.unwrap();

        assert_eq!(results.run.status, RunStatus::Completed);
        assert_eq!(results.run.progress_percentage, 100);
        assert_eq!(results.run.progress_stage, ProgressStage::Complete);
        assert_eq!(results.run.questions_total, 5);
        assert_eq!(results.run.questions_analyzed, 5);
        assert_eq!(results.run.mention_rate, Some(1.0));
        assert!(results.run.richness_score.unwrap() > 0);
        assert_eq!(results.analyses.len(), 5);
        assert!(results.questions.iter().all(|q| q.status == QuestionStatus::Answered));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 5);

        let mean = results.analyses.iter().map(|a| a.score).sum::<f64>() / 5.0;
        assert!((results.run.total_score.unwrap() - mean).abs() < 1e-9);

        // riva.ai is cited in every answer; nimbus.ai never appears.
        assert_eq!(results.competitors.len(), 2);
        assert_eq!(results.competitors[0].name, "riva.ai");
        assert_eq!(results.competitors[0].rank, 1);

        let stored = storage.list_analyses(&results.run.id).await.unwrap();
        assert_eq!(stored.len(), 5);
        for analysis in &stored {
            let buckets: Vec<(&str, CitationBucket)> = analysis
                .citations
                .iter()
                .map(|c| (c.url.as_str(), c.bucket))
                .collect();
            assert_eq!(
                buckets,
                vec![
                    ("https://acme.dev/blog", CitationBucket::Owned),
                    ("https://riva.ai/compare", CitationBucket::Competitor),
                ]
            );
        }

        let seen = progress.percentages.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&5));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn failed_questions_are_excluded_from_aggregation() {
        let storage = seeded_storage().await;
        let planned = planned_questions(&storage).await;
        let engine = Arc::new(FakeEngine {
            failing: vec![planned[1].clone(), planned[3].clone()],
            ..FakeEngine::default()
        });
        let orch = orchestrator(storage.clone(), storage.clone(), engine.clone());

        let results = orch.run(&request(), &SilentProgress).await.unwrap();

        assert_eq!(results.run.status, RunStatus::Completed);
        assert_eq!(results.run.questions_total, 5);
        assert_eq!(results.run.questions_analyzed, 3);
        assert_eq!(results.run.questions_failed, 2);
        assert_eq!(results.analyses.len(), 3);
        assert_eq!(results.run.progress_message, "Scored 3 of 5 questions (2 failed)");

        let mean = results.analyses.iter().map(|a| a.score).sum::<f64>() / 3.0;
        assert!((results.run.total_score.unwrap() - mean).abs() < 1e-9);

        let failed: Vec<&Question> = results
            .questions
            .iter()
            .filter(|q| q.status == QuestionStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|q| q.failure_reason.as_deref().unwrap().contains("503")));
        // 3 answered once, 2 failing retried to the attempt limit.
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3 + 2 * 2);
    }

    #[tokio::test]
    async fn connectivity_failure_fails_before_any_question() {
        let storage = seeded_storage().await;
        let engine = Arc::new(FakeEngine { offline: true, ..FakeEngine::default() });
        let orch = orchestrator(storage.clone(), storage.clone(), engine.clone());
        let progress = RecordingProgress::default();

        let run_id = orch.create_run(&request()).await.unwrap();
        let err = orch.execute(&run_id, &request(), &progress).await.unwrap_err();
        assert!(matches!(err, AivisError::Unavailable(_)));

        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.progress_stage, ProgressStage::Error);
        assert!(run.error_message.unwrap().contains("API key is not set"));
        assert!(storage.list_questions(&run_id).await.unwrap().is_empty());
        assert!(storage.list_analyses(&run_id).await.unwrap().is_empty());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(progress.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_runs_are_not_executed_again() {
        let storage = seeded_storage().await;
        let engine = Arc::new(FakeEngine::default());
        let orch = orchestrator(storage.clone(), storage.clone(), engine.clone());

        let results = orch.run(&request(), &SilentProgress).await.unwrap();
        let run_id = results.run.id.clone();
        assert_eq!(engine.probes.load(Ordering::SeqCst), 1);

        let progress = RecordingProgress::default();
        let err = orch.execute(&run_id, &request(), &progress).await.unwrap_err();
        assert!(matches!(err, AivisError::Validation { .. }));
        assert_eq!(engine.probes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 5);
        assert!(progress.failures.lock().unwrap().is_empty());

        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress_percentage, 100);

        let missing = orch.execute(&RunId::new(), &request(), &progress).await.unwrap_err();
        assert!(matches!(missing, AivisError::NotFound { .. }));
        assert_eq!(engine.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_company_fails_the_run() {
        let storage = seeded_storage().await;
        let orch = orchestrator(storage.clone(), storage.clone(), Arc::new(FakeEngine::default()));
        let mut req = request();
        req.company_id = "ghost".into();

        let run_id = orch.create_run(&req).await.unwrap();
        let err = orch.execute(&run_id, &req, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, AivisError::NotFound { .. }));

        let status = get_status(storage.as_ref(), &run_id).await.unwrap();
        assert_eq!(status.status, RunStatus::Failed);
        assert!(status.error_message.unwrap().contains("company ghost"));
    }

    #[tokio::test]
    async fn zero_questions_fails_the_run() {
        let storage = seeded_storage().await;
        let orch = orchestrator(storage.clone(), storage.clone(), Arc::new(FakeEngine::default()));
        let mut req = request();
        req.company_id = "bare".into();
        storage
            .upsert_company(&CompanyRecord {
                id: "bare".into(),
                name: "Bare".into(),
                domain: "bare.io".into(),
                aliases: vec![],
                industry: None,
                business_model: None,
            })
            .await
            .unwrap();
        req.company_name = String::new();
        req.company_domain = String::new();
        req.allowed_types = Some(vec![QuestionType::Comparison]);

        let err = orch.run(&req, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, AivisError::Validation { .. }));
        let runs = storage.list_runs("bare").await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn all_questions_failing_fails_the_run() {
        let storage = seeded_storage().await;
        let planned = planned_questions(&storage).await;
        let engine = Arc::new(FakeEngine { failing: planned, ..FakeEngine::default() });
        let orch = orchestrator(storage.clone(), storage.clone(), engine);

        let run_id = orch.create_run(&request()).await.unwrap();
        let err = orch.execute(&run_id, &request(), &SilentProgress).await.unwrap_err();
        assert!(matches!(err, AivisError::Unavailable(_)));

        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.questions_failed, 5);
        assert_eq!(run.total_score, None);
    }

    #[tokio::test]
    async fn slow_question_times_out_alone() {
        let storage = seeded_storage().await;
        let planned = planned_questions(&storage).await;
        let engine = Arc::new(FakeEngine { hanging: vec![planned[0].clone()], ..FakeEngine::default() });
        let mut cfg = config();
        cfg.question_timeout = Duration::from_millis(200);
        let orch = Orchestrator::new(storage.clone(), storage.clone(), engine, cfg);

        let results = orch.run(&request(), &SilentProgress).await.unwrap();
        assert_eq!(results.run.questions_analyzed, 4);
        assert_eq!(results.run.questions_failed, 1);
        let failed = results
            .questions
            .iter()
            .find(|q| q.status == QuestionStatus::Failed)
            .unwrap();
        assert_eq!(failed.text, planned[0]);
        assert!(failed.failure_reason.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn storage_failure_mid_run_keeps_persisted_analyses() {
        let storage = seeded_storage().await;
        let flaky = Arc::new(FlakyStore {
            inner: storage.clone(),
            analyses_allowed: 2,
            analyses_seen: AtomicUsize::new(0),
        });
        let orch = orchestrator(flaky, storage.clone(), Arc::new(FakeEngine::default()));

        let run_id = orch.create_run(&request()).await.unwrap();
        let err = orch.execute(&run_id, &request(), &SilentProgress).await.unwrap_err();
        assert!(matches!(err, AivisError::Storage(_)));

        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("disk I/O error"));
        assert_eq!(storage.list_analyses(&run_id).await.unwrap().len(), 2);
        assert_eq!(run.questions_analyzed, 2);
        // Progress stops where the last durable checkpoint left it.
        assert!(run.progress_percentage < ANALYZING_PCT);
    }

    #[tokio::test]
    async fn started_run_can_be_polled_to_completion() {
        let storage = seeded_storage().await;
        let orch = Arc::new(orchestrator(storage.clone(), storage.clone(), Arc::new(FakeEngine::default())));

        let (run_id, handle) = orch.start(request(), Arc::new(SilentProgress)).await.unwrap();
        let status = get_status(storage.as_ref(), &run_id).await.unwrap();
        assert!(!status.status.is_terminal() || status.results_ready);

        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.run.id, run_id);
        let status = get_status(storage.as_ref(), &run_id).await.unwrap();
        assert!(status.results_ready);
        assert_eq!(status.progress_percentage, 100);
    }

    #[tokio::test]
    async fn concurrent_runs_are_isolated() {
        let storage = seeded_storage().await;
        let orch = Arc::new(orchestrator(storage.clone(), storage.clone(), Arc::new(FakeEngine::default())));

        let (first, h1) = orch.start(request(), Arc::new(SilentProgress)).await.unwrap();
        let (second, h2) = orch.start(request(), Arc::new(SilentProgress)).await.unwrap();
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();

        let first_questions: HashSet<String> = storage
            .list_questions(&first)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        let second_analyses = storage.list_analyses(&second).await.unwrap();
        assert_eq!(second_analyses.len(), 5);
        assert!(second_analyses.iter().all(|a| !first_questions.contains(&a.question_id)));
    }

    #[tokio::test]
    async fn create_run_validates_request() {
        let storage = seeded_storage().await;
        let orch = orchestrator(storage.clone(), storage.clone(), Arc::new(FakeEngine::default()));
        let mut req = request();
        req.company_id = "  ".into();
        assert!(matches!(
            orch.create_run(&req).await.unwrap_err(),
            AivisError::Validation { .. }
        ));
        req.company_id = "acme".into();
        req.question_count = Some(0);
        assert!(orch.create_run(&req).await.is_err());
    }

    #[test]
    fn request_identity_overrides_stored_identity() {
        let mut context = CompanyContext {
            name: "Acme".into(),
            domain: "old.dev".into(),
            ..CompanyContext::default()
        };
        let mut req = request();
        req.company_domain = "https://www.acme.dev/".into();
        req.apply_identity(&mut context);
        assert_eq!(context.name, "Acme Corp");
        assert_eq!(context.domain, "acme.dev");
        assert_eq!(context.aliases, vec!["Acme".to_string()]);
    }
}
