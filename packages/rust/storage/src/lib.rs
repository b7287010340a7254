//! libSQL storage layer for companies, knowledge items, and assessment runs.
//!
//! The [`Storage`] struct wraps a local libSQL database and implements both
//! [`RunStore`] (assessment lifecycle) and [`KnowledgeSource`] (company
//! knowledge reads).
//!
//! **Connection rules:**
//! - Every statement, read or write, runs under one async connection lock,
//!   so transactions from concurrent runs never interleave and readers only
//!   observe committed rows.
//! - Progress never decreases and terminal runs reject further writes.

mod migrations;
mod traits;

pub use traits::{KnowledgeSource, RunStore};

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use uuid::Uuid;

use aivis_shared::{
    AivisError, AssessmentRun, Citation, CitationStats, CompanyRecord, CompetitorSnapshot,
    KnowledgeItem, Progress, ProgressStage, Question, QuestionAnalysis, QuestionStatus, Result,
    RunId, RunStatus, RunSummary,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    conn_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AivisError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            conn_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    AivisError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Company operations
    // -----------------------------------------------------------------------

    /// Insert a company or update its identity fields.
    pub async fn upsert_company(&self, company: &CompanyRecord) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let aliases = to_json(&company.aliases)?;
        self.conn
            .execute(
                "INSERT INTO companies (id, name, domain, aliases_json, industry, business_model, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   domain = excluded.domain,
                   aliases_json = excluded.aliases_json,
                   industry = excluded.industry,
                   business_model = excluded.business_model,
                   updated_at = excluded.updated_at",
                params![
                    company.id.as_str(),
                    company.name.as_str(),
                    company.domain.as_str(),
                    aliases,
                    company.industry.as_deref(),
                    company.business_model.as_deref(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// List all companies ordered by name.
    pub async fn list_companies(&self) -> Result<Vec<CompanyRecord>> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, domain, aliases_json, industry, business_model
                 FROM companies ORDER BY name",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_company(&row)?);
        }
        Ok(results)
    }

    /// Add a knowledge item for a company. Returns the generated item ID.
    pub async fn insert_knowledge_item(
        &self,
        company_id: &str,
        category: &str,
        content: &serde_json::Value,
    ) -> Result<String> {
        let _guard = self.conn_lock.lock().await;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO knowledge_items (id, company_id, category, content_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.as_str(), company_id, category, content.to_string(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }
}

/// Execute a guarded run update and fail if no row matched.
async fn update_run_checked(
    conn: &Connection,
    run_id: &RunId,
    sql: &str,
    params: impl libsql::params::IntoParams,
    expectation: &str,
) -> Result<()> {
    let affected = conn.execute(sql, params).await.map_err(db_err)?;
    if affected == 0 {
        return Err(AivisError::Storage(format!(
            "run {run_id} is not {expectation}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

const RUN_COLUMNS: &str = "id, company_id, status, progress_percentage, progress_stage, \
     progress_message, total_score, mention_rate, questions_total, questions_analyzed, \
     questions_failed, citation_stats_json, richness_score, started_at, completed_at, error_message";

const PROGRESS_SQL: &str = "progress_percentage = MAX(progress_percentage, ?2), \
     progress_stage = ?3, progress_message = ?4, updated_at = ?5";

#[async_trait]
impl RunStore for Storage {
    async fn create_run(&self, run: &AssessmentRun) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO assessment_runs (id, company_id, status, progress_percentage, progress_stage,
                   progress_message, started_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run.id.to_string(),
                    run.company_id.as_str(),
                    run.status.as_str(),
                    i64::from(run.progress_percentage),
                    run.progress_stage.as_str(),
                    run.progress_message.as_str(),
                    run.started_at.to_rfc3339(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn mark_running(&self, run_id: &RunId, progress: &Progress) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let sql = format!(
            "UPDATE assessment_runs SET status = 'running', {PROGRESS_SQL}
             WHERE id = ?1 AND status = 'pending'"
        );
        update_run_checked(
            &self.conn,
            run_id,
            &sql,
            progress_params(run_id, progress),
            "pending",
        )
        .await
    }

    async fn record_richness(&self, run_id: &RunId, richness_score: u32) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        update_run_checked(
            &self.conn,
            run_id,
            "UPDATE assessment_runs SET richness_score = ?2
             WHERE id = ?1 AND status = 'running'",
            params![run_id.to_string(), i64::from(richness_score)],
            "running",
        )
        .await
    }

    async fn insert_questions(
        &self,
        run_id: &RunId,
        questions: &[Question],
        progress: &Progress,
    ) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(db_err)?;

        for question in questions {
            if &question.run_id != run_id {
                return Err(AivisError::validation(format!(
                    "question {} belongs to run {}, not {run_id}",
                    question.id, question.run_id
                )));
            }
            tx.execute(
                "INSERT INTO assessment_questions (id, run_id, sequence, question_type, text, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    question.id.as_str(),
                    run_id.to_string(),
                    i64::from(question.sequence),
                    question.question_type.as_str(),
                    question.text.as_str(),
                    question.status.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        }

        let sql = format!(
            "UPDATE assessment_runs SET questions_total = ?6, {PROGRESS_SQL}
             WHERE id = ?1 AND status = 'running'"
        );
        let now = Utc::now().to_rfc3339();
        update_run_checked(
            &tx,
            run_id,
            &sql,
            params![
                run_id.to_string(),
                i64::from(progress.percentage),
                progress.stage.as_str(),
                progress.message.as_str(),
                now.as_str(),
                questions.len() as i64,
            ],
            "running",
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_progress(&self, run_id: &RunId, progress: &Progress) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let sql = format!(
            "UPDATE assessment_runs SET {PROGRESS_SQL}
             WHERE id = ?1 AND status = 'running'"
        );
        update_run_checked(
            &self.conn,
            run_id,
            &sql,
            progress_params(run_id, progress),
            "running",
        )
        .await
    }

    async fn record_analysis(
        &self,
        analysis: &QuestionAnalysis,
        progress: &Progress,
    ) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let run_id = &analysis.run_id;
        let tx = self.conn.transaction().await.map_err(db_err)?;

        let affected = tx
            .execute(
                "UPDATE assessment_questions SET status = 'answered'
                 WHERE id = ?1 AND run_id = ?2 AND status = 'pending'",
                params![analysis.question_id.as_str(), run_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(AivisError::Storage(format!(
                "question {} is not pending in run {run_id}",
                analysis.question_id
            )));
        }

        tx.execute(
            "INSERT INTO question_analyses (id, question_id, run_id, answer_text, mention_detected,
               competitor_mentions_json, score, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                analysis.id.as_str(),
                analysis.question_id.as_str(),
                run_id.to_string(),
                analysis.answer_text.as_str(),
                i64::from(analysis.mention_detected),
                to_json(&analysis.competitor_mentions)?,
                analysis.score,
                analysis.analyzed_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(db_err)?;

        for (position, citation) in analysis.citations.iter().enumerate() {
            tx.execute(
                "INSERT INTO citations (analysis_id, position, url, title, bucket, influence, relevance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    analysis.id.as_str(),
                    position as i64,
                    citation.url.as_str(),
                    citation.title.as_deref(),
                    citation.bucket.as_str(),
                    citation.influence,
                    citation.relevance,
                ],
            )
            .await
            .map_err(db_err)?;
        }

        let sql = format!(
            "UPDATE assessment_runs SET questions_analyzed = questions_analyzed + 1, {PROGRESS_SQL}
             WHERE id = ?1 AND status = 'running'"
        );
        update_run_checked(&tx, run_id, &sql, progress_params(run_id, progress), "running")
            .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn record_question_failure(
        &self,
        run_id: &RunId,
        question_id: &str,
        reason: &str,
        progress: &Progress,
    ) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(db_err)?;

        let affected = tx
            .execute(
                "UPDATE assessment_questions SET status = 'failed', failure_reason = ?3
                 WHERE id = ?1 AND run_id = ?2 AND status = 'pending'",
                params![question_id, run_id.to_string(), reason],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(AivisError::Storage(format!(
                "question {question_id} is not pending in run {run_id}"
            )));
        }

        let sql = format!(
            "UPDATE assessment_runs SET questions_failed = questions_failed + 1, {PROGRESS_SQL}
             WHERE id = ?1 AND status = 'running'"
        );
        update_run_checked(&tx, run_id, &sql, progress_params(run_id, progress), "running")
            .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: &RunId,
        summary: &RunSummary,
        snapshots: &[CompetitorSnapshot],
    ) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let now = Utc::now().to_rfc3339();

        for snapshot in snapshots {
            tx.execute(
                "INSERT INTO competitor_snapshots (id, run_id, name, domain, mention_count,
                   citation_count, visibility_score, rank)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Uuid::now_v7().to_string(),
                    run_id.to_string(),
                    snapshot.name.as_str(),
                    snapshot.domain.as_deref(),
                    snapshot.mention_count as i64,
                    snapshot.citation_count as i64,
                    snapshot.visibility_score,
                    i64::from(snapshot.rank),
                ],
            )
            .await
            .map_err(db_err)?;
        }

        update_run_checked(
            &tx,
            run_id,
            "UPDATE assessment_runs SET
               status = 'completed',
               progress_percentage = 100,
               progress_stage = 'complete',
               progress_message = ?2,
               total_score = ?3,
               mention_rate = ?4,
               questions_total = ?5,
               questions_analyzed = ?6,
               questions_failed = ?7,
               citation_stats_json = ?8,
               completed_at = ?9,
               updated_at = ?9
             WHERE id = ?1 AND status = 'running'",
            params![
                run_id.to_string(),
                summary.message.as_str(),
                summary.total_score,
                summary.mention_rate,
                summary.questions_total as i64,
                summary.questions_analyzed as i64,
                summary.questions_failed as i64,
                to_json(&summary.citation_stats)?,
                now.as_str(),
            ],
            "running",
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn fail_run(&self, run_id: &RunId, error_message: &str) -> Result<()> {
        let _guard = self.conn_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        update_run_checked(
            &self.conn,
            run_id,
            "UPDATE assessment_runs SET
               status = 'failed',
               progress_stage = 'error',
               progress_message = 'Assessment failed',
               error_message = ?2,
               completed_at = ?3,
               updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![run_id.to_string(), error_message, now.as_str()],
            "pending or running",
        )
        .await
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<AssessmentRun>> {
        let _guard = self.conn_lock.lock().await;
        let sql = format!("SELECT {RUN_COLUMNS} FROM assessment_runs WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![run_id.to_string()])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_questions(&self, run_id: &RunId) -> Result<Vec<Question>> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT id, run_id, sequence, question_type, text, status, failure_reason
                 FROM assessment_questions WHERE run_id = ?1 ORDER BY sequence",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_question(&row)?);
        }
        Ok(results)
    }

    async fn list_analyses(&self, run_id: &RunId) -> Result<Vec<QuestionAnalysis>> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT a.id, a.question_id, a.run_id, a.answer_text, a.mention_detected,
                        a.competitor_mentions_json, a.score, a.analyzed_at
                 FROM question_analyses a
                 JOIN assessment_questions q ON q.id = a.question_id
                 WHERE a.run_id = ?1
                 ORDER BY q.sequence",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut analyses = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            analyses.push(row_to_analysis(&row)?);
        }

        for analysis in &mut analyses {
            analysis.citations = self.list_citations(&analysis.id).await?;
        }
        Ok(analyses)
    }

    async fn list_competitor_snapshots(&self, run_id: &RunId) -> Result<Vec<CompetitorSnapshot>> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, name, domain, mention_count, citation_count, visibility_score, rank
                 FROM competitor_snapshots WHERE run_id = ?1 ORDER BY rank",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(CompetitorSnapshot {
                run_id: parse_run_id(&get_string(&row, 0)?)?,
                name: get_string(&row, 1)?,
                domain: row.get::<String>(2).ok(),
                mention_count: get_i64(&row, 3)? as usize,
                citation_count: get_i64(&row, 4)? as usize,
                visibility_score: row.get::<f64>(5).map_err(db_err)?,
                rank: get_i64(&row, 6)? as u32,
            });
        }
        Ok(results)
    }

    async fn list_runs(&self, company_id: &str) -> Result<Vec<AssessmentRun>> {
        let _guard = self.conn_lock.lock().await;
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM assessment_runs WHERE company_id = ?1 ORDER BY started_at DESC, id DESC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![company_id])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

impl Storage {
    /// Citations for one analysis. The caller holds `conn_lock`.
    async fn list_citations(&self, analysis_id: &str) -> Result<Vec<Citation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, title, bucket, influence, relevance
                 FROM citations WHERE analysis_id = ?1 ORDER BY position",
                params![analysis_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Citation {
                url: get_string(&row, 0)?,
                title: row.get::<String>(1).ok(),
                bucket: get_string(&row, 2)?.parse()?,
                influence: row.get::<f64>(3).map_err(db_err)?,
                relevance: row.get::<f64>(4).map_err(db_err)?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// KnowledgeSource
// ---------------------------------------------------------------------------

#[async_trait]
impl KnowledgeSource for Storage {
    async fn get_company(&self, company_id: &str) -> Result<Option<CompanyRecord>> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, domain, aliases_json, industry, business_model
                 FROM companies WHERE id = ?1",
                params![company_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_company(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_knowledge_items(&self, company_id: &str) -> Result<Vec<KnowledgeItem>> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, category, content_json, created_at
                 FROM knowledge_items WHERE company_id = ?1 ORDER BY created_at, id",
                params![company_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let content_json = get_string(&row, 3)?;
            results.push(KnowledgeItem {
                id: get_string(&row, 0)?,
                company_id: get_string(&row, 1)?,
                category: get_string(&row, 2)?,
                content: serde_json::from_str(&content_json)
                    .map_err(|e| AivisError::Storage(format!("invalid knowledge JSON: {e}")))?,
                created_at: parse_timestamp(&get_string(&row, 4)?)?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> AivisError {
    AivisError::Storage(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AivisError::Storage(format!("encode JSON: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AivisError::Storage(format!("decode JSON: {e}")))
}

fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(db_err)
}

fn get_i64(row: &libsql::Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx).map_err(db_err)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AivisError::Storage(format!("invalid date: {e}")))
}

fn parse_run_id(s: &str) -> Result<RunId> {
    s.parse()
        .map_err(|e| AivisError::Storage(format!("invalid run id '{s}': {e}")))
}

/// Positional params shared by every progress update: `?1` id, `?2..?5` progress.
fn progress_params(run_id: &RunId, progress: &Progress) -> libsql::params::Params {
    libsql::params::Params::Positional(vec![
        libsql::Value::Text(run_id.to_string()),
        libsql::Value::Integer(i64::from(progress.percentage)),
        libsql::Value::Text(progress.stage.as_str().to_string()),
        libsql::Value::Text(progress.message.clone()),
        libsql::Value::Text(Utc::now().to_rfc3339()),
    ])
}

fn row_to_company(row: &libsql::Row) -> Result<CompanyRecord> {
    Ok(CompanyRecord {
        id: get_string(row, 0)?,
        name: get_string(row, 1)?,
        domain: get_string(row, 2)?,
        aliases: from_json(&get_string(row, 3)?)?,
        industry: row.get::<String>(4).ok(),
        business_model: row.get::<String>(5).ok(),
    })
}

fn row_to_run(row: &libsql::Row) -> Result<AssessmentRun> {
    let citation_stats = match row.get::<String>(11).ok() {
        Some(raw) => Some(from_json::<CitationStats>(&raw)?),
        None => None,
    };
    let completed_at = match row.get::<String>(14).ok() {
        Some(raw) => Some(parse_timestamp(&raw)?),
        None => None,
    };

    Ok(AssessmentRun {
        id: parse_run_id(&get_string(row, 0)?)?,
        company_id: get_string(row, 1)?,
        status: get_string(row, 2)?.parse::<RunStatus>()?,
        progress_percentage: get_i64(row, 3)?.clamp(0, 100) as u8,
        progress_stage: get_string(row, 4)?.parse::<ProgressStage>()?,
        progress_message: get_string(row, 5)?,
        total_score: row.get::<f64>(6).ok(),
        mention_rate: row.get::<f64>(7).ok(),
        questions_total: get_i64(row, 8)? as usize,
        questions_analyzed: get_i64(row, 9)? as usize,
        questions_failed: get_i64(row, 10)? as usize,
        citation_stats,
        richness_score: row.get::<i64>(12).ok().map(|v| v as u32),
        started_at: parse_timestamp(&get_string(row, 13)?)?,
        completed_at,
        error_message: row.get::<String>(15).ok(),
    })
}

fn row_to_question(row: &libsql::Row) -> Result<Question> {
    Ok(Question {
        id: get_string(row, 0)?,
        run_id: parse_run_id(&get_string(row, 1)?)?,
        sequence: get_i64(row, 2)? as u32,
        question_type: get_string(row, 3)?.parse()?,
        text: get_string(row, 4)?,
        status: get_string(row, 5)?.parse::<QuestionStatus>()?,
        failure_reason: row.get::<String>(6).ok(),
    })
}

fn row_to_analysis(row: &libsql::Row) -> Result<QuestionAnalysis> {
    Ok(QuestionAnalysis {
        id: get_string(row, 0)?,
        question_id: get_string(row, 1)?,
        run_id: parse_run_id(&get_string(row, 2)?)?,
        answer_text: get_string(row, 3)?,
        mention_detected: get_i64(row, 4)? != 0,
        competitor_mentions: from_json(&get_string(row, 5)?)?,
        citations: Vec::new(),
        score: row.get::<f64>(6).map_err(db_err)?,
        analyzed_at: parse_timestamp(&get_string(row, 7)?)?,
    })
}
