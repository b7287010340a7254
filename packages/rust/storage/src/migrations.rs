//! SQL migration definitions for the aivis database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: companies, knowledge items, runs, questions, analyses, citations, competitor snapshots",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Assessed companies
CREATE TABLE IF NOT EXISTS companies (
    id             TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    domain         TEXT NOT NULL,
    aliases_json   TEXT NOT NULL DEFAULT '[]',
    industry       TEXT,
    business_model TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

-- Loosely-typed knowledge base facts
CREATE TABLE IF NOT EXISTS knowledge_items (
    id           TEXT PRIMARY KEY,
    company_id   TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    category     TEXT NOT NULL,
    content_json TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_knowledge_company ON knowledge_items(company_id);

-- Assessment runs (aggregate root)
CREATE TABLE IF NOT EXISTS assessment_runs (
    id                  TEXT PRIMARY KEY,
    company_id          TEXT NOT NULL,
    status              TEXT NOT NULL,
    progress_percentage INTEGER NOT NULL DEFAULT 0,
    progress_stage      TEXT NOT NULL,
    progress_message    TEXT NOT NULL,
    total_score         REAL,
    mention_rate        REAL,
    questions_total     INTEGER NOT NULL DEFAULT 0,
    questions_analyzed  INTEGER NOT NULL DEFAULT 0,
    questions_failed    INTEGER NOT NULL DEFAULT 0,
    citation_stats_json TEXT,
    richness_score      INTEGER,
    started_at          TEXT NOT NULL,
    completed_at        TEXT,
    error_message       TEXT,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_company ON assessment_runs(company_id);

-- Probe questions, one batch per run
CREATE TABLE IF NOT EXISTS assessment_questions (
    id             TEXT PRIMARY KEY,
    run_id         TEXT NOT NULL REFERENCES assessment_runs(id) ON DELETE CASCADE,
    sequence       INTEGER NOT NULL,
    question_type  TEXT NOT NULL,
    text           TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    failure_reason TEXT,
    UNIQUE(run_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_questions_run ON assessment_questions(run_id);

-- One analysis per answered question
CREATE TABLE IF NOT EXISTS question_analyses (
    id                       TEXT PRIMARY KEY,
    question_id              TEXT NOT NULL UNIQUE REFERENCES assessment_questions(id) ON DELETE CASCADE,
    run_id                   TEXT NOT NULL REFERENCES assessment_runs(id) ON DELETE CASCADE,
    answer_text              TEXT NOT NULL,
    mention_detected         INTEGER NOT NULL,
    competitor_mentions_json TEXT NOT NULL DEFAULT '[]',
    score                    REAL NOT NULL,
    analyzed_at              TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analyses_run ON question_analyses(run_id);

-- Citations owned by an analysis
CREATE TABLE IF NOT EXISTS citations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_id TEXT NOT NULL REFERENCES question_analyses(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    url         TEXT NOT NULL,
    title       TEXT,
    bucket      TEXT NOT NULL,
    influence   REAL NOT NULL,
    relevance   REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_citations_analysis ON citations(analysis_id);

-- Competitor benchmarks written at run completion
CREATE TABLE IF NOT EXISTS competitor_snapshots (
    id               TEXT PRIMARY KEY,
    run_id           TEXT NOT NULL REFERENCES assessment_runs(id) ON DELETE CASCADE,
    name             TEXT NOT NULL,
    domain           TEXT,
    mention_count    INTEGER NOT NULL,
    citation_count   INTEGER NOT NULL,
    visibility_score REAL NOT NULL,
    rank             INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_run ON competitor_snapshots(run_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
