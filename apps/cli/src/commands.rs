//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::info;

use aivis_core::{
    AssessmentProgress, AssessmentRequest, Orchestrator, PipelineConfig, get_status, load_results,
};
use aivis_engine::{AnswerEngine, HttpAnswerEngine};
use aivis_shared::{
    AppConfig, AssessmentResults, CompanyRecord, EngineConfig, Progress, QuestionStatus,
    QuestionType, RunId, init_config, load_config, resolve_path,
};
use aivis_storage::{KnowledgeSource, RunStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// aivis: AI visibility assessments for companies.
#[derive(Parser)]
#[command(
    name = "aivis",
    version,
    about = "Measure how visible a company is in AI answer engines.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path (overrides `defaults.database_path`).
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage companies and their knowledge.
    Company {
        #[command(subcommand)]
        action: CompanyAction,
    },

    /// Run an assessment for a company and wait for the result.
    Assess {
        /// Company ID.
        #[arg(long)]
        company: String,

        /// Number of questions (defaults to `defaults.question_count`).
        #[arg(long)]
        count: Option<usize>,

        /// Question types, comma-separated (e.g. comparison,alternatives).
        #[arg(long, value_delimiter = ',')]
        types: Vec<QuestionType>,
    },

    /// Show the status of a run.
    Status {
        /// Run ID.
        run: RunId,
    },

    /// Show the results of a run.
    Results {
        /// Run ID.
        run: RunId,

        /// Print the full result bundle as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List runs for a company, newest first.
    Runs {
        /// Company ID.
        #[arg(long)]
        company: String,
    },

    /// Check answer engine credentials and reachability.
    Check,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Company subcommands.
#[derive(Subcommand)]
pub(crate) enum CompanyAction {
    /// Add or update a company record.
    Add {
        /// Company ID.
        #[arg(long)]
        id: String,

        /// Display name.
        #[arg(long)]
        name: String,

        /// Primary domain (e.g. acme.dev).
        #[arg(long)]
        domain: String,

        /// Alternative names (repeatable).
        #[arg(long = "alias")]
        aliases: Vec<String>,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long)]
        business_model: Option<String>,
    },

    /// Import a company and its knowledge from a JSON file.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// List stored companies.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "aivis=info",
        1 => "aivis=debug",
        _ => "aivis=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let db = cli.db;

    match cli.command {
        Command::Company { action } => match action {
            CompanyAction::Add {
                id,
                name,
                domain,
                aliases,
                industry,
                business_model,
            } => {
                let record = CompanyRecord {
                    id,
                    name,
                    domain,
                    aliases,
                    industry,
                    business_model,
                };
                cmd_company_add(&config, db.as_deref(), &record).await
            }
            CompanyAction::Import { file } => cmd_company_import(&config, db.as_deref(), &file).await,
            CompanyAction::List => cmd_company_list(&config, db.as_deref()).await,
        },
        Command::Assess {
            company,
            count,
            types,
        } => cmd_assess(&config, db.as_deref(), &company, count, types).await,
        Command::Status { run } => cmd_status(&config, db.as_deref(), &run).await,
        Command::Results { run, json } => cmd_results(&config, db.as_deref(), &run, json).await,
        Command::Runs { company } => cmd_runs(&config, db.as_deref(), &company).await,
        Command::Check => cmd_check(&config).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

async fn open_storage(config: &AppConfig, db: Option<&str>) -> Result<Arc<Storage>> {
    let raw = db.unwrap_or(&config.defaults.database_path);
    let path = resolve_path(raw)?;
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("opening database at {}", path.display()))?;
    Ok(Arc::new(storage))
}

// ---------------------------------------------------------------------------
// Company commands
// ---------------------------------------------------------------------------

/// JSON accepted by `company import`.
///
/// `knowledge` maps a category (e.g. `competitors`, `features`) to any
/// JSON value; each entry becomes one knowledge item.
#[derive(Debug, Deserialize)]
struct CompanyImport {
    id: String,
    name: String,
    domain: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    business_model: Option<String>,
    #[serde(default)]
    knowledge: serde_json::Map<String, serde_json::Value>,
}

impl CompanyImport {
    fn record(&self) -> CompanyRecord {
        CompanyRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            domain: self.domain.clone(),
            aliases: self.aliases.clone(),
            industry: self.industry.clone(),
            business_model: self.business_model.clone(),
        }
    }
}

fn validate_company(record: &CompanyRecord) -> Result<()> {
    if record.id.trim().is_empty() {
        return Err(eyre!("company id must not be empty"));
    }
    if record.name.trim().is_empty() {
        return Err(eyre!("company name must not be empty"));
    }
    if record.domain.trim().is_empty() {
        return Err(eyre!("company domain must not be empty"));
    }
    Ok(())
}

async fn cmd_company_add(config: &AppConfig, db: Option<&str>, record: &CompanyRecord) -> Result<()> {
    validate_company(record)?;
    let storage = open_storage(config, db).await?;
    storage.upsert_company(record).await?;
    info!(company = %record.id, "company saved");
    println!("Saved company {} ({})", record.name, record.id);
    Ok(())
}

async fn cmd_company_import(config: &AppConfig, db: Option<&str>, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("reading {}", file.display()))?;
    let import: CompanyImport = serde_json::from_str(&content)
        .wrap_err_with(|| format!("parsing {}", file.display()))?;
    let record = import.record();
    validate_company(&record)?;

    let storage = open_storage(config, db).await?;
    storage.upsert_company(&record).await?;
    for (category, content) in &import.knowledge {
        storage
            .insert_knowledge_item(&record.id, category, content)
            .await?;
    }

    info!(
        company = %record.id,
        items = import.knowledge.len(),
        "company imported"
    );
    println!(
        "Imported {} ({}) with {} knowledge items",
        record.name,
        record.id,
        import.knowledge.len()
    );
    Ok(())
}

async fn cmd_company_list(config: &AppConfig, db: Option<&str>) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let companies = storage.list_companies().await?;
    if companies.is_empty() {
        println!("No companies yet. Add one with `aivis company add` or `aivis company import`.");
        return Ok(());
    }
    for company in companies {
        println!("  {:<24} {:<32} {}", company.id, company.name, company.domain);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Assessment commands
// ---------------------------------------------------------------------------

async fn cmd_assess(
    config: &AppConfig,
    db: Option<&str>,
    company: &str,
    count: Option<usize>,
    types: Vec<QuestionType>,
) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let record = storage
        .get_company(company)
        .await?
        .ok_or_else(|| eyre!("unknown company '{company}'; add it with `aivis company add`"))?;

    let engine = HttpAnswerEngine::new(EngineConfig::from_app_config(config))?;
    let orchestrator = Orchestrator::new(
        storage.clone(),
        storage.clone(),
        Arc::new(engine),
        PipelineConfig::from_app_config(config),
    );

    let request = AssessmentRequest {
        company_id: record.id.clone(),
        company_name: record.name.clone(),
        company_domain: record.domain.clone(),
        question_count: count,
        allowed_types: (!types.is_empty()).then_some(types),
    };

    info!(company = %record.id, "starting assessment");
    let reporter = CliProgress::new();
    let results = orchestrator.run(&request, &reporter).await?;
    reporter.finish();

    print_results(&results);
    Ok(())
}

async fn cmd_status(config: &AppConfig, db: Option<&str>, run_id: &RunId) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let status = get_status(storage.as_ref(), run_id).await?;

    println!("  Run:      {}", status.run_id);
    println!("  Status:   {}", status.status);
    println!(
        "  Progress: {}% ({}) {}",
        status.progress_percentage, status.progress_stage, status.progress_message
    );
    if let Some(error) = &status.error_message {
        println!("  Error:    {error}");
    }
    Ok(())
}

async fn cmd_results(config: &AppConfig, db: Option<&str>, run_id: &RunId, json: bool) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let results = load_results(storage.as_ref(), run_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }
    Ok(())
}

async fn cmd_runs(config: &AppConfig, db: Option<&str>, company: &str) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let runs = storage.list_runs(company).await?;
    if runs.is_empty() {
        println!("No runs for company '{company}'.");
        return Ok(());
    }
    for run in runs {
        let score = run
            .total_score
            .map(|s| format!("{s:.1}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {}  {:<9}  {:>3}%  score {:>5}  {}",
            run.id,
            run.status.as_str(),
            run.progress_percentage,
            score,
            run.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn cmd_check(config: &AppConfig) -> Result<()> {
    let engine = HttpAnswerEngine::new(EngineConfig::from_app_config(config))?;
    let report = engine.test_connectivity().await;
    if report.success {
        println!(
            "Answer engine OK ({} via {}, {}ms)",
            engine.config().model,
            engine.config().base_url,
            report.latency_ms
        );
        Ok(())
    } else {
        for error in &report.errors {
            println!("  ✗ {error}");
        }
        Err(eyre!("answer engine check failed"))
    }
}

fn print_results(results: &AssessmentResults) {
    let run = &results.run;
    println!();
    println!("  Run:        {}", run.id);
    println!("  Status:     {}", run.status);
    if let Some(score) = run.total_score {
        println!("  Score:      {score:.1} / 100");
    }
    if let Some(rate) = run.mention_rate {
        println!("  Mentioned:  {:.0}% of answers", rate * 100.0);
    }
    println!(
        "  Questions:  {} analyzed, {} failed, {} total",
        run.questions_analyzed, run.questions_failed, run.questions_total
    );
    if let Some(stats) = &run.citation_stats {
        println!(
            "  Citations:  {} total ({} owned, {} operated, {} earned, {} competitor)",
            stats.total, stats.owned, stats.operated, stats.earned, stats.competitor
        );
    }
    if let Some(error) = &run.error_message {
        println!("  Error:      {error}");
    }

    if !results.questions.is_empty() {
        println!();
        for question in &results.questions {
            let analysis = results
                .analyses
                .iter()
                .find(|a| a.question_id == question.id);
            let outcome = match (question.status, analysis) {
                (QuestionStatus::Answered, Some(a)) => {
                    format!("{:>5.1}{}", a.score, if a.mention_detected { " ✓" } else { "  " })
                }
                (QuestionStatus::Failed, _) => "failed ".to_string(),
                _ => "   -   ".to_string(),
            };
            println!("  {:>2}. [{outcome}] {}", question.sequence, question.text);
        }
    }

    if !results.competitors.is_empty() {
        println!();
        println!("  Competitors:");
        for competitor in &results.competitors {
            println!(
                "  {:>2}. {:<24} {:>5.1}  ({} mentions, {} citations)",
                competitor.rank,
                competitor.name,
                competitor.visibility_score,
                competitor.mention_count,
                competitor.citation_count
            );
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl AssessmentProgress for CliProgress {
    fn checkpoint(&self, _run_id: &RunId, progress: &Progress) {
        self.bar.set_position(u64::from(progress.percentage));
        self.bar.set_message(progress.message.clone());
    }

    fn failed(&self, run_id: &RunId, message: &str) {
        self.bar
            .abandon_with_message(format!("run {run_id} failed: {message}"));
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assess_with_types() {
        let cli = Cli::try_parse_from([
            "aivis",
            "--db",
            "/tmp/a.db",
            "assess",
            "--company",
            "acme",
            "--count",
            "4",
            "--types",
            "comparison,alternatives",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some("/tmp/a.db"));
        match cli.command {
            Command::Assess {
                company,
                count,
                types,
            } => {
                assert_eq!(company, "acme");
                assert_eq!(count, Some(4));
                assert_eq!(types, vec![QuestionType::Comparison, QuestionType::Alternatives]);
            }
            _ => panic!("expected assess"),
        }
    }

    #[test]
    fn rejects_unknown_question_type() {
        let parsed = Cli::try_parse_from(["aivis", "assess", "--company", "acme", "--types", "bogus"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn import_file_shape() {
        let import: CompanyImport = serde_json::from_str(
            r#"{
                "id": "acme",
                "name": "Acme Corp",
                "domain": "acme.dev",
                "knowledge": {
                    "competitors": ["riva.ai", "nimbus.ai"],
                    "features": {"items": ["inline suggestions"]}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(import.knowledge.len(), 2);
        let record = import.record();
        assert_eq!(record.domain, "acme.dev");
        assert!(record.aliases.is_empty());
        assert!(validate_company(&record).is_ok());
    }

    #[test]
    fn empty_company_fields_are_rejected() {
        let record = CompanyRecord {
            id: "acme".into(),
            name: " ".into(),
            domain: "acme.dev".into(),
            aliases: vec![],
            industry: None,
            business_model: None,
        };
        assert!(validate_company(&record).is_err());
    }
}
