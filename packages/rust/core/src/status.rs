//! Read-side queries for polling clients.

use aivis_shared::{AivisError, AssessmentResults, AssessmentStatus, Result, RunId};
use aivis_storage::RunStore;

/// Current status of a run.
pub async fn get_status(store: &dyn RunStore, run_id: &RunId) -> Result<AssessmentStatus> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AivisError::not_found(format!("run {run_id}")))?;
    Ok(AssessmentStatus::from(&run))
}

/// Full result bundle for a run.
///
/// Works for any status: a failed run returns whatever was persisted
/// before the failure.
pub async fn load_results(store: &dyn RunStore, run_id: &RunId) -> Result<AssessmentResults> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AivisError::not_found(format!("run {run_id}")))?;
    let questions = store.list_questions(run_id).await?;
    let analyses = store.list_analyses(run_id).await?;
    let competitors = store.list_competitor_snapshots(run_id).await?;

    Ok(AssessmentResults {
        run,
        questions,
        analyses,
        competitors,
    })
}
