use crate::api::JobApi;
use crate::patch::{PatchCoordinator, outcome_json};
use crate::snapshot::SnapshotStore;

/// Submit the entered open-unknown values as a partial patch.
pub async fn run(
    api: &JobApi,
    store: &SnapshotStore,
    job_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut gate = store.resume_gate(job_id);
    let mut coordinator = PatchCoordinator::new();
    let outcome = coordinator.apply_clarifications(api, store, &mut gate).await?;
    println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    Ok(())
}
