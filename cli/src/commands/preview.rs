use causeway_core::gate::GateState;
use serde_json::json;

use crate::api::JobApi;
use crate::commands::status;
use crate::fetcher::PreviewFetcher;
use crate::snapshot::SnapshotStore;

/// Load (or poll for) the draft preview and render it.
pub async fn run(
    api: &JobApi,
    store: &SnapshotStore,
    job_id: &str,
    main_data_source_id: Option<String>,
    watch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut gate = store.resume_gate(job_id);
    if gate.is_locked() {
        // Locked jobs render from the snapshot; the preview is final.
        return status::run(&gate);
    }

    let mut fetcher = PreviewFetcher::new(api, store, main_data_source_id);
    if watch {
        let completed = fetcher.watch(&mut gate).await?;
        if !completed {
            let output = json!({
                "job_id": job_id,
                "state": gate.state(),
                "status": "stopped",
                "message": "polling interrupted; retry timer disarmed"
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }
    } else {
        fetcher.load_once(&mut gate).await?;
    }

    if gate.state() == GateState::Pending {
        let output = json!({
            "job_id": job_id,
            "state": gate.state(),
            "message": "draft still being prepared; re-run with --watch to poll"
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    status::run(&gate)
}
