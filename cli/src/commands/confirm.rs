use causeway_core::clarify::Blockers;
use causeway_core::error::GateError;
use causeway_core::gate::{ConfirmDisposition, ConfirmRequest, Gate};
use chrono::Utc;
use serde_json::json;

use crate::api::JobApi;
use crate::snapshot::SnapshotStore;

/// Run the confirmation gate end to end: blocking-rule checks, the
/// downgrade acknowledgement when the decision demands one, a single
/// confirm request, and the permanent lock on success.
pub async fn run(
    api: &JobApi,
    store: &SnapshotStore,
    job_id: &str,
    acknowledge_downgrade: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut gate = store.resume_gate(job_id);

    if gate.is_locked() {
        let output = json!({
            "status": "already_confirmed",
            "job_id": job_id,
            "confirmed_at": gate.lock().map(|l| l.confirmed_at),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let request = match gate.request_confirm()? {
        ConfirmDisposition::Blocked(blockers) => {
            // No transition and no request; name the unmet items.
            return Err(Box::new(GateError::Validation(blockers_message(&blockers))));
        }
        ConfirmDisposition::NeedsAcknowledgement => {
            if acknowledge_downgrade || prompt_downgrade()? {
                match gate.acknowledge_downgrade() {
                    Some(request) => request,
                    None => {
                        return Err(Box::new(GateError::Validation(
                            "no downgrade acknowledgement pending".into(),
                        )));
                    }
                }
            } else {
                gate.cancel_downgrade();
                let output = json!({
                    "status": "cancelled",
                    "job_id": job_id,
                    "message": "downgrade not acknowledged; nothing was sent"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }
        }
        ConfirmDisposition::Submit(request) => request,
    };

    submit(api, store, &mut gate, request).await
}

async fn submit(
    api: &JobApi,
    store: &SnapshotStore,
    gate: &mut Gate,
    request: ConfirmRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!(job_id = gate.job_id(), "submitting confirm");
    match api.confirm(gate.job_id(), &request).await {
        Ok(body) => {
            let lock = gate
                .finish_confirm(Ok(Utc::now()))
                .ok_or_else(|| GateError::Validation("confirm state out of sync".into()))?;
            store.save_lock(gate.job_id(), &lock)?;
            store.clear_form(gate.job_id())?;
            let output = json!({
                "status": "confirmed",
                "job_id": gate.job_id(),
                "confirmed_at": lock.confirmed_at,
                "response": body,
                "docs_hint": "Execution has started. Track it with `causeway status`."
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(error) => {
            // Stay in ready: inputs survive and re-running `confirm`
            // resubmits the identical payload.
            gate.finish_confirm(Err(&error));
            store.save_form(gate.job_id(), gate.form())?;
            Err(Box::new(error))
        }
    }
}

/// Spell out every unmet blocking rule, first items first, so the user
/// knows exactly what still stands between them and the confirm.
fn blockers_message(blockers: &Blockers) -> String {
    let mut parts = Vec::new();
    if !blockers.unanswered_questions.is_empty() {
        parts.push(format!(
            "unanswered stage-1 questions: {}",
            blockers.unanswered_questions.join(", ")
        ));
    }
    if !blockers.missing_blocking_fields.is_empty() {
        parts.push(format!(
            "blocking unknowns without values: {}",
            blockers.missing_blocking_fields.join(", ")
        ));
    }
    format!("confirmation blocked: {}", parts.join("; "))
}

/// The downgrade modal, CLI edition: one explicit yes/no, default no.
fn prompt_downgrade() -> Result<bool, Box<dyn std::error::Error>> {
    eprintln!(
        "The server will proceed under a reduced-confidence (downgraded) analysis plan."
    );
    eprint!("Acknowledge and confirm anyway? [y/N] ");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
    use causeway_core::preview::DraftPreview;
    use serde_json::json;

    use super::*;
    use crate::api::JobApi;
    use crate::snapshot::SnapshotStore;

    #[tokio::test]
    async fn blocked_confirm_errors_before_any_request() {
        let api = JobApi::new("http://127.0.0.1:9", None);
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open_at(dir.path());
        let preview = DraftPreview::from_value(&json!({
            "stage1_questions": [{"question_id": "q1", "options": [{"option_id": "a"}]}],
            "open_unknowns": [{"field": "panel_id", "impact": "high"}]
        }));
        store.save_preview("job-1", &preview).unwrap();

        // The API endpoint is unreachable, so an error here can only be
        // the local validation short-circuit.
        let err = run(&api, &store, "job-1", false).await.unwrap_err();
        let gate_err = err.downcast_ref::<GateError>().unwrap();
        assert_eq!(gate_err.kind(), "validation");
        let message = gate_err.to_string();
        assert!(message.contains("q1"));
        assert!(message.contains("panel_id"));
    }

    #[test]
    fn blockers_message_lists_both_rule_sets() {
        let blockers = Blockers {
            unanswered_questions: vec!["q1".into()],
            missing_blocking_fields: vec!["panel_id".into()],
        };
        let message = blockers_message(&blockers);
        assert!(message.starts_with("confirmation blocked"));
        assert!(message.contains("unanswered stage-1 questions: q1"));
        assert!(message.contains("blocking unknowns without values: panel_id"));
    }
}
