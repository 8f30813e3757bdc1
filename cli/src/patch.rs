//! Correction & patch coordinator: turns the user's open-unknown values
//! into a partial patch request and reconciles the server's delta back
//! into the live preview and the snapshots. Failure leaves every local
//! value exactly where the user typed it.

use std::collections::BTreeMap;

use causeway_core::error::GateError;
use causeway_core::gate::{Gate, GateState};
use causeway_core::preview::PatchResponse;
use serde_json::json;

use crate::api::JobApi;
use crate::snapshot::SnapshotStore;

/// Result of one successful patch round-trip.
#[derive(Debug)]
pub struct PatchOutcome {
    /// Field keys dropped from the local open-unknown values.
    pub resolved_fields: Vec<String>,
    /// Blocking fields still unmet after reconciliation.
    pub remaining_blocking: Vec<String>,
}

/// Fold a successful patch response into the gate: replace the unknown
/// list and variable roles the server sent, then drop the values it
/// accepted. `sent` is the payload we submitted — the fallback when an
/// older server omits `patched_fields`.
pub fn reconcile(
    gate: &mut Gate,
    sent: &BTreeMap<String, String>,
    response: PatchResponse,
) -> Result<Vec<String>, GateError> {
    let resolved: Vec<String> = response
        .patched_fields
        .unwrap_or_else(|| sent.keys().cloned().collect());

    let mut preview = gate
        .preview()
        .cloned()
        .ok_or_else(|| GateError::MissingPrerequisite("no draft preview loaded".into()))?;
    if let Some(open_unknowns) = response.open_unknowns {
        preview.open_unknowns = open_unknowns;
    }
    response.draft_preview.apply(&mut preview);

    gate.replace_preview(preview)?;
    for field in &resolved {
        gate.clear_unknown_value(field)?;
    }
    Ok(resolved)
}

pub struct PatchCoordinator {
    /// One patch in flight per job; a second call is refused while set.
    is_patching: bool,
}

impl PatchCoordinator {
    pub fn new() -> Self {
        PatchCoordinator { is_patching: false }
    }

    pub fn is_patching(&self) -> bool {
        self.is_patching
    }

    /// Submit the filled-in open-unknown values. `Ok(None)` means there
    /// was nothing to send and no request went out.
    pub async fn apply_clarifications(
        &mut self,
        api: &JobApi,
        store: &SnapshotStore,
        gate: &mut Gate,
    ) -> Result<Option<PatchOutcome>, GateError> {
        if gate.is_locked() {
            return Err(GateError::Validation(
                "draft already confirmed; nothing left to patch".into(),
            ));
        }
        if gate.state() != GateState::Ready {
            return Err(GateError::MissingPrerequisite(
                "load the draft preview before patching".into(),
            ));
        }
        if self.is_patching {
            return Err(GateError::Validation("a patch is already in flight".into()));
        }

        let field_updates = gate.form().unknown_values.filled();
        if field_updates.is_empty() {
            return Ok(None);
        }

        self.is_patching = true;
        let result = api.patch_draft(gate.job_id(), &field_updates).await;
        self.is_patching = false;

        let response = result.map_err(|e| match e {
            // Keep auth/local kinds intact; wrap the rest so the user sees
            // this was the clarification submission that failed.
            GateError::Network(msg) => {
                GateError::Network(format!("clarification submission failed: {msg}"))
            }
            GateError::Parse(msg) => {
                GateError::Parse(format!("clarification submission failed: {msg}"))
            }
            GateError::Http { status, message } => GateError::Http {
                status,
                message: format!("clarification submission failed: {message}"),
            },
            other => other,
        })?;

        let resolved = reconcile(gate, &field_updates, response)?;

        if let Some(preview) = gate.preview() {
            if let Err(e) = store.save_preview(gate.job_id(), preview) {
                tracing::warn!(error = %e, "failed to snapshot patched preview");
            }
        }
        if let Err(e) = store.save_form(gate.job_id(), gate.form()) {
            tracing::warn!(error = %e, "failed to snapshot form draft");
        }

        let remaining_blocking = gate
            .blockers()
            .map(|b| b.missing_blocking_fields)
            .unwrap_or_default();
        tracing::debug!(resolved = resolved.len(), "patch applied");

        Ok(Some(PatchOutcome { resolved_fields: resolved, remaining_blocking }))
    }
}

impl Default for PatchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a patch outcome for the CLI.
pub fn outcome_json(outcome: &Option<PatchOutcome>) -> serde_json::Value {
    match outcome {
        None => json!({"status": "noop", "message": "no non-empty values to submit"}),
        Some(outcome) => json!({
            "status": "patched",
            "resolved_fields": outcome.resolved_fields,
            "remaining_blocking": outcome.remaining_blocking,
        }),
    }
}

#[cfg(test)]
mod tests {
    use causeway_core::gate::{Gate, GateState};
    use causeway_core::preview::{DraftPreview, PreviewPoll};
    use serde_json::json;

    use super::*;

    fn ready_gate(raw: serde_json::Value) -> Gate {
        let mut gate = Gate::new("job-1");
        let generation = gate.begin_load().unwrap();
        gate.apply_poll(
            generation,
            PreviewPoll::Ready(DraftPreview::from_value(&raw)),
        );
        gate
    }

    #[test]
    fn reconcile_removes_fields_named_by_the_server() {
        // The accepted field key wins even when the value the user
        // supplied ("firm_id") names a different column.
        let mut gate = ready_gate(json!({"open_unknowns": [
            {"field": "panel_id", "impact": "high"}
        ]}));
        gate.set_unknown_value("panel_id", "firm_id").unwrap();
        assert_eq!(
            gate.blockers().unwrap().missing_blocking_fields,
            Vec::<String>::new()
        );

        let sent = gate.form().unknown_values.filled();
        let response = PatchResponse::from_value(&json!({
            "patched_fields": ["panel_id"],
            "open_unknowns": []
        }));
        let resolved = reconcile(&mut gate, &sent, response).unwrap();
        assert_eq!(resolved, vec!["panel_id"]);
        assert!(gate.form().unknown_values.get("panel_id").is_none());
        assert!(gate.preview().unwrap().open_unknowns.is_empty());
        assert!(gate.blockers().unwrap().is_empty());
    }

    #[test]
    fn reconcile_falls_back_to_the_sent_keys() {
        let mut gate = ready_gate(json!({"open_unknowns": [
            {"field": "panel_id", "impact": "high"},
            {"field": "cluster", "impact": "critical"}
        ]}));
        gate.set_unknown_value("panel_id", "firm_id").unwrap();

        let sent = gate.form().unknown_values.filled();
        let response = PatchResponse::from_value(&json!({}));
        let resolved = reconcile(&mut gate, &sent, response).unwrap();
        assert_eq!(resolved, vec!["panel_id"]);
        assert!(gate.form().unknown_values.get("panel_id").is_none());
        // Unknown list untouched when the server sends none.
        assert_eq!(gate.preview().unwrap().open_unknowns.len(), 2);
    }

    #[test]
    fn reconcile_merges_the_role_delta() {
        let mut gate = ready_gate(json!({
            "outcome_var": "sales", "treatment_var": "discount",
            "open_unknowns": [{"field": "outcome", "impact": "high"}]
        }));
        gate.set_unknown_value("outcome", "revenue").unwrap();

        let sent = gate.form().unknown_values.filled();
        let response = PatchResponse::from_value(&json!({
            "patched_fields": ["outcome"],
            "open_unknowns": [],
            "draft_preview": {"outcome_var": "revenue", "treatment_var": null}
        }));
        reconcile(&mut gate, &sent, response).unwrap();
        let preview = gate.preview().unwrap();
        assert_eq!(preview.outcome_var.as_deref(), Some("revenue"));
        // Explicit null means unset, not no-op.
        assert_eq!(preview.treatment_var, None);
    }

    #[tokio::test]
    async fn empty_values_are_a_local_noop() {
        let api = JobApi::new("http://127.0.0.1:9", None);
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open_at(dir.path());
        let mut gate = ready_gate(json!({}));
        gate.set_unknown_value("panel_id", "   ").unwrap();

        // An unreachable API proves no request is attempted.
        let mut coordinator = PatchCoordinator::new();
        let outcome = coordinator
            .apply_clarifications(&api, &store, &mut gate)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(gate.state(), GateState::Ready);
        assert_eq!(gate.form().unknown_values.get("panel_id"), Some("   "));
    }

    #[tokio::test]
    async fn failure_leaves_local_state_untouched() {
        let api = JobApi::new("http://127.0.0.1:9", None);
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open_at(dir.path());
        let mut gate = ready_gate(json!({"open_unknowns": [
            {"field": "panel_id", "impact": "high"}
        ]}));
        gate.set_unknown_value("panel_id", "firm_id").unwrap();

        let mut coordinator = PatchCoordinator::new();
        let err = coordinator
            .apply_clarifications(&api, &store, &mut gate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("clarification submission failed"));
        assert_eq!(gate.form().unknown_values.get("panel_id"), Some("firm_id"));
        assert!(!coordinator.is_patching());
    }
}
