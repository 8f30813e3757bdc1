//! The confirmation gate: a single-owner state machine that decides when a
//! draft may be confirmed, and that becomes permanently locked once it has
//! been. Transitions are plain methods so they can be unit-tested without
//! a network; the CLI drives them with fetch/patch/confirm results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clarify::{Blockers, FormDraft};
use crate::error::GateError;
use crate::preview::{DraftPreview, PreviewPoll};

/// Where the gate currently stands for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// No preview yet and nothing in flight.
    Idle,
    /// A preview fetch is in flight.
    Loading,
    /// Server still preprocessing; one retry timer is armed.
    Pending,
    /// Preview available; corrections, answers and values may change.
    Ready,
    /// Confirm request in flight; all mutation disabled.
    Confirming,
    /// Terminal. A confirm lock exists and the surface is read-only.
    Locked,
}

/// Permanent record that the draft was finalized. Created exactly once
/// per job; its presence makes everything read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmLock {
    pub confirmed_at: DateTime<Utc>,
}

/// Body of `POST /jobs/{id}/confirm`. Built once per attempt so a retry
/// after failure resubmits the identical payload.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmRequest {
    pub confirmed: bool,
    pub variable_corrections: BTreeMap<String, String>,
    pub answers: BTreeMap<String, Vec<String>>,
    pub default_overrides: serde_json::Value,
    pub expert_suggestions_feedback: serde_json::Value,
}

/// What a confirm attempt resolved to before any request is sent.
#[derive(Debug)]
pub enum ConfirmDisposition {
    /// Blocking rules unmet; the gate stays in `ready` and reports them.
    Blocked(Blockers),
    /// The decision demands a downgrade acknowledgement first; the modal
    /// is armed with the prepared request.
    NeedsAcknowledgement,
    /// Guards passed; the gate is `confirming` and this payload must go
    /// out exactly once.
    Submit(ConfirmRequest),
}

/// One pending yes/no gate. At most one request is armed at a time:
/// arming replaces the previous one, confirming fires and clears it,
/// cancelling clears it without firing. Owned by a [`Gate`], so it can
/// never leak across jobs.
#[derive(Debug, Default)]
pub struct DowngradeModal {
    armed: Option<ConfirmRequest>,
}

impl DowngradeModal {
    pub fn arm(&mut self, request: ConfirmRequest) {
        self.armed = Some(request);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn fire(&mut self) -> Option<ConfirmRequest> {
        self.armed.take()
    }

    pub fn cancel(&mut self) {
        self.armed = None;
    }
}

/// The gate itself. One instance per job; seeded from snapshots on
/// startup so a reload resumes mid-flow.
#[derive(Debug)]
pub struct Gate {
    job_id: String,
    state: GateState,
    preview: Option<DraftPreview>,
    form: FormDraft,
    lock: Option<ConfirmLock>,
    modal: DowngradeModal,
    /// Monotonic fetch generation; stale responses are discarded.
    generation: u64,
    last_error: Option<String>,
}

impl Gate {
    pub fn new(job_id: impl Into<String>) -> Self {
        Gate {
            job_id: job_id.into(),
            state: GateState::Idle,
            preview: None,
            form: FormDraft::default(),
            lock: None,
            modal: DowngradeModal::default(),
            generation: 0,
            last_error: None,
        }
    }

    /// Rebuild a gate from persisted snapshots. A confirm lock wins over
    /// everything else; otherwise a cached preview puts us in `ready`.
    pub fn resume(
        job_id: impl Into<String>,
        preview: Option<DraftPreview>,
        form: Option<FormDraft>,
        lock: Option<ConfirmLock>,
    ) -> Self {
        let mut gate = Gate::new(job_id);
        gate.preview = preview;
        gate.form = form.unwrap_or_default();
        gate.state = match (&gate.preview, &lock) {
            (_, Some(_)) => GateState::Locked,
            (Some(_), None) => GateState::Ready,
            (None, None) => GateState::Idle,
        };
        gate.lock = lock;
        gate
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn preview(&self) -> Option<&DraftPreview> {
        self.preview.as_ref()
    }

    pub fn form(&self) -> &FormDraft {
        &self.form
    }

    pub fn lock(&self) -> Option<&ConfirmLock> {
        self.lock.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, GateState::Locked)
    }

    /// Current blocker sets, recomputed from scratch every call.
    pub fn blockers(&self) -> Option<Blockers> {
        self.preview
            .as_ref()
            .map(|p| Blockers::compute(p, &self.form))
    }

    /// Start a preview fetch. Returns the generation token the eventual
    /// result must present; stale results are ignored. Refused while a
    /// confirm is in flight or after the lock exists. The caller must
    /// disarm any retry timer before issuing the request.
    pub fn begin_load(&mut self) -> Result<u64, GateError> {
        match self.state {
            GateState::Confirming => Err(GateError::Validation(
                "a confirm is in flight; cannot reload the preview".into(),
            )),
            GateState::Locked => Err(GateError::Validation(
                "draft already confirmed; preview is final".into(),
            )),
            _ => {
                self.generation += 1;
                self.state = GateState::Loading;
                Ok(self.generation)
            }
        }
    }

    /// Apply a fetch outcome. Outcomes from superseded generations are
    /// discarded (returns false).
    pub fn apply_poll(&mut self, generation: u64, poll: PreviewPoll) -> bool {
        if generation != self.generation || self.state == GateState::Locked {
            return false;
        }
        match poll {
            PreviewPoll::Ready(preview) => {
                self.preview = Some(preview);
                self.state = GateState::Ready;
                self.last_error = None;
            }
            PreviewPoll::Pending { .. } => {
                self.state = GateState::Pending;
            }
        }
        true
    }

    /// Record a fetch failure. The gate falls back to `ready` when a
    /// cached preview exists, `idle` otherwise; it never auto-retries.
    pub fn apply_load_error(&mut self, generation: u64, error: &GateError) -> bool {
        if generation != self.generation || self.state == GateState::Locked {
            return false;
        }
        self.last_error = Some(error.to_string());
        self.state = if self.preview.is_some() {
            GateState::Ready
        } else {
            GateState::Idle
        };
        true
    }

    /// Replace the whole preview object (successful patch). Partial
    /// external mutation is forbidden; this is the only in-place path
    /// besides a fresh fetch.
    pub fn replace_preview(&mut self, preview: DraftPreview) -> Result<(), GateError> {
        self.require_mutable()?;
        self.preview = Some(preview);
        Ok(())
    }

    fn require_mutable(&self) -> Result<&DraftPreview, GateError> {
        if self.is_locked() {
            return Err(GateError::Validation(
                "draft already confirmed; inputs are read-only".into(),
            ));
        }
        if self.state == GateState::Confirming {
            return Err(GateError::Validation(
                "confirm in flight; inputs are temporarily read-only".into(),
            ));
        }
        self.preview.as_ref().ok_or_else(|| {
            GateError::MissingPrerequisite("no draft preview loaded for this job".into())
        })
    }

    /// Toggle a stage-1 answer.
    pub fn toggle_answer(&mut self, question_id: &str, option_id: &str) -> Result<(), GateError> {
        let preview = self.require_mutable()?;
        let question = preview
            .stage1_questions
            .iter()
            .find(|q| q.question_id == question_id)
            .cloned()
            .ok_or_else(|| {
                GateError::Validation(format!("unknown stage-1 question: {question_id}"))
            })?;
        if !question.options.iter().any(|o| o.option_id == option_id) {
            return Err(GateError::Validation(format!(
                "question {question_id} has no option {option_id}"
            )));
        }
        self.form.answers.toggle(&question, option_id);
        Ok(())
    }

    /// Set (or clear, via identity/empty) a variable-name correction.
    pub fn set_correction(&mut self, original: &str, corrected: &str) -> Result<(), GateError> {
        self.require_mutable()?;
        self.form.corrections.set(original, corrected);
        Ok(())
    }

    pub fn set_unknown_value(&mut self, field: &str, value: &str) -> Result<(), GateError> {
        self.require_mutable()?;
        self.form.unknown_values.set(field, value);
        Ok(())
    }

    pub fn clear_unknown_value(&mut self, field: &str) -> Result<(), GateError> {
        self.require_mutable()?;
        self.form.unknown_values.clear(field);
        Ok(())
    }

    fn build_confirm_request(&self, preview: &DraftPreview) -> ConfirmRequest {
        let answers = if preview.stage1_questions.is_empty() {
            BTreeMap::new()
        } else {
            self.form.answers.as_map().clone()
        };
        ConfirmRequest {
            confirmed: true,
            variable_corrections: self.form.corrections.as_map().clone(),
            answers,
            default_overrides: preview.default_overrides.clone(),
            expert_suggestions_feedback: json!({}),
        }
    }

    /// Attempt the `ready → confirming` transition. Blocking rules are
    /// re-evaluated here; an unmet rule keeps the gate in `ready` and
    /// hands back the offending items instead of transitioning silently.
    pub fn request_confirm(&mut self) -> Result<ConfirmDisposition, GateError> {
        if self.is_locked() {
            return Err(GateError::Validation(
                "draft already confirmed for this job".into(),
            ));
        }
        if self.state == GateState::Confirming {
            return Err(GateError::Validation("confirm already in flight".into()));
        }
        if self.state != GateState::Ready {
            return Err(GateError::MissingPrerequisite(
                "load the draft preview before confirming".into(),
            ));
        }
        let preview = self
            .preview
            .as_ref()
            .ok_or_else(|| {
                GateError::MissingPrerequisite("no draft preview loaded for this job".into())
            })?
            .clone();

        let blockers = Blockers::compute(&preview, &self.form);
        if !blockers.is_empty() {
            return Ok(ConfirmDisposition::Blocked(blockers));
        }

        let request = self.build_confirm_request(&preview);
        if preview.decision.requires_downgrade_ack() {
            self.modal.arm(request);
            return Ok(ConfirmDisposition::NeedsAcknowledgement);
        }
        self.state = GateState::Confirming;
        Ok(ConfirmDisposition::Submit(request))
    }

    /// Fire the armed downgrade acknowledgement. Returns the payload to
    /// submit, or `None` when nothing was armed.
    pub fn acknowledge_downgrade(&mut self) -> Option<ConfirmRequest> {
        let request = self.modal.fire()?;
        self.state = GateState::Confirming;
        Some(request)
    }

    /// Dismiss the modal: back to `ready`, no side effects.
    pub fn cancel_downgrade(&mut self) {
        self.modal.cancel();
    }

    pub fn downgrade_armed(&self) -> bool {
        self.modal.is_armed()
    }

    /// Apply the confirm response. Success clears every transient
    /// clarification value and locks the gate permanently; failure
    /// returns to `ready` with all user input intact.
    pub fn finish_confirm(&mut self, result: Result<DateTime<Utc>, &GateError>) -> Option<ConfirmLock> {
        // Only a confirm that actually went out may resolve; anything
        // else is ignored so a misuse can never lock the gate.
        if self.state != GateState::Confirming {
            return None;
        }
        match result {
            Ok(confirmed_at) => {
                let lock = ConfirmLock { confirmed_at };
                self.form = FormDraft::default();
                self.lock = Some(lock.clone());
                self.state = GateState::Locked;
                self.last_error = None;
                Some(lock)
            }
            Err(error) => {
                self.state = GateState::Ready;
                self.last_error = Some(error.to_string());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::time::Duration;

    use super::*;
    use crate::preview::DraftPreview;

    fn preview(raw: serde_json::Value) -> DraftPreview {
        DraftPreview::from_value(&raw)
    }

    fn ready_gate(raw: serde_json::Value) -> Gate {
        let mut gate = Gate::new("job-1");
        let generation = gate.begin_load().unwrap();
        gate.apply_poll(generation, PreviewPoll::Ready(preview(raw)));
        assert_eq!(gate.state(), GateState::Ready);
        gate
    }

    #[test]
    fn pending_then_ready_follows_the_fetch_outcomes() {
        let mut gate = Gate::new("job-1");
        let generation = gate.begin_load().unwrap();
        assert_eq!(gate.state(), GateState::Loading);

        assert!(gate.apply_poll(
            generation,
            PreviewPoll::Pending { retry_after: Duration::from_secs(3) }
        ));
        assert_eq!(gate.state(), GateState::Pending);

        let generation = gate.begin_load().unwrap();
        assert!(gate.apply_poll(generation, PreviewPoll::Ready(preview(json!({})))));
        assert_eq!(gate.state(), GateState::Ready);
    }

    #[test]
    fn stale_generations_are_discarded() {
        let mut gate = Gate::new("job-1");
        let old = gate.begin_load().unwrap();
        let new = gate.begin_load().unwrap();
        assert!(!gate.apply_poll(old, PreviewPoll::Ready(preview(json!({"draft_id": "stale"})))));
        assert_eq!(gate.state(), GateState::Loading);
        assert!(gate.apply_poll(new, PreviewPoll::Ready(preview(json!({"draft_id": "fresh"})))));
        assert_eq!(gate.preview().unwrap().draft_id.as_deref(), Some("fresh"));
    }

    #[test]
    fn load_error_returns_to_ready_when_a_preview_is_cached() {
        let mut gate = ready_gate(json!({}));
        let generation = gate.begin_load().unwrap();
        gate.apply_load_error(generation, &GateError::Network("boom".into()));
        assert_eq!(gate.state(), GateState::Ready);
        assert!(gate.last_error().unwrap().contains("boom"));

        let mut gate = Gate::new("job-2");
        let generation = gate.begin_load().unwrap();
        gate.apply_load_error(generation, &GateError::Network("boom".into()));
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn blocked_confirm_stays_ready_and_names_the_unmet_items() {
        let mut gate = ready_gate(json!({
            "stage1_questions": [{"question_id": "q1", "options": [{"option_id": "a"}]}],
            "open_unknowns": [{"field": "panel_id", "impact": "critical"}]
        }));
        match gate.request_confirm().unwrap() {
            ConfirmDisposition::Blocked(blockers) => {
                assert_eq!(blockers.unanswered_questions, vec!["q1"]);
                assert_eq!(blockers.missing_blocking_fields, vec!["panel_id"]);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
        assert_eq!(gate.state(), GateState::Ready);
    }

    #[test]
    fn satisfied_guards_transition_to_confirming_with_a_payload() {
        let mut gate = ready_gate(json!({
            "stage1_questions": [{"question_id": "q1", "options": [{"option_id": "a"}]}],
            "default_overrides": {"bandwidth": "wide"}
        }));
        gate.toggle_answer("q1", "a").unwrap();
        gate.set_correction("revnue", "revenue").unwrap();
        match gate.request_confirm().unwrap() {
            ConfirmDisposition::Submit(request) => {
                assert!(request.confirmed);
                assert_eq!(request.answers["q1"], vec!["a"]);
                assert_eq!(request.variable_corrections["revnue"], "revenue");
                assert_eq!(request.default_overrides, json!({"bandwidth": "wide"}));
                assert_eq!(request.expert_suggestions_feedback, json!({}));
            }
            other => panic!("expected Submit, got {other:?}"),
        }
        assert_eq!(gate.state(), GateState::Confirming);
        assert!(gate.request_confirm().is_err());
    }

    #[test]
    fn answers_are_emptied_when_no_questions_exist() {
        let mut gate = ready_gate(json!({}));
        match gate.request_confirm().unwrap() {
            ConfirmDisposition::Submit(request) => assert!(request.answers.is_empty()),
            other => panic!("expected Submit, got {other:?}"),
        }
    }

    #[test]
    fn downgrade_requires_modal_acknowledgement() {
        let mut gate = ready_gate(json!({"decision": "require_confirm_with_downgrade"}));
        match gate.request_confirm().unwrap() {
            ConfirmDisposition::NeedsAcknowledgement => {}
            other => panic!("expected NeedsAcknowledgement, got {other:?}"),
        }
        assert!(gate.downgrade_armed());
        assert_eq!(gate.state(), GateState::Ready);

        // Cancel: no request, no transition, nothing armed.
        gate.cancel_downgrade();
        assert!(!gate.downgrade_armed());
        assert!(gate.acknowledge_downgrade().is_none());
        assert_eq!(gate.state(), GateState::Ready);

        // Re-request and confirm: exactly one payload comes out.
        gate.request_confirm().unwrap();
        let request = gate.acknowledge_downgrade().unwrap();
        assert!(request.confirmed);
        assert_eq!(gate.state(), GateState::Confirming);
        assert!(gate.acknowledge_downgrade().is_none());
    }

    #[test]
    fn rearming_replaces_the_previous_callback() {
        let mut modal = DowngradeModal::default();
        modal.arm(ConfirmRequest {
            confirmed: true,
            variable_corrections: BTreeMap::from([("old".into(), "x".into())]),
            answers: BTreeMap::new(),
            default_overrides: json!({}),
            expert_suggestions_feedback: json!({}),
        });
        modal.arm(ConfirmRequest {
            confirmed: true,
            variable_corrections: BTreeMap::from([("new".into(), "y".into())]),
            answers: BTreeMap::new(),
            default_overrides: json!({}),
            expert_suggestions_feedback: json!({}),
        });
        let fired = modal.fire().unwrap();
        assert!(fired.variable_corrections.contains_key("new"));
        assert!(modal.fire().is_none());
    }

    #[test]
    fn confirm_failure_preserves_input_and_retry_resubmits_identically() {
        let mut gate = ready_gate(json!({
            "stage1_questions": [{"question_id": "q1", "options": [{"option_id": "a"}]}]
        }));
        gate.toggle_answer("q1", "a").unwrap();
        gate.set_unknown_value("panel_id", "firm_id").unwrap();

        let first = match gate.request_confirm().unwrap() {
            ConfirmDisposition::Submit(request) => request,
            other => panic!("expected Submit, got {other:?}"),
        };
        let error = GateError::Http { status: 500, message: "boom".into() };
        assert!(gate.finish_confirm(Err(&error)).is_none());
        assert_eq!(gate.state(), GateState::Ready);
        assert_eq!(gate.form().unknown_values.get("panel_id"), Some("firm_id"));
        assert!(gate.form().answers.is_answered("q1"));

        let second = match gate.request_confirm().unwrap() {
            ConfirmDisposition::Submit(request) => request,
            other => panic!("expected Submit, got {other:?}"),
        };
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn confirm_success_locks_and_clears_transient_state() {
        let mut gate = ready_gate(json!({}));
        gate.set_correction("a", "b").unwrap();
        gate.request_confirm().unwrap();
        let confirmed_at = Utc::now();
        let lock = gate.finish_confirm(Ok(confirmed_at)).unwrap();
        assert_eq!(lock.confirmed_at, confirmed_at);
        assert!(gate.is_locked());
        assert!(gate.form().corrections.is_empty());

        // Terminal: nothing mutates, nothing reloads, nothing reconfirms.
        assert!(gate.set_correction("x", "y").is_err());
        assert!(gate.begin_load().is_err());
        assert!(gate.request_confirm().is_err());
    }

    #[test]
    fn finish_confirm_outside_confirming_is_ignored() {
        let mut gate = ready_gate(json!({}));
        assert!(gate.finish_confirm(Ok(Utc::now())).is_none());
        assert_eq!(gate.state(), GateState::Ready);
        assert!(gate.lock().is_none());

        let mut gate = Gate::new("job-1");
        let error = GateError::Network("boom".into());
        assert!(gate.finish_confirm(Err(&error)).is_none());
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn resume_prefers_lock_then_preview() {
        let lock = ConfirmLock { confirmed_at: Utc::now() };
        let gate = Gate::resume("job-1", None, None, Some(lock));
        assert_eq!(gate.state(), GateState::Locked);

        let gate = Gate::resume("job-1", Some(preview(json!({}))), None, None);
        assert_eq!(gate.state(), GateState::Ready);

        let gate = Gate::resume("job-1", None, None, None);
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn mutation_is_refused_without_a_preview() {
        let mut gate = Gate::new("job-1");
        assert!(matches!(
            gate.set_unknown_value("f", "v"),
            Err(GateError::MissingPrerequisite(_))
        ));
    }
}
