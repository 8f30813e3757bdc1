use causeway_core::clarify::candidate_columns;
use causeway_core::gate::Gate;
use serde_json::{Value, json};

/// Render the whole clarification surface for one job. Once a confirm
/// lock exists this is the read-only display the gate leaves behind.
pub fn summary(gate: &Gate) -> Value {
    let mut out = json!({
        "job_id": gate.job_id(),
        "state": gate.state(),
    });

    if let Some(error) = gate.last_error() {
        out["last_error"] = json!(error);
    }
    if let Some(lock) = gate.lock() {
        out["confirmed_at"] = json!(lock.confirmed_at);
    }

    let Some(preview) = gate.preview() else {
        out["docs_hint"] = json!("No preview yet. Run `causeway preview --job-id <id>`.");
        return out;
    };

    let corrections = &gate.form().corrections;
    let display = |name: &Option<String>| -> Value {
        match name.as_deref().and_then(|n| corrections.corrected_name(n)) {
            Some(n) => json!(n),
            None => Value::Null,
        }
    };

    out["draft"] = json!({
        "draft_id": preview.draft_id,
        "decision": preview.decision,
        "risk_score": preview.risk_score,
        "outcome_var": display(&preview.outcome_var),
        "treatment_var": display(&preview.treatment_var),
        "controls": preview.controls.iter()
            .filter_map(|c| corrections.corrected_name(c))
            .collect::<Vec<_>>(),
    });

    out["data_quality_warnings"] = json!(preview.data_quality_warnings);

    out["stage1_questions"] = Value::Array(
        preview
            .stage1_questions
            .iter()
            .map(|q| {
                json!({
                    "question_id": q.question_id,
                    "question_text": q.question_text,
                    "question_type": q.question_type,
                    "options": q.options,
                    "selected": gate.form().answers.selections(&q.question_id),
                })
            })
            .collect(),
    );

    out["open_unknowns"] = Value::Array(
        preview
            .open_unknowns
            .iter()
            .map(|u| {
                json!({
                    "field": u.field,
                    "description": u.description,
                    "impact": u.impact,
                    "blocking": u.is_blocking(),
                    "candidates": u.candidates,
                    "value": gate.form().unknown_values.get(&u.field),
                })
            })
            .collect(),
    );

    out["candidate_columns"] = json!(candidate_columns(preview, &[]));

    if let Some(blockers) = gate.blockers() {
        out["confirmable"] = json!(blockers.is_empty() && !gate.is_locked());
        out["blockers"] = json!(blockers);
    }

    out
}

pub fn run(gate: &Gate) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&summary(gate))?);
    Ok(())
}
