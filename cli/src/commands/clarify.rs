use clap::Subcommand;
use serde_json::json;

use crate::snapshot::SnapshotStore;

#[derive(Subcommand)]
pub enum UnknownCommands {
    /// Set the value of an open unknown
    Set {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Field key of the unknown
        #[arg(long)]
        field: String,
        /// Value to record (column name or free text)
        #[arg(long)]
        value: String,
    },
    /// Clear a previously entered value
    Clear {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Field key of the unknown
        #[arg(long)]
        field: String,
    },
}

/// Toggle an answer option on a stage-1 question.
pub fn answer(
    store: &SnapshotStore,
    job_id: &str,
    question: &str,
    option: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut gate = store.resume_gate(job_id);
    gate.toggle_answer(question, option)?;
    store.save_form(job_id, gate.form())?;
    let output = json!({
        "question_id": question,
        "selected": gate.form().answers.selections(question),
        "blockers": gate.blockers(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Record (or undo, by passing the original name) a variable correction.
pub fn correct(
    store: &SnapshotStore,
    job_id: &str,
    var: &str,
    to: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut gate = store.resume_gate(job_id);
    gate.set_correction(var, to)?;
    store.save_form(job_id, gate.form())?;
    let output = json!({
        "original": var,
        "display_name": gate.form().corrections.corrected_name(var),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn unknown(
    store: &SnapshotStore,
    command: UnknownCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let (job_id, field) = match command {
        UnknownCommands::Set { job_id, field, value } => {
            let mut gate = store.resume_gate(&job_id);
            gate.set_unknown_value(&field, &value)?;
            store.save_form(&job_id, gate.form())?;
            (job_id, field)
        }
        UnknownCommands::Clear { job_id, field } => {
            let mut gate = store.resume_gate(&job_id);
            gate.clear_unknown_value(&field)?;
            store.save_form(&job_id, gate.form())?;
            (job_id, field)
        }
    };

    let gate = store.resume_gate(&job_id);
    let output = json!({
        "field": field,
        "value": gate.form().unknown_values.get(&field),
        "blockers": gate.blockers(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
