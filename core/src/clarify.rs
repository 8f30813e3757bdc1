//! Pure clarification logic: what the user has entered so far, and the two
//! blocking-rule predicates that decide whether a confirm may go out.
//! Nothing here performs I/O; every function is recomputed on demand so
//! the answers are never stale.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::preview::{DraftPreview, QuestionType, Stage1Question};

/// Selected option ids per stage-1 question. Selection order is preserved
/// for multi-choice questions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(BTreeMap<String, Vec<String>>);

impl AnswerSet {
    /// Toggle an option on a question. Single-choice questions collapse to
    /// at most one selection; re-selecting the sole selected option clears
    /// it entirely.
    pub fn toggle(&mut self, question: &Stage1Question, option_id: &str) {
        let selected = self.0.entry(question.question_id.clone()).or_default();
        match question.question_type {
            QuestionType::SingleChoice => {
                if selected.as_slice() == [option_id.to_string()] {
                    selected.clear();
                } else {
                    *selected = vec![option_id.to_string()];
                }
            }
            QuestionType::MultiChoice => {
                if let Some(pos) = selected.iter().position(|id| id == option_id) {
                    selected.remove(pos);
                } else {
                    selected.push(option_id.to_string());
                }
            }
        }
        if selected.is_empty() {
            self.0.remove(&question.question_id);
        }
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        self.0.get(question_id).is_some_and(|sel| !sel.is_empty())
    }

    pub fn selections(&self, question_id: &str) -> &[String] {
        self.0.get(question_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Original variable name → corrected name. Never holds identity or empty
/// corrections: setting a correction back to the original (or to nothing)
/// removes the entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableCorrections(BTreeMap<String, String>);

impl VariableCorrections {
    pub fn set(&mut self, original: &str, corrected: &str) {
        let original = original.trim();
        if original.is_empty() {
            return;
        }
        let corrected = corrected.trim();
        if corrected.is_empty() || corrected == original {
            self.0.remove(original);
        } else {
            self.0.insert(original.to_string(), corrected.to_string());
        }
    }

    /// Name to display/submit for `original`: the correction when one
    /// differs, otherwise the original itself, otherwise `None` when the
    /// original is empty. Total and side-effect-free — safe on any render
    /// path.
    pub fn corrected_name<'a>(&'a self, original: &'a str) -> Option<&'a str> {
        let original = original.trim();
        if original.is_empty() {
            return None;
        }
        match self.0.get(original).map(String::as_str) {
            Some(corrected) if corrected != original => Some(corrected),
            _ => Some(original),
        }
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// User-entered values for open unknowns, keyed by field. Values are kept
/// verbatim; the predicates below decide what counts as "filled in".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenUnknownValues(BTreeMap<String, String>);

impl OpenUnknownValues {
    pub fn set(&mut self, field: &str, value: &str) {
        let field = field.trim();
        if field.is_empty() {
            return;
        }
        self.0.insert(field.to_string(), value.to_string());
    }

    pub fn clear(&mut self, field: &str) {
        self.0.remove(field.trim());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Trimmed non-empty entries — exactly what a patch payload carries.
    pub fn filled(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(field, value)| (field.clone(), value.trim().to_string()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything the user has typed while the gate is unlocked. Persisted
/// per job so a reload never loses input; cleared on confirm success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormDraft {
    #[serde(default)]
    pub corrections: VariableCorrections,
    #[serde(default)]
    pub answers: AnswerSet,
    #[serde(default)]
    pub unknown_values: OpenUnknownValues,
}

/// Candidate column names for correction pickers, in preference order:
/// the server's candidate list, then the variable-type listing, then the
/// assigned roles, then an externally supplied fallback (e.g. an upload
/// preview header). Deduplicated, trimmed, non-empty.
pub fn candidate_columns(preview: &DraftPreview, fallback: &[String]) -> Vec<String> {
    let pick = |items: Vec<String>| -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect()
    };

    if !preview.column_candidates.is_empty() {
        return pick(preview.column_candidates.clone());
    }
    if !preview.variable_types.is_empty() {
        return pick(preview.variable_types.keys().cloned().collect());
    }
    let roles: Vec<String> = preview
        .outcome_var
        .iter()
        .chain(preview.treatment_var.iter())
        .cloned()
        .chain(preview.controls.iter().cloned())
        .collect();
    if !roles.is_empty() {
        return pick(roles);
    }
    pick(fallback.to_vec())
}

/// Question ids with no non-empty selection, in display order. Questions
/// without an id cannot be answered and never block.
pub fn unanswered_stage1(preview: &DraftPreview, answers: &AnswerSet) -> Vec<String> {
    preview
        .stage1_questions
        .iter()
        .filter(|q| !q.question_id.is_empty() && !answers.is_answered(&q.question_id))
        .map(|q| q.question_id.clone())
        .collect()
}

/// Blocking open-unknown fields whose value is still empty or
/// whitespace-only.
pub fn missing_blocking_unknowns(preview: &DraftPreview, values: &OpenUnknownValues) -> Vec<String> {
    preview
        .open_unknowns
        .iter()
        .filter(|u| u.is_blocking())
        .filter(|u| values.get(&u.field).map_or(true, |v| v.trim().is_empty()))
        .map(|u| u.field.clone())
        .collect()
}

/// Both blocker sets at once. Confirmation is permitted iff `is_empty`.
#[derive(Debug, Clone, Serialize)]
pub struct Blockers {
    pub unanswered_questions: Vec<String>,
    pub missing_blocking_fields: Vec<String>,
}

impl Blockers {
    pub fn compute(preview: &DraftPreview, form: &FormDraft) -> Self {
        Blockers {
            unanswered_questions: unanswered_stage1(preview, &form.answers),
            missing_blocking_fields: missing_blocking_unknowns(preview, &form.unknown_values),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.unanswered_questions.is_empty() && self.missing_blocking_fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::preview::DraftPreview;

    fn preview_with(raw: serde_json::Value) -> DraftPreview {
        DraftPreview::from_value(&raw)
    }

    fn question(id: &str, question_type: &str) -> Stage1Question {
        let preview = preview_with(json!({"stage1_questions": [
            {"question_id": id, "question_type": question_type,
             "options": [{"option_id": "a"}, {"option_id": "b"}]}
        ]}));
        preview.stage1_questions[0].clone()
    }

    #[test]
    fn single_choice_collapses_and_toggles_off() {
        let q = question("q1", "single_choice");
        let mut answers = AnswerSet::default();
        answers.toggle(&q, "a");
        assert_eq!(answers.selections("q1"), ["a"]);
        answers.toggle(&q, "b");
        assert_eq!(answers.selections("q1"), ["b"]);
        answers.toggle(&q, "b");
        assert!(!answers.is_answered("q1"));
        assert!(answers.is_empty());
    }

    #[test]
    fn multi_choice_keeps_selection_order() {
        let q = question("q2", "multi_choice");
        let mut answers = AnswerSet::default();
        answers.toggle(&q, "b");
        answers.toggle(&q, "a");
        assert_eq!(answers.selections("q2"), ["b", "a"]);
        answers.toggle(&q, "b");
        assert_eq!(answers.selections("q2"), ["a"]);
    }

    #[test]
    fn identity_correction_is_removed() {
        let mut corrections = VariableCorrections::default();
        corrections.set("revenue", "total_revenue");
        assert_eq!(corrections.corrected_name("revenue"), Some("total_revenue"));
        corrections.set("revenue", "revenue");
        assert!(corrections.is_empty());
        assert_eq!(corrections.corrected_name("revenue"), Some("revenue"));
    }

    #[test]
    fn empty_correction_deletes_the_entry() {
        let mut corrections = VariableCorrections::default();
        corrections.set("x", "y");
        corrections.set("x", "   ");
        assert!(corrections.is_empty());
    }

    #[test]
    fn corrected_name_is_none_for_empty_original() {
        let corrections = VariableCorrections::default();
        assert_eq!(corrections.corrected_name(""), None);
        assert_eq!(corrections.corrected_name("   "), None);
    }

    #[test]
    fn unanswered_is_empty_iff_every_question_answered() {
        let preview = preview_with(json!({"stage1_questions": [
            {"question_id": "q1", "options": [{"option_id": "a"}]},
            {"question_id": "q2", "question_type": "multi_choice",
             "options": [{"option_id": "a"}]},
            {"options": [{"option_id": "a"}]}
        ]}));
        let mut answers = AnswerSet::default();
        assert_eq!(unanswered_stage1(&preview, &answers), vec!["q1", "q2"]);

        answers.toggle(&preview.stage1_questions[0], "a");
        assert_eq!(unanswered_stage1(&preview, &answers), vec!["q2"]);

        answers.toggle(&preview.stage1_questions[1], "a");
        assert!(unanswered_stage1(&preview, &answers).is_empty());
    }

    #[test]
    fn missing_blocking_tracks_values_and_whitespace() {
        let preview = preview_with(json!({"open_unknowns": [
            {"field": "panel_id", "impact": "high"},
            {"field": "cluster", "impact": "low"},
            {"field": "unit", "impact": "low", "blocking": true}
        ]}));
        let mut values = OpenUnknownValues::default();
        assert_eq!(
            missing_blocking_unknowns(&preview, &values),
            vec!["panel_id", "unit"]
        );
        values.set("panel_id", "   ");
        assert_eq!(
            missing_blocking_unknowns(&preview, &values),
            vec!["panel_id", "unit"]
        );
        values.set("panel_id", "firm_id");
        values.set("unit", "county");
        assert!(missing_blocking_unknowns(&preview, &values).is_empty());
    }

    #[test]
    fn candidate_columns_preference_chain() {
        let fallback = vec!["up1".to_string(), "up2".to_string()];

        let preview = preview_with(json!({"column_candidates": ["a", "b"]}));
        assert_eq!(candidate_columns(&preview, &fallback), vec!["a", "b"]);

        let preview = preview_with(json!({"variable_types": {"t1": "float", "t2": "str"}}));
        assert_eq!(candidate_columns(&preview, &fallback), vec!["t1", "t2"]);

        let preview = preview_with(json!({
            "outcome_var": "y", "treatment_var": "d", "controls": ["c1", "y"]
        }));
        assert_eq!(candidate_columns(&preview, &fallback), vec!["y", "d", "c1"]);

        let preview = preview_with(json!({}));
        assert_eq!(candidate_columns(&preview, &fallback), fallback);
    }

    #[test]
    fn filled_trims_and_drops_empty_values() {
        let mut values = OpenUnknownValues::default();
        values.set("a", "  firm_id ");
        values.set("b", "   ");
        let filled = values.filled();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled.get("a").map(String::as_str), Some("firm_id"));
    }
}
