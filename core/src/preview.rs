use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default pause before re-polling a still-pending preview, used when the
/// server suggests nothing usable.
pub const DEFAULT_RETRY_AFTER_SECONDS: u64 = 5;

/// How the backend wants the draft finalized. Anything it sends that we
/// don't recognize degrades to `RequireConfirm` — the safest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// High confidence — the server will freeze the plan as-is, but the
    /// client still walks the same confirm path.
    AutoFreeze,
    /// Normal path: user reviews and confirms.
    #[default]
    RequireConfirm,
    /// Reduced-confidence plan: the user must explicitly acknowledge the
    /// downgrade before confirming.
    RequireConfirmWithDowngrade,
}

impl Decision {
    pub fn requires_downgrade_ack(self) -> bool {
        matches!(self, Decision::RequireConfirmWithDowngrade)
    }

    fn from_value(v: Option<&serde_json::Value>) -> Self {
        match v.and_then(|v| v.as_str()) {
            Some("auto_freeze") => Decision::AutoFreeze,
            Some("require_confirm_with_downgrade") => Decision::RequireConfirmWithDowngrade,
            _ => Decision::RequireConfirm,
        }
    }
}

/// Severity of a data-quality warning. Unknown strings degrade to `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
}

impl Severity {
    fn from_value(v: Option<&serde_json::Value>) -> Self {
        match v.and_then(|v| v.as_str()) {
            Some("info") => Severity::Info,
            Some("error") => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

/// Impact of an unresolved field. Unknown strings degrade to `Low`, which
/// keeps an unrecognized impact from silently blocking confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Impact {
    fn from_value(v: Option<&serde_json::Value>) -> Self {
        match v.and_then(|v| v.as_str()) {
            Some("medium") => Impact::Medium,
            Some("high") => Impact::High,
            Some("critical") => Impact::Critical,
            _ => Impact::Low,
        }
    }
}

/// A warning the server attached to the draft's input data. Display-only:
/// warnings never block confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityWarning {
    pub warning_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// One selectable option of a stage-1 question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage1Option {
    pub option_id: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    SingleChoice,
    MultiChoice,
}

/// A blocking clarification question. Every question must carry a
/// non-empty answer before the gate lets a confirm through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage1Question {
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    /// Display order only (ascending). Never affects correctness.
    pub priority: i64,
    pub options: Vec<Stage1Option>,
}

/// A field the backend could not resolve with confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenUnknown {
    pub field: String,
    pub description: String,
    pub impact: Impact,
    /// Explicit server verdict. When absent, impact decides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    pub candidates: Vec<String>,
}

impl OpenUnknown {
    /// An explicit boolean strictly overrides the impact heuristic.
    pub fn is_blocking(&self) -> bool {
        self.blocking
            .unwrap_or(matches!(self.impact, Impact::High | Impact::Critical))
    }
}

/// The server's structured interpretation of an analysis requirement.
///
/// Values of this type only ever come out of [`DraftPreview::from_value`]
/// (or a snapshot of one), so downstream code never re-validates shape.
/// The whole object is replaced on refetch or patch — nothing mutates
/// individual fields from the outside.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DraftPreview {
    pub draft_id: Option<String>,
    pub decision: Decision,
    pub risk_score: Option<f64>,
    pub outcome_var: Option<String>,
    pub treatment_var: Option<String>,
    /// Ordered — the sequence is display-relevant.
    pub controls: Vec<String>,
    /// Deduplicated, trimmed, non-empty.
    pub column_candidates: Vec<String>,
    /// Column name → inferred dtype, when the server sends one.
    pub variable_types: BTreeMap<String, String>,
    pub data_quality_warnings: Vec<DataQualityWarning>,
    /// Sorted by `priority` ascending (stable).
    pub stage1_questions: Vec<Stage1Question>,
    pub open_unknowns: Vec<OpenUnknown>,
    /// Opaque — echoed back verbatim in the confirm payload.
    pub default_overrides: serde_json::Value,
}

impl DraftPreview {
    /// Normalize a raw server payload into a fully-typed preview.
    ///
    /// This is the single coercion point: malformed or missing fields
    /// degrade to `None` / empty, never to an error, so partial and
    /// legacy server shapes stay usable.
    pub fn from_value(raw: &serde_json::Value) -> Self {
        let mut questions: Vec<Stage1Question> = seq(raw.get("stage1_questions"))
            .iter()
            .filter_map(question_from_value)
            .collect();
        questions.sort_by_key(|q| q.priority);

        DraftPreview {
            draft_id: opt_string(raw.get("draft_id")),
            decision: Decision::from_value(raw.get("decision")),
            risk_score: raw.get("risk_score").and_then(|v| v.as_f64()),
            outcome_var: opt_string(raw.get("outcome_var")),
            treatment_var: opt_string(raw.get("treatment_var")),
            controls: string_seq(raw.get("controls")),
            column_candidates: dedup_clean(string_seq(raw.get("column_candidates"))),
            variable_types: string_map(raw.get("variable_types")),
            data_quality_warnings: seq(raw.get("data_quality_warnings"))
                .iter()
                .filter_map(warning_from_value)
                .collect(),
            stage1_questions: questions,
            open_unknowns: seq(raw.get("open_unknowns"))
                .iter()
                .filter_map(unknown_from_value)
                .collect(),
            default_overrides: raw
                .get("default_overrides")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

/// Typed outcome of one preview fetch.
#[derive(Debug, Clone)]
pub enum PreviewPoll {
    Ready(DraftPreview),
    /// Server is still preprocessing; poll again after the given delay.
    Pending { retry_after: Duration },
}

/// Upper bound on a server-suggested retry delay. Suggestions beyond it
/// are treated as invalid, not honored.
pub const MAX_RETRY_AFTER_SECONDS: f64 = 3600.0;

/// Server-suggested retry delay, defaulting when absent, non-numeric,
/// non-positive or absurdly large. The bound keeps a bad suggestion from
/// overflowing `Duration` and crashing the poll loop.
pub fn retry_after(raw: Option<&serde_json::Value>) -> Duration {
    let seconds = raw
        .and_then(|v| v.as_f64())
        .filter(|s| *s > 0.0 && *s <= MAX_RETRY_AFTER_SECONDS)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECONDS as f64);
    Duration::from_secs_f64(seconds)
}

fn seq(v: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    v.and_then(|v| v.as_array()).cloned().unwrap_or_default()
}

fn opt_string(v: Option<&serde_json::Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_seq(v: Option<&serde_json::Value>) -> Vec<String> {
    seq(v)
        .iter()
        .filter_map(|item| opt_string(Some(item)))
        .collect()
}

fn string_map(v: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(obj) = v.and_then(|v| v.as_object()) {
        for (key, value) in obj {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            if let Some(value) = value.as_str() {
                out.insert(key.to_string(), value.to_string());
            }
        }
    }
    out
}

/// Dedup preserving first-seen order.
fn dedup_clean(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn warning_from_value(v: &serde_json::Value) -> Option<DataQualityWarning> {
    if !v.is_object() {
        return None;
    }
    Some(DataQualityWarning {
        warning_type: opt_string(v.get("type")).unwrap_or_default(),
        severity: Severity::from_value(v.get("severity")),
        message: opt_string(v.get("message")).unwrap_or_default(),
        suggestion: opt_string(v.get("suggestion")),
    })
}

fn question_from_value(v: &serde_json::Value) -> Option<Stage1Question> {
    if !v.is_object() {
        return None;
    }
    let options = seq(v.get("options"))
        .iter()
        .filter_map(|opt| {
            let option_id = opt_string(opt.get("option_id"))?;
            Some(Stage1Option {
                label: opt_string(opt.get("label")).unwrap_or_else(|| option_id.clone()),
                value: opt_string(opt.get("value")).unwrap_or_default(),
                option_id,
            })
        })
        .collect();
    Some(Stage1Question {
        question_id: opt_string(v.get("question_id")).unwrap_or_default(),
        question_text: opt_string(v.get("question_text")).unwrap_or_default(),
        question_type: match v.get("question_type").and_then(|v| v.as_str()) {
            Some("multi_choice") => QuestionType::MultiChoice,
            _ => QuestionType::SingleChoice,
        },
        priority: v.get("priority").and_then(|v| v.as_i64()).unwrap_or(0),
        options,
    })
}

fn unknown_from_value(v: &serde_json::Value) -> Option<OpenUnknown> {
    let field = opt_string(v.get("field"))?;
    Some(OpenUnknown {
        field,
        description: opt_string(v.get("description")).unwrap_or_default(),
        impact: Impact::from_value(v.get("impact")),
        blocking: v.get("blocking").and_then(|v| v.as_bool()),
        candidates: string_seq(v.get("candidates")),
    })
}

/// Variable-role delta returned by a patch. `None` means the server did
/// not mention the field; `Some(None)` means an explicit JSON null, i.e.
/// "unset this role".
#[derive(Debug, Clone, Default)]
pub struct RoleDelta {
    pub outcome_var: Option<Option<String>>,
    pub treatment_var: Option<Option<String>>,
    pub controls: Option<Vec<String>>,
}

impl RoleDelta {
    fn from_value(raw: &serde_json::Value) -> Self {
        let scalar = |key: &str| -> Option<Option<String>> {
            raw.get(key).map(|v| opt_string(Some(v)))
        };
        RoleDelta {
            outcome_var: scalar("outcome_var"),
            treatment_var: scalar("treatment_var"),
            controls: raw.get("controls").map(|v| string_seq(Some(v))),
        }
    }

    /// Fold this delta into a live preview, replacing only the roles the
    /// server mentioned.
    pub fn apply(&self, preview: &mut DraftPreview) {
        if let Some(outcome) = &self.outcome_var {
            preview.outcome_var = outcome.clone();
        }
        if let Some(treatment) = &self.treatment_var {
            preview.treatment_var = treatment.clone();
        }
        if let Some(controls) = &self.controls {
            preview.controls = controls.clone();
        }
    }
}

/// Normalized body of a successful `POST /jobs/{id}/draft/patch`.
#[derive(Debug, Clone, Default)]
pub struct PatchResponse {
    /// Fields the server accepted. `None` when an older server omits the
    /// list entirely (callers fall back to the keys they sent).
    pub patched_fields: Option<Vec<String>>,
    /// Full replacement for the preview's open-unknown list, if sent.
    pub open_unknowns: Option<Vec<OpenUnknown>>,
    pub draft_preview: RoleDelta,
}

impl PatchResponse {
    /// Same degrade-to-default coercion rules as [`DraftPreview::from_value`].
    pub fn from_value(raw: &serde_json::Value) -> Self {
        PatchResponse {
            patched_fields: raw.get("patched_fields").map(|v| string_seq(Some(v))),
            open_unknowns: raw.get("open_unknowns").and_then(|v| v.as_array()).map(|items| {
                items.iter().filter_map(unknown_from_value).collect()
            }),
            draft_preview: raw
                .get("draft_preview")
                .map(RoleDelta::from_value)
                .unwrap_or_default(),
        }
    }
}
