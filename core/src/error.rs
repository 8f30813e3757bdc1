use thiserror::Error;

/// Everything that can go wrong between the client and the draft API,
/// plus the local validation failures that short-circuit before any
/// request is sent.
///
/// No variant is allowed to destroy user-entered clarification state:
/// callers report the error and leave corrections/answers in place.
#[derive(Debug, Error)]
pub enum GateError {
    /// Transport failure — no response at all.
    #[error("network error: {0}")]
    Network(String),

    /// The server responded, but the body was not the JSON we expected.
    #[error("invalid response: {0}")]
    Parse(String),

    /// Non-2xx response with a body we could read.
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },

    /// 401 — the stored token must be invalidated by the caller.
    #[error("unauthorized — run `causeway auth set-token` again")]
    Unauthorized,

    /// 403 — authenticated but not allowed; token is invalidated too.
    #[error("forbidden for this job")]
    Forbidden,

    /// Client-detected blocking-rule violation; no request was sent.
    #[error("{0}")]
    Validation(String),

    /// A required local input (job id, prior preview) is missing;
    /// no request was sent.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),
}

impl GateError {
    /// Machine-readable error kind for structured CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::Network(_) => "network",
            GateError::Parse(_) => "parse",
            GateError::Http { .. } => "http",
            GateError::Unauthorized => "unauthorized",
            GateError::Forbidden => "forbidden",
            GateError::Validation(_) => "validation",
            GateError::MissingPrerequisite(_) => "missing_prerequisite",
        }
    }

    /// True for 401/403 — the caller must clear the stored token.
    pub fn invalidates_token(&self) -> bool {
        matches!(self, GateError::Unauthorized | GateError::Forbidden)
    }

    /// Classify a non-2xx status together with its (best-effort) JSON body.
    pub fn from_status(status: u16, body: &serde_json::Value) -> Self {
        match status {
            401 => GateError::Unauthorized,
            403 => GateError::Forbidden,
            _ => GateError::Http {
                status,
                message: http_message(body, status),
            },
        }
    }
}

/// Extract a human-readable message from an error body: `message` wins,
/// then `detail`, then a status-based fallback.
pub fn http_message(body: &serde_json::Value, status: u16) -> String {
    for key in ["message", "detail"] {
        if let Some(text) = body.get(key).and_then(|v| v.as_str()) {
            let text = text.trim();
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    format!("server returned status {status}")
}
