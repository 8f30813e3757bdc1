//! Thin reqwest wrapper around the job API. All response classification
//! lives here: transport failures, non-JSON bodies, pending previews and
//! auth invalidation are turned into typed values before anything else
//! sees them.

use causeway_core::error::GateError;
use causeway_core::gate::ConfirmRequest;
use causeway_core::preview::{DraftPreview, PatchResponse, PreviewPoll, retry_after};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::util;

pub struct JobApi {
    api_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl JobApi {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        JobApi {
            api_url: api_url.into(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.api_url, path));
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(u16, Value), GateError> {
        let resp = req
            .send()
            .await
            .map_err(|e| GateError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| GateError::Network(e.to_string()))?;
        let body: Value = if text.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) if (200..300).contains(&status) => {
                    return Err(GateError::Parse(e.to_string()));
                }
                // Non-JSON error bodies still classify by status.
                Err(_) => json!({}),
            }
        };
        Ok((status, body))
    }

    /// Map a non-success status, invalidating the stored token on 401/403.
    fn fail(status: u16, body: &Value) -> GateError {
        let error = GateError::from_status(status, body);
        if error.invalidates_token() {
            tracing::debug!(status, "clearing stored token");
            util::clear_token();
        }
        error
    }

    /// `POST /jobs` — create a job from a requirement text.
    pub async fn create_job(&self, requirement: &str) -> Result<Value, GateError> {
        let (status, body) = self
            .send(
                self.request(reqwest::Method::POST, "/jobs")
                    .json(&json!({"requirement": requirement})),
            )
            .await?;
        if !(200..300).contains(&status) {
            return Err(Self::fail(status, &body));
        }
        Ok(body)
    }

    /// `POST /jobs/{id}/inputs/upload` — multipart file upload.
    pub async fn upload_input(&self, job_id: &str, path: &std::path::Path) -> Result<Value, GateError> {
        let bytes = std::fs::read(path)
            .map_err(|e| GateError::MissingPrerequisite(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
        let (status, body) = self
            .send(
                self.request(reqwest::Method::POST, &format!("/jobs/{job_id}/inputs/upload"))
                    .multipart(form),
            )
            .await?;
        if !(200..300).contains(&status) {
            return Err(Self::fail(status, &body));
        }
        Ok(body)
    }

    /// `GET /jobs/{id}/draft/preview` — classified into ready or pending.
    ///
    /// 202, or a 200 body carrying `status: "pending"`, means the server
    /// is still preprocessing; both carry an optional
    /// `retry_after_seconds` suggestion.
    pub async fn fetch_preview(
        &self,
        job_id: &str,
        main_data_source_id: Option<&str>,
    ) -> Result<PreviewPoll, GateError> {
        if job_id.trim().is_empty() {
            return Err(GateError::MissingPrerequisite("job id is required".into()));
        }
        let mut req = self.request(
            reqwest::Method::GET,
            &format!("/jobs/{job_id}/draft/preview"),
        );
        if let Some(source_id) = main_data_source_id {
            req = req.query(&[("main_data_source_id", source_id)]);
        }
        let (status, body) = self.send(req).await?;

        if status == 202 {
            return Ok(PreviewPoll::Pending {
                retry_after: retry_after(body.get("retry_after_seconds")),
            });
        }
        if !(200..300).contains(&status) {
            return Err(Self::fail(status, &body));
        }
        if body.get("status").and_then(|v| v.as_str()) == Some("pending") {
            return Ok(PreviewPoll::Pending {
                retry_after: retry_after(body.get("retry_after_seconds")),
            });
        }
        Ok(PreviewPoll::Ready(DraftPreview::from_value(&body)))
    }

    /// `POST /jobs/{id}/draft/patch` — submit partial open-unknown values.
    pub async fn patch_draft(
        &self,
        job_id: &str,
        field_updates: &BTreeMap<String, String>,
    ) -> Result<PatchResponse, GateError> {
        let (status, body) = self
            .send(
                self.request(reqwest::Method::POST, &format!("/jobs/{job_id}/draft/patch"))
                    .json(&json!({"field_updates": field_updates})),
            )
            .await?;
        if !(200..300).contains(&status) {
            return Err(Self::fail(status, &body));
        }
        Ok(PatchResponse::from_value(&body))
    }

    /// `POST /jobs/{id}/confirm` — the irreversible step.
    pub async fn confirm(&self, job_id: &str, request: &ConfirmRequest) -> Result<Value, GateError> {
        let (status, body) = self
            .send(
                self.request(reqwest::Method::POST, &format!("/jobs/{job_id}/confirm"))
                    .json(request),
            )
            .await?;
        if !(200..300).contains(&status) {
            return Err(Self::fail(status, &body));
        }
        Ok(body)
    }
}
