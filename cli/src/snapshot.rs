//! Durable per-job snapshots: the last ready preview, the in-progress
//! form draft and the confirm lock. This is the only shared mutable
//! resource in the client and the sole recovery path after a reload, so
//! every write goes through an atomic temp-file-then-rename.

use std::path::{Path, PathBuf};

use causeway_core::clarify::FormDraft;
use causeway_core::gate::{ConfirmLock, Gate};
use causeway_core::preview::DraftPreview;
use serde::Serialize;
use serde::de::DeserializeOwned;

const PREVIEW_FILE: &str = "preview.json";
const FORM_FILE: &str = "form_draft.json";
const LOCK_FILE: &str = "lock.json";

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at the platform data dir
    /// (e.g. `~/.local/share/causeway/jobs`).
    pub fn open_default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("causeway")
            .join("jobs");
        Self::open_at(root)
    }

    pub fn open_at(root: impl Into<PathBuf>) -> Self {
        SnapshotStore { root: root.into() }
    }

    /// Snapshots are namespaced per job so two jobs can never
    /// cross-contaminate state.
    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(sanitize(job_id))
    }

    pub fn load_preview(&self, job_id: &str) -> Option<DraftPreview> {
        read_json(&self.job_dir(job_id).join(PREVIEW_FILE))
    }

    pub fn save_preview(&self, job_id: &str, preview: &DraftPreview) -> std::io::Result<()> {
        write_json(&self.job_dir(job_id).join(PREVIEW_FILE), preview)
    }

    pub fn load_form(&self, job_id: &str) -> Option<FormDraft> {
        read_json(&self.job_dir(job_id).join(FORM_FILE))
    }

    pub fn save_form(&self, job_id: &str, form: &FormDraft) -> std::io::Result<()> {
        write_json(&self.job_dir(job_id).join(FORM_FILE), form)
    }

    pub fn clear_form(&self, job_id: &str) -> std::io::Result<()> {
        let path = self.job_dir(job_id).join(FORM_FILE);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn load_lock(&self, job_id: &str) -> Option<ConfirmLock> {
        read_json(&self.job_dir(job_id).join(LOCK_FILE))
    }

    /// The lock is written once and never rewritten.
    pub fn save_lock(&self, job_id: &str, lock: &ConfirmLock) -> std::io::Result<()> {
        let path = self.job_dir(job_id).join(LOCK_FILE);
        if path.exists() {
            return Ok(());
        }
        write_json(&path, lock)
    }

    /// Rebuild the gate for a job from whatever snapshots exist.
    pub fn resume_gate(&self, job_id: &str) -> Gate {
        Gate::resume(
            job_id,
            self.load_preview(job_id),
            self.load_form(job_id),
            self.load_lock(job_id),
        )
    }
}

/// Job ids come from the server; escape anything not filesystem-safe so
/// an odd id can't escape the jobs directory. The escaping is injective
/// ('_' itself becomes `_5f`), so distinct ids never share a directory.
fn sanitize(job_id: &str) -> String {
    let mut out = String::with_capacity(job_id.len());
    for c in job_id.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                out.push('_');
                out.push_str(&format!("{byte:02x}"));
            }
        }
    }
    out
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Atomic per-key write: serialize to a sibling temp file, then rename
/// over the target. A crash mid-write leaves the old snapshot intact.
fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}
