use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Stored bearer token for the CLI. The token-storage collaborator is
/// deliberately thin: one JSON file in the user config dir.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredToken {
    pub api_url: String,
    pub access_token: String,
}

pub fn exit_error(kind: &str, message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": kind,
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap());
    std::process::exit(1);
}

pub fn config_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("causeway")
        .join("config.json")
}

pub fn load_token() -> Option<StoredToken> {
    let path = config_path();
    let data = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn save_token(token: &StoredToken) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(token)?;

    // Write with restricted permissions (0o600)
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)?;
    file.write_all(data.as_bytes())?;

    Ok(())
}

/// Remove the stored token. Called on logout and whenever the server
/// answers 401/403 — clarification drafts are left alone either way.
pub fn clear_token() {
    let path = config_path();
    if path.exists() {
        let _ = std::fs::remove_file(&path);
    }
}

/// Resolve a Bearer token for API requests (priority order):
/// 1. CAUSEWAY_API_TOKEN env var
/// 2. ~/.config/causeway/config.json
/// 3. None — anonymous request (the server decides what that is worth)
pub fn resolve_token() -> Option<String> {
    if let Ok(token) = std::env::var("CAUSEWAY_API_TOKEN") {
        if !token.trim().is_empty() {
            return Some(token);
        }
    }
    load_token().map(|t| t.access_token)
}

// Unix-specific imports for file permissions
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

// No-op on non-unix (won't compile for Windows without this)
#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
