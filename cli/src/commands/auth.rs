use clap::Subcommand;
use serde_json::json;

use crate::util::{StoredToken, clear_token, config_path, load_token, save_token};

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store a bearer token for API requests
    SetToken {
        /// The token value
        #[arg(long)]
        token: String,
    },
    /// Show whether a token is configured
    Status,
    /// Remove the stored token
    Logout,
}

pub fn run(api_url: &str, command: AuthCommands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        AuthCommands::SetToken { token } => {
            save_token(&StoredToken {
                api_url: api_url.to_string(),
                access_token: token,
            })?;
            let output = json!({
                "status": "token_stored",
                "config_path": config_path().to_string_lossy()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        AuthCommands::Status => {
            let output = if std::env::var("CAUSEWAY_API_TOKEN").is_ok_and(|t| !t.trim().is_empty()) {
                json!({"method": "token (env)", "source": "CAUSEWAY_API_TOKEN"})
            } else if load_token().is_some() {
                json!({"method": "token (stored)", "config_path": config_path().to_string_lossy()})
            } else {
                json!({"method": null, "docs_hint": "Run `causeway auth set-token` or set CAUSEWAY_API_TOKEN."})
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        AuthCommands::Logout => {
            clear_token();
            let output = json!({
                "status": "logged_out",
                "config_path": config_path().to_string_lossy()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
