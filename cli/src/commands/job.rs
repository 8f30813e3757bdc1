use clap::Subcommand;
use serde_json::json;

use crate::api::JobApi;

#[derive(Subcommand)]
pub enum JobCommands {
    /// Create a job from an analysis requirement
    Create {
        /// Free-text analysis requirement
        #[arg(long)]
        requirement: String,
    },
    /// Upload an input file for a job
    Upload {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Path to the input file
        #[arg(long)]
        file: std::path::PathBuf,
    },
}

pub async fn run(api: &JobApi, command: JobCommands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        JobCommands::Create { requirement } => {
            let body = api.create_job(&requirement).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        JobCommands::Upload { job_id, file } => {
            let body = api.upload_input(&job_id, &file).await?;
            let output = json!({
                "status": "uploaded",
                "job_id": job_id,
                "file": file.to_string_lossy(),
                "response": body
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
