use clap::{Parser, Subcommand};

mod api;
mod commands;
mod fetcher;
mod patch;
mod snapshot;
mod util;

use api::JobApi;
use snapshot::SnapshotStore;

#[derive(Parser)]
#[command(
    name = "causeway",
    version,
    about = "Causeway CLI — submit analysis requirements, review the draft interpretation, and confirm it"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "CAUSEWAY_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job operations (create, upload inputs)
    Job {
        #[command(subcommand)]
        command: commands::job::JobCommands,
    },
    /// Load or poll the draft preview
    Preview {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Main data source to preview against
        #[arg(long)]
        main_data_source_id: Option<String>,
        /// Keep polling while the server prepares the draft
        #[arg(long)]
        watch: bool,
    },
    /// Toggle an answer on a stage-1 clarification question
    Answer {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Question id
        #[arg(long)]
        question: String,
        /// Option id to toggle
        #[arg(long)]
        option: String,
    },
    /// Correct a variable name in the draft
    Correct {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Original variable name as the draft shows it
        #[arg(long)]
        var: String,
        /// Corrected name (pass the original to undo)
        #[arg(long)]
        to: String,
    },
    /// Enter values for open unknowns
    Unknown {
        #[command(subcommand)]
        command: commands::clarify::UnknownCommands,
    },
    /// Submit entered open-unknown values as a partial patch
    Patch {
        /// Job identifier
        #[arg(long)]
        job_id: String,
    },
    /// Confirm the draft (irreversible)
    Confirm {
        /// Job identifier
        #[arg(long)]
        job_id: String,
        /// Acknowledge a reduced-confidence plan without prompting
        #[arg(long)]
        acknowledge_downgrade: bool,
    },
    /// Show the gate state for a job from local snapshots
    Status {
        /// Job identifier
        #[arg(long)]
        job_id: String,
    },
    /// Token storage
    Auth {
        #[command(subcommand)]
        command: commands::auth::AuthCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = url::Url::parse(&cli.api_url) {
        util::exit_error(
            "cli_error",
            &format!("Invalid API URL '{}': {e}", cli.api_url),
            Some("Set --api-url or CAUSEWAY_API_URL."),
        );
    }
    let store = SnapshotStore::open_default();
    let api = JobApi::new(cli.api_url.trim_end_matches('/').to_string(), util::resolve_token());

    let result = match cli.command {
        Commands::Job { command } => commands::job::run(&api, command).await,
        Commands::Preview { job_id, main_data_source_id, watch } => {
            commands::preview::run(&api, &store, &job_id, main_data_source_id, watch).await
        }
        Commands::Answer { job_id, question, option } => {
            commands::clarify::answer(&store, &job_id, &question, &option)
        }
        Commands::Correct { job_id, var, to } => {
            commands::clarify::correct(&store, &job_id, &var, &to)
        }
        Commands::Unknown { command } => commands::clarify::unknown(&store, command),
        Commands::Patch { job_id } => commands::patch::run(&api, &store, &job_id).await,
        Commands::Confirm { job_id, acknowledge_downgrade } => {
            commands::confirm::run(&api, &store, &job_id, acknowledge_downgrade).await
        }
        Commands::Status { job_id } => commands::status::run(&store.resume_gate(&job_id)),
        Commands::Auth { command } => commands::auth::run(&cli.api_url, command),
    };

    if let Err(e) = result {
        let kind = e
            .downcast_ref::<causeway_core::error::GateError>()
            .map(|ge| ge.kind())
            .unwrap_or("cli_error");
        util::exit_error(kind, &e.to_string(), None);
    }
}
