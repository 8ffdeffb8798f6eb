use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use warden::config::Config;
use warden::request::{Request, Scope};
use warden::supervisor::{Supervisor, snapshot_offline};

#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about = "Self-upgrade supervisor with sandboxed develop-verify-deploy")]
struct Cli {
    /// Root of the supervised repository (defaults to the current directory)
    #[arg(long, global = true)]
    repo_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor polling loop
    Run,
    /// Queue an upgrade request
    Submit {
        #[arg(short, long)]
        title: String,

        /// Free-text instructions for the generation step
        #[arg(short, long)]
        prompt: String,

        #[arg(long, default_value = "core")]
        scope: Scope,

        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
    /// Show a read-only snapshot of supervisor state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let repo_root = cli
        .repo_root
        .unwrap_or_else(|| PathBuf::from("."));
    let config = Config::load(&repo_root)?;

    match cli.command {
        Commands::Run => {
            let mut supervisor = Supervisor::new(config)?;
            supervisor.run_forever().await
        }
        Commands::Submit {
            title,
            prompt,
            scope,
            requested_by,
        } => {
            let supervisor = Supervisor::new(config)?;
            let req = Request::new(&title, &prompt, scope, &requested_by);
            let entry = supervisor.submit(&req)?;
            println!("Queued {} at {}", req.id, entry.display());
            Ok(())
        }
        Commands::Status => {
            let snapshot = snapshot_offline(&config)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}
