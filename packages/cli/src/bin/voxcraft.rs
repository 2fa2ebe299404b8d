use clap::{Parser, Subcommand};
use colored::*;
use std::process;

mod cli;

use voxcraft_cli::Config;

#[derive(Parser)]
#[command(name = "voxcraft")]
#[command(about = "Voxcraft - sandbox orchestrator for deployed voice agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator HTTP server
    Serve {
        /// Port to listen on (overrides VOXCRAFT_API_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Database URL (overrides VOXCRAFT_DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,
        #[arg(long, help = "Do not start the background health watcher")]
        no_watch: bool,
    },
    /// Print sandbox status for one or more projects
    Status {
        /// Project IDs to check
        #[arg(required = true)]
        project_ids: Vec<String>,
        /// Database URL (overrides VOXCRAFT_DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Configuration error:".red().bold(), e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve {
            port,
            database_url,
            no_watch,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(url) = database_url {
                config.database_url = url;
            }
            voxcraft_cli::run_server(config, !no_watch).await
        }
        Commands::Status {
            project_ids,
            database_url,
        } => {
            if let Some(url) = database_url {
                config.database_url = url;
            }
            cli::status::print_status(&config, &project_ids).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
