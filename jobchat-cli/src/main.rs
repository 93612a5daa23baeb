#![cfg_attr(not(test), forbid(unsafe_code))]
//! Main entry point for the JobChat CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use url::Url;

mod commands;
mod telemetry;

/// JobChat CLI
#[derive(Parser, Debug)]
#[command(name = "JobChat CLI")]
#[command(about = "Command-line client for JobChat conversations and notifications", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that talks to a server.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the configuration file (optional)
    #[arg(
        long,
        short,
        global = true,
        help = "Path to the configuration file (e.g., config.yaml or config.json). Defaults to <config dir>/jobchat/config.yaml when present."
    )]
    pub config: Option<PathBuf>,

    /// Server origin overriding the configuration
    #[arg(
        long,
        global = true,
        help = "JobChat server origin (e.g., https://jobs.example.com). Overrides the configuration file and environment."
    )]
    pub server: Option<Url>,

    /// Bearer token presented to the server
    #[arg(
        long,
        global = true,
        help = "Bearer token presented to the server. Falls back to the JOBCHAT_TOKEN environment variable."
    )]
    pub token: Option<String>,
}

/// Subcommands for the JobChat CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow conversations and notifications live
    Watch(commands::watch::WatchArgs),

    /// List conversations with unread counts, most recent first
    Conversations(commands::conversations::ConversationsArgs),

    /// Send a message and wait for the server to acknowledge it
    Send(commands::send::SendArgs),

    /// List notifications, optionally marking them all read
    Notifications(commands::notifications::NotificationsArgs),

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: clap_complete::Shell,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml or json). Defaults to yaml.
        #[arg(
            long,
            short,
            help = "Format of the configuration file to generate (yaml or json). Defaults to yaml."
        )]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(args) => {
            let context = commands::SessionContext::load(&cli.global)?;
            commands::watch::watch(context, args).await?;
        }
        Commands::Conversations(args) => {
            let context = commands::SessionContext::load(&cli.global)?;
            commands::conversations::list_conversations(context, args).await?;
        }
        Commands::Send(args) => {
            let context = commands::SessionContext::load(&cli.global)?;
            commands::send::send_message(context, args).await?;
        }
        Commands::Notifications(args) => {
            let context = commands::SessionContext::load(&cli.global)?;
            commands::notifications::list_notifications(context, args).await?;
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
        }
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}
