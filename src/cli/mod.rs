//! CLI module for the knowledge-base service.

pub mod backends;
pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::{OutputFormat, RequestContext};

/// Permission-scoped document ingestion and question answering.
#[derive(Debug, Parser)]
#[command(name = "kbrag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'f', global = true, help = "Output format: text or json")]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, short = 'u', global = true, env = "KBRAG_USER_ID", help = "Caller user id")]
    pub user: Option<i64>,

    #[arg(
        long,
        short = 'r',
        global = true,
        env = "KBRAG_ROLES",
        help = "Caller roles, comma separated (e.g. 'hr,eng')"
    )]
    pub roles: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Caller identity for this invocation.
    pub fn request_context(&self) -> RequestContext {
        let roles = self
            .roles
            .as_deref()
            .map(RequestContext::parse_roles)
            .unwrap_or_default();
        RequestContext::new(self.user, roles)
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create database schema, queues and consumer groups
    Init,

    /// Register a document for ingestion
    Upload(commands::UploadArgs),

    /// Ask a question against documents in your permission groups
    Ask(commands::AskArgs),

    /// List, inspect, delete or requeue documents
    #[command(subcommand)]
    Doc(commands::DocCommand),

    /// Run ingestion workers and the dead-letter sink until interrupted
    Worker(commands::WorkerArgs),

    /// Check infrastructure status (PostgreSQL, Redis, queues)
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask_with_identity() {
        let cli = Cli::try_parse_from([
            "kbrag", "--user", "7", "--roles", "hr, eng", "ask", "how", "much", "leave?",
        ])
        .unwrap();
        let ctx = cli.request_context();
        assert_eq!(ctx.user_id(), Some(7));
        assert_eq!(ctx.roles(), &["hr".to_string(), "eng".to_string()]);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.question(), "how much leave?");
    }

    #[test]
    fn test_parse_doc_delete() {
        let cli = Cli::try_parse_from(["kbrag", "-f", "json", "doc", "delete", "12"]).unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::Doc(commands::DocCommand::Delete { id: 12 })
        ));
    }
}
