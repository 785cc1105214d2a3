//! CLI command definitions and argument structures

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

use crate::models::Strategy;

#[derive(Parser)]
#[command(name = "mindcare")]
#[command(about = "Retrieval-augmented counseling assistant")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (defaults to config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive counseling session
    Chat {
        /// Resume an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,
        /// Retrieval strategy (defaults to the configured one)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Index a JSONL corpus before chatting (useful with in-memory storage)
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Show the passages retrieved for every turn
        #[arg(long)]
        show_passages: bool,
    },
    /// Answer a single message and exit
    Ask {
        /// The message to answer
        text: String,
        /// Retrieval strategy (defaults to the configured one)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Number of passages to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Index a JSONL corpus first (useful with in-memory storage)
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Show the retrieved passages
        #[arg(long)]
        show_passages: bool,
    },
    /// Embed and index counseling passages from a JSONL file
    Index {
        /// JSONL file, one passage per line
        file: PathBuf,
    },
    /// Create the PostgreSQL schema
    InitDb {
        /// Skip the confirmation notice and run
        #[arg(short, long)]
        force: bool,
    },
    /// Start the HTTP API server
    Serve {
        /// Host to bind (defaults to server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Enable CORS
        #[arg(long)]
        cors: bool,
    },
    /// Print the recorded messages of a session
    History {
        /// Session id
        session: String,
    },
    /// Show the effective configuration
    Config,
}

/// Retrieval strategy as accepted on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Similarity,
    Contextual,
    Hybrid,
    Sparse,
    Diversity,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Similarity => Self::Similarity,
            StrategyArg::Contextual => Self::Contextual,
            StrategyArg::Hybrid => Self::Hybrid,
            StrategyArg::Sparse => Self::Sparse,
            StrategyArg::Diversity => Self::Diversity,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_with_strategy() {
        let cli = Cli::try_parse_from([
            "mindcare",
            "--verbose",
            "ask",
            "요즘 잠을 못 자요",
            "--strategy",
            "hybrid",
            "-k",
            "3",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Ask {
                text,
                strategy,
                top_k,
                ..
            } => {
                assert_eq!(text, "요즘 잠을 못 자요");
                assert_eq!(strategy.map(Strategy::from), Some(Strategy::Hybrid));
                assert_eq!(top_k, Some(3));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["mindcare", "history", "s-1", "--config", "alt.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Commands::History { ref session } if session == "s-1"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(Cli::try_parse_from(["mindcare", "ask", "hi", "--strategy", "magic"]).is_err());
    }
}
