use std::path::PathBuf;

use clap::{Parser, Subcommand};
use council_rag::Result;
use council_rag::commands::{ask, chat, ingest, show_status};
use council_rag::config::{Config, get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "council-rag")]
#[command(about = "Question answering over city council agendas and minutes")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the vector index and the catalog
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, models and data directories
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Load, chunk and embed the corpus into the vector index
    Ingest {
        /// Drop the existing index and embed every document again
        #[arg(long)]
        rebuild: bool,
    },
    /// Ask a single question
    Ask {
        /// The question to answer
        question: String,
    },
    /// Start an interactive question and answer session
    Chat,
    /// Show index statistics and recent ingestion runs
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { rebuild } => {
            ingest(Config::load(&config_dir)?, rebuild).await?;
        }
        Commands::Ask { question } => {
            ask(&Config::load(&config_dir)?, &question).await?;
        }
        Commands::Chat => {
            chat(&Config::load(&config_dir)?).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&config_dir)?).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn ingest_command() {
        let cli = Cli::try_parse_from(["council-rag", "ingest"]).expect("parses");
        assert!(matches!(cli.command, Commands::Ingest { rebuild: false }));
        assert!(cli.config_dir.is_none());
    }

    #[test]
    fn ingest_rebuild_flag() {
        let cli = Cli::try_parse_from(["council-rag", "ingest", "--rebuild"]).expect("parses");
        assert!(matches!(cli.command, Commands::Ingest { rebuild: true }));
    }

    #[test]
    fn ask_command_with_question() {
        let cli = Cli::try_parse_from([
            "council-rag",
            "ask",
            "When was the budget approved?",
        ])
        .expect("parses");

        match cli.command {
            Commands::Ask { question } => assert_eq!(question, "When was the budget approved?"),
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn ask_requires_question() {
        let cli = Cli::try_parse_from(["council-rag", "ask"]);
        assert!(matches!(
            cli.map(|_| ()).map_err(|e| e.kind()),
            Err(ErrorKind::MissingRequiredArgument)
        ));
    }

    #[test]
    fn chat_and_status_commands() {
        let chat = Cli::try_parse_from(["council-rag", "chat"]).expect("parses");
        assert!(matches!(chat.command, Commands::Chat));

        let status = Cli::try_parse_from(["council-rag", "status"]).expect("parses");
        assert!(matches!(status.command, Commands::Status));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["council-rag", "config", "--show"]).expect("parses");
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from(["council-rag", "status", "--config-dir", "/tmp/rag"])
            .expect("parses");
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/rag")));
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["council-rag", "serve"]);
        assert!(matches!(
            cli.map(|_| ()).map_err(|e| e.kind()),
            Err(ErrorKind::InvalidSubcommand)
        ));
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["council-rag", "--help"]);
        assert!(matches!(
            cli.map(|_| ()).map_err(|e| e.kind()),
            Err(ErrorKind::DisplayHelp)
        ));
    }
}
