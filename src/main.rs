use clap::Parser;
use mindcare::cli::handle_ask_command;
use mindcare::cli::handle_chat_command;
use mindcare::cli::handle_config_command;
use mindcare::cli::handle_history_command;
use mindcare::cli::handle_index_command;
use mindcare::cli::handle_init_command;
use mindcare::cli::handle_serve_api;
use mindcare::cli::Cli;
use mindcare::cli::Commands;
use mindcare::AppConfig;
use mindcare::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load_from(cli.config.as_deref())?;

    // Initialize logging
    if cli.verbose {
        mindcare::logging::init_logging_with_level("debug")?;
    } else {
        mindcare::logging::init_logging_with_config(Some(&config))?;
    }
    info!("Configuration loaded successfully");

    // Execute the requested command
    match cli.command {
        Commands::Chat {
            session,
            strategy,
            corpus,
            show_passages,
        } => {
            handle_chat_command(
                &config,
                session,
                strategy.map(Into::into),
                corpus.as_deref(),
                show_passages,
            )
            .await?;
        }
        Commands::Ask {
            text,
            strategy,
            top_k,
            corpus,
            show_passages,
        } => {
            handle_ask_command(
                &config,
                text,
                strategy.map(Into::into),
                top_k,
                corpus.as_deref(),
                show_passages,
            )
            .await?;
        }
        Commands::Index { file } => {
            handle_index_command(&config, &file).await?;
        }
        Commands::InitDb { force } => {
            handle_init_command(&config, force).await?;
        }
        Commands::Serve { host, port, cors } => {
            handle_serve_api(&config, host, port, cors).await?;
        }
        Commands::History { session } => {
            handle_history_command(&config, &session).await?;
        }
        Commands::Config => {
            handle_config_command(&config).await?;
        }
    }

    Ok(())
}
