//! Database initialization handler

use crate::cli::output::print_info;
use crate::cli::output::print_success;
use crate::cli::output::print_warning;
use crate::database::Database;
use crate::AppConfig;
use crate::Result;

/// Handle database initialization command
pub async fn handle_init_command(config: &AppConfig, force: bool) -> Result<()> {
    if !force {
        print_warning("This will create the mindcare tables and the pgvector extension.");
        print_warning("This operation is safe - it uses CREATE IF NOT EXISTS.");
        println!("\nUse --force to proceed.");
        return Ok(());
    }

    print_info("🗄️  Initializing mindcare database...");
    let database = Database::from_config(config).await?;

    if let Err(e) = database.init_schema(config.embedding_dimension()).await {
        if e.to_string().contains("vector") || e.to_string().contains("extension") {
            print_warning(&format!("Could not enable pgvector extension: {e}"));
            println!("  Run as a superuser: CREATE EXTENSION IF NOT EXISTS vector;");
            println!("  Then run: mindcare init-db --force");
        }
        return Err(e);
    }

    print_success("Tables created: chat_sessions, chat_messages, expert_referrals, counseling_passages");
    print_success(&format!(
        "Passage vectors sized for dimension {}",
        config.embedding_dimension()
    ));
    println!();
    print_info("To load counseling passages, run:");
    println!("   mindcare index <passages.jsonl>");
    Ok(())
}
