use std::path::PathBuf;

use mindcare::cli::mask_database_url;
use mindcare::AppConfig;
use mindcare::Result;

fn main() -> Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    println!("🔍 Checking configuration...");

    let config = match AppConfig::load_from(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            println!("❌ Configuration error: {}", e);
            println!("\n💡 To fix this:");
            println!("  1. Copy config.example.toml to config.toml");
            println!("  2. Edit config.toml with your endpoints and database details");
            println!("  3. Run this check again");
            return Err(e);
        }
    };

    println!("✅ Configuration loaded successfully!");
    println!("📋 Configuration details:");
    println!("  Storage backend: {:?}", config.storage.backend);
    println!("  Database URL: {}", mask_database_url(config.database_url()));
    println!("  Embedding provider: {}", config.embeddings.provider);
    println!("  Embedding model: {}", config.embedding_model());
    println!("  Embedding dimension: {}", config.embedding_dimension());
    println!("  LLM endpoint: {}", config.llm_endpoint());
    println!("  LLM model: {}", config.llm_model());
    println!("  Retrieval strategy: {}", config.retrieval.strategy);
    println!("  Top k: {}", config.retrieval.top_k);
    println!("  Min relevance: {}", config.retrieval.min_relevance);
    println!("  Safety marker: {}", config.safety_marker());

    if let Err(e) = config.validate() {
        println!("\n❌ {}", e);
        return Err(e);
    }

    println!("\n🎉 Configuration check completed successfully!");
    Ok(())
}
