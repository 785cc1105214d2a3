//! Corpus indexing handler

use std::path::Path;

use crate::cli::output::print_ingest_stats;
use crate::cli::output::print_info;
use crate::cli::output::print_success;
use crate::cli::output::print_warning;
use crate::config::StorageBackend;
use crate::ingest::ingest_file;
use crate::services::Services;
use crate::AppConfig;
use crate::Result;

pub async fn handle_index_command(config: &AppConfig, file: &Path) -> Result<()> {
    if config.storage.backend == StorageBackend::Memory {
        print_warning("storage.backend is `memory`: the index lives only as long as this process.");
        print_info("Use `--corpus` with `chat`/`ask`, or switch to the postgres backend.");
    }

    let services = Services::from_config(config).await?;
    print_info(&format!("📥 Indexing passages from {}", file.display()));

    let stats = ingest_file(file, services.embeddings.clone(), services.index.clone()).await?;
    println!();
    print_ingest_stats(&stats);

    let total = services.index.len().await?;
    println!();
    if stats.failed > 0 {
        print_warning(&format!("{} passage(s) could not be indexed", stats.failed));
    }
    print_success(&format!("Index now holds {total} passage(s)"));
    Ok(())
}
