//! CLI output formatting utilities
//!
//! Status lines go through the `print_*` helpers; streamed answer text is
//! written by the chat handlers directly.

use std::io::Write;

use crate::ingest::IngestStats;
use crate::models::RetrievedPassage;
use crate::models::Role;
use crate::models::Session;
use crate::models::Utterance;
use crate::AppConfig;

/// Safely truncate a string at character boundary (not byte boundary)
///
/// Korean text is multi-byte, so byte slicing would panic mid-syllable.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

/// Print retrieved passages in rank order
pub fn print_passages(passages: &[RetrievedPassage]) {
    if passages.is_empty() {
        print_info("No related counseling records found");
        return;
    }
    println!("📚 {} related passage(s):", passages.len());
    for passage in passages {
        let rerank = passage
            .rerank_score
            .map(|score| format!(", rerank {score:.3}"))
            .unwrap_or_default();
        println!(
            "  {}. [{}] relevance {:.3}{} ({} / {})",
            passage.rank,
            passage.category.as_deref().unwrap_or("-"),
            passage.relevance,
            rerank,
            passage.source_id,
            passage.strategy
        );
        println!("     {}", truncate_str(&passage.text, 80));
    }
    println!();
}

/// Print a session header
pub fn print_session(session: &Session) {
    println!("🗂️  Session {}", session.id);
    println!("  Status: {}", session.status);
    println!("  Started: {}", session.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ended) = session.ended_at {
        println!("  Ended: {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
}

/// Print recorded messages in order
pub fn print_history(messages: &[Utterance]) {
    if messages.is_empty() {
        print_info("No messages recorded");
        return;
    }
    for message in messages {
        let speaker = match message.role {
            Role::User => "🙂 You",
            Role::Assistant => "💬 Counselor",
            Role::System => "⚙️  System",
        };
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%H:%M:%S"),
            speaker,
            message.text
        );
    }
}

/// Print the result of an indexing run
pub fn print_ingest_stats(stats: &IngestStats) {
    println!("📊 Indexing summary:");
    println!("  Total lines:  {}", stats.total);
    println!("  Indexed:      {}", stats.indexed);
    println!("  Skipped:      {}", stats.skipped);
    println!("  Failed:       {}", stats.failed);
}

/// Print configuration
pub fn print_config(config: &AppConfig) {
    println!("📋 mindcare configuration:");
    println!();

    println!("🗄️  Storage:");
    println!("  Backend: {:?}", config.storage.backend);
    println!("  Database URL: {}", mask_database_url(config.database_url()));
    println!("  Max connections: {}", config.max_connections());
    println!("  Min connections: {}", config.min_connections());
    println!("  Connection timeout: {}s", config.connection_timeout());
    println!();

    println!("📝 Logging:");
    println!("  Level: {}", config.logging.level);
    println!("  Backtrace: {}", config.logging.backtrace);
    println!();

    println!("🧠 Embeddings:");
    println!("  Provider: {}", config.embeddings.provider);
    println!("  Endpoint: {}", config.embeddings.endpoint);
    println!("  Model: {}", config.embedding_model());
    println!("  Dimension: {}", config.embedding_dimension());
    println!("  Timeout: {}ms", config.embeddings.timeout_ms);
    println!();

    println!("🤖 LLM:");
    println!("  Endpoint: {}", config.llm_endpoint());
    println!("  Model: {}", config.llm_model());
    println!("  Key: {}", if config.llm_key().is_empty() { "(not set)" } else { "***" });
    println!("  Request timeout: {}ms", config.llm.request_timeout_ms);
    println!("  Chunk timeout: {}ms", config.llm.chunk_timeout_ms);
    println!();

    let retrieval = &config.retrieval;
    println!("🔍 Retrieval:");
    println!("  Strategy: {}", retrieval.strategy);
    println!("  Top k: {}", retrieval.top_k);
    println!("  Min relevance: {}", retrieval.min_relevance);
    println!("  Index timeout: {}ms", retrieval.index_timeout_ms);
    println!(
        "  Re-rank: {} ({})",
        if retrieval.rerank.enabled { "enabled" } else { "disabled" },
        retrieval.rerank.endpoint.as_deref().unwrap_or("lexical")
    );
    println!();

    println!("🛟 Safety:");
    println!("  Marker: {}", config.safety_marker());
    println!("  Escalation retries: {}", config.safety.escalation_retries);
    println!();

    println!("🌐 Server:");
    println!("  Address: {}:{}", config.server.host, config.server.port);
    println!("  Max concurrency: {}", config.server.max_concurrency);
}

/// Hide the password part of a database URL
#[must_use]
pub fn mask_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "***invalid***".to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}

/// Print colored output functions
pub fn print_info(msg: &str) {
    println!("ℹ️  {msg}");
}

pub fn print_success(msg: &str) {
    println!("✅ {msg}");
}

pub fn print_warning(msg: &str) {
    println!("⚠️  {msg}");
}

pub fn print_error(msg: &str) {
    eprintln!("❌ {msg}");
}

pub fn print_prompt(msg: &str) {
    print!("{msg}");
    let _ = std::io::stdout().flush();
}
