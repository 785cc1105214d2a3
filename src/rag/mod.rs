//! RAG (Retrieval-Augmented Generation) module
//!
//! This module answers one counseling turn:
//! - Intent routing with a keyword pass and a model fallback
//! - History-aware query rewriting
//! - Multi-strategy passage retrieval with optional re-ranking
//! - Bounded context assembly
//! - Streamed generation with safety-marker detection and escalation
//!
//! # Examples
//!
//! ```rust,no_run
//! use mindcare::config::AppConfig;
//! use mindcare::rag::TurnOptions;
//! use mindcare::services::Services;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let services = Services::from_config(&config).await?;
//!
//!     let session = services.sessions.start_session(None).await?;
//!     let reply = services
//!         .pipeline
//!         .respond(&session.id, "요즘 잠이 안 와요", TurnOptions::default())
//!         .await?
//!         .collect()
//!         .await?;
//!     println!("{}", reply.text);
//!
//!     Ok(())
//! }
//! ```

pub mod answer;
pub mod context;
pub mod intent;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod retriever;
pub mod rewrite;
pub mod safety;
pub mod sparse;

pub use answer::AnswerGenerator;
pub use answer::AnswerStream;
pub use answer::GeneratedAnswer;
pub use context::ContextAssembler;
pub use context::PromptContext;
pub use intent::Intent;
pub use intent::IntentRouter;
pub use pipeline::CounselingPipeline;
pub use pipeline::TurnEvent;
pub use pipeline::TurnHandle;
pub use pipeline::TurnOptions;
pub use pipeline::TurnOutcome;
pub use pipeline::TurnReply;
pub use rerank::CrossEncoder;
pub use rerank::HttpCrossEncoder;
pub use rerank::LexicalCrossEncoder;
pub use retriever::RetrievalOutcome;
pub use retriever::Retriever;
pub use rewrite::QueryRewriter;
pub use safety::SafetyScanner;

pub use crate::models::Strategy;
