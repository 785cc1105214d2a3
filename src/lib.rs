//! mindcare: a retrieval-augmented counseling response pipeline
//!
//! A turn flows through intent routing, query rewriting, retrieval over past
//! counseling records, prompt assembly and streamed generation. The model's
//! referral marker is stripped from the visible answer and turned into a
//! single escalation record per session.

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod errors;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod models;
pub mod rag;
pub mod services;
pub mod session;
pub mod vector;

pub use config::AppConfig;
pub use errors::*;
pub use services::Services;
