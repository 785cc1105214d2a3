//! CLI command handlers module
//!
//! Organized by what the command touches:
//! - chat: interactive sessions and one-shot questions
//! - index: corpus ingestion
//! - init: database schema
//! - serve: API server
//! - info: session history and configuration display

pub mod chat;
pub mod index;
pub mod info;
pub mod init;
pub mod serve;

pub use chat::*;
pub use index::*;
pub use info::*;
pub use init::*;
pub use serve::*;
