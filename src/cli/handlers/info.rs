//! Information display handlers

use crate::cli::output::print_config;
use crate::cli::output::print_history;
use crate::cli::output::print_info;
use crate::cli::output::print_session;
use crate::cli::output::print_warning;
use crate::config::StorageBackend;
use crate::services::Services;
use crate::AppConfig;
use crate::Result;

/// Print a stored session and its messages
pub async fn handle_history_command(config: &AppConfig, session_id: &str) -> Result<()> {
    if config.storage.backend == StorageBackend::Memory {
        print_warning("storage.backend is `memory`: sessions of other processes are not visible.");
    }

    let services = Services::from_config(config).await?;
    let session = services.sessions.get_session(session_id).await?;
    print_session(&session);

    let store = services.sessions.store();
    if let Some(referral) = store.get_escalation(session_id).await? {
        print_warning(&format!(
            "Referred ({}) at {}: {}",
            referral.severity,
            referral.created_at.format("%Y-%m-%d %H:%M:%S"),
            referral.recommended_action
        ));
        println!();
    }

    let messages = store.get_messages(session_id).await?;
    print_history(&messages);
    println!();
    print_info(&format!("{} message(s)", messages.len()));
    Ok(())
}

pub async fn handle_config_command(config: &AppConfig) -> Result<()> {
    print_config(config);
    if let Err(e) = config.validate() {
        println!();
        print_warning(&e.to_string());
    }
    Ok(())
}
