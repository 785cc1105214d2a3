//! Interactive chat and one-shot question handlers

use std::io::Write;
use std::path::Path;

use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;

use crate::cli::output::print_error;
use crate::cli::output::print_info;
use crate::cli::output::print_passages;
use crate::cli::output::print_prompt;
use crate::cli::output::print_success;
use crate::cli::output::print_warning;
use crate::ingest::ingest_file;
use crate::models::SessionStatus;
use crate::models::Strategy;
use crate::rag::Intent;
use crate::rag::TurnEvent;
use crate::rag::TurnHandle;
use crate::rag::TurnOptions;
use crate::rag::TurnOutcome;
use crate::services::Services;
use crate::session::EscalationOutcome;
use crate::AppConfig;
use crate::Result;

const QUIT_COMMANDS: [&str; 3] = ["/quit", "/exit", "/q"];

pub async fn handle_chat_command(
    config: &AppConfig,
    session: Option<String>,
    strategy: Option<Strategy>,
    corpus: Option<&Path>,
    show_passages: bool,
) -> Result<()> {
    let services = Services::from_config(config).await?;
    if let Some(corpus) = corpus {
        preload_corpus(&services, corpus).await?;
    }

    let session = match session {
        Some(id) => services.sessions.ensure_session(&id).await?,
        None => services.sessions.start_session(None).await?,
    };
    if session.status == SessionStatus::Referred {
        print_warning("This session has been referred to a professional counselor.");
    }

    println!("💬 mindcare counseling session {}", session.id);
    println!("   Type your message and press Enter. /quit leaves, Ctrl-C stops an answer.\n");

    let options = TurnOptions {
        strategy,
        ..TurnOptions::default()
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print_prompt("🙂 You: ");
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if QUIT_COMMANDS.contains(&line) {
            break;
        }

        let mut handle = services
            .pipeline
            .respond(&session.id, line, options.clone())
            .await?;
        match stream_turn(&mut handle, show_passages).await {
            Ok(Some(outcome)) => {
                report_outcome(&outcome);
                if ends_session(&outcome) {
                    break;
                }
            }
            Ok(None) => print_warning("Answer stopped."),
            Err(e) => print_error(e.user_message()),
        }
    }

    print_info(&format!("Session id: {} (resume with --session)", session.id));
    Ok(())
}

/// A closing turn ends the REPL whether or not the session was referred
fn ends_session(outcome: &TurnOutcome) -> bool {
    outcome.intent == Intent::Closing
}

pub async fn handle_ask_command(
    config: &AppConfig,
    text: String,
    strategy: Option<Strategy>,
    top_k: Option<usize>,
    corpus: Option<&Path>,
    show_passages: bool,
) -> Result<()> {
    let services = Services::from_config(config).await?;
    if let Some(corpus) = corpus {
        preload_corpus(&services, corpus).await?;
    }

    let session = services.sessions.start_session(None).await?;
    let options = TurnOptions {
        strategy,
        top_k,
        filter: None,
    };
    let mut handle = services.pipeline.respond(&session.id, &text, options).await?;
    match stream_turn(&mut handle, show_passages).await? {
        Some(outcome) => report_outcome(&outcome),
        None => print_warning("Answer stopped."),
    }
    Ok(())
}

async fn preload_corpus(services: &Services, corpus: &Path) -> Result<()> {
    print_info(&format!("Indexing {} ...", corpus.display()));
    let stats = ingest_file(
        corpus,
        services.embeddings.clone(),
        services.index.clone(),
    )
    .await?;
    print_success(&format!(
        "{} passage(s) indexed, {} skipped, {} failed",
        stats.indexed, stats.skipped, stats.failed
    ));
    Ok(())
}

/// Print a turn as it streams; `Ok(None)` when it was stopped with Ctrl-C
async fn stream_turn(handle: &mut TurnHandle, show_passages: bool) -> Result<Option<TurnOutcome>> {
    let mut stopped = false;
    let mut started = false;
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                None => {
                    if started {
                        println!();
                    }
                    return Ok(None);
                }
                Some(Ok(TurnEvent::Routed { intent, query, passages })) => {
                    tracing::debug!("Intent {} with query {:?}", intent.as_str(), query);
                    if show_passages && intent.needs_retrieval() {
                        print_passages(&passages);
                    }
                }
                Some(Ok(TurnEvent::Chunk(text))) => {
                    if !started {
                        print!("💬 Counselor: ");
                        started = true;
                    }
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                Some(Ok(TurnEvent::Finished(outcome))) => {
                    println!();
                    return Ok(if stopped { None } else { Some(outcome) });
                }
                Some(Err(e)) => {
                    if started {
                        println!();
                    }
                    return if stopped { Ok(None) } else { Err(e) };
                }
            },
            _ = tokio::signal::ctrl_c(), if !stopped => {
                handle.cancel();
                stopped = true;
            }
        }
    }
}

fn report_outcome(outcome: &TurnOutcome) {
    if outcome.degraded {
        print_warning("Related counseling records were unavailable for this answer.");
    }
    if outcome.escalation == Some(EscalationOutcome::Created) {
        print_warning("This conversation has been flagged for a professional counselor.");
    }
    if outcome.status == SessionStatus::Completed {
        print_success("Session completed. Take care.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(intent: Intent, status: SessionStatus) -> TurnOutcome {
        TurnOutcome {
            intent,
            degraded: false,
            escalation: None,
            status,
        }
    }

    #[test]
    fn test_closing_ends_referred_session() {
        assert!(ends_session(&outcome(Intent::Closing, SessionStatus::Completed)));
        assert!(ends_session(&outcome(Intent::Closing, SessionStatus::Referred)));
        assert!(!ends_session(&outcome(Intent::Emotion, SessionStatus::Referred)));
        assert!(!ends_session(&outcome(Intent::Question, SessionStatus::Active)));
    }
}
