mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use mindcare::models::Role;
use mindcare::models::SessionStatus;
use mindcare::rag::prompts::EMPTY_SUMMARY_REPLY;
use mindcare::rag::prompts::NO_PASSAGES_NOTICE;
use mindcare::rag::Intent;
use mindcare::rag::TurnEvent;
use mindcare::rag::TurnOptions;
use mindcare::session::EscalationOutcome;
use mindcare::vector::MemoryVectorIndex;
use mindcare::MindcareError;

#[tokio::test]
async fn test_greeting_skips_retrieval_and_generation() {
    let h = harness(Arc::new(sample_index().await), ScriptedGeneration::new(vec![]));

    let reply = h
        .pipeline
        .respond("s-greet", "안녕하세요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(reply.outcome.intent, Intent::Greeting);
    assert!(!reply.text.is_empty());
    assert!(reply.passages.is_empty());
    assert!(reply.query.is_none());
    assert_eq!(h.embeddings.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.generation.stream_calls(), 0);

    let messages = h.store_messages("s-greet").await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].text, reply.text);
}

#[tokio::test]
async fn test_emotion_turn_streams_grounded_answer() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![Script::Chunks(vec!["잠이 오지 않아 ", "많이 지치셨겠어요."])]),
    );

    let mut handle = h
        .pipeline
        .respond("s-1", "요즘 잠을 못 자서 너무 피곤해요", TurnOptions::default())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event.unwrap());
    }

    assert!(matches!(events.first(), Some(TurnEvent::Routed { intent: Intent::Emotion, .. })));
    let TurnEvent::Routed { passages, query, .. } = &events[0] else {
        unreachable!();
    };
    assert_eq!(query.as_deref(), Some("요즘 잠을 못 자서 너무 피곤해요"));
    assert!(passages.iter().any(|p| p.passage_id == "p1"));
    for (i, p) in passages.iter().enumerate() {
        assert_eq!(p.rank, i + 1);
    }

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Chunk(c) => Some(c.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "잠이 오지 않아 많이 지치셨겠어요.");

    let Some(TurnEvent::Finished(outcome)) = events.last() else {
        panic!("turn did not finish");
    };
    assert!(!outcome.degraded);
    assert_eq!(outcome.escalation, None);
    assert_eq!(outcome.status, SessionStatus::Active);

    // Retrieved passages reach the prompt
    assert!(h.generation.streamed_prompt(0).contains("요즘 잠을 잘 못 자고 계속 피곤해요"));

    let messages = h.store_messages("s-1").await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text, text);
}

#[tokio::test]
async fn test_marker_refers_once_and_never_reaches_the_user() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![
            Script::Chunks(vec!["많이 힘드셨겠어요. ", "[EXPERT_", "REFERRAL_NEEDED]", " 전문가와 함께 이야기해 보면 좋겠어요."]),
            Script::Chunks(vec![MARKER, "계속 곁에 있을게요."]),
        ]),
    );

    let first = h
        .pipeline
        .respond("s-ref", "요즘 너무 우울하고 무기력해요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert!(!first.text.contains(MARKER));
    assert!(!first.text.contains("[EXPERT_"));
    assert_eq!(first.text, "많이 힘드셨겠어요.  전문가와 함께 이야기해 보면 좋겠어요.");
    assert_eq!(first.outcome.escalation, Some(EscalationOutcome::Created));
    assert_eq!(first.outcome.status, SessionStatus::Referred);
    assert_eq!(h.store.escalation_count(), 1);

    let second = h
        .pipeline
        .respond("s-ref", "그래도 여전히 우울해요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(second.text, "계속 곁에 있을게요.");
    assert_eq!(second.outcome.escalation, Some(EscalationOutcome::AlreadyReferred));
    assert_eq!(h.store.escalation_count(), 1);

    let messages = h.store_messages("s-ref").await;
    assert!(messages.iter().all(|m| !m.text.contains(MARKER)));
}

#[tokio::test]
async fn test_marker_catches_self_harm_the_router_missed() {
    let h = model_routed_harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![Script::Chunks(vec![
            "그런 마음이 드셨다니 걱정돼요. ",
            MARKER,
        ])])
        .with_complete_reply("QUESTION"),
    );

    let reply = h
        .pipeline
        .respond("s-missed", "그냥 아무도 없는 곳으로 사라지면 어떨까요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(reply.outcome.intent, Intent::Question);
    assert_eq!(reply.outcome.status, SessionStatus::Referred);
    assert_eq!(reply.outcome.escalation, Some(EscalationOutcome::Created));
    assert_eq!(h.store.escalation_count(), 1);
    assert!(!reply.text.contains(MARKER));
}

#[tokio::test]
async fn test_crisis_is_referred_before_reply() {
    let h = harness(Arc::new(sample_index().await), ScriptedGeneration::new(vec![]));

    let reply = h
        .pipeline
        .respond("s-crisis", "그냥 다 끝내고 싶고 죽고 싶어요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(reply.outcome.intent, Intent::Crisis);
    assert!(reply.text.contains("1393"));
    assert_eq!(reply.outcome.escalation, Some(EscalationOutcome::Created));
    assert_eq!(reply.outcome.status, SessionStatus::Referred);
    assert_eq!(h.generation.stream_calls(), 0);

    let referral = h.store_escalation("s-crisis").await.unwrap();
    assert_eq!(referral.severity, mindcare::models::Severity::Crisis);
}

#[tokio::test]
async fn test_index_timeout_degrades_but_answers() {
    let slow = SlowIndex {
        inner: sample_index().await,
        delay: Duration::from_secs(5),
    };
    let h = harness(
        Arc::new(slow),
        ScriptedGeneration::new(vec![Script::Chunks(vec!["힘든 하루였군요."])]),
    );

    let reply = tokio::time::timeout(
        Duration::from_secs(2),
        h.pipeline
            .respond("s-slow", "회사 스트레스 때문에 힘들어요", TurnOptions::default())
            .await
            .unwrap()
            .collect(),
    )
    .await
    .expect("turn must not wait for the index")
    .unwrap();

    assert!(reply.outcome.degraded);
    assert!(reply.passages.is_empty());
    assert_eq!(reply.text, "힘든 하루였군요.");
    assert!(h.generation.streamed_prompt(0).contains(NO_PASSAGES_NOTICE));
}

#[tokio::test]
async fn test_empty_index_still_answers() {
    let h = harness(
        Arc::new(MemoryVectorIndex::with_dimension(DIM)),
        ScriptedGeneration::new(vec![Script::Chunks(vec!["이야기해 줘서 고마워요."])]),
    );

    let reply = h
        .pipeline
        .respond("s-empty", "불안해서 아무것도 못 하겠어요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert!(reply.passages.is_empty());
    assert!(!reply.outcome.degraded);
    assert!(!reply.text.is_empty());
    assert!(h.generation.streamed_prompt(0).contains(NO_PASSAGES_NOTICE));
}

#[tokio::test]
async fn test_concurrent_marker_turns_create_one_record() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![
            Script::Chunks(vec!["괜찮아요.", MARKER]),
            Script::Chunks(vec![MARKER, "함께 방법을 찾아봐요."]),
        ]),
    );

    let a = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline
                .respond("s-race", "너무 불안해요", TurnOptions::default())
                .await
                .unwrap()
                .collect()
                .await
                .unwrap()
        })
    };
    let b = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline
                .respond("s-race", "계속 걱정이 돼요", TurnOptions::default())
                .await
                .unwrap()
                .collect()
                .await
                .unwrap()
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let mut outcomes = vec![a.outcome.escalation, b.outcome.escalation];
    outcomes.sort_by_key(|o| o == &Some(EscalationOutcome::AlreadyReferred));
    assert_eq!(
        outcomes,
        vec![
            Some(EscalationOutcome::Created),
            Some(EscalationOutcome::AlreadyReferred)
        ]
    );
    assert_eq!(h.store.escalation_count(), 1);
}

#[tokio::test]
async fn test_back_to_back_turns_keep_order() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![
            Script::Paced(vec!["첫 번째 ", "답변"], Duration::from_millis(20)),
            Script::Chunks(vec!["두 번째 답변"]),
        ]),
    );

    let first = h
        .pipeline
        .respond("s-order", "잠이 안 와서 힘들어요", TurnOptions::default())
        .await
        .unwrap();
    // Queued behind the first turn
    let second = h
        .pipeline
        .respond("s-order", "밤마다 걱정이 많아요", TurnOptions::default())
        .await
        .unwrap();

    let first = first.collect().await.unwrap();
    let second = second.collect().await.unwrap();
    assert_eq!(first.text, "첫 번째 답변");
    assert_eq!(second.text, "두 번째 답변");

    let texts: Vec<_> = h
        .store_messages("s-order")
        .await
        .into_iter()
        .map(|m| (m.role, m.text))
        .collect();
    assert_eq!(
        texts,
        vec![
            (Role::User, "잠이 안 와서 힘들어요".to_string()),
            (Role::Assistant, "첫 번째 답변".to_string()),
            (Role::User, "밤마다 걱정이 많아요".to_string()),
            (Role::Assistant, "두 번째 답변".to_string()),
        ]
    );

    // The second prompt saw the first exchange
    assert!(h.generation.streamed_prompt(1).contains("첫 번째 답변"));
    assert_eq!(h.sessions.active_queues(), 0);
}

#[tokio::test]
async fn test_queued_turn_does_not_block_a_long_stream() {
    let long: Vec<&'static str> = vec!["말 "; 100];
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![
            Script::Chunks(long),
            Script::Chunks(vec!["두 번째 답변"]),
        ]),
    );

    let mut first = h
        .pipeline
        .respond("s-long", "잠이 안 와서 힘들어요", TurnOptions::default())
        .await
        .unwrap();
    // Let the first turn fill its event buffer before the second arrives
    let mut streamed = String::new();
    loop {
        match first.next_event().await.unwrap().unwrap() {
            TurnEvent::Chunk(chunk) => {
                streamed.push_str(&chunk);
                break;
            }
            TurnEvent::Routed { .. } => continue,
            TurnEvent::Finished(_) => panic!("finished before streaming"),
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = tokio::time::timeout(
        Duration::from_secs(2),
        h.pipeline
            .respond("s-long", "밤마다 걱정이 많아요", TurnOptions::default()),
    )
    .await
    .expect("respond returned while the first turn was streaming")
    .unwrap();

    let first = first.collect().await.unwrap();
    streamed.push_str(&first.text);
    assert_eq!(streamed, "말 ".repeat(100));
    let second = second.collect().await.unwrap();
    assert_eq!(second.text, "두 번째 답변");

    let messages = h.store_messages("s-long").await;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].text, "말 ".repeat(100));
    assert_eq!(messages[2].text, "밤마다 걱정이 많아요");
    assert_eq!(h.sessions.active_queues(), 0);
}

#[tokio::test]
async fn test_disconnect_cancels_generation() {
    let chunks = vec!["하나 "; 50];
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![Script::Paced(chunks, Duration::from_millis(20))]),
    );

    let mut handle = h
        .pipeline
        .respond("s-gone", "너무 외로워요", TurnOptions::default())
        .await
        .unwrap();
    loop {
        match handle.next_event().await.unwrap().unwrap() {
            TurnEvent::Chunk(_) => break,
            TurnEvent::Routed { .. } => continue,
            TurnEvent::Finished(_) => panic!("finished before the client left"),
        }
    }
    handle.abandon().await;

    assert!(h.generation.stream_dropped.load(Ordering::SeqCst));
    let messages = h.store_messages("s-gone").await;
    assert_eq!(messages.len(), 1, "an interrupted answer is not stored");
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(h.sessions.active_queues(), 0);
}

#[tokio::test]
async fn test_generation_failure_ends_turn_with_error() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![Script::FailAfter(vec!["지금 "])]),
    );

    let result = h
        .pipeline
        .respond("s-fail", "스트레스가 심해요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert!(matches!(result, Err(MindcareError::LlmError(_))));
    assert_eq!(h.store_messages("s-fail").await.len(), 1);
}

#[tokio::test]
async fn test_stalled_stream_times_out() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![Script::Stall(vec!["음..."])]),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        h.pipeline
            .respond("s-stall", "요즘 짜증이 많이 나요", TurnOptions::default())
            .await
            .unwrap()
            .collect(),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(MindcareError::GenerationTimeout(300))));
    assert!(h.generation.stream_dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_marker_before_failure_still_refers() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![Script::FailAfter(vec![MARKER, "잠시만요"])]),
    );

    let result = h
        .pipeline
        .respond("s-late", "너무 무기력해요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert!(result.is_err());
    assert_eq!(h.store.escalation_count(), 1);
    assert_eq!(
        h.sessions.get_session("s-late").await.unwrap().status,
        SessionStatus::Referred
    );
}

#[tokio::test]
async fn test_closing_summarizes_and_completes() {
    let h = harness(
        Arc::new(sample_index().await),
        ScriptedGeneration::new(vec![
            Script::Chunks(vec!["잠이 부족하면 더 힘들죠."]),
            Script::Chunks(vec!["오늘은 수면 문제를 이야기했어요."]),
        ]),
    );

    h.pipeline
        .respond("s-close", "잠을 못 자서 피곤해요", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    let closing = h
        .pipeline
        .respond("s-close", "이제 그만할래", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(closing.outcome.intent, Intent::Closing);
    assert_eq!(closing.text, "오늘은 수면 문제를 이야기했어요.");
    assert_eq!(closing.outcome.status, SessionStatus::Completed);

    let summary_prompt = h.generation.streamed_prompt(1);
    assert!(summary_prompt.contains("잠을 못 자서 피곤해요"));
    assert!(!summary_prompt.contains("이제 그만할래"));
}

#[tokio::test]
async fn test_closing_without_history_skips_generation() {
    let h = harness(Arc::new(sample_index().await), ScriptedGeneration::new(vec![]));

    let reply = h
        .pipeline
        .respond("s-bye", "상담 종료", TurnOptions::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(reply.text, EMPTY_SUMMARY_REPLY);
    assert_eq!(reply.outcome.status, SessionStatus::Completed);
    assert_eq!(h.generation.stream_calls(), 0);
}

#[tokio::test]
async fn test_empty_utterance_is_rejected() {
    let h = harness(Arc::new(sample_index().await), ScriptedGeneration::new(vec![]));

    let err = h
        .pipeline
        .respond("s-blank", "   ", TurnOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MindcareError::InvalidInput(_)));
    assert!(h.sessions.get_session("s-blank").await.is_err());
}
