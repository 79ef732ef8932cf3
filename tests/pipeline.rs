//! End-to-end orchestrator tests with an in-memory index and scripted
//! generation and scoring.

mod common;

use std::time::Duration;

use common::{harness, test_config, Step};
use rag_support::session::Clock;
use rag_support_core::generation::PromptRole;
use rag_support_core::models::Role;
use rag_support_core::models::Quality;
use rag_support_core::RagError;

const PASSWORD_QUESTION: &str = "How do I reset my password?";

#[tokio::test]
async fn test_accepted_answer_carries_sources() {
    let config = test_config();
    let h = harness(&config, vec![], vec![0.85]).await;

    let response = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();

    assert!(response.confidence.accepted);
    assert!(response.confidence.high_confidence);
    assert!(!response.confidence.low_confidence);
    assert_eq!(response.confidence.level, Quality::Excellent);
    assert_eq!(response.confidence.attempts, 1);
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].source_document, "account.md");
    assert_eq!(
        response.sources[0].heading_path,
        vec!["Account".to_string(), "Reset your password".to_string()]
    );
    assert_eq!(response.answer.title, "Account");
    assert_eq!(
        response.answer.interface_elements,
        vec!["Settings".to_string(), "Reset password".to_string()]
    );
    assert_eq!(response.metadata.history_length, 2);
    assert_eq!(response.metadata.timestamp, h.clock.now());
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_long_answer_is_cut_before_scoring() {
    let mut config = test_config();
    config.api.max_answer_length = 23;
    let h = harness(
        &config,
        vec![Step::Reply(
            "Open Settings and click Reset password, then check your email.".to_string(),
        )],
        vec![],
    )
    .await;

    let response = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();

    let cut = "Open Settings and click";
    assert_eq!(h.scorer.answers(), vec![cut.to_string()]);
    assert_eq!(response.answer.content, cut);
    let history = h
        .pipeline
        .sessions()
        .history(&response.session_id)
        .await
        .unwrap();
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text, cut);
}

#[tokio::test]
async fn test_rejected_answer_is_retried_once() {
    let config = test_config();
    let h = harness(
        &config,
        vec![
            Step::Reply("first draft".to_string()),
            Step::Reply("second draft".to_string()),
        ],
        vec![0.35, 0.5],
    )
    .await;

    let response = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();

    assert!(response.confidence.accepted);
    assert_eq!(response.confidence.attempts, 2);
    assert!((response.confidence.score - 0.5).abs() < 1e-9);
    assert_eq!(response.answer.content, "second draft");
    assert_eq!(h.generator.calls(), 2);

    let requests = h.generator.requests();
    assert!(!requests[0].messages[0].content.contains("previous answer was rejected"));
    assert!(requests[1].messages[0].content.contains("previous answer was rejected"));
}

#[tokio::test]
async fn test_exhausted_retries_return_best_with_low_confidence() {
    let config = test_config();
    let h = harness(
        &config,
        vec![
            Step::Reply("better draft".to_string()),
            Step::Reply("worse draft".to_string()),
        ],
        vec![0.3, 0.2],
    )
    .await;

    let response = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();

    assert!(!response.confidence.accepted);
    assert!(response.confidence.low_confidence);
    assert_eq!(response.confidence.level, Quality::NeedsImprovement);
    assert_eq!(response.confidence.attempts, 2);
    assert_eq!(response.answer.content, "better draft");
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test]
async fn test_no_context_skips_generation() {
    let config = test_config();
    let h = harness(&config, vec![], vec![]).await;

    let response = h
        .pipeline
        .ask(None, "What is the weather on Mars today?")
        .await
        .unwrap();

    assert_eq!(h.generator.calls(), 0);
    assert_eq!(response.confidence.level, Quality::NoContext);
    assert_eq!(response.confidence.score, 0.0);
    assert!(response.sources.is_empty());
    assert_eq!(response.answer.content, config.prompt_templates().cannot_answer.trim());

    let history = h
        .pipeline
        .sessions()
        .history(&response.session_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_question_length_is_validated() {
    let config = test_config();
    let h = harness(&config, vec![], vec![]).await;

    let err = h.pipeline.ask(None, "  a ").await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));

    let long = "x".repeat(config.api.max_question_length + 1);
    assert!(matches!(
        h.pipeline.ask(None, &long).await,
        Err(RagError::Validation(_))
    ));
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_history_is_replayed_and_bounded() {
    let mut config = test_config();
    config.conversation.max_history = 4;
    let h = harness(&config, vec![], vec![]).await;

    let id = h.pipeline.create_session();
    for _ in 0..3 {
        let response = h.pipeline.ask(Some(&id), PASSWORD_QUESTION).await.unwrap();
        assert!(response.metadata.history_length <= 4);
    }

    let requests = h.generator.requests();
    // system + fused question on the first turn; history replayed after that
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert_eq!(requests[2].messages.len(), 6);
    assert_eq!(requests[2].messages[1].role, PromptRole::User);
    assert_eq!(
        h.pipeline.sessions().history(&id).await.unwrap().len(),
        4
    );
}

#[tokio::test]
async fn test_idle_session_starts_fresh() {
    let config = test_config();
    let h = harness(&config, vec![], vec![]).await;

    let first = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();
    let id = first.session_id.clone();
    assert_eq!(first.metadata.history_length, 2);

    h.clock.advance(Duration::from_secs(3601));
    let second = h.pipeline.ask(Some(&id), PASSWORD_QUESTION).await.unwrap();

    assert_eq!(second.session_id, id);
    assert_eq!(second.metadata.history_length, 2);
    assert_eq!(
        second.metadata.timestamp - first.metadata.timestamp,
        chrono::Duration::seconds(3601)
    );
    // no stale history in the prompt
    assert_eq!(h.generator.requests()[1].messages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout_is_retried() {
    let config = test_config();
    let h = harness(
        &config,
        vec![Step::Stall(Duration::from_secs(30))],
        vec![],
    )
    .await;

    let response = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();

    assert!(response.confidence.accepted);
    assert_eq!(response.confidence.attempts, 1);
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_exhausted_then_session_still_usable() {
    let config = test_config();
    let h = harness(
        &config,
        vec![
            Step::Stall(Duration::from_secs(30)),
            Step::Stall(Duration::from_secs(30)),
            Step::Stall(Duration::from_secs(30)),
        ],
        vec![],
    )
    .await;

    let id = h.pipeline.create_session();
    let err = h.pipeline.ask(Some(&id), PASSWORD_QUESTION).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_retriable());
    assert_eq!(h.generator.calls(), 1 + config.llm.max_retries as usize);

    // the failed turn released the session and recorded nothing
    let response = h.pipeline.ask(Some(&id), PASSWORD_QUESTION).await.unwrap();
    assert_eq!(response.metadata.history_length, 2);
}

#[tokio::test]
async fn test_generation_failure_surfaces_as_unavailable() {
    let config = test_config();
    let h = harness(
        &config,
        vec![Step::Fail("model not loaded".to_string())],
        vec![],
    )
    .await;

    let err = h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap_err();
    assert!(matches!(err, RagError::GenerationUnavailable(_)));
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_end_session() {
    let config = test_config();
    let h = harness(&config, vec![], vec![]).await;

    let id = h.pipeline.create_session();
    h.pipeline.end_session(&id).await.unwrap();
    assert!(matches!(
        h.pipeline.end_session(&id).await,
        Err(RagError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_turns_are_counted_in_metrics() {
    let config = test_config();
    let h = harness(
        &config,
        vec![Step::Fail("model not loaded".to_string())],
        vec![],
    )
    .await;

    assert!(h.pipeline.ask(None, PASSWORD_QUESTION).await.is_err());
    h.pipeline.ask(None, PASSWORD_QUESTION).await.unwrap();
    // rejected questions are not counted
    assert!(h.pipeline.ask(None, "a").await.is_err());

    let snap = h.pipeline.metrics().snapshot();
    assert_eq!(snap.requests_total, 2);
    assert_eq!(snap.failures_total, 1);
    assert_eq!(snap.window_requests, 2);
    assert_eq!(snap.requests_per_minute, 2);
    assert!((snap.success_rate - 50.0).abs() < 1e-9);
    assert_eq!(snap.timestamp, h.clock.now());
}
