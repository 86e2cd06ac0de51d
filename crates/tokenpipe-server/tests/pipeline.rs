/// Pipeline Integration Tests
///
/// End-to-end behaviour of the wired pipeline (store, bus, chat service,
/// generation coordinator) without the HTTP layer:
/// - Token accumulation and ordering
/// - Deletion while generating
/// - Concurrent generations
/// - Stop and failure reporting
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use tokenpipe::chat::{ServiceOptions, StreamUpdate};
use tokenpipe::generation::{GenerationError, ScriptedSource, TickerSource, TokenSource};
use tokenpipe::Pipeline;
use tokenpipe_protocol::GenerationStatus;

const WAIT: Duration = Duration::from_secs(5);

fn start(source: Arc<dyn TokenSource>) -> (Pipeline, mpsc::UnboundedReceiver<StreamUpdate>) {
    let pipeline = Pipeline::start(source, ServiceOptions::default());
    let updates = pipeline.chats.take_updates().expect("updates already taken");
    (pipeline, updates)
}

/// Test helper: read updates until `prompt_id` finishes
async fn run_to_finish(
    updates: &mut mpsc::UnboundedReceiver<StreamUpdate>,
    prompt_id: &str,
) -> (Vec<String>, GenerationStatus, Option<String>) {
    let mut tokens = Vec::new();
    loop {
        let update = timeout(WAIT, updates.recv())
            .await
            .expect("timed out waiting for updates")
            .expect("delivery queue closed");
        match update {
            StreamUpdate::Token { prompt_id: p, text, .. } if p == prompt_id => tokens.push(text),
            StreamUpdate::Finished {
                prompt_id: p,
                status,
                error,
                ..
            } if p == prompt_id => return (tokens, status, error),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_tokens_accumulate_into_response_text() {
    let (pipeline, mut updates) = start(Arc::new(ScriptedSource::new(["He", "llo"])));

    let chat_id = pipeline.chats.create_chat("Greeting");
    let prompt = pipeline.chats.submit_prompt(&chat_id, "Say hello").unwrap();

    let (tokens, status, error) = run_to_finish(&mut updates, &prompt.id).await;
    assert_eq!(tokens, vec!["He", "llo"]);
    assert_eq!(status, GenerationStatus::Completed);
    assert!(error.is_none());

    assert_eq!(
        pipeline.chats.aggregated_text(&chat_id, &prompt.id).unwrap(),
        "Hello"
    );
    let chat = pipeline.chats.get_chat(&chat_id).unwrap();
    assert_eq!(chat.prompts.len(), 1);
    assert_eq!(chat.prompts[0].responses.len(), 2);
    assert!(!pipeline.generations.is_active(&prompt.id));

    pipeline.shutdown();
}

#[tokio::test]
async fn test_delete_chat_during_generation() {
    let source = ScriptedSource::new(["a", "b", "c", "d"]).with_delay(Duration::from_millis(50));
    let (pipeline, mut updates) = start(Arc::new(source));

    let chat_id = pipeline.chats.create_chat("Doomed");
    let prompt = pipeline.chats.submit_prompt(&chat_id, "count").unwrap();

    let first = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert!(matches!(first, StreamUpdate::Token { .. }));
    pipeline.chats.delete_chat(&chat_id).unwrap();

    // Later tokens are dropped; generation still runs to its end.
    let (late_tokens, status, _) = run_to_finish(&mut updates, &prompt.id).await;
    assert!(late_tokens.len() < 3);
    assert_eq!(status, GenerationStatus::Completed);

    assert!(pipeline.chats.get_chat(&chat_id).is_err());
    assert!(pipeline.chats.aggregated_text(&chat_id, &prompt.id).is_err());
    assert!(pipeline.chats.tokens_since(&chat_id, &prompt.id, 0).is_err());
    assert_eq!(pipeline.store.chat_count(), 0);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_concurrent_prompts_keep_per_prompt_order() {
    let source = TickerSource::new(Duration::from_millis(1), 20);
    let (pipeline, mut updates) = start(Arc::new(source));

    let mut prompts = Vec::new();
    for name in ["First", "Second", "Third"] {
        let chat_id = pipeline.chats.create_chat(name);
        let prompt = pipeline.chats.submit_prompt(&chat_id, name).unwrap();
        prompts.push((chat_id, prompt.id));
    }

    let mut tokens: HashMap<String, Vec<String>> = HashMap::new();
    let mut finished = 0;
    while finished < prompts.len() {
        match timeout(WAIT, updates.recv()).await.unwrap().unwrap() {
            StreamUpdate::Token { prompt_id, text, .. } => {
                tokens.entry(prompt_id).or_default().push(text)
            }
            StreamUpdate::Finished { status, .. } => {
                assert_eq!(status, GenerationStatus::Completed);
                finished += 1;
            }
        }
    }

    let expected: Vec<String> = (1..=20).map(|i| format!("Token-{}", i)).collect();
    for (chat_id, prompt_id) in &prompts {
        assert_eq!(tokens[prompt_id], expected);
        assert_eq!(
            pipeline.chats.aggregated_text(chat_id, prompt_id).unwrap(),
            expected.concat()
        );
    }
    assert_eq!(pipeline.generations.active_count(), 0);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_stop_generation() {
    let source = TickerSource::new(Duration::from_millis(20), 100_000);
    let (pipeline, mut updates) = start(Arc::new(source));

    let chat_id = pipeline.chats.create_chat("Endless");
    let prompt = pipeline.chats.submit_prompt(&chat_id, "go on").unwrap();

    let first = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert!(matches!(first, StreamUpdate::Token { .. }));

    pipeline.generations.stop_generation(&prompt.id).unwrap();
    let (late_tokens, status, error) = run_to_finish(&mut updates, &prompt.id).await;
    assert_eq!(status, GenerationStatus::Cancelled);
    assert!(error.is_none());
    assert!(late_tokens.len() <= 1, "{:?} after stop", late_tokens);

    // Text produced before the stop is kept, and nothing is appended later.
    let text = pipeline.chats.aggregated_text(&chat_id, &prompt.id).unwrap();
    assert!(text.starts_with("Token-1"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        pipeline.chats.aggregated_text(&chat_id, &prompt.id).unwrap(),
        text
    );
    assert!(updates.try_recv().is_err());

    assert_eq!(
        pipeline.generations.stop_generation(&prompt.id),
        Err(GenerationError::NotFound(prompt.id.clone()))
    );

    pipeline.shutdown();
}

#[tokio::test]
async fn test_source_failure_is_reported() {
    let source = ScriptedSource::new(["par", "tial"]).failing_after_tokens("connection reset");
    let (pipeline, mut updates) = start(Arc::new(source));

    let chat_id = pipeline.chats.create_chat("Flaky");
    let prompt = pipeline.chats.submit_prompt(&chat_id, "hi").unwrap();

    let (tokens, status, error) = run_to_finish(&mut updates, &prompt.id).await;
    assert_eq!(tokens, vec!["par", "tial"]);
    assert_eq!(status, GenerationStatus::Failed);
    assert_eq!(error.as_deref(), Some("token source error: connection reset"));
    assert_eq!(
        pipeline.chats.aggregated_text(&chat_id, &prompt.id).unwrap(),
        "partial"
    );

    pipeline.shutdown();
}

#[tokio::test]
async fn test_unread_updates_are_never_dropped() {
    let texts: Vec<String> = (0..300).map(|i| format!("w{} ", i)).collect();
    let (pipeline, mut updates) = start(Arc::new(ScriptedSource::new(texts.clone())));

    let chat_id = pipeline.chats.create_chat("Backlog");
    let prompt = pipeline.chats.submit_prompt(&chat_id, "long answer").unwrap();

    // Let the whole generation land before anyone reads the queue.
    let expected = texts.concat();
    timeout(WAIT, async {
        while pipeline.chats.aggregated_text(&chat_id, &prompt.id).unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("generation never finished");

    let (tokens, status, _) = run_to_finish(&mut updates, &prompt.id).await;
    assert_eq!(status, GenerationStatus::Completed);
    assert_eq!(tokens, texts);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_prompts_in_one_chat_stay_separate() {
    let (pipeline, mut updates) = start(Arc::new(ScriptedSource::new(["x", "y"])));

    let chat_id = pipeline.chats.create_chat("Thread");
    let first = pipeline.chats.submit_prompt(&chat_id, "one").unwrap();
    run_to_finish(&mut updates, &first.id).await;
    let second = pipeline.chats.submit_prompt(&chat_id, "two").unwrap();
    run_to_finish(&mut updates, &second.id).await;

    let chat = pipeline.chats.get_chat(&chat_id).unwrap();
    let texts: Vec<&str> = chat.prompts.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    for prompt in &chat.prompts {
        assert_eq!(prompt.aggregated_text(), "xy");
    }

    let replay = pipeline.chats.tokens_since(&chat_id, &second.id, 0).unwrap();
    let cursors: Vec<u64> = replay.iter().map(|t| t.cursor).collect();
    assert_eq!(cursors, vec![3, 4]);
    assert_eq!(pipeline.chats.latest_cursor(), 4);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_shutdown_cancels_and_closes_queue() {
    let source = TickerSource::new(Duration::from_millis(5), 100_000);
    let (pipeline, mut updates) = start(Arc::new(source));

    let chat_id = pipeline.chats.create_chat("Long");
    pipeline.chats.submit_prompt(&chat_id, "go").unwrap();
    timeout(WAIT, updates.recv()).await.unwrap().unwrap();

    pipeline.shutdown();
    assert_eq!(pipeline.generations.active_count(), 0);

    // Drains whatever was queued, then ends.
    timeout(WAIT, async { while updates.recv().await.is_some() {} })
        .await
        .expect("delivery queue never closed");
}
