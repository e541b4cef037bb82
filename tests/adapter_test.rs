//! Provider adapter tests
//!
//! Real provider framing over the in-memory transport.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Span;
use voice_relay::config::RetryConfig;
use voice_relay::providers::{cartesia, elevenlabs, elevenlabs_stt};
use voice_relay::providers::{CartesiaOptions, ElevenLabsOptions, ElevenLabsSttOptions};
use voice_relay::{
    event_channel, from_chunks, input_channel, Adapter, AdapterContext, AdapterEvent, Events,
    MemoryConnector, RemotePeer,
};

type Tts = (Box<dyn Adapter<String>>, Events<String, Vec<u8>>);

fn elevenlabs_over(connector: &MemoryConnector) -> Tts {
    let factory = elevenlabs::factory_over(
        ElevenLabsOptions::new("key", "voice"),
        Arc::new(connector.clone()),
    );
    let (sink, events) = event_channel();
    (factory(AdapterContext::new(sink, Span::none())), events)
}

fn cartesia_over(connector: &MemoryConnector, retry: RetryConfig) -> Tts {
    let mut options = CartesiaOptions::new("key", "sonic-2", "voice");
    options.retry = retry;
    let factory = cartesia::factory_over(options, Arc::new(connector.clone()));
    let (sink, events) = event_channel();
    (factory(AdapterContext::new(sink, Span::none())), events)
}

async fn accept(peers: &mut mpsc::UnboundedReceiver<RemotePeer>) -> RemotePeer {
    peers.recv().await.expect("connector stopped")
}

async fn next_json(peer: &mut RemotePeer) -> Value {
    peer.next_json().await.expect("session closed")
}

/// Transcript and context of a Cartesia generation frame
fn generation(value: &Value) -> (&str, &str, bool) {
    (
        value["transcript"].as_str().unwrap(),
        value["context_id"].as_str().unwrap(),
        value["continue"].as_bool().unwrap(),
    )
}

fn assert_no_event(events: &mut Events<String, Vec<u8>>) {
    let mut next = tokio_test::task::spawn(events.recv());
    tokio_test::assert_pending!(next.poll());
}

#[tokio::test]
async fn test_elevenlabs_text_is_sent_on_word_boundaries() {
    let (connector, mut peers) = MemoryConnector::new();
    let (mut adapter, mut events) = elevenlabs_over(&connector);
    let mut peer = accept(&mut peers).await;

    assert_eq!(next_json(&mut peer).await, json!({"text": " "}));

    let (text, input) = input_channel();
    adapter.start(input);
    text.push("Hello ".to_string());
    text.push("wor".to_string());
    text.push("ld.".to_string());
    text.end();

    assert_eq!(
        next_json(&mut peer).await,
        json!({"text": "Hello ", "try_trigger_generation": true})
    );
    assert_eq!(
        next_json(&mut peer).await,
        json!({"text": "world.", "try_trigger_generation": true})
    );
    assert_eq!(next_json(&mut peer).await, json!({"text": " ", "flush": true}));

    // Alignment covering every sent character closes the utterance without isFinal
    let chars: Vec<String> = "Hello world.".chars().map(String::from).collect();
    peer.reply_json(&json!({"audio": "AQID", "alignment": {"chars": chars}}));

    assert!(matches!(events.recv().await, Some(AdapterEvent::Output(audio)) if audio == vec![1, 2, 3]));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Finished)));

    // A late final flag belongs to no utterance
    peer.reply_json(&json!({"isFinal": true}));
    tokio::task::yield_now().await;
    assert_no_event(&mut events);
    adapter.destroy();
}

#[tokio::test]
async fn test_elevenlabs_ignores_audio_for_unsent_text() {
    let (connector, mut peers) = MemoryConnector::new();
    let (mut adapter, mut events) = elevenlabs_over(&connector);
    let mut peer = accept(&mut peers).await;
    next_json(&mut peer).await;

    adapter.start(from_chunks(vec!["Good morning.".to_string()]));
    assert_eq!(next_json(&mut peer).await["text"], "Good ");
    assert_eq!(next_json(&mut peer).await["text"], "morning.");
    assert_eq!(next_json(&mut peer).await["flush"], true);

    let stray: Vec<String> = "Goodbye".chars().map(String::from).collect();
    peer.reply_json(&json!({"audio": "AQID", "alignment": {"chars": stray}}));
    peer.reply_json(&json!({"audio": "BAUG", "isFinal": true}));

    assert!(matches!(events.recv().await, Some(AdapterEvent::Output(audio)) if audio == vec![4, 5, 6]));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Finished)));
    adapter.destroy();
}

#[tokio::test]
async fn test_cartesia_drops_output_of_superseded_utterance() {
    let (connector, mut peers) = MemoryConnector::new();
    let (mut adapter, mut events) = cartesia_over(&connector, RetryConfig::default());
    let mut peer = accept(&mut peers).await;

    let (first, input) = input_channel();
    adapter.start(input);
    first.push("First.".to_string());
    assert_eq!(generation(&next_json(&mut peer).await), ("First.", "1", true));

    adapter.start(from_chunks(vec!["Second.".to_string()]));
    assert_eq!(generation(&next_json(&mut peer).await), ("Second.", "2", true));
    assert_eq!(generation(&next_json(&mut peer).await), ("", "2", false));

    peer.reply_json(&json!({"type": "chunk", "context_id": "1", "data": "AQID"}));
    peer.reply_json(&json!({"type": "done", "context_id": "1"}));
    peer.reply_json(&json!({"type": "chunk", "context_id": "2", "data": "BAUG"}));
    peer.reply_json(&json!({"type": "done", "context_id": "2"}));

    assert!(matches!(events.recv().await, Some(AdapterEvent::Output(audio)) if audio == vec![4, 5, 6]));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Finished)));
    assert_no_event(&mut events);

    // Superseded input is no longer read
    assert!(!first.push("late".to_string()));
    adapter.destroy();
}

#[tokio::test]
async fn test_cartesia_cancel_sends_abort_and_silences_output() {
    let (connector, mut peers) = MemoryConnector::new();
    let (mut adapter, mut events) = cartesia_over(&connector, RetryConfig::default());
    let mut peer = accept(&mut peers).await;

    let (text, input) = input_channel();
    adapter.start(input);
    text.push("Never mind.".to_string());
    assert_eq!(generation(&next_json(&mut peer).await), ("Never mind.", "1", true));

    adapter.cancel();
    assert_eq!(next_json(&mut peer).await, json!({"context_id": "1", "cancel": true}));

    peer.reply_json(&json!({"type": "chunk", "context_id": "1", "data": "AQID"}));
    tokio::task::yield_now().await;
    assert_no_event(&mut events);

    // The next utterance skips the cancelled epoch
    adapter.start(from_chunks(vec!["Again.".to_string()]));
    assert_eq!(generation(&next_json(&mut peer).await), ("Again.", "3", true));
    adapter.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_cartesia_replays_unconfirmed_text_after_reconnect() {
    let (connector, mut peers) = MemoryConnector::new();
    let (mut adapter, mut events) = cartesia_over(&connector, RetryConfig::default());
    let mut first = accept(&mut peers).await;

    let (text, input) = input_channel();
    adapter.start(input);
    text.push("Hello ".to_string());
    assert_eq!(generation(&next_json(&mut first).await), ("Hello ", "1", true));

    first.close(Some(1006), "abnormal closure");
    text.push("world.".to_string());
    text.end();

    let mut second = accept(&mut peers).await;
    assert_eq!(generation(&next_json(&mut second).await), ("Hello ", "1", true));
    assert_eq!(generation(&next_json(&mut second).await), ("world.", "1", true));
    assert_eq!(generation(&next_json(&mut second).await), ("", "1", false));

    second.reply_json(&json!({"type": "chunk", "context_id": "1", "data": "AQID"}));
    second.reply_json(&json!({"type": "done", "context_id": "1"}));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Output(audio)) if audio == vec![1, 2, 3]));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Finished)));
    assert_eq!(connector.attempts(), 2);
    adapter.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_reports_unsent_text_once() {
    let (connector, _peers) = MemoryConnector::new();
    connector.refuse_all();
    let retry = RetryConfig {
        delay_ms: 100,
        max_retry: 2,
    };
    let (mut adapter, mut events) = cartesia_over(&connector, retry);

    adapter.start(from_chunks(vec!["Hello ".to_string(), "world.".to_string()]));

    match events.recv().await {
        Some(AdapterEvent::Failed(unconsumed)) => {
            assert_eq!(unconsumed.chunks, vec!["Hello world.".to_string()]);
            assert!(unconsumed.remainder.is_none());
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(connector.attempts(), 3);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 3);
    assert_no_event(&mut events);
    adapter.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_stt_replays_unacknowledged_audio() {
    let (connector, mut peers) = MemoryConnector::new();
    let factory = elevenlabs_stt::factory_over(
        ElevenLabsSttOptions::new("key"),
        Arc::new(connector.clone()),
    );
    let (sink, mut events) = event_channel();
    let mut adapter = factory(AdapterContext::new(sink, Span::none()));

    let mut first = accept(&mut peers).await;
    adapter.start(from_chunks(vec![vec![1, 2, 3], vec![4, 5]]));
    assert_eq!(next_json(&mut first).await["audio_base_64"], "AQID");
    assert_eq!(next_json(&mut first).await["audio_base_64"], "BAU=");
    assert_eq!(next_json(&mut first).await["commit"], true);
    drop(first);

    let mut second = accept(&mut peers).await;
    let replay: Vec<Value> = vec![
        next_json(&mut second).await,
        next_json(&mut second).await,
        next_json(&mut second).await,
    ];
    assert_eq!(replay[0]["audio_base_64"], "AQID");
    assert_eq!(replay[1]["audio_base_64"], "BAU=");
    assert_eq!(replay[2]["commit"], true);

    second.reply_json(&json!({"message_type": "partial_transcript", "text": "hel"}));
    second.reply_json(&json!({"message_type": "committed_transcript", "text": "hello"}));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Output(text)) if text == "hello"));
    assert!(matches!(events.recv().await, Some(AdapterEvent::Finished)));
    adapter.destroy();
}
