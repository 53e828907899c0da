//! End-to-end request/response exchanges.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;

use reqres::{Payload, PayloadType, Request, Responder};
use reqres_testkit::fixtures::{serve_echo, TestPair};

const CHUNK: usize = 64 * 1024;

/// Let bob forward every request it sees to the returned channel, then echo.
fn record_requests(pair: &TestPair) -> mpsc::UnboundedReceiver<Request> {
    let (tx, rx) = mpsc::unbounded_channel();
    pair.bob.on_request(move |request: Request, responder: Responder| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(request.clone());
            responder.send(request.payload, request.meta).await
        }
    });
    rx
}

async fn recorded_pair() -> (TestPair, mpsc::UnboundedReceiver<Request>) {
    let pair = TestPair::new();
    let requests = record_requests(&pair);
    pair.connect().await;
    (pair, requests)
}

#[tokio::test]
async fn test_hello_foo() -> anyhow::Result<()> {
    let pair = TestPair::new();
    pair.bob.on_request(|request: Request, responder: Responder| async move {
        let reply = if request.payload.as_text() == Some("hello") { "foo" } else { "?" };
        responder.send(reply, None).await
    });
    pair.connect().await;

    let response = pair.alice.request(pair.bob.client_id(), "hello", None).await?;
    assert_eq!(response.payload.as_text(), Some("foo"));
    assert_eq!(response.payload_type, PayloadType::Text);
    assert_eq!(&response.from, pair.bob.client_id());
    assert!(response.meta.is_none());
    assert!(response.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_payload_types_round_trip() -> anyhow::Result<()> {
    let (pair, mut requests) = recorded_pair().await;
    let bob = pair.bob.client_id().clone();

    let cases = [
        (Payload::from("plain text ✓"), PayloadType::Text),
        (Payload::from(json!({"a": 1, "b": [true, "x"], "c": {"d": null}})), PayloadType::Structured),
        (Payload::from(vec![0u8, 1, 2, 254, 255]), PayloadType::Binary),
        (Payload::Absent, PayloadType::Absent),
        (Payload::from(""), PayloadType::Text),
        (Payload::from(Vec::<u8>::new()), PayloadType::Binary),
    ];

    for (payload, payload_type) in cases {
        let response = pair.alice.request(&bob, payload.clone(), None).await?;
        let seen = requests
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("handler not called"))?;

        assert_eq!(seen.payload, payload);
        assert_eq!(seen.payload_type, payload_type);
        assert_eq!(seen.from, *pair.alice.client_id());
        assert!(seen.topic.ends_with("/request"), "{}", seen.topic);

        assert_eq!(response.payload, payload);
        assert_eq!(response.payload_type, payload_type);
        assert_eq!(response.responds_to, seen.message_id);
    }
    Ok(())
}

#[tokio::test]
async fn test_null_payload_with_meta_both_ways() -> anyhow::Result<()> {
    let (pair, mut requests) = recorded_pair().await;
    let meta = Payload::from(json!({"foo": "bar"}));

    let response = pair
        .alice
        .request(pair.bob.client_id(), Payload::Absent, Some(meta.clone()))
        .await?;
    let seen = requests
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("handler not called"))?;

    assert!(seen.payload.is_absent());
    assert_eq!(seen.payload_type, PayloadType::Absent);
    assert_eq!(seen.meta, Some(meta.clone()));
    assert!(response.payload.is_absent());
    assert_eq!(response.meta, Some(meta));
    Ok(())
}

/// Count chunk frames alice publishes.
fn count_chunks(pair: &TestPair) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    pair.broker.set_interceptor(move |topic, _| {
        if topic.starts_with("message/alice/") && topic.ends_with("/chunk") {
            seen.fetch_add(1, Ordering::SeqCst);
        }
        false
    });
    count
}

#[tokio::test]
async fn test_chunk_boundaries() -> anyhow::Result<()> {
    let pair = TestPair::connected().await;
    let bob = pair.bob.client_id().clone();
    let chunks = count_chunks(&pair);

    for (len, expected_chunks) in [(2 * CHUNK, 2), (2 * CHUNK + 1, 3), (CHUNK - 1, 1)] {
        chunks.store(0, Ordering::SeqCst);
        let text = "x".repeat(len);
        let response = pair.alice.request(&bob, text.as_str(), None).await?;
        assert_eq!(response.payload.as_text().map(str::len), Some(len));
        assert_eq!(response.payload.as_text(), Some(text.as_str()));
        assert_eq!(chunks.load(Ordering::SeqCst), expected_chunks, "text of {} bytes", len);
    }

    for (len, expected_chunks) in [(2 * CHUNK, 2), (2 * CHUNK + 1, 3)] {
        chunks.store(0, Ordering::SeqCst);
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let response = pair.alice.request(&bob, bytes.clone(), None).await?;
        assert_eq!(response.payload, Payload::Binary(Bytes::from(bytes)));
        assert_eq!(chunks.load(Ordering::SeqCst), expected_chunks, "{} bytes", len);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_do_not_cross() -> anyhow::Result<()> {
    let pair = TestPair::connected().await;
    let bob = pair.bob.client_id().clone();

    let mut tasks = Vec::new();
    for i in 0..42 {
        let alice = pair.alice.clone();
        let bob = bob.clone();
        tasks.push(tokio::spawn(async move {
            let sent = format!("payload-{}", i);
            let response = alice.request(&bob, sent.as_str(), None).await?;
            Ok::<_, reqres::ClientError>((sent, response))
        }));
    }

    for task in tasks {
        let (sent, response) = task.await??;
        assert_eq!(response.payload.as_text(), Some(sent.as_str()));
    }
    assert_eq!(pair.alice.endpoint().pending(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_requests_in_both_directions() -> anyhow::Result<()> {
    let pair = TestPair::new();
    serve_echo(&pair.alice);
    serve_echo(&pair.bob);
    pair.connect().await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        for (from, to) in [(&pair.alice, &pair.bob), (&pair.bob, &pair.alice)] {
            let from = from.clone();
            let to = to.client_id().clone();
            tasks.push(tokio::spawn(async move {
                let sent = json!({"from": from.client_id().as_str(), "n": i});
                let response = from.request(&to, sent.clone(), None).await?;
                Ok::<_, reqres::ClientError>((sent, response))
            }));
        }
    }

    for task in tasks {
        let (sent, response) = task.await??;
        assert_eq!(response.payload.as_json(), Some(&sent));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cold_requests_in_both_directions() -> anyhow::Result<()> {
    // Each round races two fresh handshakes; the loser must not send early
    for round in 0..10 {
        let pair = TestPair::new();
        serve_echo(&pair.alice);
        serve_echo(&pair.bob);
        pair.alice.connect(None, None).await?;
        pair.bob.connect(None, None).await?;

        let (to_bob, to_alice) = tokio::join!(
            pair.alice.request(pair.bob.client_id(), "to bob", None),
            pair.bob.request(pair.alice.client_id(), "to alice", None),
        );
        assert_eq!(to_bob?.payload.as_text(), Some("to bob"), "round {}", round);
        assert_eq!(to_alice?.payload.as_text(), Some("to alice"), "round {}", round);

        let on_alice = pair.alice.get_connection(pair.bob.client_id());
        let on_bob = pair.bob.get_connection(pair.alice.client_id());
        assert_eq!(
            on_alice.and_then(|c| c.channel_send_id),
            on_bob.and_then(|c| c.channel_receive_id)
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_structured_payload_parses_into_types() -> anyhow::Result<()> {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Order {
        id: u32,
        items: Vec<String>,
    }

    let pair = TestPair::connected().await;
    let order = Order {
        id: 7,
        items: vec!["tea".into(), "cake".into()],
    };
    let response = pair
        .alice
        .request(pair.bob.client_id(), Payload::structured(&order)?, None)
        .await?;
    assert_eq!(response.payload.parse::<Order>()?, order);
    Ok(())
}
