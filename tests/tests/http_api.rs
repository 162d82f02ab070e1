//! Black-box tests for the daemon's HTTP surface

use modeld_testing::{TestServer, ndjson_lines};
use serde_json::json;

#[tokio::test]
async fn healthz_is_alive_before_any_load() {
    let server = TestServer::start(&["alpha.gguf"], None).await;
    let resp = server
        .client
        .get(server.url("/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn models_lists_every_catalog_entry() {
    let server = TestServer::start(&["beta.gguf", "alpha.gguf"], Some("alpha.gguf")).await;
    let resp = server
        .client
        .get(server.url("/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let ids: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["alpha.gguf", "beta.gguf"]);
}

#[tokio::test]
async fn readyz_flips_after_first_successful_load() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .get(server.url("/readyz"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.text().await.unwrap();

    let resp = server
        .client
        .get(server.url("/readyz"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn infer_with_default_model_streams_ndjson() {
    let server = TestServer::start(&["alpha.gguf", "beta.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"],
        "application/x-ndjson"
    );

    let lines = ndjson_lines(&resp.text().await.unwrap());
    assert!(lines.len() >= 2, "expected tokens + terminal, got {lines:?}");
    let last = lines.last().unwrap();
    assert_eq!(last["done"], true);
    assert_eq!(last["content"], "hello");
    // Only the last line is terminal.
    assert!(lines[..lines.len() - 1].iter().all(|l| l.get("done").is_none()));
}

#[tokio::test]
async fn infer_with_named_model() {
    let server = TestServer::start(&["alpha.gguf", "beta.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"model": "beta.gguf", "prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let lines = ndjson_lines(&resp.text().await.unwrap());
    assert!(lines.len() >= 2);
    assert_eq!(lines.last().unwrap()["done"], true);
}

#[tokio::test]
async fn unknown_model_is_404_even_with_default() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"model": "missing.gguf", "prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 404);
    assert!(body["error"].as_str().unwrap().contains("missing.gguf"));
}

#[tokio::test]
async fn missing_model_and_no_default_is_404() {
    let server = TestServer::start(&["alpha.gguf"], None).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn non_json_content_type_is_rejected() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .header("content-type", "text/plain")
        .body("prompt=hi")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
}

#[tokio::test]
async fn cancelled_stream_does_not_degrade_later_requests() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;
    let long_prompt = "word ".repeat(400);

    let mut resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": long_prompt}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    // Read the first chunk, then hang up mid-stream.
    let first = resp.chunk().await.unwrap();
    assert!(first.is_some());
    drop(resp);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // A fresh request against the same server must still succeed.
    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "hello again"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let lines = ndjson_lines(&resp.text().await.unwrap());
    assert_eq!(lines.last().unwrap()["done"], true);
}

#[tokio::test]
async fn status_reflects_loaded_instances() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    resp.text().await.unwrap();

    let status: serde_json::Value = server
        .client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let instances = status["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["model_id"], "alpha.gguf");
    assert_eq!(instances[0]["state"], "ready");
    assert_eq!(status["loads_total"], 1);
}

#[tokio::test]
async fn metrics_count_requests_by_route() {
    let server = TestServer::start(&["alpha.gguf"], None).await;

    server
        .client
        .get(server.url("/models"))
        .send()
        .await
        .unwrap();

    let text = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("modeld_http_requests_total"));
    assert!(text.contains(r#"path="/models""#));
}

#[tokio::test]
async fn busy_instance_rejects_with_429() {
    let server = TestServer::start_with(&["alpha.gguf"], Some("alpha.gguf"), |mut s| {
        s.max_queue_depth = 1;
        s.max_wait = std::time::Duration::from_millis(100);
        s
    })
    .await;
    let long_prompt = "word ".repeat(400);

    let mut streaming = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": long_prompt}))
        .send()
        .await
        .unwrap();
    assert_eq!(streaming.status(), 200);
    // Make sure the generation is actually occupying the instance.
    streaming.chunk().await.unwrap();

    let resp = server
        .client
        .post(server.url("/infer"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);

    let text = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("modeld_http_backpressure_total"));
}

#[tokio::test]
async fn shutdown_exits_within_grace_and_closes_the_port() {
    let server = TestServer::start(&["alpha.gguf"], Some("alpha.gguf")).await;
    let addr = server.addr;
    let client = server.client.clone();
    let long_prompt = "word ".repeat(400);

    // Leave a stream in flight while shutting down.
    let mut streaming = client
        .post(server.url("/infer"))
        .json(&json!({"prompt": long_prompt}))
        .send()
        .await
        .unwrap();
    streaming.chunk().await.unwrap();

    let begin = std::time::Instant::now();
    server.shutdown().await;
    assert!(
        begin.elapsed() < std::time::Duration::from_secs(3),
        "shutdown took {:?}",
        begin.elapsed()
    );

    // The listener is gone; new connections must fail.
    let connect = tokio::net::TcpStream::connect(addr).await;
    assert!(connect.is_err());
}
