//! End-to-end tests: real Axum backends, a real Mux, reqwest as the client
//! and the in-memory audit sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use switchmux::audit::memory::MemorySink;
use switchmux::audit::{RecordKind, TrafficRecord, MAX_PAYLOAD};
use switchmux::config::model::{Config, Secondary};
use switchmux::mux::Mux;

/// Backend that answers `201` with `"{name} {path?query}"`, or echoes a
/// non-empty request body.
async fn spawn_backend(name: &'static str) -> String {
    let app = Router::new().fallback(move |uri: Uri, body: Bytes| async move {
        let text = if body.is_empty() {
            let pq = uri.path_and_query().map_or("", |pq| pq.as_str()).to_string();
            format!("{name} {pq}")
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };
        (StatusCode::CREATED, [("x-backend", name)], text)
    });
    serve(app).await
}

/// Backend that answers only after `delay`.
async fn spawn_slow_backend(delay: Duration) -> String {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "late"
    });
    serve(app).await
}

/// Backend returning `size` bytes of `b'z'`.
async fn spawn_large_backend(size: usize) -> String {
    let app = Router::new()
        .fallback(move || async move { (StatusCode::OK, vec![b'z'; size]).into_response() });
    serve(app).await
}

/// Backend answering with the received body length, without axum's 2 MiB cap.
async fn spawn_length_backend() -> String {
    let app = Router::new()
        .fallback(|body: Bytes| async move { body.len().to_string() })
        .layer(DefaultBodyLimit::disable());
    serve(app).await
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn base_config(primary: String) -> Config {
    Config {
        listen: "127.0.0.1:0".into(),
        grace_period: 1,
        primary,
        ..Config::default()
    }
}

fn secondary(url: String) -> Secondary {
    Secondary {
        url,
        ignore: false,
        rewrite: HashMap::new(),
        paths: Vec::new(),
        timeout: None,
    }
}

async fn start(config: &Config) -> (Mux, Arc<MemorySink>, String) {
    let sink = Arc::new(MemorySink::new());
    let mux = Mux::new(config, sink.clone()).unwrap();
    let addr = mux.start().await.unwrap();
    (mux, sink, format!("http://{addr}"))
}

fn by_kind(records: &[TrafficRecord], kind: RecordKind) -> Vec<&TrafficRecord> {
    records.iter().filter(|r| r.kind == kind).collect()
}

#[tokio::test]
async fn rewritten_secondary_and_default_primary() {
    let backend_a = spawn_backend("a").await;
    let backend_b = spawn_backend("b").await;

    let mut config = base_config(backend_a.clone());
    let mut proxy = secondary(backend_b.clone());
    proxy.rewrite.insert("/old".into(), "/new".into());
    config.proxies.push(proxy);

    let (mux, sink, base) = start(&config).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/old/x?q=1"))
        .header("SBE-AUTH", "team-7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(resp.headers()["x-backend"], "b");
    let correlation = resp.headers()["x-correlation-id"]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(resp.text().await.unwrap(), "b /new/x?q=1");

    let resp = client.get(format!("{base}/other")).send().await.unwrap();
    assert_eq!(resp.headers()["x-backend"], "a");
    assert_eq!(resp.text().await.unwrap(), "a /other");

    mux.stop().await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 4);

    let first: Vec<_> = records
        .iter()
        .filter(|r| r.correlation_id.to_string() == correlation)
        .collect();
    assert_eq!(first.len(), 2);
    assert!(first[0].is_request());
    assert!(first[1].is_response());

    let (req, resp) = (first[0], first[1]);
    assert_eq!(req.url, "/old/x?q=1");
    assert_eq!(req.path, "/new/x");
    assert_eq!(req.method, "GET");
    assert_eq!(req.token, "team-7");
    assert_eq!(req.client_ip, "127.0.0.1");
    assert_eq!(req.target, format!("{backend_b}/"));
    assert_eq!(resp.status, Some(201));
    assert_eq!(&resp.payload[..], b"b /new/x?q=1");

    let primary_records: Vec<_> = records
        .iter()
        .filter(|r| r.target == format!("{backend_a}/"))
        .collect();
    assert_eq!(primary_records.len(), 2);
    assert_eq!(primary_records[0].path, "/other");
}

#[tokio::test]
async fn request_body_is_forwarded_and_logged() {
    let backend = spawn_backend("a").await;
    let (mux, sink, base) = start(&base_config(backend)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/submit"))
        .body("flag{example}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "flag{example}");

    mux.stop().await.unwrap();
    let records = sink.records();
    let requests = by_kind(&records, RecordKind::Request);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(&requests[0].payload[..], b"flag{example}");
    assert!(requests[0].token.is_empty());
}

#[tokio::test]
async fn ignored_secondary_is_never_logged() {
    let backend_a = spawn_backend("a").await;
    let backend_c = spawn_backend("c").await;

    let mut config = base_config(backend_a);
    let mut quiet = secondary(backend_c);
    quiet.ignore = true;
    quiet.paths = vec!["/quiet".into()];
    config.proxies.push(quiet);

    let (mux, sink, base) = start(&config).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let resp = client.get(format!("{base}/quiet/ping")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "c /quiet/ping");
    }
    mux.stop().await.unwrap();

    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn slow_primary_times_out_with_request_record_only() {
    let backend = spawn_slow_backend(Duration::from_secs(5)).await;
    let config = Config {
        timeout: 1,
        ..base_config(backend)
    };
    let (mux, sink, base) = start(&config).await;

    let started = Instant::now();
    let resp = reqwest::get(format!("{base}/slow")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(resp.status(), 504);
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");

    mux.stop().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_request());
}

#[tokio::test]
async fn unreachable_primary_returns_bad_gateway() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let backend = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let (mux, sink, base) = start(&base_config(backend)).await;
    let resp = reqwest::get(format!("{base}/x")).await.unwrap();
    assert_eq!(resp.status(), 502);

    mux.stop().await.unwrap();
    let records = sink.records();
    assert_eq!(by_kind(&records, RecordKind::Request).len(), 1);
    assert!(by_kind(&records, RecordKind::Response).is_empty());
}

#[tokio::test]
async fn concurrent_requests_get_distinct_record_pairs() {
    let backend = spawn_backend("a").await;
    let (mux, sink, base) = start(&base_config(backend)).await;
    let client = reqwest::Client::new();

    let (one, two) = tokio::join!(
        client.get(format!("{base}/one")).send(),
        client.get(format!("{base}/two")).send(),
    );
    assert_eq!(one.unwrap().text().await.unwrap(), "a /one");
    assert_eq!(two.unwrap().text().await.unwrap(), "a /two");

    mux.stop().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 4);

    let requests = by_kind(&records, RecordKind::Request);
    assert_ne!(requests[0].correlation_id, requests[1].correlation_id);

    for request in requests {
        let pair: Vec<_> = records
            .iter()
            .filter(|r| r.correlation_id == request.correlation_id)
            .collect();
        assert_eq!(pair.len(), 2);
        assert!(pair[0].is_request(), "request must be written first");
        assert_eq!(pair[1].path, request.path);
        assert_eq!(
            pair[1].payload,
            Bytes::from(format!("a {}", request.path))
        );
    }
}

#[tokio::test]
async fn large_response_reaches_client_intact() {
    let size = MAX_PAYLOAD * 3 + 5;
    let backend = spawn_large_backend(size).await;
    let (mux, sink, base) = start(&base_config(backend)).await;

    let body = reqwest::get(format!("{base}/big"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.len(), size);
    assert!(body.iter().all(|b| *b == b'z'));

    mux.stop().await.unwrap();
    let records = sink.records();
    let responses = by_kind(&records, RecordKind::Response);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload.len(), MAX_PAYLOAD);
}

#[tokio::test]
async fn stop_is_idempotent_and_closes_sink_once() {
    let backend = spawn_backend("a").await;
    let (mux, sink, base) = start(&base_config(backend)).await;

    assert!(reqwest::get(format!("{base}/x")).await.is_ok());

    mux.stop().await.unwrap();
    mux.stop().await.unwrap();
    assert_eq!(sink.close_count(), 1);

    // Resolves immediately once stopped.
    tokio::time::timeout(Duration::from_secs(1), mux.closed())
        .await
        .unwrap();

    assert!(reqwest::get(format!("{base}/x")).await.is_err());
}

#[tokio::test]
async fn missing_primary_fails_before_listening() {
    let config = Config {
        listen: "127.0.0.1:0".into(),
        ..Config::default()
    };
    let err = Mux::new(&config, Arc::new(MemorySink::new())).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("primary"));
}

#[tokio::test]
async fn client_correlation_header_is_not_trusted() {
    let backend = spawn_backend("a").await;
    let (mux, sink, base) = start(&base_config(backend)).await;

    let mut headers = HeaderMap::new();
    headers.insert("x-correlation-id", "spoofed".parse().unwrap());
    let resp = reqwest::Client::new()
        .get(format!("{base}/x"))
        .headers(headers)
        .send()
        .await
        .unwrap();
    let returned = resp.headers()["x-correlation-id"]
        .to_str()
        .unwrap()
        .to_string();
    assert_ne!(returned, "spoofed");
    let _ = resp.text().await;

    mux.stop().await.unwrap();
    assert_eq!(sink.records()[0].correlation_id.to_string(), returned);
}

#[tokio::test]
async fn max_body_above_two_mebibytes_is_honoured() {
    let backend = spawn_length_backend().await;
    let sink = Arc::new(MemorySink::new());
    let mux = Mux::new(&base_config(backend), sink.clone())
        .unwrap()
        .with_max_body(8 * 1024 * 1024);
    let base = format!("http://{}", mux.start().await.unwrap());

    let size = 3 * 1024 * 1024;
    let resp = reqwest::Client::new()
        .post(format!("{base}/upload"))
        .body(vec![b'u'; size])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), size.to_string());

    mux.stop().await.unwrap();
    let records = sink.records();
    let requests = by_kind(&records, RecordKind::Request);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload.len(), MAX_PAYLOAD);
}

#[tokio::test]
async fn stop_force_closes_requests_past_the_grace_period() {
    let backend = spawn_slow_backend(Duration::from_secs(10)).await;
    let config = Config {
        timeout: 0,
        ..base_config(backend)
    };
    let (mux, _sink, base) = start(&config).await;

    let in_flight = tokio::spawn(async move { reqwest::get(format!("{base}/slow")).await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    mux.stop().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");

    let outcome = tokio::time::timeout(Duration::from_secs(2), in_flight)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_err());
}
