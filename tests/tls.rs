//! TLS termination with a test CA and a `localhost` leaf certificate.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;
use switchmux::audit::memory::MemorySink;
use switchmux::config::model::Config;
use switchmux::mux::Mux;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/tls")
        .join(name)
}

#[tokio::test]
async fn terminates_tls_and_forwards_plain_http() {
    let backend = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    tokio::spawn(async move {
        let app = Router::new().fallback(|headers: HeaderMap| async move {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            format!("secure hello via {proto}")
        });
        axum::serve(backend, app).await.unwrap();
    });

    let config = Config {
        listen: "127.0.0.1:0".into(),
        grace_period: 1,
        cert: Some(fixture("server.pem")),
        key: Some(fixture("server.key")),
        primary: format!("http://{backend_addr}"),
        ..Config::default()
    };
    let sink = Arc::new(MemorySink::new());
    let mux = Mux::new(&config, sink.clone()).unwrap();
    let addr = mux.start().await.unwrap();

    let ca = std::fs::read(fixture("ca.pem")).unwrap();
    let client = reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_pem(&ca).unwrap())
        .resolve("localhost", addr)
        .build()
        .unwrap();

    let resp = client
        .get(format!("https://localhost:{}/hello", addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "secure hello via https");

    // Plain HTTP is not served on a TLS listener.
    assert!(reqwest::get(format!("http://{addr}/hello")).await.is_err());

    mux.stop().await.unwrap();
    assert_eq!(sink.records().len(), 2);
}
