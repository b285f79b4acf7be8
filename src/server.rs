//! HTTP plumbing shared by the Mux: the pooled backend client, the Axum
//! router, and TLS identity loading.
//!
//! [`build_http_client`] creates the connection-pooled hyper client used by
//! every Switch, [`build_router`] wraps the dispatch handler with tracing
//! and a request body limit, and [`load_tls_identity`] turns a PEM cert/key
//! pair into a rustls acceptor config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::MuxError;
use crate::mux::{dispatch_handler, Dispatch};

pub const DEFAULT_MAX_BODY: usize = 1_048_576;

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, http_body_util::Full<bytes::Bytes>>;

/// Install `ring` as the process-wide rustls provider.
///
/// rustls cannot auto-detect a provider when more than one is compiled in,
/// and both the client and the TLS listener rely on the default.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    install_crypto_provider();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

/// `max_body` is the only request size limit: axum's built-in 2 MiB
/// extractor cap is disabled so larger limits take effect.
pub fn build_router(dispatch: Arc<Dispatch>, max_body: usize) -> Router {
    Router::new()
        .fallback(dispatch_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(dispatch)
}

/// Load a PEM certificate chain and private key for TLS termination.
///
/// Unreadable files and mismatched or malformed pairs are configuration
/// errors.
pub async fn load_tls_identity(cert: &Path, key: &Path) -> Result<RustlsConfig, MuxError> {
    install_crypto_provider();
    RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
        MuxError::Configuration(format!(
            "invalid TLS identity (cert {}, key {}): {e}",
            cert.display(),
            key.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tls_files_are_configuration_errors() {
        let err = load_tls_identity(Path::new("/nope/cert.pem"), Path::new("/nope/key.pem"))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("/nope/cert.pem"));
    }
}
