//! Forwarding unit for one backend.
//!
//! A [`Switch`] owns a backend base URL, its path-rewrite rules, the
//! prefixes it claims (secondaries only), its timeout and the optional
//! audit observers. [`Switch::forward`] carries one client request
//! through `Received → Rewritten → Forwarding → {Completed | TimedOut |
//! BackendUnreachable}`. Failures are never retried: a retry could repeat
//! side effects of non-idempotent requests.

pub mod capture;
pub mod headers;
pub mod rewrite;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use url::Url;
use uuid::Uuid;

use crate::audit::{cap_payload, RecordKind, RequestObserver, ResponseObserver, TrafficRecord};
use crate::error::{BackendError, BoxError};
use crate::server::HttpClient;
use capture::{Capture, CapturingBody};
use headers::{build_forwarded_headers, strip_response_hop_by_hop, CORRELATION_HEADER};
use rewrite::PrefixRules;

/// One client request as seen by a Switch.
pub struct ForwardRequest {
    pub correlation_id: Uuid,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
    /// Scheme the client connected with: `http` or `https`.
    pub client_scheme: &'static str,
}

pub struct Switch {
    target: Url,
    rewrites: PrefixRules,
    claims: PrefixRules,
    timeout: Option<Duration>,
    token_header: HeaderName,
    request_observer: Option<Arc<dyn RequestObserver>>,
    response_observer: Option<Arc<dyn ResponseObserver>>,
    client: HttpClient,
}

impl std::fmt::Debug for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switch")
            .field("target", &self.target.as_str())
            .field("rewrites", &self.rewrites.len())
            .field("claims", &self.claims.len())
            .field("timeout", &self.timeout)
            .field("logging", &self.logging_enabled())
            .finish_non_exhaustive()
    }
}

impl Switch {
    #[must_use]
    pub fn new(target: Url, client: HttpClient, token_header: HeaderName) -> Self {
        Self {
            target,
            rewrites: PrefixRules::default(),
            claims: PrefixRules::default(),
            timeout: None,
            token_header,
            request_observer: None,
            response_observer: None,
            client,
        }
    }

    #[must_use]
    pub fn with_rewrites(mut self, rewrites: PrefixRules) -> Self {
        self.rewrites = rewrites;
        self
    }

    #[must_use]
    pub fn with_claims(mut self, claims: PrefixRules) -> Self {
        self.claims = claims;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_observers(
        mut self,
        request: Arc<dyn RequestObserver>,
        response: Arc<dyn ResponseObserver>,
    ) -> Self {
        self.request_observer = Some(request);
        self.response_observer = Some(response);
        self
    }

    #[must_use]
    pub const fn target(&self) -> &Url {
        &self.target
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub const fn logging_enabled(&self) -> bool {
        self.request_observer.is_some() || self.response_observer.is_some()
    }

    /// Whether this Switch claims `path`. Always false for a Switch
    /// without claim prefixes, such as the primary.
    #[must_use]
    pub fn accepts(&self, path: &str) -> bool {
        self.claims.matches(path)
    }

    /// Absolute backend URI for a rewritten path and the original query.
    fn backend_uri(&self, path: &str, query: Option<&str>) -> String {
        let base = self.target.path().trim_end_matches('/');
        let mut uri = format!(
            "{}{base}{path}",
            self.target.origin().ascii_serialization()
        );
        if let Some(query) = query {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }

    pub async fn forward(&self, req: ForwardRequest) -> Result<Response, BackendError> {
        let start = Instant::now();
        let path = self.rewrites.apply(req.uri.path()).into_owned();
        let url = req
            .uri
            .path_and_query()
            .map_or_else(|| req.uri.path().to_string(), ToString::to_string);

        let mut pending = self.logging_enabled().then(|| TrafficRecord {
            correlation_id: req.correlation_id,
            timestamp: Utc::now(),
            url,
            path: path.clone(),
            client_ip: req.client_ip.clone(),
            method: req.method.to_string(),
            token: req
                .headers
                .get(&self.token_header)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            target: self.target.to_string(),
            status: None,
            payload: cap_payload(&req.body),
            kind: RecordKind::Request,
        });

        if let (Some(observer), Some(record)) = (&self.request_observer, &pending) {
            if !observer.observe_request(record.clone()) {
                pending = None;
            }
        }

        let uri = self.backend_uri(&path, req.uri.query());
        let correlation_id = req.correlation_id.to_string();
        let forwarded_headers = build_forwarded_headers(
            &req.headers,
            &req.client_ip,
            req.client_scheme,
            &self.target,
            &correlation_id,
        );

        let mut builder = http::Request::builder().method(req.method).uri(&uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = forwarded_headers;
        }
        let backend_req = builder
            .body(Full::new(req.body))
            .map_err(|e| BackendError::Request {
                target: self.target.to_string(),
                source: Box::new(e),
            })?;

        let call = self.client.request(backend_req);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        target = %self.target,
                        path = %path,
                        timeout_ms = limit.as_millis() as u64,
                        "backend timed out"
                    );
                    return Err(BackendError::TimedOut {
                        target: self.target.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => call.await,
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        let response = result.map_err(|e| {
            tracing::warn!(
                correlation_id = %correlation_id,
                target = %self.target,
                error = %e,
                latency_ms,
                "backend request failed"
            );
            self.classify(e)
        })?;

        let status = response.status();
        tracing::info!(
            correlation_id = %correlation_id,
            target = %self.target,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            "backend responded"
        );

        let (mut parts, incoming) = response.into_parts();
        strip_response_hop_by_hop(&mut parts.headers);
        if let Ok(val) = HeaderValue::from_str(&correlation_id) {
            parts.headers.insert(CORRELATION_HEADER, val);
        }

        let body = match (&self.response_observer, pending) {
            (Some(observer), Some(record)) => Body::new(CapturingBody::new(
                incoming,
                Capture::new(Arc::clone(observer), record.to_response(status.as_u16())),
            )),
            _ => Body::new(incoming),
        };

        Ok(Response::from_parts(parts, body))
    }

    fn classify(&self, err: hyper_util::client::legacy::Error) -> BackendError {
        let target = self.target.to_string();
        if err.is_connect() {
            BackendError::Unreachable {
                target,
                source: Box::new(err) as BoxError,
            }
        } else {
            BackendError::Malformed {
                target,
                source: Box::new(err),
            }
        }
    }
}
