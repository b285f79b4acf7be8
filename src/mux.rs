//! The listener-owning Mux and its per-request dispatch.
//!
//! A [`Mux`] owns one primary [`Switch`] and an ordered list of secondary
//! Switches. Each client request is handed to exactly one of them: the
//! first secondary whose claimed prefixes match the request path, else the
//! primary. [`Mux::start`] binds the listener (optionally terminating TLS)
//! and [`Mux::stop`] drains it within the grace period, then closes the
//! audit path.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum_server::Handle;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::audit::writer::{AuditWriter, DEFAULT_QUEUE_CAPACITY};
use crate::audit::AuditSink;
use crate::config::model::{secs_to_duration, Config, TlsPair};
use crate::error::MuxError;
use crate::server::{self, DEFAULT_MAX_BODY};
use crate::switch::rewrite::PrefixRules;
use crate::switch::{ForwardRequest, Switch};

/// The immutable Switch set shared by every request handler.
#[derive(Debug)]
pub struct Dispatch {
    primary: Switch,
    secondaries: Vec<Switch>,
    client_scheme: &'static str,
}

impl Dispatch {
    /// Clients are assumed to connect over plain `http`.
    #[must_use]
    pub const fn new(primary: Switch, secondaries: Vec<Switch>) -> Self {
        Self {
            primary,
            secondaries,
            client_scheme: "http",
        }
    }

    /// Scheme reported to backends in `X-Forwarded-Proto`.
    #[must_use]
    pub fn with_client_scheme(mut self, scheme: &'static str) -> Self {
        self.client_scheme = scheme;
        self
    }

    #[must_use]
    pub const fn client_scheme(&self) -> &'static str {
        self.client_scheme
    }

    /// First secondary claiming `path`, else the primary.
    #[must_use]
    pub fn select(&self, path: &str) -> &Switch {
        self.secondaries
            .iter()
            .find(|s| s.accepts(path))
            .unwrap_or(&self.primary)
    }

    #[must_use]
    pub const fn primary(&self) -> &Switch {
        &self.primary
    }

    #[must_use]
    pub fn secondaries(&self) -> &[Switch] {
        &self.secondaries
    }
}

/// Axum fallback handler: every request, whatever its path or method.
pub async fn dispatch_handler(
    State(dispatch): State<Arc<Dispatch>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let switch = dispatch.select(uri.path());

    tracing::debug!(
        correlation_id = %correlation_id,
        method = %method,
        path = %uri.path(),
        target = %switch.target(),
        "dispatching request"
    );

    let request = ForwardRequest {
        correlation_id,
        method,
        uri,
        headers,
        body,
        client_ip: peer.ip().to_string(),
        client_scheme: dispatch.client_scheme(),
    };

    match switch.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                correlation_id = %correlation_id,
                target = %e.target(),
                status = e.status().as_u16(),
                error = %e,
                "forward failed"
            );
            e.into_response()
        }
    }
}

#[derive(Debug, Clone)]
struct TlsPaths {
    cert: PathBuf,
    key: PathBuf,
}

/// Traffic multiplexer: one listener, one primary, any number of
/// secondaries.
pub struct Mux {
    listen: String,
    tls: Option<TlsPaths>,
    dispatch: Arc<Dispatch>,
    audit: Arc<AuditWriter>,
    grace_period: Duration,
    max_body: usize,
    handle: Handle,
    shutdown: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    serving: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<Mutex<Option<MuxError>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("listen", &self.listen)
            .field("tls", &self.tls.is_some())
            .field("dispatch", &self.dispatch)
            .field("grace_period", &self.grace_period)
            .field("local_addr", &self.local_addr.get())
            .finish_non_exhaustive()
    }
}

impl Mux {
    /// Build a Mux from a parsed config.
    ///
    /// Fails with a configuration error before any socket or backend
    /// connection exists, and with [`MuxError::NoRuntime`] when called
    /// outside a Tokio runtime, since the audit writer task is spawned here.
    pub fn new(config: &Config, sink: Arc<dyn AuditSink>) -> Result<Self, MuxError> {
        crate::config::check_mux(config)?;
        tokio::runtime::Handle::try_current().map_err(|_| MuxError::NoRuntime)?;

        let tls = match config.tls_pair() {
            TlsPair::None => None,
            TlsPair::Both { cert, key } => Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }),
            TlsPair::Incomplete => {
                return Err(MuxError::Configuration(
                    "TLS needs both a certificate and a key".into(),
                ))
            }
        };

        let token_header: HeaderName = config.token_header.parse().map_err(|_| {
            MuxError::Configuration(format!(
                "'{}' is not a valid header name",
                config.token_header
            ))
        })?;

        let client_scheme = if tls.is_some() { "https" } else { "http" };
        let client = server::build_http_client();
        let audit = Arc::new(AuditWriter::spawn(sink, DEFAULT_QUEUE_CAPACITY));
        let default_timeout = config.default_timeout();

        let primary = Switch::new(
            parse_target(&config.primary)?,
            client.clone(),
            token_header.clone(),
        )
        .with_timeout(default_timeout)
        .with_observers(audit.clone(), audit.clone());

        let secondaries = config
            .proxies
            .iter()
            .map(|proxy| {
                let claims = PrefixRules::prefixes(proxy.match_prefixes());
                if claims.is_empty() {
                    tracing::warn!(
                        target = %proxy.url,
                        "secondary has no rewrite rules or paths and will receive no traffic"
                    );
                }
                let timeout = proxy
                    .timeout
                    .and_then(secs_to_duration)
                    .or(default_timeout);

                let switch = Switch::new(
                    parse_target(&proxy.url)?,
                    client.clone(),
                    token_header.clone(),
                )
                .with_rewrites(PrefixRules::new(proxy.rewrite.clone()))
                .with_claims(claims)
                .with_timeout(timeout);
                Ok(if proxy.ignore {
                    switch
                } else {
                    switch.with_observers(audit.clone(), audit.clone())
                })
            })
            .collect::<Result<Vec<_>, MuxError>>()?;

        Ok(Self {
            listen: config.listen.clone(),
            tls,
            dispatch: Arc::new(
                Dispatch::new(primary, secondaries).with_client_scheme(client_scheme),
            ),
            audit,
            grace_period: config.grace_period(),
            max_body: DEFAULT_MAX_BODY,
            handle: Handle::new(),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            serving: tokio::sync::Mutex::new(None),
            fatal: Arc::new(Mutex::new(None)),
            local_addr: OnceLock::new(),
        })
    }

    /// Maximum accepted request body in bytes.
    #[must_use]
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    #[must_use]
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Address the listener is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Bind the listener and begin serving in a background task.
    ///
    /// Returns the bound address as soon as the socket is listening.
    pub async fn start(&self) -> Result<SocketAddr, MuxError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MuxError::AlreadyStarted);
        }

        let tls = match &self.tls {
            Some(paths) => Some(server::load_tls_identity(&paths.cert, &paths.key).await?),
            None => None,
        };

        let bind_error = |source| MuxError::Bind {
            addr: self.listen.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&self.listen)
            .await
            .map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        let listener = listener.into_std().map_err(bind_error)?;
        let _ = self.local_addr.set(addr);

        let app = server::build_router(self.dispatch.clone(), self.max_body)
            .into_make_service_with_connect_info::<SocketAddr>();
        let handle = self.handle.clone();
        let token = self.shutdown.clone();
        let fatal = self.fatal.clone();
        let tls_enabled = tls.is_some();

        let task = tokio::spawn(async move {
            let result = match tls {
                Some(config) => {
                    axum_server::tls_rustls::from_tcp_rustls(listener, config)
                        .handle(handle)
                        .serve(app)
                        .await
                }
                None => axum_server::from_tcp(listener).handle(handle).serve(app).await,
            };

            if let Some(source) = serving_failure(result, token.is_cancelled()) {
                tracing::error!(error = %source, "listener failed");
                if let Ok(mut slot) = fatal.lock() {
                    slot.get_or_insert(MuxError::Listener { source });
                }
            }
            token.cancel();
        });
        *self.serving.lock().await = Some(task);

        tracing::info!(
            addr = %addr,
            tls = tls_enabled,
            primary = %self.dispatch.primary().target(),
            secondaries = self.dispatch.secondaries().len(),
            "mux started"
        );
        Ok(addr)
    }

    /// Stop accepting, drain in-flight requests for up to the grace period,
    /// then flush and close the audit path.
    ///
    /// Only the first call does any work. It returns the listener error
    /// that ended serving, if there was one.
    pub async fn stop(&self) -> Result<(), MuxError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(
            grace_period_ms = self.grace_period.as_millis() as u64,
            "mux stopping"
        );
        self.shutdown.cancel();
        self.handle.graceful_shutdown(Some(self.grace_period));

        if let Some(task) = self.serving.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "serving task failed");
            }
        }

        self.audit.close().await;
        tracing::info!("mux stopped");

        let fatal = match self.fatal.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        fatal.map_or(Ok(()), Err)
    }

    /// Resolves once serving has ended, whether by [`stop`](Self::stop) or
    /// by a listener failure.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

fn parse_target(raw: &str) -> Result<Url, MuxError> {
    Url::parse(raw)
        .map_err(|e| MuxError::Configuration(format!("invalid backend URL '{raw}': {e}")))
}

/// Serving that ends without a requested shutdown is a failure.
fn serving_failure(
    result: std::io::Result<()>,
    shutdown_requested: bool,
) -> Option<std::io::Error> {
    match result {
        Err(e) => Some(e),
        Ok(()) if !shutdown_requested => {
            Some(std::io::Error::other("listener stopped unexpectedly"))
        }
        Ok(()) => None,
    }
}
