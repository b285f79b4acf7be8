//! Audit records and the sinks that persist them.
//!
//! Every request that passes through a logging-enabled Switch produces a
//! request [`TrafficRecord`] and, when the backend answers, a response
//! record with the same correlation id. Switches hand records to the
//! [`RequestObserver`] / [`ResponseObserver`] capabilities; in production
//! both are an [`AuditWriter`](writer::AuditWriter), which queues records
//! for a single background task that writes them to an [`AuditSink`].

pub mod memory;
pub mod mysql;
pub mod writer;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AuditError;

/// Largest payload kept in a record. Matches the `VARBINARY(32768)` columns.
pub const MAX_PAYLOAD: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Request,
    Response,
}

#[derive(Debug, Clone)]
pub struct TrafficRecord {
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Request URI as the client sent it (path and query).
    pub url: String,
    /// Path forwarded to the backend after rewriting.
    pub path: String,
    pub client_ip: String,
    pub method: String,
    /// Value of the configured token header, empty when absent.
    pub token: String,
    /// Backend base URL that handled the request.
    pub target: String,
    pub status: Option<u16>,
    pub payload: Bytes,
    pub kind: RecordKind,
}

impl TrafficRecord {
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self.kind, RecordKind::Request)
    }

    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self.kind, RecordKind::Response)
    }

    /// Derive the response record for this request.
    ///
    /// Keeps the correlation id and request metadata, drops the token and
    /// payload.
    #[must_use]
    pub fn to_response(&self, status: u16) -> Self {
        Self {
            correlation_id: self.correlation_id,
            timestamp: Utc::now(),
            url: self.url.clone(),
            path: self.path.clone(),
            client_ip: self.client_ip.clone(),
            method: self.method.clone(),
            token: String::new(),
            target: self.target.clone(),
            status: Some(status),
            payload: Bytes::new(),
            kind: RecordKind::Response,
        }
    }
}

/// Truncate a payload to [`MAX_PAYLOAD`] bytes without copying.
#[must_use]
pub fn cap_payload(payload: &Bytes) -> Bytes {
    payload.slice(..payload.len().min(MAX_PAYLOAD))
}

/// Durable store for traffic records.
///
/// Implementations are shared by every concurrent request and must make
/// concurrent writes safe themselves.
// async_trait is required here because AuditSink is used as Arc<dyn AuditSink>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn record_request(&self, record: &TrafficRecord) -> Result<(), AuditError>;
    async fn record_response(&self, record: &TrafficRecord) -> Result<(), AuditError>;
    /// Release all resources. Called once during Mux shutdown.
    async fn close(&self) -> Result<(), AuditError>;
}

/// Receives the request record before a request is forwarded.
///
/// Must return promptly; a slow observer delays the forward. Returns
/// whether the record was accepted. No response record is emitted for a
/// request whose record was not.
pub trait RequestObserver: Send + Sync {
    fn observe_request(&self, record: TrafficRecord) -> bool;
}

/// Receives the response record once the backend's body has been relayed.
pub trait ResponseObserver: Send + Sync {
    fn observe_response(&self, record: TrafficRecord);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_capped() {
        let big = Bytes::from(vec![7u8; MAX_PAYLOAD + 100]);
        assert_eq!(cap_payload(&big).len(), MAX_PAYLOAD);

        let small = Bytes::from_static(b"hello");
        assert_eq!(cap_payload(&small), small);
    }

    #[test]
    fn response_record_keeps_correlation_id() {
        let request = TrafficRecord {
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            url: "/old/x?q=1".into(),
            path: "/new/x".into(),
            client_ip: "127.0.0.1".into(),
            method: "POST".into(),
            token: "secret".into(),
            target: "http://backend-b".into(),
            status: None,
            payload: Bytes::from_static(b"body"),
            kind: RecordKind::Request,
        };
        let response = request.to_response(201);
        assert_eq!(response.correlation_id, request.correlation_id);
        assert!(response.is_response());
        assert_eq!(response.status, Some(201));
        assert!(response.token.is_empty());
        assert!(response.payload.is_empty());
        assert_eq!(response.path, "/new/x");
    }
}
