//! Switchmux is a traffic multiplexer with per-request audit logging.
//!
//! It listens on one address (optionally terminating TLS), forwards each
//! client request to exactly one backend and records the request and the
//! backend's response. Requests go to the first secondary backend whose
//! path prefixes match, with an optional prefix rewrite, and otherwise to
//! the primary backend.
//!
//! # Architecture
//!
//! - [`audit`] -- Traffic records, the [`AuditSink`](audit::AuditSink)
//!   trait, the non-blocking [`AuditWriter`](audit::writer::AuditWriter)
//!   queue and the MySQL and in-memory sinks.
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Top-level command execution.
//! - [`config`] -- JSON configuration model, loading and validation.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`lifecycle`] -- Signal handling and the start/wait/stop sequence.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`mux`] -- The listener-owning [`Mux`](mux::Mux) and backend selection.
//! - [`server`] -- Backend HTTP client, Axum router and TLS identity loading.
//! - [`switch`] -- Per-backend forwarding: rewrite, headers, streaming capture.

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod mux;
pub mod server;
pub mod switch;
