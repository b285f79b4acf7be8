//! MySQL-backed [`AuditSink`] implementation.
//!
//! Writes request records to a `requests` table and response records to a
//! `responses` table, joined by the `UUID` column. Both tables are created
//! on connect if they do not exist. The connection pool caches prepared
//! statements per connection, so concurrent writers share them safely.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use super::{AuditSink, TrafficRecord};
use crate::config::model::DatabaseConfig;
use crate::error::{AuditError, MuxError};

const CREATE_REQUESTS: &str = "CREATE TABLE IF NOT EXISTS requests (\
    ID BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT, \
    UUID CHAR(36) NOT NULL, \
    Time DATETIME NOT NULL, \
    URL VARCHAR(256) NOT NULL, \
    Path VARCHAR(256) NOT NULL, \
    IP VARCHAR(128) NOT NULL, \
    Method VARCHAR(8) NOT NULL, \
    Token VARCHAR(256) NOT NULL, \
    Data VARBINARY(32768) NULL)";

const CREATE_RESPONSES: &str = "CREATE TABLE IF NOT EXISTS responses (\
    ID BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT, \
    UUID CHAR(36) NOT NULL, \
    Time DATETIME NOT NULL, \
    URL VARCHAR(256) NOT NULL, \
    Path VARCHAR(256) NOT NULL, \
    IP VARCHAR(128) NOT NULL, \
    Method VARCHAR(8) NOT NULL, \
    Result SMALLINT NOT NULL, \
    Data VARBINARY(32768) NULL)";

const INSERT_REQUEST: &str = "INSERT INTO requests \
    (UUID, Time, URL, Path, IP, Method, Token, Data) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_RESPONSE: &str = "INSERT INTO responses \
    (UUID, Time, URL, Path, IP, Method, Result, Data) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const MAX_CONNECTIONS: u32 = 8;

pub struct MySqlAuditSink {
    pool: MySqlPool,
}

impl MySqlAuditSink {
    /// Connect and create the schema. Any failure here is fatal at startup.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, MuxError> {
        let (host, port) = config.host_port();
        let mut options = MySqlConnectOptions::new()
            .host(host)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        if let Some(port) = port {
            options = options.port(port);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(AuditError::from)?;

        for statement in [CREATE_REQUESTS, CREATE_RESPONSES] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(AuditError::from)?;
        }

        tracing::info!(host = %config.host, database = %config.database, "audit store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl AuditSink for MySqlAuditSink {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn record_request(&self, record: &TrafficRecord) -> Result<(), AuditError> {
        sqlx::query(INSERT_REQUEST)
            .bind(record.correlation_id.to_string())
            .bind(record.timestamp)
            .bind(truncate(&record.url, 256))
            .bind(truncate(&record.path, 256))
            .bind(truncate(&record.client_ip, 128))
            .bind(truncate(&record.method, 8))
            .bind(truncate(&record.token, 256))
            .bind(record.payload.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_response(&self, record: &TrafficRecord) -> Result<(), AuditError> {
        let status = record
            .status
            .and_then(|s| i16::try_from(s).ok())
            .unwrap_or_default();
        sqlx::query(INSERT_RESPONSE)
            .bind(record.correlation_id.to_string())
            .bind(record.timestamp)
            .bind(truncate(&record.url, 256))
            .bind(truncate(&record.path, 256))
            .bind(truncate(&record.client_ip, 128))
            .bind(truncate(&record.method, 8))
            .bind(status)
            .bind(record.payload.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AuditError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Cut `value` to at most `max` characters, the unit MySQL uses for
/// `VARCHAR` limits.
fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("abc", 8), "abc");
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
