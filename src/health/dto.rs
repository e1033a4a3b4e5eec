use serde::Serialize;
use time::OffsetDateTime;

/// Result of the database check; tagged by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DatabaseHealth {
    Connected {
        #[serde(rename = "connectionTime")]
        connection_time: u64, // milliseconds
        /// When the cached session was opened.
        #[serde(rename = "connectedAt", with = "time::serde::rfc3339")]
        connected_at: OffsetDateTime,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub database: DatabaseHealth,
    pub environment: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct HealthFailure {
    pub status: &'static str,
    pub message: String,
    pub timestamp: String,
}
