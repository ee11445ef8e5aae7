//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections on this instance.
    pub connections: usize,
    /// Distinct users with at least one registered connection.
    pub users: usize,
}

/// Build a health response from live registry counters.
pub fn health_check(start_time: Instant, connections: usize, users: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        users,
    }
}
