//! Health monitor: observational liveness checks.
//!
//! A failed check is recorded as the connection's `last_error` and nothing
//! else. Probing never changes a connection's state or removes it.

use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::{Connection, ConnectionManager, ConnectionState};
use crate::protocol::{self, methods};

/// Outcome of probing one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Ready and answered the ping.
    Healthy,
    /// Ready but the ping failed.
    Unhealthy,
    /// Not Ready; not checked.
    Disconnected,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Health of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Connection id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Check outcome.
    pub status: HealthStatus,
    /// Round-trip time of a successful ping.
    #[serde(skip_serializing_if = "Option::is_none", with = "millis")]
    pub latency: Option<Duration>,
    /// Check error, or the connection's last error when not checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }
}

/// Checks every connection of a manager.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    manager: ConnectionManager,
}

impl HealthMonitor {
    /// Create a monitor over a manager's connections.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Check all connections once, concurrently.
    ///
    /// Ready connections get a `ping`; all others are reported
    /// [`HealthStatus::Disconnected`] without any I/O. Reports keep the
    /// order of [`ConnectionManager::list`].
    pub async fn check(&self) -> Vec<HealthReport> {
        let checks = self.manager.list().into_iter().map(|conn| self.check_one(conn));
        join_all(checks).await
    }

    async fn check_one(&self, conn: Connection) -> HealthReport {
        let (status, latency, error) = if conn.state != ConnectionState::Ready {
            (HealthStatus::Disconnected, None, conn.last_error)
        } else {
            match self.ping(&conn.id).await {
                Ok(latency) => (HealthStatus::Healthy, Some(latency), None),
                Err(e) => (HealthStatus::Unhealthy, None, Some(e.to_string())),
            }
        };
        HealthReport {
            id: conn.id,
            name: conn.display_name,
            status,
            latency,
            error,
        }
    }

    async fn ping(&self, id: &str) -> crate::Result<Duration> {
        // A dead transport fails the send below, which counts only as a check failure.
        let transport = self.manager.ready_transport(id, None)?;
        let request = protocol::encode(methods::PING, None)?;
        let started = Instant::now();

        let result = transport
            .send(&request, self.manager.config().ping_timeout)
            .await
            .and_then(|response| response.into_result());

        match result {
            Ok(_) => {
                self.manager.record_success(id);
                Ok(started.elapsed())
            }
            Err(e) => {
                tracing::debug!(connection = %id, error = %e, "health check failed");
                self.manager.record_check_failure(id, &e);
                Err(e)
            }
        }
    }

    /// Check every `interval` until `cancel` fires.
    pub fn spawn_periodic(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for report in monitor.check().await {
                            if report.status == HealthStatus::Unhealthy {
                                tracing::warn!(
                                    connection = %report.id,
                                    name = %report.name,
                                    error = report.error.as_deref().unwrap_or_default(),
                                    "connection unhealthy"
                                );
                            }
                        }
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        })
    }
}
