use serde::Serialize;
use utoipa::ToSchema;

/// Whether the storage backend is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Payload of `/healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Auto-start and bot-result timers that have not fired yet.
    pub pending_tasks: usize,
}
