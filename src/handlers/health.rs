use crate::core::state::TrackerState;
use crate::utils::time::current_timestamp;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub peers: usize,
    pub resources: usize,
    pub sessions_active: u64,
}

/// Liveness plus directory size
///
/// GET /health
pub async fn health_handler(State(state): State<TrackerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            timestamp: current_timestamp(),
            peers: state.directory.peer_count(),
            resources: state.directory.resource_count(),
            sessions_active: state.snapshot().sessions_active,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};

    async fn health(state: TrackerState) -> (StatusCode, HealthResponse) {
        let response = health_handler(State(state)).await.into_response();
        let (parts, body) = response.into_parts();
        let bytes = Body::new(body).collect().await.unwrap().to_bytes();
        (parts.status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_on_empty_tracker() {
        let (status, health) = health(TrackerState::new()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");
        assert!(health.timestamp > 0);
        assert_eq!(health.peers, 0);
        assert_eq!(health.resources, 0);
    }

    #[tokio::test]
    async fn test_health_reports_directory_size() {
        let state = TrackerState::new();
        state.directory.register(
            "p1",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            12000,
            BTreeSet::from(["a.txt".to_string(), "b.txt".to_string()]),
        );
        state.metrics.session_opened();

        let (_, health) = health(state).await;

        assert_eq!(health.peers, 1);
        assert_eq!(health.resources, 2);
        assert_eq!(health.sessions_active, 1);
    }
}
