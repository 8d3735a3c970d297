// Metrics endpoint

use crate::core::state::TrackerState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// Returns JSON with tracker statistics:
/// - Sessions opened and currently active
/// - Commands processed and rejected, rejection rate
/// - Registered peers, indexed resources, download log size
/// - Uptime and commands per second
pub async fn metrics_handler(State(state): State<TrackerState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.snapshot()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::collector::MetricsSnapshot;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};

    async fn snapshot_of(state: TrackerState) -> MetricsSnapshot {
        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, body) = response.into_parts();
        let bytes = Body::new(body).collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_handler_empty() {
        let snapshot = snapshot_of(TrackerState::new()).await;

        assert_eq!(snapshot.commands_total, 0);
        assert_eq!(snapshot.registered_peers, 0);
        assert!(snapshot.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_metrics_handler_with_data() {
        let state = TrackerState::new();

        state.metrics.increment_commands();
        state.metrics.increment_registrations();
        state.directory.register(
            "p1",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            12000,
            BTreeSet::from(["a".to_string()]),
        );

        let snapshot = snapshot_of(state).await;

        assert_eq!(snapshot.commands_total, 1);
        assert_eq!(snapshot.registrations, 1);
        assert_eq!(snapshot.registered_peers, 1);
        assert_eq!(snapshot.indexed_resources, 1);
    }
}
