// Read-only directory queries for operators

use crate::core::error::AdminError;
use crate::core::state::TrackerState;
use crate::models::candidate::Candidate;
use crate::models::download::DownloadLogEntry;
use crate::models::peer::PeerRecord;
use crate::utils::time::{age_seconds, current_timestamp};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub resource: String,
    pub holders: Vec<Candidate>,
}

#[derive(Debug, Serialize)]
pub struct PeerResponse {
    #[serde(flatten)]
    pub peer: PeerRecord,
    /// Seconds since the last register/update
    pub age_seconds: i64,
}

/// GET /resources
pub async fn list_resources_handler(
    State(state): State<TrackerState>,
) -> Json<BTreeMap<String, BTreeSet<String>>> {
    Json(state.directory.list_all())
}

/// GET /resources/{name}
pub async fn resource_handler(
    State(state): State<TrackerState>,
    Path(name): Path<String>,
) -> Result<Json<ResourceResponse>, AdminError> {
    let holders = state.directory.candidates_for(&name);
    if holders.is_empty() {
        return Err(AdminError::NotFound(format!("resource {}", name)));
    }

    Ok(Json(ResourceResponse {
        resource: name,
        holders,
    }))
}

/// GET /peers/{id}
pub async fn peer_handler(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
) -> Result<Json<PeerResponse>, AdminError> {
    let record = state
        .directory
        .inspect(&id)
        .ok_or_else(|| AdminError::NotFound(format!("peer {}", id)))?;

    Ok(Json(PeerResponse {
        age_seconds: age_seconds(record.last_update, current_timestamp()),
        peer: PeerRecord::clone(&record),
    }))
}

/// GET /log
pub async fn log_handler(State(state): State<TrackerState>) -> Json<Vec<DownloadLogEntry>> {
    Json(state.download_log.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::net::{IpAddr, Ipv4Addr};

    fn populated_state() -> TrackerState {
        let state = TrackerState::new();
        state.directory.register(
            "alice",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            12001,
            BTreeSet::from(["doc.txt".to_string(), "img.png".to_string()]),
        );
        state
    }

    #[tokio::test]
    async fn test_list_resources() {
        let Json(catalog) = list_resources_handler(State(populated_state())).await;
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog["doc.txt"], BTreeSet::from(["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_resource_lookup() {
        let Json(found) = resource_handler(State(populated_state()), Path("doc.txt".to_string()))
            .await
            .unwrap();
        assert_eq!(found.holders.len(), 1);
        assert_eq!(found.holders[0].port, 12001);

        let missing = resource_handler(State(populated_state()), Path("nope".to_string())).await;
        let response = missing.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_peer_lookup() {
        let Json(found) = peer_handler(State(populated_state()), Path("alice".to_string()))
            .await
            .unwrap();
        assert_eq!(found.peer.id, "alice");
        assert!(found.age_seconds >= 0);

        let missing = peer_handler(State(populated_state()), Path("bob".to_string())).await;
        assert!(matches!(missing, Err(AdminError::NotFound(_))));
    }
}
