use crate::core::error::AdminError;
use axum::{http::Uri, response::IntoResponse, response::Response};

pub async fn fallback_handler(uri: Uri) -> Response {
    AdminError::NotFound(format!(
        "endpoint {}. Valid endpoints: /health, /metrics, /resources, /resources/{{name}}, /peers/{{id}}, /log",
        uri.path()
    ))
    .into_response()
}
