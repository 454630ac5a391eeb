use crate::exporter::{GIT_COMMIT_HASH, MetricsState};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    sessions: usize,
    instances: usize,
}

fn create_health_response(state: &MetricsState) -> Health {
    let pool = state.pool();
    Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: pool.session_count(),
        instances: pool.len(),
    }
}

// Create response body based on method
fn create_response_body(method: &Method, health: &Health) -> Body {
    if *method == Method::GET {
        Json(health).into_response().into_body()
    } else {
        Body::empty()
    }
}

// X-App: name:version:short-hash
fn create_app_headers(health: &Health) -> HeaderMap {
    let short_hash = health.commit.get(..7).unwrap_or_default();

    let header_value = format!("{}:{}:{}", health.name, health.version, short_hash);

    let mut headers = HeaderMap::new();
    match header_value.parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => {
            debug!("Failed to parse X-App header: {}", err);
        }
    }
    headers
}

pub async fn health(method: Method, Extension(state): Extension<MetricsState>) -> impl IntoResponse {
    let health = create_health_response(&state);
    let body = create_response_body(&method, &health);
    let headers = create_app_headers(&health);

    (StatusCode::OK, headers, body)
}
