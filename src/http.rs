//! Scrape endpoint.
//!
//! A single route, `GET /metrics`, gathers all registered collectors and
//! returns the encoded payload. The endpoint always answers 200: services
//! that fail to collect simply contribute no series.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tower_http::trace::TraceLayer;

use crate::collector::CollectorRegistrar;

/// Create the router serving the scrape endpoint.
pub fn create_router(registrar: CollectorRegistrar) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(registrar)
}

/// Encode the current sample set in the text exposition format.
pub async fn encode_metrics(registrar: &CollectorRegistrar) -> Vec<u8> {
    let families = registrar.gather().await;

    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    buf
}

async fn metrics_handler(State(registrar): State<CollectorRegistrar>) -> Response {
    let body = encode_metrics(&registrar).await;
    ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint_empty_registrar() {
        let app = create_router(CollectorRegistrar::new());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let app = create_router(CollectorRegistrar::new());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
