use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    http::{header::CONTENT_TYPE, HeaderValue, Response, StatusCode},
    middleware,
    BoxError, Router,
};
use chrono::Utc;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower::{timeout::error::Elapsed, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};
use tracing::error;

use crate::api::{
    demo::{self, DemoState},
    response::ApiError,
    users,
};
use crate::auth::{self, AuthService};
use crate::config::UploadConfig;
use crate::middleware::request_logging;

/// Create the API router
pub fn create_router(auth: AuthService, uploads: UploadConfig, request_timeout: Duration) -> Router {
    let demo_state = DemoState {
        users: auth.users().clone(),
        uploads: Arc::new(uploads),
        started_at: Utc::now(),
    };

    Router::new()
        .merge(demo::router(demo_state, auth.jwt().clone()))
        .merge(auth::api::router(auth.clone()))
        .merge(users::router(auth))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

async fn not_found() -> ApiError {
    ApiError::NotFound("route not found".to_string())
}

async fn handle_timeout(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        ApiError::Timeout("request timed out".to_string())
    } else {
        ApiError::Internal(anyhow::anyhow!("unhandled middleware error: {}", err))
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);

    let body = json!({
        "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        "message": "internal server error",
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
