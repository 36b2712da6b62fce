// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod feed;
pub mod stories;
pub mod users;

use crate::middleware::{add_security_headers, require_auth};
use crate::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, request::Parts, HeaderValue, Method};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Room for request framing beyond the image itself.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Development origins accepted in addition to the configured frontend.
const DEV_ORIGIN_PREFIXES: &[&str] = &["http://localhost", "http://127.0.0.1"];

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HealthResponse {
    pub status: String,
    pub build_id: String,
    /// Login sessions with live feed de-duplication state on this instance
    pub feed_sessions: usize,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        build_id: option_env!("BUILD_ID").unwrap_or("unknown").to_string(),
        feed_sessions: state.feed.session_count(),
    })
}

fn is_allowed_origin(origin: &str, frontend_url: &str) -> bool {
    origin == frontend_url
        || DEV_ORIGIN_PREFIXES
            .iter()
            .any(|prefix| origin.starts_with(prefix))
}

/// Credentialed CORS for the web client (session cookie included).
fn cors_layer(frontend_url: String) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| is_allowed_origin(origin, &frontend_url))
            },
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(health_check));

    // Everything under /api requires a session token
    let api_routes = Router::new()
        .merge(users::routes())
        .merge(stories::routes())
        .merge(feed::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(add_security_headers))
        .layer(cors_layer(state.config.frontend_url.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
