//! HTTP front end for the relay
//!
//! `GET /?url=<encoded url>` relays a page; `GET /ping` answers `pong`.

use crate::relay::Relay;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Body of the answer to a request without a `url` parameter
pub const MISSING_URL_MESSAGE: &str = "You need to specify an url in the query (?url=...)";

/// State shared by all handlers
pub struct AppState {
    pub relay: Relay,
    pub request_deadline: Duration,
}

#[derive(Debug, Deserialize)]
struct RelayParams {
    url: Option<String>,
}

/// Build the axum Router with the relay endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(relay_page))
        .route("/ping", get(ping))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Relay listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn ping() -> &'static str {
    "pong"
}

async fn relay_page(State(state): State<Arc<AppState>>, Query(params): Query<RelayParams>) -> Response {
    let Some(url) = params.url.filter(|u| !u.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, MISSING_URL_MESSAGE).into_response();
    };

    let outcome = tokio::time::timeout(
        state.request_deadline,
        state.relay.fetch_and_transform(&url),
    )
    .await;

    match outcome {
        Ok(Ok(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response(),
        Ok(Err(e)) if e.is_client_error() => {
            warn!("Rejected relay request for {}: {}", url, e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Ok(Err(e)) => {
            error!("Relay request for {} failed: {:?}", url, e);
            (StatusCode::BAD_GATEWAY, format!("Upstream request failed: {e}")).into_response()
        }
        Err(_) => {
            error!("Relay request for {} exceeded {:?}", url, state.request_deadline);
            (
                StatusCode::GATEWAY_TIMEOUT,
                format!("Upstream did not answer within {:?}", state.request_deadline),
            )
                .into_response()
        }
    }
}
