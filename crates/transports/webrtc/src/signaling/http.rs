//! HTTP signaling front door
//!
//! - GET /        - demo page
//! - GET /webrtc  - offer in the `x-webrtc-offer` header, answer in the body
//! - GET /health  - health check

use crate::session::SessionService;
use crate::{Error, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Header carrying the encoded offer
pub const OFFER_HEADER: &str = "x-webrtc-offer";

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Failing stage (e.g. "decode", "negotiation", "bridge")
    error_type: String,
    message: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn map_error(e: Error) -> HandlerError {
    let status = if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(ErrorResponse {
            error_type: e.stage().to_string(),
            message: e.to_string(),
        }),
    )
}

/// HTTP server answering browser offers
pub struct SignalingServer {
    bind_address: String,
    service: Arc<SessionService>,
}

impl SignalingServer {
    pub fn new(bind_address: impl Into<String>, service: Arc<SessionService>) -> Self {
        Self {
            bind_address: bind_address.into(),
            service,
        }
    }

    /// Build the router with all endpoints
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/webrtc", get(offer_handler))
            .route("/health", get(health_handler))
            .with_state(Arc::clone(&self.service))
            .layer(
                tower::ServiceBuilder::new()
                    .layer(tower_http::trace::TraceLayer::new_for_http())
                    .layer(tower_http::cors::CorsLayer::permissive()),
            )
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: std::net::SocketAddr = self
            .bind_address
            .parse()
            .map_err(|e| Error::ServerError(format!("Invalid bind address: {}", e)))?;

        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ServerError(format!("Failed to bind: {}", e)))?;

        info!("Signaling server listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::ServerError(format!("Server error: {}", e)))?;

        info!("Signaling server stopped");
        Ok(())
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// GET /webrtc - answer the offer carried in the request header
async fn offer_handler(
    State(service): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> std::result::Result<String, HandlerError> {
    let offer = headers
        .get(OFFER_HEADER)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error_type: "request".to_string(),
                    message: format!("missing header: {}", OFFER_HEADER),
                }),
            )
        })?
        .to_str()
        .map_err(|e| map_error(Error::DecodeError(format!("offer header is not text: {}", e))))?;

    service.handle_offer(offer).await.map_err(|e| {
        warn!(stage = e.stage(), error = %e, "Offer rejected");
        map_error(e)
    })
}
