use crate::config::{Config, Listener as ListenerConfig};
use crate::dispatcher::Dispatcher;
use crate::protocol::{Envelope, RpcError, RpcResponse};
use crate::rate_gate::{GateError, RateGate};
use crate::retry::RetryPolicy;
use crate::supervisor::ConnectionSupervisor;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Everything a request needs, shared by all requests.
pub struct RpcService {
    supervisor: Arc<ConnectionSupervisor>,
    gate: RateGate,
    dispatcher: Dispatcher,
    request_retry: RetryPolicy,
}

impl RpcService {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        dispatcher: Dispatcher,
        config: &Config,
    ) -> Self {
        RpcService {
            gate: RateGate::new(supervisor.clone(), &config.rate_gate),
            supervisor,
            dispatcher,
            request_retry: config.database.request_retry,
        }
    }
}

pub fn router(service: Arc<RpcService>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", post(rpc))
        .route("/rpc", post(rpc))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .fallback(not_found)
        .layer(cors_layer(allowed_origins))
        .with_state(service)
}

pub async fn serve(listener: &ListenerConfig, app: Router) -> Result<(), ServerError> {
    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(e) => {
            tracing::error!("Could not listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| tracing::warn!("Ignoring invalid CORS origin {origin:?}"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(CORS_MAX_AGE)
}

/// Failures that end a request before (or instead of) dispatch.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Database unavailable")]
    DatabaseUnavailable,

    #[error("Invalid JSON body")]
    InvalidJson,

    #[error(transparent)]
    InvalidEnvelope(RpcError),

    #[error(transparent)]
    RateLimited(#[from] GateError),

    #[error("Not Found")]
    NotFound,

    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidJson => StatusCode::BAD_REQUEST,
            ApiError::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(RpcResponse::failure(self))).into_response()
    }
}

impl RpcService {
    /// One RPC call, from the connection check to recording the response.
    async fn handle(&self, body: Bytes) -> Result<RpcResponse, ApiError> {
        if !self.supervisor.ensure(&self.request_retry).await {
            return Err(ApiError::DatabaseUnavailable);
        }

        let body: Value = serde_json::from_slice(&body).map_err(|_| ApiError::InvalidJson)?;
        let envelope = Envelope::from_value(body).map_err(ApiError::InvalidEnvelope)?;
        let userid = envelope.userid();

        self.gate.admit(userid).await?;
        let result = self.dispatcher.call(&envelope).await;
        self.gate.complete(userid).await;

        match result {
            // The session went away after the connection check
            Err(RpcError::Unavailable) => Err(ApiError::DatabaseUnavailable),
            result => Ok(result.into()),
        }
    }
}

// The call runs on its own task so a client that disconnects does not cancel store work
// or the response log.
async fn rpc(
    State(service): State<Arc<RpcService>>,
    body: Bytes,
) -> Result<Json<RpcResponse>, ApiError> {
    let task = tokio::spawn(async move { service.handle(body).await });

    match task.await {
        Ok(result) => result.map(Json),
        Err(e) => {
            tracing::error!("RPC task failed: {e}");
            Err(ApiError::Internal)
        }
    }
}

async fn health() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "OK")
}

async fn ready(State(service): State<Arc<RpcService>>) -> impl IntoResponse {
    let (status, body) = if service.supervisor.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    };
    (status, [(header::CONTENT_TYPE, "text/plain")], body)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
