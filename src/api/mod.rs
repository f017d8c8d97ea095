//! HTTP boundary
//!
//! ```text
//! POST   /api/agents                    create an agent
//! GET    /api/agents/{id}               persisted record
//! GET    /api/agents/{id}/registration  fresh receipt from the chain
//! GET    /api/content/cache             content cache keys
//! DELETE /api/content/cache             clear the content cache
//! GET    /health | /ready | /live | /metrics | /
//! ```

use crate::error::{sanitize_error_message, DeployError, ErrorKind, ErrorPayload};
use crate::observability::{metrics, HealthMonitor};
use crate::pipeline::{AgentPipeline, CreateAgentRequest, CreatedAgent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body
pub const BODY_LIMIT: u64 = 2 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct CreateAgentResponse {
    success: bool,
    #[serde(flatten)]
    created: CreatedAgent,
}

#[derive(Debug, Serialize)]
struct CacheClearedResponse {
    cleared: usize,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ServiceResponse {
    service: &'static str,
    version: &'static str,
    endpoints: BTreeMap<&'static str, &'static str>,
}

/// All routes; rejections become JSON error replies
pub fn routes(
    pipeline: AgentPipeline,
    health: Arc<HealthMonitor>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    agent_routes(pipeline.clone())
        .or(cache_routes(pipeline))
        .or(health_routes(health))
        .with(warp::cors().allow_any_origin())
        .recover(handle_rejection)
}

fn with_pipeline(
    pipeline: AgentPipeline,
) -> impl Filter<Extract = (AgentPipeline,), Error = Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}

fn agent_routes(
    pipeline: AgentPipeline,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let create = warp::path!("api" / "agents")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(with_pipeline(pipeline.clone()))
        .and_then(create_agent);

    let lookup = warp::path!("api" / "agents" / i64)
        .and(warp::get())
        .and(with_pipeline(pipeline.clone()))
        .and_then(get_agent);

    let registration = warp::path!("api" / "agents" / i64 / "registration")
        .and(warp::get())
        .and(with_pipeline(pipeline))
        .and_then(get_registration);

    create.or(lookup).unify().or(registration).unify()
}

fn cache_routes(
    pipeline: AgentPipeline,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let stats = warp::path!("api" / "content" / "cache")
        .and(warp::get())
        .and(with_pipeline(pipeline.clone()))
        .and_then(|pipeline: AgentPipeline| async move {
            let stats = pipeline.content().cache_stats();
            Ok::<_, Infallible>(warp::reply::json(&stats).into_response())
        });

    let clear = warp::path!("api" / "content" / "cache")
        .and(warp::delete())
        .and(with_pipeline(pipeline))
        .and_then(|pipeline: AgentPipeline| async move {
            let cleared = pipeline.content().cache_stats().size;
            pipeline.content().clear_cache();
            info!(cleared, "Content cache cleared");
            Ok::<_, Infallible>(warp::reply::json(&CacheClearedResponse { cleared }).into_response())
        });

    stats.or(clear).unify()
}

fn health_routes(
    health: Arc<HealthMonitor>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let health_monitor = health.clone();
    let ready_monitor = health;

    // GET /health - status with per-component checks
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let monitor = health_monitor.clone();
            async move {
                let status = monitor.get_health_status().await;
                let code = if status.is_healthy() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(
                    warp::reply::with_status(warp::reply::json(&status), code).into_response(),
                )
            }
        });

    // GET /metrics - counters and latency percentiles
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(|| async move {
            Ok::<_, Infallible>(warp::reply::json(&metrics().get_metrics()).into_response())
        });

    // GET /ready - readiness probe
    let ready_route = warp::path("ready")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let monitor = ready_monitor.clone();
            async move {
                let ready = monitor.is_ready().await;
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(
                    warp::reply::with_status(warp::reply::json(&response), code).into_response(),
                )
            }
        });

    // GET /live - liveness probe
    let live_route = warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(|| async move {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response).into_response())
        });

    // GET / - service banner
    let root_route = warp::path::end().and(warp::get()).and_then(|| async move {
        let endpoints = BTreeMap::from([
            ("POST /api/agents", "Create an agent"),
            ("GET /api/agents/{id}", "Look up a persisted agent"),
            ("GET /api/agents/{id}/registration", "Re-read the on-chain registration"),
            ("GET /api/content/cache", "Content cache keys"),
            ("DELETE /api/content/cache", "Clear the content cache"),
            ("GET /health", "Health status with detailed checks"),
            ("GET /metrics", "Pipeline and job metrics"),
            ("GET /ready", "Readiness probe"),
            ("GET /live", "Liveness probe"),
        ]);
        let response = ServiceResponse {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            endpoints,
        };
        Ok::<_, Infallible>(warp::reply::json(&response).into_response())
    });

    health_route
        .or(metrics_route)
        .unify()
        .or(ready_route)
        .unify()
        .or(live_route)
        .unify()
        .or(root_route)
        .unify()
}

async fn create_agent(
    request: CreateAgentRequest,
    pipeline: AgentPipeline,
) -> Result<Response, Infallible> {
    let reply = match pipeline.create_agent(request).await {
        Ok(created) => warp::reply::json(&CreateAgentResponse {
            success: true,
            created,
        })
        .into_response(),
        Err(failure) => warp::reply::with_status(
            warp::reply::json(&failure.to_payload()),
            status(failure.status_code()),
        )
        .into_response(),
    };
    Ok(reply)
}

async fn get_agent(id: i64, pipeline: AgentPipeline) -> Result<Response, Infallible> {
    Ok(match pipeline.get_agent(id).await {
        Ok(record) => warp::reply::json(&record).into_response(),
        Err(e) => error_reply(&e),
    })
}

async fn get_registration(id: i64, pipeline: AgentPipeline) -> Result<Response, Infallible> {
    Ok(match pipeline.reconcile_agent(id).await {
        Ok(receipt) => warp::reply::json(&receipt).into_response(),
        Err(e) => error_reply(&e),
    })
}

fn error_reply(error: &DeployError) -> Response {
    let payload = match error {
        DeployError::NotFound { .. } => not_found_payload(),
        other => other.to_payload(),
    };
    warp::reply::with_status(warp::reply::json(&payload), status(error.status_code()))
        .into_response()
}

fn not_found_payload() -> ErrorPayload {
    ErrorPayload {
        error: "Not found".to_string(),
        kind: ErrorKind::NotFound,
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (code, payload) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, not_found_payload())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            ErrorPayload {
                error: sanitize_error_message(&format!("Invalid request: {e}")),
                kind: ErrorKind::Validation,
            },
        )
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorPayload {
                error: format!("Request body exceeds {BODY_LIMIT} bytes"),
                kind: ErrorKind::Validation,
            },
        )
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorPayload {
                error: "Expected application/json".to_string(),
                kind: ErrorKind::Validation,
            },
        )
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorPayload {
                error: "Method not allowed".to_string(),
                kind: ErrorKind::Validation,
            },
        )
    } else {
        debug!("Unhandled rejection: {:?}", rejection);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorPayload {
                error: "Internal error".to_string(),
                kind: ErrorKind::Internal,
            },
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&payload), code).into_response())
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    pipeline: AgentPipeline,
    health: Arc<HealthMonitor>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), warp::Error> {
    let (bound, server) =
        warp::serve(routes(pipeline, health)).try_bind_with_graceful_shutdown(addr, shutdown)?;

    info!(addr = %bound, "HTTP API listening");
    server.await;
    info!("HTTP API stopped");
    Ok(())
}
