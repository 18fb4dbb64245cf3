//! HTTP host for the authentication pipeline.
//!
//! The pipeline runs as axum middleware in front of every route. Requests it
//! does not claim pass straight through; authenticated requests reach the
//! handler with the bound [`SecurityContext`] in their extensions.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, on, MethodFilter},
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{AuthenticationError, SecurityContext, authority_strings};
use crate::config::PipelineConfig;
use crate::filter::{AuthRequest, AuthenticationPipeline, PipelineOutcome};

/// Largest request body the middleware buffers.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct ServerState {
    pipeline: Arc<AuthenticationPipeline>,
    context_path: Arc<str>,
}

/// Build the router: `/health` plus the token endpoint at
/// `context_path + mount_path`, all behind the pipeline middleware.
pub fn router(pipeline: AuthenticationPipeline, config: &PipelineConfig) -> Router {
    let state = ServerState {
        pipeline: Arc::new(pipeline),
        context_path: Arc::from(config.context_path.as_str()),
    };
    let token_path = format!("{}{}", config.context_path, config.mount_path);

    Router::new()
        .route("/health", get(health_check))
        .route(
            &token_path,
            on(MethodFilter::GET.or(MethodFilter::POST), token_endpoint),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state, authenticate)),
        )
}

/// Build the pipeline described by `config` and serve it on `bind`.
pub async fn serve(config: PipelineConfig, bind: &str) -> Result<()> {
    let pipeline = config.build_pipeline()?;
    let router = router(pipeline, &config);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    info!(
        "Client authentication server listening on http://{}{}{}",
        bind, config.context_path, config.mount_path
    );

    axum::serve(listener, router).await?;

    Ok(())
}

async fn authenticate(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %parts.uri.path(), "Failed to buffer request body: {}", e);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let auth_request = AuthRequest::from_parts(&parts, &bytes, &state.context_path);
    let mut request = Request::from_parts(parts, Body::from(bytes));

    state
        .pipeline
        .dispatch(&auth_request, |outcome, context| async move {
            match outcome {
                PipelineOutcome::PassThrough => next.run(request).await,
                PipelineOutcome::Succeeded(_) => {
                    request.extensions_mut().insert(context);
                    next.run(request).await
                }
                PipelineOutcome::Failed(err) => err.into_response(),
                PipelineOutcome::Deferred => StatusCode::UNAUTHORIZED.into_response(),
            }
        })
        .await
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Token endpoint stub: reports the authenticated client. Issuing tokens is
/// left to the application mounting the pipeline.
async fn token_endpoint(request: Request) -> Response {
    let authentication = request
        .extensions()
        .get::<SecurityContext>()
        .and_then(|context| context.authentication())
        .filter(|auth| auth.is_authenticated());

    match authentication {
        Some(auth) => Json(json!({
            "client_id": auth.principal().as_str(),
            "authorities": authority_strings(auth.authorities()),
            "authenticated": true,
        }))
        .into_response(),
        None => AuthenticationError::BadCredentials("No client credentials presented".to_string())
            .into_response(),
    }
}
