//! HTTP front-end.
//!
//! A single page: `GET /` shows the form, `POST /` runs the submitted
//! snippet and shows the page again with the output. Every request passes
//! through per-client rate limiting keyed by peer IP.

pub mod pages;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Form, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::backend::IsolationProvider;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::{Admission, RateLimiter};

const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";

/// Shared state for all handlers.
pub struct AppState<P> {
    pub orchestrator: Arc<Orchestrator<P>>,
    pub limiter: Arc<RateLimiter>,
    /// Language preselected in the form and used when a submission names none.
    pub default_language: Arc<str>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            limiter: Arc::clone(&self.limiter),
            default_language: Arc::clone(&self.default_language),
        }
    }
}

/// Form body of `POST /`.
#[derive(Debug, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub code: String,
}

/// Build the application router.
pub fn router<P: IsolationProvider + 'static>(state: AppState<P>) -> Router {
    Router::new()
        .route("/", get(index_handler::<P>).post(submit_handler::<P>))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::<P>,
        ))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve<P: IsolationProvider + 'static>(addr: &str, state: AppState<P>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let pruner = state.limiter.start_pruner();

    info!(addr = %addr, "Starting HTTP server");
    let result = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("HTTP server error");

    pruner.abort();
    result
}

async fn index_handler<P: IsolationProvider + 'static>(
    State(state): State<AppState<P>>,
) -> Html<String> {
    let languages = state.orchestrator.registry().languages();
    Html(pages::index_page(
        &languages,
        &state.default_language,
        "",
        None,
    ))
}

async fn submit_handler<P: IsolationProvider + 'static>(
    State(state): State<AppState<P>>,
    Form(form): Form<SubmitForm>,
) -> Html<String> {
    let language = form
        .language
        .as_deref()
        .filter(|l| !l.is_empty())
        .unwrap_or(&state.default_language)
        .to_string();

    let orchestrator = &state.orchestrator;
    let outcome = orchestrator.run(&language, &form.code).await;
    let output = outcome.client_message(orchestrator.deadline());

    let languages = orchestrator.registry().languages();
    Html(pages::index_page(
        &languages,
        &language,
        &form.code,
        Some(&output),
    ))
}

/// Peer IP from the connection, when the server was started with connect info.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string())
}

async fn rate_limit<P: IsolationProvider + 'static>(
    State(state): State<AppState<P>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    match state.limiter.check(&client) {
        Admission::Allowed => next.run(request).await,
        Admission::Limited { retry_after } => {
            warn!(client = %client, "Rate limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.as_secs().max(1).to_string())],
                TOO_MANY_REQUESTS,
            )
                .into_response()
        }
    }
}
