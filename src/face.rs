use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::brain::PlanGenerator;
use crate::config::RunnerConfig;
use crate::extraction::ExtractionRunner;
use crate::hands::{SessionConfig, SessionFactory};
use crate::runner::{AutomationRunner, RunEvent};
use crate::types::{ExecutionTrace, ExtractionPlan, ExtractionResult, Plan, RawStep};

const MANUAL_EXTRACTION_DESCRIPTION: &str = "Manual extraction with provided selectors";

/// Everything a request handler needs. Each request gets its own session.
pub struct AppState {
    pub generator: Arc<dyn PlanGenerator>,
    pub factory: Arc<dyn SessionFactory>,
    pub runner_config: RunnerConfig,
    pub session_config: SessionConfig,
    pub events: broadcast::Sender<RunEvent>,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn PlanGenerator>,
        factory: Arc<dyn SessionFactory>,
        runner_config: RunnerConfig,
        session_config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            generator,
            factory,
            runner_config,
            session_config,
            events,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/interact", post(automate_handler))
        .route("/automate", post(automate_handler))
        .route("/extract", post(extract_handler))
        .route("/events", get(sse_handler))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// A failed request, rendered as `{"status": "error", "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({"status": "error", "message": self.message}));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AutomateRequest {
    command: Option<String>,
    steps: Option<Vec<RawStep>>,
    browser: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    command: Option<String>,
    url: Option<String>,
    selectors: Option<BTreeMap<String, String>>,
    browser: Option<String>,
}

fn parse_body<T: serde::de::DeserializeOwned>(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(Value, T), ApiError> {
    let Json(raw) = body.map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?;
    let parsed = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::bad_request(format!("Invalid request format: {e}")))?;
    Ok((raw, parsed))
}

fn check_browser(browser: Option<&str>) -> Result<(), ApiError> {
    match browser.map(str::to_ascii_lowercase).as_deref() {
        None | Some("chrome") | Some("chromium") => Ok(()),
        Some(_) => Err(ApiError::bad_request("Unsupported browser type")),
    }
}

async fn run_automation(state: &AppState, plan: Plan) -> Result<ExecutionTrace, ApiError> {
    let runner = AutomationRunner::new(state.factory.clone(), state.runner_config.clone())
        .with_events(state.events.clone());
    let session_config = state.session_config.clone();
    tokio::task::spawn_blocking(move || runner.run(&plan, &session_config))
        .await
        .map_err(|e| {
            error!(error = %e, "Automation worker crashed");
            ApiError::internal(format!("automation worker crashed: {e}"))
        })
}

async fn run_extraction(
    state: &AppState,
    plan: ExtractionPlan,
) -> Result<ExtractionResult, ApiError> {
    let runner = ExtractionRunner::new(
        state.factory.clone(),
        state.runner_config.clone(),
        &state.session_config,
    );
    tokio::task::spawn_blocking(move || runner.run(&plan))
        .await
        .map_err(|e| {
            error!(error = %e, "Extraction worker crashed");
            ApiError::internal(format!("extraction worker crashed: {e}"))
        })
}

async fn automate_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (_, request): (_, AutomateRequest) = parse_body(body)?;
    check_browser(request.browser.as_deref())?;

    if let Some(command) = request.command {
        info!(command = %command, "Automation requested");
        let plan = state.generator.generate_plan(&command).await.map_err(|e| {
            error!(error = %e, "Plan generation failed");
            ApiError::internal(e.to_string())
        })?;
        let trace = run_automation(&state, plan.clone()).await?;
        return Ok(Json(json!({
            "original_command": command,
            "generated_steps": plan,
            "execution_result": trace,
        }))
        .into_response());
    }

    if let Some(steps) = request.steps {
        info!(steps = steps.len(), "Explicit plan submitted");
        let trace = run_automation(&state, Plan { steps }).await?;
        return Ok(Json(trace).into_response());
    }

    Err(ApiError::bad_request("Missing command or steps"))
}

async fn extract_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (original, request): (_, ExtractRequest) = parse_body(body)?;
    check_browser(request.browser.as_deref())?;

    let (plan, generated) = match (request.command, request.url, request.selectors) {
        (Some(command), _, _) => {
            info!(command = %command, "Extraction requested");
            let plan = state
                .generator
                .generate_extraction_plan(&command)
                .await
                .map_err(|e| {
                    error!(error = %e, "Extraction plan generation failed");
                    ApiError::internal(e.to_string())
                })?;
            (plan.clone(), Some(plan))
        }
        (None, Some(url), Some(selectors)) => (
            ExtractionPlan {
                url,
                selectors,
                description: MANUAL_EXTRACTION_DESCRIPTION.to_string(),
            },
            None,
        ),
        _ => return Err(ApiError::bad_request("Missing command or url/selectors")),
    };

    let result = run_extraction(&state, plan).await?;
    let mut body = json!({
        "original_request": original,
        "extraction_result": result,
    });
    if let Some(plan) = generated {
        body["generated_plan"] = json!(plan);
    }
    Ok(Json(body).into_response())
}

fn to_sse_event(event: &RunEvent) -> Option<Event> {
    let name = match event {
        RunEvent::RunStarted { .. } => "run_started",
        RunEvent::StepFinished { .. } => "step_finished",
        RunEvent::RunFinished { .. } => "run_finished",
    };
    Event::default().event(name).json_data(event).ok()
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => to_sse_event(&event).map(Ok::<_, Infallible>),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
