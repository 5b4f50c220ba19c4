use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::auth::CredentialStore;
use crate::core::config::ConfigSource;
use crate::core::error::PanelError;
use crate::core::events::EventBroadcaster;
use crate::core::session::{SessionController, SessionInfo, SessionRequest, SessionStatus};
use crate::core::telemetry::{
    PlayerCount, ResourceSample, ServerStatus, TelemetryCollector, DEFAULT_MAX_PLAYERS,
};

/// Everything a handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub telemetry: Arc<TelemetryCollector>,
    pub broadcaster: EventBroadcaster,
    pub credentials: Arc<dyn CredentialStore>,
    pub config: Arc<dyn ConfigSource>,
}

// ─── Errors ───

/// Short plain-text message plus a non-2xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        let status = match &err {
            PanelError::InvalidRequest(_) | PanelError::NotRunning => StatusCode::BAD_REQUEST,
            PanelError::Unauthorized => StatusCode::UNAUTHORIZED,
            PanelError::AlreadyRunning => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        } else {
            debug!("Request rejected ({}): {}", self.status, self.message);
        }
        (self.status, self.message).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Payloads ───

#[derive(Debug, Default, Deserialize)]
pub struct SessionParams {
    #[serde(rename = "type")]
    pub family: Option<String>,
    pub version: Option<String>,
    pub core: Option<String>,
}

impl SessionParams {
    fn is_empty(&self) -> bool {
        self.family.is_none() && self.version.is_none() && self.core.is_none()
    }

    /// Missing `type`/`version` fall back to the configured defaults.
    fn into_request(self, config: &dyn ConfigSource) -> Result<SessionRequest, PanelError> {
        let settings = config.snapshot()?;
        let family = self
            .family
            .unwrap_or_else(|| settings.default_server_type.clone());
        let version = self
            .version
            .unwrap_or_else(|| settings.default_server_version.clone());
        SessionRequest::parse(&family, &version, self.core.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandPayload {
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReply {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

impl ActionReply {
    fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
            session: None,
        })
    }

    fn with_session(message: impl Into<String>, session: SessionInfo) -> Json<Self> {
        Json(Self {
            message: message.into(),
            session: Some(session),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub status: ServerStatus,
    pub player_count: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub disable_frontend_auth: bool,
}

// ─── Routers ───

/// Request API. Everything except `/config` sits behind the token check.
pub fn api_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/start", get(start_server))
        .route("/stop", get(stop_server))
        .route("/restart", get(restart_server))
        .route("/save", get(save_world))
        .route("/command", post(send_command))
        .route("/status", get(session_status))
        .route("/history", get(resource_history))
        .route("/server/status", get(server_summary))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/config", get(public_config))
        .merge(protected)
        .with_state(state)
}

/// Real-time stream, served on its own listener.
pub fn stream_router(state: AppState) -> Router {
    Router::new().route("/", get(open_stream)).with_state(state)
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    // Read the token before awaiting; the request body is not `Sync`.
    let token = request_token(&request);
    match authorize(&state, token).await {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

async fn authorize(state: &AppState, token: Option<String>) -> ApiResult<()> {
    if state.config.snapshot()?.disable_frontend_auth {
        return Ok(());
    }

    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Err(PanelError::Unauthorized.into());
    };

    match state.credentials.user_by_token(&token).await? {
        Some(user) => {
            debug!("Request authorized for {}", user.id);
            Ok(())
        }
        None => Err(PanelError::Unauthorized.into()),
    }
}

/// `Authorization: Bearer <t>`, else `?token=<t>`.
fn request_token(request: &Request) -> Option<String> {
    bearer_token(request).or_else(|| {
        Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(q)| q.token)
    })
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

// ─── Handlers ───

async fn start_server(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> ApiResult<Json<ActionReply>> {
    let request = params.into_request(state.config.as_ref())?;
    info!("Start requested: {} {}", request.variant, request.game_version);
    let session = state.controller.start(request).await?;
    Ok(ActionReply::with_session(
        format!("Server {} {} started", session.variant, session.game_version),
        session,
    ))
}

async fn stop_server(State(state): State<AppState>) -> ApiResult<Json<ActionReply>> {
    if state.controller.stop().await? {
        Ok(ActionReply::message("Server stopping"))
    } else {
        Err(PanelError::NotRunning.into())
    }
}

async fn restart_server(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> ApiResult<Json<ActionReply>> {
    let request = if params.is_empty() {
        None
    } else {
        Some(params.into_request(state.config.as_ref())?)
    };
    let session = state.controller.restart(request).await?;
    Ok(ActionReply::with_session("Server restarted", session))
}

async fn save_world(State(state): State<AppState>) -> ApiResult<Json<ActionReply>> {
    state.controller.save().await?;
    Ok(ActionReply::message("World save requested"))
}

async fn send_command(
    State(state): State<AppState>,
    Json(payload): Json<CommandPayload>,
) -> ApiResult<Json<ActionReply>> {
    let command = payload
        .command
        .ok_or_else(|| PanelError::invalid("command is required"))?;
    match state.controller.send_command(&command).await {
        Ok(()) => Ok(ActionReply::message("Command sent")),
        Err(PanelError::NotRunning) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PanelError::NotRunning.to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}

async fn session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.controller.status().await)
}

async fn resource_history(State(state): State<AppState>) -> Json<Vec<ResourceSample>> {
    Json(state.telemetry.history())
}

async fn server_summary(State(state): State<AppState>) -> Json<ServerSummary> {
    let summary = match state.telemetry.latest() {
        Some(sample) => ServerSummary {
            status: sample.status,
            player_count: sample.player_count_label(),
        },
        None => ServerSummary {
            status: ServerStatus::Stopped,
            player_count: PlayerCount::empty(DEFAULT_MAX_PLAYERS).to_string(),
        },
    };
    Json(summary)
}

async fn public_config(State(state): State<AppState>) -> ApiResult<Json<PublicConfig>> {
    let settings = state.config.snapshot()?;
    Ok(Json(PublicConfig {
        disable_frontend_auth: settings.disable_frontend_auth,
    }))
}

// ─── Stream ───

async fn open_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.broadcaster, query.token))
}

async fn serve_subscriber(mut socket: WebSocket, broadcaster: EventBroadcaster, token: Option<String>) {
    let mut conn = match broadcaster.connect(token.as_deref()).await {
        Ok(Some(conn)) => conn,
        Ok(None) => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        Err(err) => {
            warn!("Stream authorization failed: {}", err);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    for message in conn.take_initial() {
        if !send_frame(&mut socket, &message).await {
            return;
        }
    }

    loop {
        tokio::select! {
            outgoing = conn.next_message() => match outgoing {
                Some(message) => {
                    if !send_frame(&mut socket, &message).await {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Stream subscriber disconnected");
}

async fn send_frame(socket: &mut WebSocket, message: &crate::core::events::StreamMessage) -> bool {
    let frame = match message.to_json() {
        Ok(frame) => frame,
        Err(err) => {
            warn!("Could not encode stream frame: {}", err);
            return true;
        }
    };
    socket.send(Message::Text(frame.into())).await.is_ok()
}
