use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::{
    analysis,
    catalog::{self, AnalysisRequest, PlantEntry, SoilEntry},
    credential::{remote_factory, CredentialStore},
    db,
    error::AssistantError,
    models::{AnalysisResult, FertilizerSuggestion, Message},
    session::{ConversationSession, PendingTurn, SessionState, DEFAULT_PACING},
    telemetry,
};

const UI_DIR_ENV: &str = "SMART_FERTILIZER_UI_DIR";

const INDEX_HTML: &str = include_str!("../web/index.html");
const ANALYSIS_HTML: &str = include_str!("../web/plant-analysis.html");
const CHATBOT_HTML: &str = include_str!("../web/chatbot.html");

type ApiError = (StatusCode, String);

/**
 * \brief 服务端共享状态：凭据存储与内存中的会话表，由顶层装配持有。
 */
#[derive(Clone)]
pub struct AppState {
    credentials: Arc<RwLock<CredentialStore>>,
    sessions: Arc<Mutex<HashMap<Uuid, ConversationSession>>>,
    db_path: Option<PathBuf>,
    pacing: Duration,
}

impl AppState {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            credentials: Arc::new(RwLock::new(store)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            db_path: None,
            pacing: DEFAULT_PACING,
        }
    }

    /**
     * \brief 从本地数据库恢复凭据与诊断开关。
     */
    pub fn open(db_path: &FsPath) -> Result<Self> {
        let store = CredentialStore::open(db_path, remote_factory())?;
        let conn = db::open_db(db_path)?;
        telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
        let mut state = Self::new(store);
        state.db_path = Some(db_path.to_path_buf());
        Ok(state)
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    fn set_telemetry(&self, enabled: bool) -> Result<()> {
        if let Some(path) = &self.db_path {
            let conn = db::open_db(path)?;
            db::set_telemetry_enabled(&conn, enabled)?;
        }
        telemetry::set_enabled(enabled);
        Ok(())
    }
}

/**
 * \brief 构造路由：三个页面 + JSON API。
 */
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index_page))
        .route("/plant-analysis", get(analysis_page))
        .route("/chatbot", get(chatbot_page))
        .route("/api/catalog", get(get_catalog))
        .route(
            "/api/credential",
            get(get_credential)
                .post(set_credential)
                .delete(clear_credential),
        )
        .route("/api/analysis", post(run_analysis))
        .route("/api/chat/sessions", post(create_session))
        .route(
            "/api/chat/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/chat/sessions/{id}/messages", post(send_message))
        .route("/api/chat/sse", get(chat_sse))
        .route("/api/health", get(health_check));

    if let Ok(dir) = std::env::var(UI_DIR_ENV) {
        if FsPath::new(&dir).exists() {
            app = app.nest_service("/static", ServeDir::new(dir));
        }
    }
    app.with_state(state)
}

/**
 * \brief 启动本地 HTTP 服务。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event("server", &format!("listening on {}", addr));
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn analysis_page() -> Html<&'static str> {
    Html(ANALYSIS_HTML)
}

async fn chatbot_page() -> Html<&'static str> {
    Html(CHATBOT_HTML)
}

#[derive(Serialize, Debug)]
struct CatalogResponse {
    plants: Vec<PlantEntry>,
    soils: Vec<SoilEntry>,
    fertilizers: Vec<FertilizerSuggestion>,
    quick_questions: &'static [&'static str],
}

async fn get_catalog() -> Json<CatalogResponse> {
    Json(CatalogResponse {
        plants: catalog::plant_entries(),
        soils: catalog::soil_entries(),
        fertilizers: catalog::fertilizer_suggestions(),
        quick_questions: catalog::quick_questions(),
    })
}

#[derive(Deserialize, Debug)]
struct CredentialInput {
    /** \brief API 密钥 */
    api_key: String,
    /** \brief Provider 类型（可选，默认沿用当前） */
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Serialize, Debug)]
struct CredentialStatus {
    ready: bool,
    provider: &'static str,
    api_base: String,
    model: String,
    telemetry_enabled: bool,
    /** \brief 本次录入是否成功构造句柄（仅 POST 返回） */
    #[serde(skip_serializing_if = "Option::is_none")]
    configured: Option<bool>,
}

fn credential_status(store: &CredentialStore, configured: Option<bool>) -> CredentialStatus {
    let settings = store.settings();
    CredentialStatus {
        ready: store.is_ready(),
        provider: settings.kind.as_str(),
        api_base: settings.api_base.clone(),
        model: settings.model.clone(),
        telemetry_enabled: telemetry::is_enabled(),
        configured,
    }
}

async fn get_credential(State(state): State<AppState>) -> Json<CredentialStatus> {
    let store = state.credentials.read().await;
    Json(credential_status(&store, None))
}

/**
 * \brief 录入密钥（可同时切换 Provider 配置）。
 */
async fn set_credential(
    State(state): State<AppState>,
    Json(input): Json<CredentialInput>,
) -> Result<Json<CredentialStatus>, ApiError> {
    if input.api_key.trim().is_empty() {
        return Err(assistant_err(AssistantError::InvalidCredential));
    }
    let mut store = state.credentials.write().await;
    let next = store.settings().overridden(
        input.provider.as_deref(),
        input.api_base.as_deref(),
        input.model.as_deref(),
    );
    let configured = store
        .configure(next, &input.api_key)
        .map_err(assistant_err)?;
    if let Some(enabled) = input.telemetry_enabled {
        state.set_telemetry(enabled).map_err(internal_err)?;
    }
    telemetry::log_event(
        "server.credential",
        &format!(
            "set provider={} configured={}",
            store.settings().kind.as_str(),
            configured
        ),
    );
    Ok(Json(credential_status(&store, Some(configured))))
}

async fn clear_credential(
    State(state): State<AppState>,
) -> Result<Json<CredentialStatus>, ApiError> {
    let mut store = state.credentials.write().await;
    store.clear().map_err(internal_err)?;
    Ok(Json(credential_status(&store, None)))
}

#[derive(Deserialize, Debug)]
struct AnalysisInput {
    #[serde(default)]
    plant_type: String,
    #[serde(default)]
    soil_type: String,
}

/**
 * \brief 植物分析：远端失败时返回兜底结果而非错误。
 */
async fn run_analysis(
    State(state): State<AppState>,
    Json(input): Json<AnalysisInput>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let request =
        AnalysisRequest::new(&input.plant_type, &input.soil_type).map_err(assistant_err)?;
    let client = state.credentials.read().await.client();
    let result = analysis::analyze_plant(&client, &request).await;
    telemetry::log_event(
        "server.analysis",
        &format!(
            "plant={} soil={} source={:?} score={}",
            request.plant_type, request.soil_type, result.source, result.compatibility_percent
        ),
    );
    Ok(Json(result))
}

#[derive(Serialize, Debug)]
struct SessionSnapshot {
    id: Uuid,
    state: SessionState,
    messages: Vec<Message>,
}

fn snapshot(id: Uuid, session: &ConversationSession) -> SessionSnapshot {
    SessionSnapshot {
        id,
        state: session.state(),
        messages: session.messages().to_vec(),
    }
}

fn session_not_found(id: Uuid) -> ApiError {
    (StatusCode::NOT_FOUND, format!("session {} not found", id))
}

async fn create_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    let id = Uuid::new_v4();
    let session = ConversationSession::new().with_pacing(state.pacing);
    let snap = snapshot(id, &session);
    state.sessions.lock().await.insert(id, session);
    telemetry::log_event("server.chat", &format!("session created id={}", id));
    Json(snap)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&id).ok_or_else(|| session_not_found(id))?;
    Ok(Json(snapshot(id, session)))
}

/**
 * \brief 关闭会话；仍在进行中的回复到达后将被丢弃。
 */
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .lock()
        .await
        .remove(&id)
        .ok_or_else(|| session_not_found(id))?;
    telemetry::log_event("server.chat", &format!("session closed id={}", id));
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/**
 * \brief 提交用户消息：等待中的会话返回 409。
 * \return 本轮用户消息（乐观显示）与待完成的轮次。
 */
async fn begin_turn(
    state: &AppState,
    id: Uuid,
    text: &str,
) -> Result<(PendingTurn, Message), ApiError> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions.get_mut(&id).ok_or_else(|| session_not_found(id))?;
    if session.is_awaiting() {
        return Err((
            StatusCode::CONFLICT,
            "session is awaiting a response".to_string(),
        ));
    }
    let turn = session.begin_turn(text).map_err(assistant_err)?;
    let user_message = session
        .messages()
        .last()
        .cloned()
        .ok_or_else(|| internal_err("user message missing after submit"))?;
    Ok((turn, user_message))
}

/**
 * \brief 远端补全 + 节奏延迟，期间不持有会话锁。
 */
async fn complete_turn(state: &AppState, id: Uuid, turn: PendingTurn) -> Option<Message> {
    let client = state.credentials.read().await.client();
    let outcome = client.complete(&turn.prompt).await;
    turn.wait_for_pacing().await;
    let mut sessions = state.sessions.lock().await;
    match sessions.get_mut(&id) {
        Some(session) => Some(session.finish_turn(turn, outcome).clone()),
        None => {
            telemetry::log_event(
                "server.chat",
                &format!("session {} closed before reply, discarded", id),
            );
            None
        }
    }
}

#[derive(Deserialize, Debug)]
struct SendMessageInput {
    text: String,
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<SendMessageInput>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let (turn, _) = begin_turn(&state, id, &input.text).await?;
    // 轮次在独立任务中收尾，请求被取消时会话仍会回到 Idle
    let worker = state.clone();
    tokio::spawn(async move { complete_turn(&worker, id, turn).await })
        .await
        .map_err(internal_err)?
        .ok_or_else(|| session_not_found(id))?;
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&id).ok_or_else(|| session_not_found(id))?;
    Ok(Json(snapshot(id, session)))
}

#[derive(Deserialize, Debug)]
struct ChatSseQuery {
    /** \brief 会话 ID */
    session_id: Uuid,
    /** \brief 用户发送的消息 */
    text: String,
}

fn message_event(name: &str, message: &Message) -> Event {
    Event::default()
        .event(name)
        .data(serde_json::to_string(message).unwrap_or_default())
}

/**
 * \brief 聊天 SSE 接口：先推送 `user` 事件（乐观消息），回复就绪后推送 `assistant` 事件。
 */
async fn chat_sse(
    State(state): State<AppState>,
    Query(q): Query<ChatSseQuery>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>,
    ApiError,
> {
    let id = q.session_id;
    let (turn, user_message) = begin_turn(&state, id, &q.text).await?;

    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let _ = tx.send(Ok(message_event("user", &user_message)));

    tokio::spawn(async move {
        if let Some(reply) = complete_turn(&state, id, turn).await {
            let _ = tx.send(Ok(message_event("assistant", &reply)));
        }
    });

    let stream = UnboundedReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new()))
}

/**
 * \brief 健康检查：尝试列出模型并返回状态。
 */
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (client, settings) = {
        let store = state.credentials.read().await;
        (store.client(), store.settings().clone())
    };
    match client.list_models().await {
        Ok(list) => Json(serde_json::json!({
            "ok": true,
            "provider": settings.kind.as_str(),
            "base": settings.api_base,
            "model": settings.model,
            "models": list.len()
        })),
        Err(e) => Json(serde_json::json!({
            "ok": false,
            "provider": settings.kind.as_str(),
            "base": settings.api_base,
            "model": settings.model,
            "error": e.to_string()
        })),
    }
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn assistant_err(e: AssistantError) -> ApiError {
    let status = match &e {
        AssistantError::InvalidCredential | AssistantError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        AssistantError::NotInitialized | AssistantError::Transport(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}
