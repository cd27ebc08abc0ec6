use crate::{
    auth,
    config::Config,
    db::{self, DbPool},
    error::Error,
    events::{self, CreatorSummary, EventFilter, EventPage},
    feed::{self, Feed},
    messages, sweep,
};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stagecore::{
    chat::DEFAULT_LIMIT, Category, Event, EventStatus, EventUpdate, Lifecycle, MessageView,
    ModerationFilter, NewEvent, Principal, Rejection, User,
};
use std::{net::SocketAddr, sync::Arc};
use time::OffsetDateTime;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub moderation: Arc<ModerationFilter>,
    pub lifecycle: Lifecycle,
    pub jwt_secret: Arc<Vec<u8>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
        let pool = db::open_pool(config.database_path())?;
        let jwt_secret = match &config.jwt_secret {
            Some(s) => s.as_bytes().to_vec(),
            None => auth::load_or_create_secret(&config.secret_path())?,
        };
        Ok(Self {
            pool,
            moderation: Arc::new(config.moderation()),
            lifecycle: config.lifecycle(),
            jwt_secret: Arc::new(jwt_secret),
            config,
        })
    }

    fn principal(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let conn = self.pool.get().map_err(Error::from)?;
        Ok(auth::principal_from_headers(
            &conn,
            &self.jwt_secret,
            headers,
        ))
    }

    fn user(&self, headers: &HeaderMap) -> Result<User, ApiError> {
        match self.principal(headers)? {
            Principal::User(u) => Ok(u),
            Principal::Anonymous => Err(Rejection::Unauthenticated.into()),
        }
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(list_events).post(create_event))
        .route("/events/mine", get(my_events))
        .route("/events/category/:category", get(category_events))
        .route(
            "/events/:id",
            get(event_detail).patch(update_event).delete(delete_event),
        )
        .route("/events/:id/messages", get(chat_feed))
        .route("/events/:id/send", post(send_message))
        .route("/messages/:id/delete", post(delete_message))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct Failure {
    success: bool,
    error: String,
    code: &'static str,
}

impl Failure {
    fn new(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            success: false,
            error: error.into(),
            code,
        }
    }
}

/// Error returned by event handlers, mapped to an HTTP status.
struct ApiError(Error);

macro_rules! api_error_from {
    ($($t:ty),*) => {
        $(impl From<$t> for ApiError {
            fn from(e: $t) -> Self {
                ApiError(e.into())
            }
        })*
    };
}

api_error_from!(Error, Rejection, rusqlite::Error, r2d2::Error);

fn status_for(r: &Rejection) -> StatusCode {
    match r {
        Rejection::Unauthenticated => StatusCode::UNAUTHORIZED,
        Rejection::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        Rejection::EventNotFound | Rejection::MessageNotFound => StatusCode::NOT_FOUND,
        Rejection::Conflict => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn internal(e: &Error) -> Failure {
    error!(error = %e, "request failed");
    Failure::new("Something went wrong, please try again later.", "internal_error")
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0.rejection() {
            Some(r) => (status_for(r), Json(Failure::new(r.to_string(), r.code()))).into_response(),
            None => (StatusCode::INTERNAL_SERVER_ERROR, Json(internal(&self.0))).into_response(),
        }
    }
}

/// Unwrap a JSON body; malformed input is a field rejection like any other.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Rejection> {
    body.map(|Json(value)| value).map_err(|e| {
        debug!(error = %e, "malformed request body");
        Rejection::InvalidField {
            field: "request body",
            reason: "expected a JSON object with well-formed fields".into(),
        }
    })
}

fn parse_id(raw: &str, missing: Rejection) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| missing.into())
}

#[derive(Serialize)]
struct EventDetail {
    #[serde(flatten)]
    event: Event,
    tags_list: Vec<String>,
    embed_url: String,
    is_upcoming: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    ends_at: Option<OffsetDateTime>,
    is_creator: bool,
}

impl EventDetail {
    fn new(event: Event, viewer: &Principal, lifecycle: &Lifecycle, now: OffsetDateTime) -> Self {
        Self {
            tags_list: event.tags_list(),
            embed_url: event.embed_url(),
            is_upcoming: event.is_upcoming(now),
            ends_at: lifecycle.ends_at(event.scheduled_date),
            is_creator: viewer.id() == Some(event.creator_id),
            event,
        }
    }
}

async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<EventPage>, ApiError> {
    let conn = state.pool.get()?;
    Ok(Json(events::list_events(&conn, &filter)?))
}

async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.user(&headers)?;
    let new = json_body(body)?;
    let conn = state.pool.get()?;
    let now = OffsetDateTime::now_utc();
    let ev = events::create_event(&conn, new, &user, now)?;
    let detail = EventDetail::new(ev, &user.into(), &state.lifecycle, now);
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn event_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<EventDetail>, ApiError> {
    let id = parse_id(&id, Rejection::EventNotFound)?;
    let viewer = state.principal(&headers)?;
    let conn = state.pool.get()?;
    let ev = events::get_event(&conn, &id)?.ok_or(Rejection::EventNotFound)?;
    let now = OffsetDateTime::now_utc();
    Ok(Json(EventDetail::new(ev, &viewer, &state.lifecycle, now)))
}

async fn update_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<EventUpdate>, JsonRejection>,
) -> Result<Json<EventDetail>, ApiError> {
    let actor: Principal = state.user(&headers)?.into();
    let id = parse_id(&id, Rejection::EventNotFound)?;
    let update = json_body(body)?;
    let conn = state.pool.get()?;
    let now = OffsetDateTime::now_utc();
    let ev = events::update_event(&conn, &id, update, &actor, now)?;
    Ok(Json(EventDetail::new(ev, &actor, &state.lifecycle, now)))
}

async fn delete_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, Rejection::EventNotFound)?;
    let actor: Principal = state.user(&headers)?.into();
    let mut conn = state.pool.get()?;
    events::delete_event(&mut conn, &id, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MineQuery {
    #[serde(default)]
    status: Option<EventStatus>,
}

async fn my_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<MineQuery>,
) -> Result<Json<CreatorSummary>, ApiError> {
    let user = state.user(&headers)?;
    let conn = state.pool.get()?;
    Ok(Json(events::creator_events(&conn, &user.id, q.status)?))
}

async fn category_events(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let category: Category = category.parse()?;
    let conn = state.pool.get()?;
    Ok(Json(events::events_in_category(&conn, category)?))
}

#[derive(Deserialize)]
struct FeedQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn chat_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<FeedQuery>,
) -> Json<Feed> {
    // an unreachable pool degrades to an anonymous viewer; feed::load reports it
    let viewer = state.principal(&headers).unwrap_or_default();
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    Json(feed::load(
        &state.pool,
        &id,
        &viewer,
        limit,
        OffsetDateTime::now_utc(),
    ))
}

#[derive(Deserialize)]
struct SendReq {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct SendResp {
    success: bool,
    message: MessageView,
}

#[derive(Serialize)]
struct DeleteResp {
    success: bool,
}

/// Chat writes report rejections in the body with a 200 so polling
/// clients only have to look at `success`.
fn chat_failure(e: ApiError) -> Response {
    if matches!(e.0.rejection(), Some(Rejection::Unauthenticated)) {
        return e.into_response();
    }
    match e.0.rejection() {
        Some(r) => Json(Failure::new(r.to_string(), r.code())).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, Json(internal(&e.0))).into_response(),
    }
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<SendReq>, JsonRejection>,
) -> Response {
    let result = (|| -> Result<SendResp, ApiError> {
        let user = state.user(&headers)?;
        let req = json_body(body)?;
        let event_id = parse_id(&id, Rejection::EventNotFound)?;
        let conn = state.pool.get()?;
        let now = OffsetDateTime::now_utc();
        let msg = messages::post_message(
            &conn,
            &state.moderation,
            &event_id,
            &user,
            &req.message,
            now,
        )?;
        let view = stagecore::Authored {
            message: msg,
            username: Some(user.username.clone()),
            display_name: Some(user.display_name.clone()),
        }
        .view(&user.into(), now);
        Ok(SendResp {
            success: true,
            message: view,
        })
    })();
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => chat_failure(e),
    }
}

async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let result = (|| -> Result<(), ApiError> {
        let actor: Principal = state.user(&headers)?.into();
        let message_id = parse_id(&id, Rejection::MessageNotFound)?;
        let conn = state.pool.get()?;
        messages::delete_message(&conn, &message_id, &actor, OffsetDateTime::now_utc())?;
        Ok(())
    })();
    match result {
        Ok(()) => Json(DeleteResp { success: true }).into_response(),
        Err(e) => chat_failure(e),
    }
}

/// Run the HTTP server and, when enabled, the lifecycle sweep loop.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;
    let state = AppState::new(config).await?;
    if state.config.sweep_interval_secs > 0 {
        sweep::spawn_sweeper(
            state.pool.clone(),
            state.lifecycle,
            std::time::Duration::from_secs(state.config.sweep_interval_secs),
        );
    }
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
