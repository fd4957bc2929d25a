//! routes/lobby.rs
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{session_cookie, Client};
use crate::{
    dj::{manager::{normalize_user_limit, Joined}, LobbySnapshot, PlaybackMode},
    error::{AppResult, LobbyError},
    state::{LobbyManager, Metadata},
    youtube,
};

#[derive(Deserialize)]
struct CreateInput {
    name:  String,
    #[serde(default)]
    mode:  Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct JoinInput {
    name: String,
}

#[derive(Deserialize)]
struct VideoInput {
    url: String,
}

#[derive(Serialize)]
struct JoinedJson {
    code:    String,
    user_id: String,
    name:    String,
}

#[derive(Serialize)]
struct QueuedJson {
    id:            String,
    title:         String,
    duration_secs: u64,
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create))
        .route("/:code", get(snapshot))
        .route("/:code/join", post(join))
        .route("/:code/heartbeat", post(heartbeat))
        .route("/:code/logout", post(logout))
        .route("/:code/videos", post(add_video))
}

fn joined(jar: CookieJar, j: Joined) -> AppResult<impl IntoResponse> {
    let jar = jar.add(session_cookie(&j.identity.session_id)?);
    let body = JoinedJson { code: j.lobby.code().to_string(), user_id: j.identity.id, name: j.name };
    Ok((StatusCode::CREATED, jar, Json(body)))
}

/* ---------------- Create ---------------- */
async fn create(
    Extension(manager): Extension<LobbyManager>,
    client: Client,
    jar: CookieJar,
    Json(p): Json<CreateInput>,
) -> AppResult<impl IntoResponse> {
    let mode = p.mode.as_deref().map(PlaybackMode::parse).unwrap_or_default();
    let limit = normalize_user_limit(p.limit);
    let j = manager.create(&p.name, mode, limit, &client.ip, client.session.as_deref()).await?;
    joined(jar, j)
}

/* ---------------- Join ---------------- */
async fn join(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
    jar: CookieJar,
    Json(p): Json<JoinInput>,
) -> AppResult<impl IntoResponse> {
    let j = manager.join(&code, &p.name, &client.ip, client.session.as_deref()).await?;
    joined(jar, j)
}

/* ---------------- Read ---------------- */
async fn snapshot(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
) -> AppResult<Json<LobbySnapshot>> {
    let (user, lobby) = client.member_of(&manager, &code).await?;
    manager.heartbeat(&user.id, Instant::now()).await;
    Ok(Json(lobby.snapshot().await?))
}

/* ---------------- Presence ---------------- */
async fn heartbeat(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
) -> AppResult<StatusCode> {
    let (user, _) = client.member_of(&manager, &code).await?;
    manager.heartbeat(&user.id, Instant::now()).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn logout(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
) -> AppResult<StatusCode> {
    let (user, _) = client.member_of(&manager, &code).await?;
    manager.logout(&user.id, Instant::now()).await;
    Ok(StatusCode::NO_CONTENT)
}

/* ---------------- Queue ---------------- */
async fn add_video(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    Extension(metadata): Extension<Metadata>,
    client: Client,
    Json(p): Json<VideoInput>,
) -> AppResult<impl IntoResponse> {
    let (user, lobby) = client.member_of(&manager, &code).await?;
    let id = youtube::video_id_from_url(&p.url).ok_or(LobbyError::InvalidVideoUrl)?;

    let meta = metadata.fetch(&id).await.inspect_err(|e| {
        tracing::warn!(lobby.code = %code, video.id = %id, error = %e, "metadata lookup rejected");
    })?;
    let body = QueuedJson { id: meta.id.clone(), title: meta.title.clone(), duration_secs: meta.duration.as_secs() };

    lobby.enqueue(&user.id, meta).await?;
    manager.heartbeat(&user.id, Instant::now()).await;
    Ok((StatusCode::CREATED, Json(body)))
}
