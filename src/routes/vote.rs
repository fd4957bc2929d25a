use axum::{
    extract::{Extension, Json, Path},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::Client;
use crate::{
    dj::{
        votes::{SkipStart, VoteOutcome, VoteProgress},
        Ballot,
    },
    error::{AppResult, LobbyError},
    state::LobbyManager,
};

#[derive(Deserialize)]
struct BallotInput {
    vote: String,
}

#[derive(Deserialize)]
struct MuteInput {
    target: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/:code/vote/skip/start", post(skip_start))
        .route("/:code/vote/skip/submit", post(skip_submit))
        .route("/:code/vote/mute/start", post(mute_start))
        .route("/:code/vote/mute/submit", post(mute_submit))
}

fn progress_json(p: VoteProgress) -> Json<Value> {
    let result = match p {
        VoteProgress::Pending                       => "pending",
        VoteProgress::Resolved(VoteOutcome::Passed) => "passed",
        VoteProgress::Resolved(VoteOutcome::Failed) => "failed",
    };
    Json(json!({ "result": result }))
}

fn ballot(raw: &str) -> AppResult<Ballot> {
    Ok(Ballot::parse(raw).ok_or(LobbyError::InvalidBallot)?)
}

/* ---------------- Skip ---------------- */
async fn skip_start(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
) -> AppResult<Json<Value>> {
    let (user, lobby) = client.member_of(&manager, &code).await?;
    let result = match lobby.start_skip_vote(&user.id).await? {
        SkipStart::Started => "started",
        SkipStart::Skipped => "skipped",
    };
    Ok(Json(json!({ "result": result })))
}

async fn skip_submit(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
    Json(p): Json<BallotInput>,
) -> AppResult<Json<Value>> {
    let (user, lobby) = client.member_of(&manager, &code).await?;
    let progress = lobby.cast_skip_vote(&user.id, ballot(&p.vote)?).await?;
    Ok(progress_json(progress))
}

/* ---------------- Mute ---------------- */
async fn mute_start(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
    Json(p): Json<MuteInput>,
) -> AppResult<Json<Value>> {
    let (user, lobby) = client.member_of(&manager, &code).await?;
    lobby.start_mute_vote(&user.id, &p.target).await?;
    Ok(Json(json!({ "result": "started" })))
}

async fn mute_submit(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    client: Client,
    Json(p): Json<BallotInput>,
) -> AppResult<Json<Value>> {
    let (user, lobby) = client.member_of(&manager, &code).await?;
    let progress = lobby.cast_mute_vote(&user.id, ballot(&p.vote)?).await?;
    Ok(progress_json(progress))
}
