use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::fmt::Display;

use crate::youtube::FetchError;

pub type AppResult<T> = Result<T, AppErr>;
pub type LobbyResult<T> = Result<T, LobbyError>;

/// Broad class of a rejection, used to pick a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Capacity,
    Forbidden,
    ContentPolicy,
    Gone,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    /* validation */
    #[error("Invalid user name")]
    InvalidName,
    #[error("Invalid YouTube link")]
    InvalidVideoUrl,
    #[error("Invalid vote data")]
    InvalidBallot,
    #[error("Cannot vote to mute invalid user")]
    UnknownTarget,

    /* conflict */
    #[error("A vote to {0} is already pending")]
    VoteAlreadyActive(&'static str),
    #[error("Vote expired or invalid")]
    NoActiveVote,
    #[error("There is no current video playing")]
    NoVideoPlaying,
    #[error("This video already survived a vote skip")]
    AlreadySurvivedVote,
    #[error("Video already in queue")]
    AlreadyQueued,
    #[error("Video already played in last hour")]
    RecentlyPlayed,
    #[error("You are only allowed to join on one device at a time from the same address")]
    AlreadyConnected,

    /* capacity */
    #[error("Lobby limit exceeded")]
    LobbyLimit,
    #[error("You've reached your video submission limit")]
    UserQueueLimit,
    #[error("The lobby queue is full")]
    QueueFull,

    /* forbidden */
    #[error("You are muted for the next {0}s")]
    Muted(u64),
    #[error("Cannot vote to mute yourself")]
    SelfMute,
    #[error("You are on cooldown to start a mute vote")]
    MuteCooldown,
    #[error("You are not a member of this lobby")]
    NotMember,
    #[error("Session expired")]
    SessionExpired,
    #[error("Invalid user")]
    SessionMismatch,

    /* content policy */
    #[error("Cannot add age restricted video")]
    AgeRestricted,
    #[error("Videos longer than {0} minutes are not allowed")]
    TooLong(u64),
    #[error("Video has no playable duration")]
    InvalidDuration,

    /* gone */
    #[error("The lobby you're trying to join doesn't exist or has expired")]
    LobbyNotFound,
    #[error("Lobby closed")]
    LobbyClosed,
}

impl LobbyError {
    pub fn kind(&self) -> ErrorKind {
        use LobbyError::*;
        match self {
            InvalidName | InvalidVideoUrl | InvalidBallot | UnknownTarget => ErrorKind::Validation,
            VoteAlreadyActive(_) | NoActiveVote | NoVideoPlaying | AlreadySurvivedVote
            | AlreadyQueued | RecentlyPlayed | AlreadyConnected => ErrorKind::Conflict,
            LobbyLimit | UserQueueLimit | QueueFull => ErrorKind::Capacity,
            Muted(_) | SelfMute | MuteCooldown | NotMember | SessionExpired | SessionMismatch => {
                ErrorKind::Forbidden
            }
            AgeRestricted | TooLong(_) | InvalidDuration => ErrorKind::ContentPolicy,
            LobbyNotFound | LobbyClosed => ErrorKind::Gone,
        }
    }

    fn status(&self) -> StatusCode {
        match (self.kind(), self) {
            (_, LobbyError::LobbyLimit)        => StatusCode::SERVICE_UNAVAILABLE,
            (_, LobbyError::AgeRestricted)     => StatusCode::FORBIDDEN,
            (ErrorKind::Validation, _)         => StatusCode::BAD_REQUEST,
            (ErrorKind::Conflict, _)           => StatusCode::CONFLICT,
            (ErrorKind::Capacity, _)           => StatusCode::TOO_MANY_REQUESTS,
            (ErrorKind::Forbidden, _)          => StatusCode::FORBIDDEN,
            (ErrorKind::ContentPolicy, _)      => StatusCode::UNPROCESSABLE_ENTITY,
            (ErrorKind::Gone, _)               => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error("Failed to fetch video metadata: {0}")]
    Fetch(#[from] FetchError),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = match self {
            AppErr::Bad(msg)  => (StatusCode::BAD_REQUEST, msg),
            AppErr::Lobby(e)  => (e.status(), e.to_string()),
            AppErr::Fetch(FetchError::AgeRestricted) => {
                let e = LobbyError::AgeRestricted;
                (e.status(), e.to_string())
            }
            AppErr::Fetch(e)  => {
                tracing::error!(error = %e, "metadata fetch failed");
                (StatusCode::BAD_GATEWAY, "Failed to fetch video metadata".to_string())
            }
        };
        (code, Json(json!({ "error": msg }))).into_response()
    }
}

/* ── helper: turn any displayable error into Bad ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(LobbyError::InvalidName.status(), StatusCode::BAD_REQUEST);
        assert_eq!(LobbyError::AlreadyQueued.status(), StatusCode::CONFLICT);
        assert_eq!(LobbyError::UserQueueLimit.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(LobbyError::LobbyLimit.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(LobbyError::SelfMute.status(), StatusCode::FORBIDDEN);
        assert_eq!(LobbyError::TooLong(10).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(LobbyError::AgeRestricted.status(), StatusCode::FORBIDDEN);
        assert_eq!(LobbyError::LobbyClosed.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(LobbyError::Muted(42).to_string(), "You are muted for the next 42s");
        assert_eq!(
            LobbyError::VoteAlreadyActive("mute").to_string(),
            "A vote to mute is already pending"
        );
    }
}
