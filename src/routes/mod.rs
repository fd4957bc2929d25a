use std::{convert::Infallible, net::SocketAddr};

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
    Extension, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::{
    dj::{Identity, LobbyHandle},
    error::{bad, AppResult, LobbyError},
    state::{EventHub, LobbyManager, Metadata},
    utils::realip,
};

pub mod events;
pub mod lobby;
pub mod vote;

pub const SESSION_COOKIE: &str = "session_id";
const SESSION_MAX_AGE_SECS: u64 = 8 * 60 * 60;

pub fn router() -> Router {
    Router::new()
        .nest("/api/lobbies", lobby::router().merge(vote::router()))
        .nest("/events", events::router())
}

/// Full application with its shared state attached.
pub fn app(manager: LobbyManager, hub: EventHub, metadata: Metadata) -> Router {
    router()
        .layer(Extension(manager))
        .layer(Extension(hub))
        .layer(Extension(metadata))
}

/* ---------------- caller ---------------- */

/// Who is calling: resolved client address plus the session cookie, if any.
pub struct Client {
    pub ip:      String,
    pub session: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let ip = realip::client_ip(&parts.headers, peer);
        let session = CookieJar::from_headers(&parts.headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        Ok(Self { ip, session })
    }
}

impl Client {
    /// The caller's identity, provided it is a member of lobby `code`.
    pub async fn member_of(&self, manager: &LobbyManager, code: &str) -> AppResult<(Identity, LobbyHandle)> {
        let session = self.session.as_deref().ok_or(LobbyError::SessionExpired)?;
        Ok(manager.member_of(session, &self.ip, code).await?)
    }
}

pub fn session_cookie(token: &str) -> AppResult<Cookie<'static>> {
    Cookie::parse(format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={SESSION_MAX_AGE_SECS}"
    ))
    .map_err(bad)
}
