use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::stream::{self, Stream};
use tokio::time::Instant;

use super::Client;
use crate::{
    error::AppResult,
    state::{EventHub, LobbyManager},
};

const KEEP_ALIVE: Duration = Duration::from_secs(60);

pub fn router() -> Router {
    Router::new().route("/:code", get(sse_handler))
}

/// Live notifications for one member. The stream ends when the lobby
/// closes the member's channel (removal or expiry).
async fn sse_handler(
    Path(code): Path<String>,
    Extension(manager): Extension<LobbyManager>,
    Extension(hub): Extension<EventHub>,
    client: Client,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (user, _) = client.member_of(&manager, &code).await?;
    manager.heartbeat(&user.id, Instant::now()).await;

    let rx = hub.connect(&user.id);
    tracing::info!(lobby.code = %code, user.id = %user.id, "event stream opened");

    let events = stream::unfold(rx, |mut rx| async move {
        let ev = rx.recv().await?;
        Some((Ok(Event::default().event(ev.kind.as_str()).data(ev.data)), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}
