use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::dj::{actor::LobbyClosed, LobbyManager};

/// Registry sweeper: reaps idle users on a fixed tick and drops lobbies
/// whose loop reported expiry.
pub async fn task(
    manager: LobbyManager,
    mut closed_rx: mpsc::UnboundedReceiver<LobbyClosed>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut tick = time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(closed) = closed_rx.recv() => manager.lobby_closed(closed).await,
            _ = tick.tick() => {
                let reaped = manager.reap_idle_users(Instant::now()).await;
                if reaped > 0 {
                    let lobbies = manager.lobby_count().await;
                    tracing::debug!(reaped, lobbies, "idle sweep");
                }
            }
        }
    }
    tracing::debug!("registry sweeper stopped");
}
