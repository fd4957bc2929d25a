//! One task per lobby. The task owns the [`Lobby`] and every timer that
//! belongs to it; requests reach it through an mpsc inbox and are answered
//! over oneshot channels, so all mutation of one lobby is serialised.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    lobby::{Lobby, LobbySnapshot},
    notify::{deliver, Notifier},
    votes::{SkipStart, VoteProgress},
    Ballot, NewMember, VideoMeta,
};
use crate::error::{LobbyError, LobbyResult};

pub enum Command {
    Join      { member: NewMember, respond_to: oneshot::Sender<String> },
    Leave     { user_id: String, respond_to: oneshot::Sender<bool> },
    Enqueue   { user_id: String, meta: VideoMeta, respond_to: oneshot::Sender<LobbyResult<()>> },
    StartSkip { user_id: String, respond_to: oneshot::Sender<LobbyResult<SkipStart>> },
    CastSkip  { user_id: String, ballot: Ballot, respond_to: oneshot::Sender<LobbyResult<VoteProgress>> },
    StartMute { user_id: String, target: String, respond_to: oneshot::Sender<LobbyResult<()>> },
    CastMute  { user_id: String, ballot: Ballot, respond_to: oneshot::Sender<LobbyResult<VoteProgress>> },
    Snapshot  { respond_to: oneshot::Sender<LobbySnapshot> },
}

/// Sent to the registry once a lobby's loop has torn it down by expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyClosed {
    pub code:    String,
    pub members: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LobbyHandle {
    code: String,
    tx:   mpsc::Sender<Command>,
}

impl LobbyHandle {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The loop has exited (expired or shut down).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> LobbyResult<T> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(make(respond_to)).await.map_err(|_| LobbyError::LobbyClosed)?;
        rx.await.map_err(|_| LobbyError::LobbyClosed)
    }

    /// Returns the display name the lobby settled on.
    pub async fn join(&self, member: NewMember) -> LobbyResult<String> {
        self.call(|respond_to| Command::Join { member, respond_to }).await
    }

    pub async fn leave(&self, user_id: &str) -> LobbyResult<bool> {
        let user_id = user_id.to_string();
        self.call(|respond_to| Command::Leave { user_id, respond_to }).await
    }

    pub async fn enqueue(&self, user_id: &str, meta: VideoMeta) -> LobbyResult<()> {
        let user_id = user_id.to_string();
        self.call(|respond_to| Command::Enqueue { user_id, meta, respond_to }).await?
    }

    pub async fn start_skip_vote(&self, user_id: &str) -> LobbyResult<SkipStart> {
        let user_id = user_id.to_string();
        self.call(|respond_to| Command::StartSkip { user_id, respond_to }).await?
    }

    pub async fn cast_skip_vote(&self, user_id: &str, ballot: Ballot) -> LobbyResult<VoteProgress> {
        let user_id = user_id.to_string();
        self.call(|respond_to| Command::CastSkip { user_id, ballot, respond_to }).await?
    }

    pub async fn start_mute_vote(&self, user_id: &str, target: &str) -> LobbyResult<()> {
        let (user_id, target) = (user_id.to_string(), target.to_string());
        self.call(|respond_to| Command::StartMute { user_id, target, respond_to }).await?
    }

    pub async fn cast_mute_vote(&self, user_id: &str, ballot: Ballot) -> LobbyResult<VoteProgress> {
        let user_id = user_id.to_string();
        self.call(|respond_to| Command::CastMute { user_id, ballot, respond_to }).await?
    }

    pub async fn snapshot(&self) -> LobbyResult<LobbySnapshot> {
        self.call(|respond_to| Command::Snapshot { respond_to }).await
    }
}

/// Starts the loop for `lobby` and returns a handle to it.
pub fn spawn(
    lobby: Lobby,
    notifier: Arc<dyn Notifier>,
    closed_tx: mpsc::UnboundedSender<LobbyClosed>,
    cancel: CancellationToken,
) -> LobbyHandle {
    let (tx, rx) = mpsc::channel(lobby.settings.inbox_depth);
    let handle = LobbyHandle { code: lobby.code.clone(), tx };
    tokio::spawn(run(lobby, rx, notifier, closed_tx, cancel));
    handle
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut lobby: Lobby,
    mut rx: mpsc::Receiver<Command>,
    notifier: Arc<dyn Notifier>,
    closed_tx: mpsc::UnboundedSender<LobbyClosed>,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let mut mute_sweep = time::interval_at(start + lobby.settings.mute_sweep_every, lobby.settings.mute_sweep_every);
    mute_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut history_sweep =
        time::interval_at(start + lobby.settings.history_sweep_every, lobby.settings.history_sweep_every);
    history_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(lobby.code = %lobby.code, "lobby loop started");

    loop {
        let playback = lobby.playback_deadline();
        let skip_at = lobby.skip_vote_deadline();
        let mute_at = lobby.mute_vote_deadline();
        let expires_at = lobby.expires_at();

        // timers win over queued requests so a request never observes a
        // deadline that has already passed
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(lobby.code = %lobby.code, "lobby loop cancelled");
                break;
            }
            _ = time::sleep_until(expires_at) => {
                let members = lobby.expire();
                deliver(notifier.as_ref(), lobby.take_notices());
                let _ = closed_tx.send(LobbyClosed { code: lobby.code.clone(), members });
                break;
            }
            _ = until(playback.as_ref().map(|(at, _)| *at)) => {
                if let Some((_, video_id)) = &playback {
                    lobby.complete_video(video_id, Instant::now());
                }
            }
            _ = until(skip_at) => {
                lobby.resolve_skip_vote(Instant::now());
            }
            _ = until(mute_at) => {
                lobby.resolve_mute_vote(Instant::now());
            }
            _ = mute_sweep.tick() => {
                lobby.sweep_mutes(Instant::now());
            }
            _ = history_sweep.tick() => {
                lobby.sweep_history(Instant::now());
            }
            cmd = rx.recv() => match cmd {
                Some(cmd) => handle(&mut lobby, cmd, Instant::now()),
                None => break,
            },
        }

        deliver(notifier.as_ref(), lobby.take_notices());
    }

    tracing::debug!(lobby.code = %lobby.code, "lobby loop stopped");
}

fn handle(lobby: &mut Lobby, cmd: Command, now: Instant) {
    match cmd {
        Command::Join { member, respond_to } => {
            let _ = respond_to.send(lobby.add_member(member, now));
        }
        Command::Leave { user_id, respond_to } => {
            let _ = respond_to.send(lobby.remove_member(&user_id));
        }
        Command::Enqueue { user_id, meta, respond_to } => {
            let _ = respond_to.send(lobby.enqueue(&user_id, meta, now));
        }
        Command::StartSkip { user_id, respond_to } => {
            let _ = respond_to.send(lobby.start_skip_vote(&user_id, now));
        }
        Command::CastSkip { user_id, ballot, respond_to } => {
            let _ = respond_to.send(lobby.cast_skip_vote(&user_id, ballot, now));
        }
        Command::StartMute { user_id, target, respond_to } => {
            let _ = respond_to.send(lobby.start_mute_vote(&user_id, &target, now));
        }
        Command::CastMute { user_id, ballot, respond_to } => {
            let _ = respond_to.send(lobby.cast_mute_vote(&user_id, ballot, now));
        }
        Command::Snapshot { respond_to } => {
            let _ = respond_to.send(lobby.snapshot(now));
        }
    }
}
