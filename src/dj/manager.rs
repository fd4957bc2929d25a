//! Process-wide registry: live lobbies by code and user identities by id,
//! address and session token.
//!
//! The lobby map and the identity map are separate locks and are never held
//! together. Calls into a lobby (which await its loop) happen only after both
//! are released.

use std::{collections::HashMap, sync::Arc, sync::LazyLock};

use regex::Regex;
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use super::{
    actor::{self, LobbyClosed, LobbyHandle},
    lobby::Lobby,
    notify::Notifier,
    NewMember, PlaybackMode,
};
use crate::{
    config::ManagerSettings,
    error::{LobbyError, LobbyResult},
    utils::{clean, ids},
};

pub const DEFAULT_USER_LIMIT: usize = 5;
pub const MAX_USER_LIMIT: i64 = 20;

static NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9 ]{0,18}[A-Za-z0-9])?$").ok());

/// 1 to 20 characters, letters digits and inner spaces.
pub fn validate_name(name: &str) -> LobbyResult<()> {
    match NAME.as_ref() {
        Some(re) if re.is_match(name) => Ok(()),
        _ => Err(LobbyError::InvalidName),
    }
}

/// Per-user queue cap requested at creation; out of range falls back to the default.
pub fn normalize_user_limit(raw: Option<i64>) -> usize {
    match raw {
        Some(n) if (1..=MAX_USER_LIMIT).contains(&n) => n as usize,
        _ => DEFAULT_USER_LIMIT,
    }
}

#[derive(Clone, Debug)]
pub struct Identity {
    pub id:            String,
    pub name:          String,
    pub ip:            String,
    pub session_id:    String,
    pub lobby:         Option<String>,
    pub last_activity: Instant,
}

#[derive(Default)]
struct Identities {
    users:      HashMap<String, Identity>,
    by_ip:      HashMap<String, String>,
    by_session: HashMap<String, String>,
}

impl Identities {
    /// Registers `ident`, evicting whoever held its address or token.
    fn insert(&mut self, ident: Identity) -> Vec<Identity> {
        let mut evicted = Vec::new();
        for holder in [self.by_ip.get(&ident.ip).cloned(), self.by_session.get(&ident.session_id).cloned()]
            .into_iter()
            .flatten()
        {
            evicted.extend(self.remove(&holder));
        }
        self.by_ip.insert(ident.ip.clone(), ident.id.clone());
        self.by_session.insert(ident.session_id.clone(), ident.id.clone());
        self.users.insert(ident.id.clone(), ident);
        evicted
    }

    fn remove(&mut self, id: &str) -> Option<Identity> {
        let ident = self.users.remove(id)?;
        if self.by_ip.get(&ident.ip) == Some(&ident.id) {
            self.by_ip.remove(&ident.ip);
        }
        if self.by_session.get(&ident.session_id) == Some(&ident.id) {
            self.by_session.remove(&ident.session_id);
        }
        Some(ident)
    }

    fn by_session(&self, session: &str) -> Option<&Identity> {
        self.by_session.get(session).and_then(|id| self.users.get(id))
    }

    fn by_ip(&self, ip: &str) -> Option<&Identity> {
        self.by_ip.get(ip).and_then(|id| self.users.get(id))
    }
}

/// Result of creating or joining a lobby.
#[derive(Clone, Debug)]
pub struct Joined {
    pub identity: Identity,
    /// Display name after duplicate suffixing.
    pub name:     String,
    pub lobby:    LobbyHandle,
}

#[derive(Clone)]
pub struct LobbyManager {
    inner: Arc<Inner>,
}

struct Inner {
    settings:   ManagerSettings,
    lobbies:    RwLock<HashMap<String, LobbyHandle>>,
    identities: Mutex<Identities>,
    notifier:   Arc<dyn Notifier>,
    closed_tx:  mpsc::UnboundedSender<LobbyClosed>,
    cancel:     CancellationToken,
}

impl LobbyManager {
    /// Builds the registry and starts its sweep task; both stop with `cancel`.
    pub fn start(settings: ManagerSettings, notifier: Arc<dyn Notifier>, cancel: CancellationToken) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let every = settings.idle_sweep_every;
        let manager = Self {
            inner: Arc::new(Inner {
                settings,
                lobbies: RwLock::default(),
                identities: Mutex::default(),
                notifier,
                closed_tx,
                cancel: cancel.clone(),
            }),
        };
        tokio::spawn(clean::task(manager.clone(), closed_rx, every, cancel));
        manager
    }

    /* ---------------- lobbies ---------------- */

    pub async fn lobby(&self, code: &str) -> Option<LobbyHandle> {
        self.inner.lobbies.read().await.get(code).filter(|h| !h.is_closed()).cloned()
    }

    pub async fn lobby_count(&self) -> usize {
        self.inner.lobbies.read().await.values().filter(|h| !h.is_closed()).count()
    }

    pub async fn create_lobby(&self, mode: PlaybackMode, user_limit: usize, creator_ip: &str) -> LobbyResult<LobbyHandle> {
        let mut lobbies = self.inner.lobbies.write().await;
        lobbies.retain(|_, h| !h.is_closed());
        if lobbies.len() >= self.inner.settings.max_lobbies {
            tracing::warn!(max = self.inner.settings.max_lobbies, "lobby limit reached");
            return Err(LobbyError::LobbyLimit);
        }

        let code = loop {
            let code = ids::lobby_code();
            if !lobbies.contains_key(&code) {
                break code;
            }
        };

        let lobby = Lobby::new(
            code.clone(),
            mode,
            user_limit,
            creator_ip.to_string(),
            self.inner.settings.lobby.clone(),
            Instant::now(),
        );
        let handle = actor::spawn(
            lobby,
            self.inner.notifier.clone(),
            self.inner.closed_tx.clone(),
            self.inner.cancel.child_token(),
        );
        lobbies.insert(code.clone(), handle.clone());
        tracing::info!(lobby.code = %code, ?mode, user_limit, total = lobbies.len(), "lobby created");
        Ok(handle)
    }

    /// Forgets an expired lobby and every identity that was in it.
    pub async fn lobby_closed(&self, closed: LobbyClosed) {
        self.inner.lobbies.write().await.remove(&closed.code);

        let gone: Vec<Identity> = {
            let mut idents = self.inner.identities.lock().await;
            let ids: Vec<String> = idents
                .users
                .values()
                .filter(|u| u.lobby.as_deref() == Some(closed.code.as_str()) || closed.members.contains(&u.id))
                .map(|u| u.id.clone())
                .collect();
            ids.iter().filter_map(|id| idents.remove(id)).collect()
        };
        tracing::info!(lobby.code = %closed.code, purged = gone.len(), "lobby removed from registry");
    }

    /* ---------------- identities ---------------- */

    /// Registers a fresh identity for `ip`, replacing any prior holder of the
    /// address. Evicted identities are taken out of their lobbies.
    pub async fn create_user(&self, name: &str, ip: &str) -> Identity {
        let ident = Identity {
            id: ids::user_id(),
            name: name.to_string(),
            ip: ip.to_string(),
            session_id: ids::session_token(),
            lobby: None,
            last_activity: Instant::now(),
        };
        let evicted = self.inner.identities.lock().await.insert(ident.clone());
        self.detach(evicted).await;
        tracing::debug!(user.id = %ident.id, user.ip = %ident.ip, "user created");
        ident
    }

    /// Drops whoever currently holds `session` or `ip` so the caller starts
    /// over with a new identity.
    pub async fn purge_session(&self, session: Option<&str>, ip: &str) {
        let purged: Vec<Identity> = {
            let mut idents = self.inner.identities.lock().await;
            let mut ids: Vec<String> = Vec::new();
            if let Some(u) = session.and_then(|s| idents.by_session(s)) {
                ids.push(u.id.clone());
            }
            if let Some(u) = idents.by_ip(ip) {
                if !ids.contains(&u.id) {
                    ids.push(u.id.clone());
                }
            }
            ids.iter().filter_map(|id| idents.remove(id)).collect()
        };
        for u in &purged {
            tracing::debug!(user.id = %u.id, "purged previous session");
        }
        self.detach(purged).await;
    }

    /// Removes every user idle for longer than the configured timeout.
    pub async fn reap_idle_users(&self, now: Instant) -> usize {
        let timeout = self.inner.settings.idle_timeout;
        let idle: Vec<Identity> = {
            let mut idents = self.inner.identities.lock().await;
            let ids: Vec<String> = idents
                .users
                .values()
                .filter(|u| now.saturating_duration_since(u.last_activity) > timeout)
                .map(|u| u.id.clone())
                .collect();
            ids.iter().filter_map(|id| idents.remove(id)).collect()
        };
        let n = idle.len();
        for u in &idle {
            tracing::debug!(user.id = %u.id, lobby.code = ?u.lobby, "idle user reaped");
        }
        self.detach(idle).await;
        n
    }

    async fn detach(&self, users: Vec<Identity>) {
        for u in users {
            let handle = match &u.lobby {
                Some(code) => self.lobby(code).await,
                None => None,
            };
            match handle {
                Some(h) => {
                    if let Err(e) = h.leave(&u.id).await {
                        tracing::debug!(user.id = %u.id, error = %e, "lobby gone before member removal");
                    }
                }
                None => self.inner.notifier.disconnect(&u.id),
            }
        }
    }

    async fn bind(&self, user_id: &str, code: &str) {
        if let Some(u) = self.inner.identities.lock().await.users.get_mut(user_id) {
            u.lobby = Some(code.to_string());
        }
    }

    /// Session cookie to identity. A session used from an address that
    /// belongs to someone else is refused.
    pub async fn resolve_session(&self, session: &str, ip: &str) -> LobbyResult<Identity> {
        let idents = self.inner.identities.lock().await;
        let user = idents.by_session(session).ok_or(LobbyError::SessionExpired)?;
        if idents.by_ip(ip).is_some_and(|holder| holder.id != user.id) {
            return Err(LobbyError::SessionMismatch);
        }
        Ok(user.clone())
    }

    /// Resolves the session and checks it belongs to lobby `code`.
    pub async fn member_of(&self, session: &str, ip: &str, code: &str) -> LobbyResult<(Identity, LobbyHandle)> {
        let user = self.resolve_session(session, ip).await?;
        let lobby = self.lobby(code).await.ok_or(LobbyError::LobbyNotFound)?;
        if user.lobby.as_deref() != Some(code) {
            return Err(LobbyError::NotMember);
        }
        Ok((user, lobby))
    }

    pub async fn heartbeat(&self, user_id: &str, now: Instant) {
        if let Some(u) = self.inner.identities.lock().await.users.get_mut(user_id) {
            u.last_activity = now;
        }
    }

    /// Leaves `logout_grace` on the idle clock so the reaper picks the user up soon.
    pub async fn logout(&self, user_id: &str, now: Instant) {
        let s = &self.inner.settings;
        let backdate = s.idle_timeout.saturating_sub(s.logout_grace);
        if let Some(u) = self.inner.identities.lock().await.users.get_mut(user_id) {
            u.last_activity = now.checked_sub(backdate).unwrap_or(now);
            tracing::debug!(user.id = %user_id, "user logging out");
        }
    }

    /* ---------------- entry points ---------------- */

    pub async fn create(
        &self,
        name: &str,
        mode: PlaybackMode,
        user_limit: usize,
        ip: &str,
        session: Option<&str>,
    ) -> LobbyResult<Joined> {
        validate_name(name)?;
        let lobby = self.create_lobby(mode, user_limit, ip).await?;
        self.purge_session(session, ip).await;
        self.enter(lobby, name, ip).await
    }

    pub async fn join(&self, code: &str, name: &str, ip: &str, session: Option<&str>) -> LobbyResult<Joined> {
        let lobby = self.lobby(code).await.ok_or(LobbyError::LobbyNotFound)?;
        validate_name(name)?;

        let live_here = {
            let idents = self.inner.identities.lock().await;
            idents
                .by_ip(ip)
                .filter(|u| u.lobby.as_deref() == Some(code))
                .map(|u| u.id.clone())
        };
        if live_here.is_some_and(|id| self.inner.notifier.is_connected(&id)) {
            return Err(LobbyError::AlreadyConnected);
        }

        self.purge_session(session, ip).await;
        self.enter(lobby, name, ip).await
    }

    async fn enter(&self, lobby: LobbyHandle, name: &str, ip: &str) -> LobbyResult<Joined> {
        let identity = self.create_user(name, ip).await;
        let display = lobby
            .join(NewMember {
                id: identity.id.clone(),
                name: identity.name.clone(),
                ip: identity.ip.clone(),
            })
            .await?;
        self.bind(&identity.id, lobby.code()).await;
        let identity = Identity { lobby: Some(lobby.code().to_string()), ..identity };
        Ok(Joined { identity, name: display, lobby })
    }
}
