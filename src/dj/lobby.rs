//! Queue & playback engine plus member bookkeeping for one lobby.
//!
//! Every method takes `now` explicitly; the lobby never reads the clock.
//! Notifications are queued in an outbox and delivered by the caller once
//! the mutation is complete.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use super::{
    embed_url,
    notify::{Event, EventKind, Notice},
    secs_until,
    votes::{MuteVote, SkipVote, VoteView},
    Member, NewMember, PlaybackMode, Video, VideoMeta,
};
use crate::{
    config::LobbySettings,
    error::{LobbyError, LobbyResult},
};

#[derive(Debug)]
pub struct Playing {
    pub video:      Video,
    pub started_at: Instant,
    pub ends_at:    Instant,
}

/// Play-history entry: the id may not be queued again before `eligible_at`.
#[derive(Clone, Debug)]
pub struct Played {
    pub title:       String,
    pub eligible_at: Instant,
    pub skipped:     bool,
}

pub struct Lobby {
    pub code:             String,
    pub mode:             PlaybackMode,
    pub creator_ip:       String,
    pub user_queue_limit: usize,
    pub created_at:       DateTime<Utc>,
    pub(super) settings:             LobbySettings,
    pub(super) expires_at:           Instant,
    pub(super) members:              HashMap<String, Member>,
    pub(super) mutes_by_ip:          HashMap<String, Instant>,
    pub(super) mute_cooldowns_by_ip: HashMap<String, Instant>,
    pub(super) queue:                Vec<Video>,
    pub(super) current:              Option<Playing>,
    pub(super) played:               HashMap<String, Played>,
    pub(super) skip_vote:            SkipVote,
    pub(super) mute_vote:            MuteVote,
    rng:    StdRng,
    outbox: Vec<Notice>,
}

impl Lobby {
    pub fn new(
        code: String,
        mode: PlaybackMode,
        user_queue_limit: usize,
        creator_ip: String,
        settings: LobbySettings,
        now: Instant,
    ) -> Self {
        Self {
            code,
            mode,
            creator_ip,
            user_queue_limit,
            created_at: Utc::now(),
            expires_at: now + settings.idle_expiry,
            settings,
            members: HashMap::new(),
            mutes_by_ip: HashMap::new(),
            mute_cooldowns_by_ip: HashMap::new(),
            queue: Vec::new(),
            current: None,
            played: HashMap::new(),
            skip_vote: SkipVote::default(),
            mute_vote: MuteVote::default(),
            rng: StdRng::from_entropy(),
            outbox: Vec::new(),
        }
    }

    /* ---------------- lifecycle ---------------- */

    /// Pushes the idle-expiry deadline out by a full window.
    pub fn touch(&mut self, now: Instant) {
        self.expires_at = now + self.settings.idle_expiry;
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Tears the lobby down: everyone is told, redirected and disconnected.
    /// Returns the ids of the members that were present.
    pub fn expire(&mut self) -> Vec<String> {
        tracing::info!(lobby.code = %self.code, members = self.members.len(), "lobby expired");
        self.broadcast(Event::empty(EventKind::LobbyExpired));
        let ids: Vec<String> = self.members.keys().cloned().collect();
        for id in &ids {
            self.send_to(id, Event::new(EventKind::Redirect, "/"));
            self.outbox.push(Notice::Close { to: id.clone() });
        }
        self.members.clear();
        self.skip_vote.clear();
        self.mute_vote.clear();
        self.current = None;
        ids
    }

    /* ---------------- members ---------------- */

    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Adds a member and returns the display name actually used; a name
    /// already present (case-insensitive) gets a `#n` suffix.
    pub fn add_member(&mut self, new: NewMember, now: Instant) -> String {
        let wanted = new.name.to_lowercase();
        let dup = 1 + self.members.values().filter(|m| m.name.to_lowercase() == wanted).count();
        let name = if dup > 1 { format!("{}#{}", new.name, dup) } else { new.name };

        let muted_until = self.mutes_by_ip.get(&new.ip).copied().filter(|exp| *exp > now);
        let member = Member {
            id: new.id,
            name: name.clone(),
            ip: new.ip,
            muted_until,
            joined_at: now,
        };
        tracing::debug!(lobby.code = %self.code, user.id = %member.id, user.name = %member.name, "member joined");
        self.members.insert(member.id.clone(), member);
        self.touch(now);
        self.broadcast(Event::empty(EventKind::UsersUpdate));
        name
    }

    /// Removes a member, redirecting and disconnecting them. Absent ids are a no-op.
    pub fn remove_member(&mut self, id: &str) -> bool {
        let Some(member) = self.members.remove(id) else {
            return false;
        };
        tracing::debug!(lobby.code = %self.code, user.id = %member.id, "member removed");
        self.send_to(id, Event::new(EventKind::Redirect, "/"));
        self.outbox.push(Notice::Close { to: id.to_string() });
        self.broadcast(Event::empty(EventKind::UsersUpdate));
        true
    }

    /// Remaining mute for a member, from either the member or its address.
    pub fn muted_until(&self, id: &str, now: Instant) -> Option<Instant> {
        let member = self.members.get(id)?;
        let by_ip = self.mutes_by_ip.get(&member.ip).copied();
        member.muted_until.max(by_ip).filter(|exp| *exp > now)
    }

    /* ---------------- queue & playback ---------------- */

    pub fn current(&self) -> Option<&Playing> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &[Video] {
        &self.queue
    }

    /// Deadline of the current video, paired with its id so a late timer
    /// can tell whether it is still the one playing.
    pub fn playback_deadline(&self) -> Option<(Instant, String)> {
        self.current.as_ref().map(|p| (p.ends_at, p.video.id.clone()))
    }

    pub fn enqueue(&mut self, user_id: &str, meta: VideoMeta, now: Instant) -> LobbyResult<()> {
        let member = self.members.get(user_id).ok_or(LobbyError::NotMember)?;
        if let Some(exp) = self.muted_until(user_id, now) {
            return Err(LobbyError::Muted(secs_until(exp, now)));
        }
        if meta.duration.is_zero() {
            return Err(LobbyError::InvalidDuration);
        }
        if meta.duration > self.settings.max_video_duration {
            return Err(LobbyError::TooLong(self.settings.max_video_duration.as_secs() / 60));
        }
        if self.played.get(&meta.id).is_some_and(|p| p.eligible_at > now) {
            return Err(LobbyError::RecentlyPlayed);
        }
        if self.queue.iter().any(|v| v.id == meta.id) {
            return Err(LobbyError::AlreadyQueued);
        }
        if self.queue.len() >= self.settings.queue_cap {
            return Err(LobbyError::QueueFull);
        }
        let mine = self.queue.iter().filter(|v| v.submitter_id == user_id).count();
        if mine >= self.user_queue_limit {
            return Err(LobbyError::UserQueueLimit);
        }

        let video = Video {
            url: embed_url(&meta.id),
            id: meta.id,
            title: meta.title,
            submitter_id: member.id.clone(),
            submitter_name: member.name.clone(),
            duration: meta.duration,
            was_voted: false,
            was_skipped: false,
        };
        tracing::debug!(lobby.code = %self.code, video.id = %video.id, video.title = %video.title, "video queued");
        self.queue.push(video);

        if self.current.is_none() {
            self.advance(now);
        } else {
            let data = json!({ "playlist": self.queue }).to_string();
            self.broadcast(Event::new(EventKind::PlaylistUpdate, data));
        }
        self.touch(now);
        Ok(())
    }

    /// Moves the next queued video into playback, or settles into the idle
    /// "nothing playing" state when the queue is empty.
    pub fn advance(&mut self, now: Instant) {
        if self.skip_vote.is_active() {
            tracing::debug!(lobby.code = %self.code, "skip vote cancelled by advance");
            self.skip_vote.clear();
            self.broadcast(Event::empty(EventKind::VoteSkipEnd));
        }

        if self.queue.is_empty() {
            self.current = None;
            tracing::debug!(lobby.code = %self.code, "queue empty, nothing playing");
            self.broadcast(Event::empty(EventKind::VideoUpdate));
            return;
        }

        let idx = match self.mode {
            PlaybackMode::Ordered => 0,
            PlaybackMode::Random  => self.rng.gen_range(0..self.queue.len()),
        };
        let video = self.queue.remove(idx);

        self.played.insert(
            video.id.clone(),
            Played {
                title: video.title.clone(),
                eligible_at: now + self.settings.resubmit_cooldown,
                skipped: false,
            },
        );
        tracing::debug!(lobby.code = %self.code, video.id = %video.id, "now playing");

        let data = json!({ "url": video.url, "mode": self.mode, "playlist": self.queue }).to_string();
        self.current = Some(Playing {
            ends_at: now + video.duration,
            started_at: now,
            video,
        });
        self.broadcast(Event::new(EventKind::VideoUpdate, data));
    }

    /// Completion timer callback. Stale timers (a different video is now
    /// playing, or none) do nothing.
    pub fn complete_video(&mut self, video_id: &str, now: Instant) -> bool {
        match &self.current {
            Some(p) if p.video.id == video_id && p.ends_at <= now => {
                self.advance(now);
                true
            }
            _ => false,
        }
    }

    /* ---------------- sweeps ---------------- */

    pub fn sweep_history(&mut self, now: Instant) -> usize {
        let before = self.played.len();
        self.played.retain(|_, p| p.eligible_at > now);
        let removed = before - self.played.len();
        if removed > 0 {
            tracing::debug!(lobby.code = %self.code, removed, "play history decayed");
        }
        removed
    }

    /// Drops lapsed mutes and mute-vote cooldowns; members are told only
    /// when a visible mute changed.
    pub fn sweep_mutes(&mut self, now: Instant) -> bool {
        self.mute_cooldowns_by_ip.retain(|_, exp| *exp > now);

        let before = self.mutes_by_ip.len();
        self.mutes_by_ip.retain(|_, exp| *exp > now);
        let mut changed = before != self.mutes_by_ip.len();

        for m in self.members.values_mut() {
            if m.muted_until.is_some_and(|exp| exp <= now) {
                m.muted_until = None;
                changed = true;
            }
        }

        if changed {
            tracing::debug!(lobby.code = %self.code, "mutes expired");
            self.broadcast(Event::empty(EventKind::UsersUpdate));
        }
        changed
    }

    /* ---------------- notifications ---------------- */

    pub(super) fn broadcast(&mut self, event: Event) {
        for id in self.members.keys() {
            self.outbox.push(Notice::Send { to: id.clone(), event: event.clone() });
        }
    }

    pub(super) fn send_to(&mut self, id: &str, event: Event) {
        self.outbox.push(Notice::Send { to: id.to_string(), event });
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.outbox)
    }

    /* ---------------- read model ---------------- */

    pub fn snapshot(&self, now: Instant) -> LobbySnapshot {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.joined_at);

        let mut history: Vec<HistoryView> = self
            .played
            .iter()
            .map(|(id, p)| HistoryView {
                id: id.clone(),
                title: p.title.clone(),
                skipped: p.skipped,
                eligible_in_secs: secs_until(p.eligible_at, now),
            })
            .collect();
        history.sort_by_key(|h| std::cmp::Reverse(h.eligible_in_secs));

        LobbySnapshot {
            code: self.code.clone(),
            mode: self.mode,
            user_queue_limit: self.user_queue_limit,
            created_at: self.created_at,
            expires_in_secs: secs_until(self.expires_at, now),
            current: self.current().map(|p| NowPlaying {
                video: p.video.clone(),
                elapsed_secs: now.saturating_duration_since(p.started_at).as_secs(),
                remaining_secs: secs_until(p.ends_at, now),
            }),
            queue: self.queue().to_vec(),
            history,
            members: members
                .into_iter()
                .map(|m| MemberView {
                    id: m.id.clone(),
                    name: m.name.clone(),
                    creator: m.ip == self.creator_ip,
                    muted_for_secs: self.muted_until(&m.id, now).map_or(0, |exp| secs_until(exp, now)),
                })
                .collect(),
            skip_vote: self.skip_vote_view(now),
            mute_vote: self.mute_vote_view(now),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LobbySnapshot {
    pub code:             String,
    pub mode:             PlaybackMode,
    pub user_queue_limit: usize,
    pub created_at:       DateTime<Utc>,
    pub expires_in_secs:  u64,
    pub current:          Option<NowPlaying>,
    pub queue:            Vec<Video>,
    pub history:          Vec<HistoryView>,
    pub members:          Vec<MemberView>,
    pub skip_vote:        Option<VoteView>,
    pub mute_vote:        Option<VoteView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NowPlaying {
    #[serde(flatten)]
    pub video:          Video,
    pub elapsed_secs:   u64,
    pub remaining_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryView {
    pub id:               String,
    pub title:            String,
    pub skipped:          bool,
    pub eligible_in_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct MemberView {
    pub id:             String,
    pub name:           String,
    pub creator:        bool,
    pub muted_for_secs: u64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::time::Duration;

    const MIN: Duration = Duration::from_secs(60);

    pub(crate) fn lobby(mode: PlaybackMode, now: Instant) -> Lobby {
        Lobby::new("Lb0Test".into(), mode, 2, "10.0.0.1".into(), LobbySettings::default(), now)
    }

    pub(crate) fn join(l: &mut Lobby, id: &str, ip: &str, now: Instant) -> String {
        l.add_member(
            NewMember { id: id.into(), name: id.into(), ip: ip.into() },
            now,
        )
    }

    pub(crate) fn meta(id: &str, secs: u64) -> VideoMeta {
        VideoMeta { id: id.into(), title: format!("title {id}"), duration: Duration::from_secs(secs) }
    }

    fn video_updates(l: &mut Lobby) -> Vec<Event> {
        l.take_notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Send { event, .. } if event.kind == EventKind::VideoUpdate => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_enqueue_starts_playback_immediately() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.take_notices();

        l.enqueue("ann", meta("aaaaaaaaaaa", 90), t0).unwrap();

        let p = l.current().unwrap();
        assert_eq!(p.video.id, "aaaaaaaaaaa");
        assert_eq!(p.ends_at, t0 + Duration::from_secs(90));
        assert!(l.queue().is_empty());
        let updates = video_updates(&mut l);
        assert_eq!(updates.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&updates[0].data).unwrap();
        assert_eq!(v["url"], "https://www.youtube.com/embed/aaaaaaaaaaa?autoplay=1");
        assert_eq!(v["mode"], "ordered");
    }

    #[test]
    fn ordered_mode_plays_in_insertion_order() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        join(&mut l, "bob", "10.0.0.2", t0);
        l.enqueue("ann", meta("v1", 10), t0).unwrap();
        l.enqueue("bob", meta("v2", 10), t0).unwrap();
        l.enqueue("ann", meta("v3", 10), t0).unwrap();

        let t1 = t0 + Duration::from_secs(10);
        assert!(l.complete_video("v1", t1));
        assert_eq!(l.current().unwrap().video.id, "v2");
        assert!(l.complete_video("v2", t1 + Duration::from_secs(10)));
        assert_eq!(l.current().unwrap().video.id, "v3");
    }

    #[test]
    fn random_mode_takes_some_queued_video() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Random, t0);
        l.user_queue_limit = 10;
        join(&mut l, "ann", "10.0.0.1", t0);
        l.enqueue("ann", meta("v0", 10), t0).unwrap();
        for id in ["v1", "v2", "v3", "v4"] {
            l.enqueue("ann", meta(id, 10), t0).unwrap();
        }
        l.advance(t0);
        let picked = l.current().unwrap().video.id.clone();
        assert_ne!(picked, "v0");
        assert_eq!(l.queue().len(), 3);
        assert!(l.queue().iter().all(|v| v.id != picked));
    }

    #[test]
    fn advance_on_empty_queue_clears_current_and_notifies() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.enqueue("ann", meta("v1", 10), t0).unwrap();
        l.take_notices();

        l.advance(t0 + Duration::from_secs(3));

        assert!(l.current().is_none());
        let updates = video_updates(&mut l);
        assert_eq!(updates, vec![Event::empty(EventKind::VideoUpdate)]);
        // still idle, still fine
        l.advance(t0 + Duration::from_secs(4));
        assert!(l.current().is_none());
    }

    #[test]
    fn stale_completion_timer_is_a_no_op() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.enqueue("ann", meta("v1", 60), t0).unwrap();
        l.enqueue("ann", meta("v2", 60), t0).unwrap();
        l.advance(t0 + Duration::from_secs(5)); // v1 cut short

        assert!(!l.complete_video("v1", t0 + Duration::from_secs(60)));
        assert_eq!(l.current().unwrap().video.id, "v2");
        // right video, but not finished yet
        assert!(!l.complete_video("v2", t0 + Duration::from_secs(30)));
    }

    #[test]
    fn enqueue_rejections() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);

        assert_eq!(l.enqueue("zed", meta("v1", 10), t0), Err(LobbyError::NotMember));
        assert_eq!(l.enqueue("ann", meta("v1", 0), t0), Err(LobbyError::InvalidDuration));
        assert_eq!(l.enqueue("ann", meta("v1", 11 * 60), t0), Err(LobbyError::TooLong(10)));

        l.enqueue("ann", meta("v1", 10), t0).unwrap(); // playing
        l.enqueue("ann", meta("v2", 10), t0).unwrap();
        assert_eq!(l.enqueue("ann", meta("v2", 10), t0), Err(LobbyError::AlreadyQueued));
        assert_eq!(l.enqueue("ann", meta("v1", 10), t0), Err(LobbyError::RecentlyPlayed));
        l.enqueue("ann", meta("v3", 10), t0).unwrap();
        assert_eq!(l.enqueue("ann", meta("v4", 10), t0), Err(LobbyError::UserQueueLimit));
        assert!(l.current().is_some());
        assert_eq!(l.queue().len(), 2);
    }

    #[test]
    fn queue_cap_is_enforced() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        l.settings.queue_cap = 2;
        l.user_queue_limit = 20;
        join(&mut l, "ann", "10.0.0.1", t0);
        for id in ["v1", "v2", "v3"] {
            l.enqueue("ann", meta(id, 10), t0).unwrap();
        }
        assert_eq!(l.queue().len(), 2);
        assert_eq!(l.enqueue("ann", meta("v4", 10), t0), Err(LobbyError::QueueFull));
    }

    #[test]
    fn replayed_video_becomes_eligible_after_cooldown() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.enqueue("ann", meta("v1", 10), t0).unwrap();
        l.complete_video("v1", t0 + Duration::from_secs(10));

        let t_soon = t0 + 59 * MIN;
        assert_eq!(l.enqueue("ann", meta("v1", 10), t_soon), Err(LobbyError::RecentlyPlayed));

        let t_later = t0 + 61 * MIN;
        assert_eq!(l.sweep_history(t_later), 1);
        assert!(!l.played.contains_key("v1"));
        l.enqueue("ann", meta("v1", 10), t_later).unwrap();
        assert_eq!(l.current().unwrap().video.id, "v1");
    }

    #[test]
    fn eligibility_is_checked_even_before_the_sweep() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.enqueue("ann", meta("v1", 10), t0).unwrap();
        l.advance(t0 + Duration::from_secs(10));
        l.enqueue("ann", meta("v1", 10), t0 + 60 * MIN + Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn muted_member_cannot_enqueue() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.mutes_by_ip.insert("10.0.0.1".into(), t0 + Duration::from_secs(90));
        assert_eq!(l.enqueue("ann", meta("v1", 10), t0), Err(LobbyError::Muted(90)));
        l.enqueue("ann", meta("v1", 10), t0 + Duration::from_secs(91)).unwrap();
    }

    #[test]
    fn touch_resets_expiry_window() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        l.touch(t0);
        l.touch(t0 + 59 * MIN);
        assert!(l.expires_at() > t0 + 61 * MIN);
        assert_eq!(l.expires_at(), t0 + 119 * MIN);
        assert!(l.expires_at() < t0 + 120 * MIN + Duration::from_millis(1));
    }

    #[test]
    fn expire_redirects_and_closes_everyone() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        join(&mut l, "bob", "10.0.0.2", t0);
        l.take_notices();

        let mut gone = l.expire();
        gone.sort();
        assert_eq!(gone, vec!["ann", "bob"]);
        assert_eq!(l.member_count(), 0);
        let notices = l.take_notices();
        let closes = notices.iter().filter(|n| matches!(n, Notice::Close { .. })).count();
        assert_eq!(closes, 2);
        assert!(notices.iter().any(|n| matches!(
            n,
            Notice::Send { event, .. } if event.kind == EventKind::LobbyExpired
        )));
    }

    #[test]
    fn duplicate_names_get_counter_suffix() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        let first = l.add_member(
            NewMember { id: "u1".into(), name: "Alice".into(), ip: "1.1.1.1".into() },
            t0,
        );
        let second = l.add_member(
            NewMember { id: "u2".into(), name: "alice".into(), ip: "1.1.1.2".into() },
            t0,
        );
        let third = l.add_member(
            NewMember { id: "u3".into(), name: "Bob".into(), ip: "1.1.1.3".into() },
            t0,
        );
        assert_eq!(first, "Alice");
        assert_eq!(second, "alice#2");
        assert_eq!(third, "Bob");
    }

    #[test]
    fn rejoin_from_muted_address_stays_muted() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        l.mutes_by_ip.insert("10.9.9.9".into(), t0 + 5 * MIN);
        join(&mut l, "eve", "10.9.9.9", t0);
        assert_eq!(l.member("eve").unwrap().muted_until, Some(t0 + 5 * MIN));
    }

    #[test]
    fn removing_a_member_redirects_and_closes_them() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        join(&mut l, "bob", "10.0.0.2", t0);
        l.take_notices();

        assert!(l.remove_member("bob"));
        assert!(!l.remove_member("bob"));
        let notices = l.take_notices();
        assert!(notices.contains(&Notice::Send { to: "bob".into(), event: Event::new(EventKind::Redirect, "/") }));
        assert!(notices.contains(&Notice::Close { to: "bob".into() }));
        assert!(notices.contains(&Notice::Send { to: "ann".into(), event: Event::empty(EventKind::UsersUpdate) }));
    }

    #[test]
    fn mute_sweep_only_notifies_on_visible_change() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        l.mute_cooldowns_by_ip.insert("10.0.0.1".into(), t0 + Duration::from_secs(1));
        l.take_notices();

        assert!(!l.sweep_mutes(t0 + Duration::from_secs(2)));
        assert!(l.mute_cooldowns_by_ip.is_empty());
        assert!(l.take_notices().is_empty());

        l.mutes_by_ip.insert("10.0.0.1".into(), t0 + Duration::from_secs(3));
        l.members.get_mut("ann").unwrap().muted_until = Some(t0 + Duration::from_secs(3));
        assert!(l.sweep_mutes(t0 + Duration::from_secs(4)));
        assert!(l.member("ann").unwrap().muted_until.is_none());
        assert_eq!(l.take_notices().len(), 1);
    }

    #[test]
    fn snapshot_reports_progress_and_members() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        join(&mut l, "bob", "10.0.0.2", t0 + Duration::from_secs(1));
        l.enqueue("bob", meta("v1", 100), t0).unwrap();

        let snap = l.snapshot(t0 + Duration::from_secs(40));
        let current = snap.current.unwrap();
        assert_eq!(current.elapsed_secs, 40);
        assert_eq!(current.remaining_secs, 60);
        assert_eq!(snap.members[0].name, "ann");
        assert!(snap.members[0].creator);
        assert!(!snap.members[1].creator);
        assert_eq!(snap.history.len(), 1);
        assert!(snap.skip_vote.is_none());
    }
}
