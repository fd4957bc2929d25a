//! Skip and mute votes.
//!
//! Both votes share one shape: a target, a deadline, and two disjoint
//! ballot sets. They differ in what they target, who may start them and how
//! a result is decided.

use std::collections::HashSet;

use serde::Serialize;
use tokio::time::Instant;

use super::{
    lobby::Lobby,
    notify::{toast, Event, EventKind, ToastKind},
    secs_until, Ballot,
};
use crate::error::{LobbyError, LobbyResult};

/// Yes-votes needed to end a skip vote early: `ceil((n + 1) / 2)`.
pub fn skip_quorum(members: usize) -> usize {
    (members + 1).div_ceil(2)
}

/// Yes-votes needed for a mute: strictly more than half, `(n + 2) / 2`.
pub fn mute_quorum(members: usize) -> usize {
    members / 2 + 1
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    Passed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipStart {
    Started,
    /// Too few members to vote; the video was skipped outright.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteProgress {
    Pending,
    Resolved(VoteOutcome),
}

/// Yes/no ballots keyed by voter id. A voter is never in both sets.
#[derive(Debug, Default)]
pub struct Tally {
    yes: HashSet<String>,
    no:  HashSet<String>,
}

impl Tally {
    pub fn cast(&mut self, voter: &str, ballot: Ballot) {
        match ballot {
            Ballot::Yes => {
                self.no.remove(voter);
                self.yes.insert(voter.to_string());
            }
            Ballot::No => {
                self.yes.remove(voter);
                self.no.insert(voter.to_string());
            }
        }
    }

    pub fn yes(&self) -> usize {
        self.yes.len()
    }

    pub fn no(&self) -> usize {
        self.no.len()
    }

    fn clear(&mut self) {
        self.yes.clear();
        self.no.clear();
    }
}

#[derive(Debug, Default)]
pub struct SkipVote {
    pub video_id: Option<String>,
    pub deadline: Option<Instant>,
    pub tally:    Tally,
}

impl SkipVote {
    pub fn is_active(&self) -> bool {
        self.video_id.is_some()
    }

    pub fn clear(&mut self) {
        self.video_id = None;
        self.deadline = None;
        self.tally.clear();
    }
}

#[derive(Clone, Debug)]
pub struct MuteTarget {
    pub id:   String,
    pub name: String,
    /// Kept so a passed vote still mutes the address if the target left.
    pub ip:   String,
}

#[derive(Debug, Default)]
pub struct MuteVote {
    pub target:    Option<MuteTarget>,
    pub initiator: Option<String>,
    pub deadline:  Option<Instant>,
    pub tally:     Tally,
}

impl MuteVote {
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn clear(&mut self) {
        self.target = None;
        self.initiator = None;
        self.deadline = None;
        self.tally.clear();
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct VoteView {
    pub subject:        String,
    pub target_id:      Option<String>,
    pub initiator:      Option<String>,
    pub yes:            usize,
    pub no:             usize,
    pub required:       usize,
    pub remaining_secs: u64,
}

impl Lobby {
    /* ---------------- skip ---------------- */

    pub fn skip_vote_deadline(&self) -> Option<Instant> {
        self.skip_vote.deadline
    }

    pub fn start_skip_vote(&mut self, user_id: &str, now: Instant) -> LobbyResult<SkipStart> {
        if !self.members.contains_key(user_id) {
            return Err(LobbyError::NotMember);
        }
        let lone = self.member_count() < 2;
        let Some(playing) = self.current.as_mut() else {
            return Err(LobbyError::NoVideoPlaying);
        };
        if playing.video.was_voted {
            return Err(LobbyError::AlreadySurvivedVote);
        }
        if self.skip_vote.is_active() {
            return Err(LobbyError::VoteAlreadyActive("skip"));
        }

        if lone {
            playing.video.was_skipped = true;
            let id = playing.video.id.clone();
            tracing::debug!(lobby.code = %self.code, video.id = %id, "lone member, skipping without a vote");
            self.mark_skipped(&id, now);
            self.advance(now);
            self.broadcast(Event::new(
                EventKind::VoteSkipEnd,
                toast("Vote to skip automatically succeeded", ToastKind::Success),
            ));
            return Ok(SkipStart::Skipped);
        }

        self.skip_vote.video_id = Some(playing.video.id.clone());
        self.skip_vote.deadline = Some(now + self.settings.vote_timeout);
        self.skip_vote.tally.cast(user_id, Ballot::Yes);
        tracing::debug!(lobby.code = %self.code, user.id = %user_id, "skip vote started");

        self.broadcast_skip_status(now);
        Ok(SkipStart::Started)
    }

    pub fn cast_skip_vote(&mut self, user_id: &str, ballot: Ballot, now: Instant) -> LobbyResult<VoteProgress> {
        if !self.members.contains_key(user_id) {
            return Err(LobbyError::NotMember);
        }
        let current_id = self.current.as_ref().map(|p| p.video.id.as_str());
        if !self.skip_vote.is_active() || self.skip_vote.video_id.as_deref() != current_id {
            return Err(LobbyError::NoActiveVote);
        }

        self.skip_vote.tally.cast(user_id, ballot);
        tracing::debug!(lobby.code = %self.code, user.id = %user_id, ?ballot, "skip ballot recorded");

        if self.skip_vote.tally.yes() >= skip_quorum(self.members.len()) {
            tracing::debug!(lobby.code = %self.code, "skip vote reached quorum before timeout");
            let outcome = self.resolve_skip_vote(now).unwrap_or(VoteOutcome::Failed);
            return Ok(VoteProgress::Resolved(outcome));
        }

        self.broadcast_skip_status(now);
        Ok(VoteProgress::Pending)
    }

    /// Settles the active skip vote (timer expiry or early quorum).
    /// `None` when there is nothing left to settle.
    pub fn resolve_skip_vote(&mut self, now: Instant) -> Option<VoteOutcome> {
        let video_id = self.skip_vote.video_id.clone()?;
        let (yes, no) = (self.skip_vote.tally.yes(), self.skip_vote.tally.no());
        self.skip_vote.clear();

        let still_playing = self.current.as_ref().is_some_and(|p| p.video.id == video_id);
        if !still_playing {
            tracing::debug!(lobby.code = %self.code, video.id = %video_id, "skip vote target already gone");
            self.broadcast(Event::empty(EventKind::VoteSkipEnd));
            return None;
        }

        let outcome = if yes >= 2 && yes > no { VoteOutcome::Passed } else { VoteOutcome::Failed };
        tracing::debug!(lobby.code = %self.code, video.id = %video_id, yes, no, ?outcome, "skip vote resolved");

        let message = match outcome {
            VoteOutcome::Passed => {
                if let Some(p) = self.current.as_mut() {
                    p.video.was_skipped = true;
                }
                self.mark_skipped(&video_id, now);
                self.advance(now);
                toast("Vote to skip passed!", ToastKind::Success)
            }
            VoteOutcome::Failed => {
                if let Some(p) = self.current.as_mut() {
                    p.video.was_voted = true;
                }
                toast("Vote to skip failed.", ToastKind::Error)
            }
        };
        self.broadcast(Event::new(EventKind::VoteSkipEnd, message));
        Some(outcome)
    }

    fn mark_skipped(&mut self, video_id: &str, now: Instant) {
        if let Some(p) = self.played.get_mut(video_id) {
            p.skipped = true;
            p.eligible_at = now + self.settings.resubmit_cooldown;
        }
    }

    fn broadcast_skip_status(&mut self, now: Instant) {
        let data = self
            .skip_vote_view(now)
            .and_then(|v| serde_json::to_string(&v).ok())
            .unwrap_or_default();
        self.broadcast(Event::new(EventKind::VoteSkipUpdate, data));
    }

    pub(super) fn skip_vote_view(&self, now: Instant) -> Option<VoteView> {
        let video_id = self.skip_vote.video_id.clone()?;
        Some(VoteView {
            subject: video_id,
            target_id: None,
            initiator: None,
            yes: self.skip_vote.tally.yes(),
            no: self.skip_vote.tally.no(),
            required: skip_quorum(self.members.len()),
            remaining_secs: self.skip_vote.deadline.map_or(0, |d| secs_until(d, now)),
        })
    }

    /* ---------------- mute ---------------- */

    pub fn mute_vote_deadline(&self) -> Option<Instant> {
        self.mute_vote.deadline
    }

    pub fn start_mute_vote(&mut self, user_id: &str, target_id: &str, now: Instant) -> LobbyResult<()> {
        let initiator = self.member(user_id).ok_or(LobbyError::NotMember)?;
        if self.mute_vote.is_active() {
            return Err(LobbyError::VoteAlreadyActive("mute"));
        }
        if user_id == target_id {
            return Err(LobbyError::SelfMute);
        }
        if self.mute_cooldowns_by_ip.get(&initiator.ip).is_some_and(|cd| *cd > now) {
            return Err(LobbyError::MuteCooldown);
        }
        let target = self.member(target_id).ok_or(LobbyError::UnknownTarget)?;

        let target = MuteTarget { id: target.id.clone(), name: target.name.clone(), ip: target.ip.clone() };
        let initiator_ip = initiator.ip.clone();
        if initiator_ip != self.creator_ip {
            self.mute_cooldowns_by_ip.insert(initiator_ip, now + self.settings.mute_vote_cooldown);
        }

        tracing::debug!(lobby.code = %self.code, user.id = %user_id, mute.target = %target.id, "mute vote started");
        self.mute_vote.target = Some(target);
        self.mute_vote.initiator = Some(user_id.to_string());
        self.mute_vote.deadline = Some(now + self.settings.vote_timeout);
        self.mute_vote.tally.cast(user_id, Ballot::Yes);

        self.broadcast_mute_status(now);
        Ok(())
    }

    pub fn cast_mute_vote(&mut self, user_id: &str, ballot: Ballot, now: Instant) -> LobbyResult<VoteProgress> {
        if !self.members.contains_key(user_id) {
            return Err(LobbyError::NotMember);
        }
        if !self.mute_vote.is_active() {
            return Err(LobbyError::NoActiveVote);
        }

        self.mute_vote.tally.cast(user_id, ballot);
        tracing::debug!(lobby.code = %self.code, user.id = %user_id, ?ballot, "mute ballot recorded");

        if self.mute_vote.tally.yes() >= mute_quorum(self.members.len()) {
            tracing::debug!(lobby.code = %self.code, "mute vote reached quorum before timeout");
            let outcome = self.resolve_mute_vote(now).unwrap_or(VoteOutcome::Failed);
            return Ok(VoteProgress::Resolved(outcome));
        }

        self.broadcast_mute_status(now);
        Ok(VoteProgress::Pending)
    }

    /// Settles the active mute vote. A passed vote mutes the target and
    /// its address for the same span.
    pub fn resolve_mute_vote(&mut self, now: Instant) -> Option<VoteOutcome> {
        let target = self.mute_vote.target.clone()?;
        let yes = self.mute_vote.tally.yes();
        self.mute_vote.clear();

        let outcome = if yes >= mute_quorum(self.members.len()) { VoteOutcome::Passed } else { VoteOutcome::Failed };
        tracing::debug!(lobby.code = %self.code, mute.target = %target.id, yes, ?outcome, "mute vote resolved");

        let message = match outcome {
            VoteOutcome::Passed => {
                let exp = now + self.settings.mute_duration;
                self.mutes_by_ip.insert(target.ip.clone(), exp);
                for m in self.members.values_mut().filter(|m| m.id == target.id || m.ip == target.ip) {
                    m.muted_until = Some(exp);
                }
                toast(&format!("Vote to mute {} passed!", target.name), ToastKind::Success)
            }
            VoteOutcome::Failed => toast(&format!("Vote to mute {} failed.", target.name), ToastKind::Error),
        };
        self.broadcast(Event::new(EventKind::VoteMuteEnd, message));
        if outcome == VoteOutcome::Passed {
            self.broadcast(Event::empty(EventKind::UsersUpdate));
        }
        Some(outcome)
    }

    fn broadcast_mute_status(&mut self, now: Instant) {
        let data = self
            .mute_vote_view(now)
            .and_then(|v| serde_json::to_string(&v).ok())
            .unwrap_or_default();
        self.broadcast(Event::new(EventKind::VoteMuteUpdate, data));
    }

    pub(super) fn mute_vote_view(&self, now: Instant) -> Option<VoteView> {
        let target = self.mute_vote.target.as_ref()?;
        Some(VoteView {
            subject: target.name.clone(),
            target_id: Some(target.id.clone()),
            initiator: self.mute_vote.initiator.clone(),
            yes: self.mute_vote.tally.yes(),
            no: self.mute_vote.tally.no(),
            required: mute_quorum(self.members.len()),
            remaining_secs: self.mute_vote.deadline.map_or(0, |d| secs_until(d, now)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dj::{
        lobby::tests::{join, lobby, meta},
        notify::Notice,
        PlaybackMode,
    };
    use tokio::time::Duration;

    fn playing_lobby(members: &[&str], t0: Instant) -> Lobby {
        let mut l = lobby(PlaybackMode::Ordered, t0);
        for (i, m) in members.iter().enumerate() {
            join(&mut l, m, &format!("10.0.0.{}", i + 1), t0);
        }
        l.enqueue(members[0], meta("v1", 300), t0).unwrap();
        l.enqueue(members[0], meta("v2", 300), t0).unwrap();
        l.take_notices();
        l
    }

    #[test]
    fn quorum_arithmetic() {
        assert_eq!(skip_quorum(1), 1);
        assert_eq!(skip_quorum(2), 2);
        assert_eq!(skip_quorum(3), 2);
        assert_eq!(skip_quorum(4), 3);
        assert_eq!(skip_quorum(5), 3);
        assert_eq!(mute_quorum(2), 2);
        assert_eq!(mute_quorum(3), 2);
        assert_eq!(mute_quorum(4), 3);
        assert_eq!(mute_quorum(5), 3);
    }

    #[test]
    fn ballots_stay_disjoint() {
        let mut t = Tally::default();
        t.cast("a", Ballot::Yes);
        t.cast("a", Ballot::No);
        t.cast("a", Ballot::Yes);
        t.cast("b", Ballot::No);
        assert_eq!((t.yes(), t.no()), (1, 1));
        assert!(t.yes.contains("a") && !t.no.contains("a"));
        assert!(t.no.contains("b") && !t.yes.contains("b"));
    }

    #[test]
    fn lone_member_skips_without_a_vote() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann"], t0);

        assert_eq!(l.start_skip_vote("ann", t0), Ok(SkipStart::Skipped));
        assert_eq!(l.current().unwrap().video.id, "v2");
        assert!(!l.skip_vote.is_active());
        assert!(l.played["v1"].skipped);
    }

    #[test]
    fn skip_needs_a_playing_video_and_one_vote_at_a_time() {
        let t0 = Instant::now();
        let mut l = lobby(PlaybackMode::Ordered, t0);
        join(&mut l, "ann", "10.0.0.1", t0);
        join(&mut l, "bob", "10.0.0.2", t0);
        assert_eq!(l.start_skip_vote("ann", t0), Err(LobbyError::NoVideoPlaying));

        let mut l = playing_lobby(&["ann", "bob"], t0);
        assert_eq!(l.start_skip_vote("ann", t0), Ok(SkipStart::Started));
        assert_eq!(l.start_skip_vote("bob", t0), Err(LobbyError::VoteAlreadyActive("skip")));
        assert_eq!(l.skip_vote_deadline(), Some(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn three_members_two_yes_passes() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);
        l.start_skip_vote("ann", t0).unwrap();

        let res = l.cast_skip_vote("bob", Ballot::Yes, t0 + Duration::from_secs(2));
        assert_eq!(res, Ok(VoteProgress::Resolved(VoteOutcome::Passed)));
        assert_eq!(l.current().unwrap().video.id, "v2");
        assert!(l.skip_vote_deadline().is_none());
    }

    #[test]
    fn two_yes_no_no_at_timeout_passes() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat", "dan"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        assert_eq!(l.cast_skip_vote("bob", Ballot::Yes, t0), Ok(VoteProgress::Pending));

        assert_eq!(l.resolve_skip_vote(t0 + Duration::from_secs(30)), Some(VoteOutcome::Passed));
        assert_eq!(l.current().unwrap().video.id, "v2");
    }

    #[test]
    fn tie_fails_and_video_survives() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat", "dan", "eve"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        l.cast_skip_vote("bob", Ballot::Yes, t0).unwrap();
        l.cast_skip_vote("cat", Ballot::No, t0).unwrap();
        l.cast_skip_vote("dan", Ballot::No, t0).unwrap();

        assert_eq!(l.resolve_skip_vote(t0 + Duration::from_secs(30)), Some(VoteOutcome::Failed));
        let p = l.current().unwrap();
        assert_eq!(p.video.id, "v1");
        assert!(p.video.was_voted);
        assert_eq!(l.start_skip_vote("eve", t0), Err(LobbyError::AlreadySurvivedVote));
    }

    #[test]
    fn single_yes_is_never_enough() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        assert_eq!(l.resolve_skip_vote(t0 + Duration::from_secs(30)), Some(VoteOutcome::Failed));
    }

    #[test]
    fn changing_a_ballot_moves_it_between_sets() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat", "dan", "eve"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        l.cast_skip_vote("bob", Ballot::No, t0).unwrap();
        l.cast_skip_vote("ann", Ballot::No, t0).unwrap();
        let v = &l.skip_vote;
        assert_eq!((v.tally.yes(), v.tally.no()), (0, 2));
        assert!(v.tally.no.contains("ann"));
    }

    #[test]
    fn skip_timer_after_advance_is_a_no_op() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        l.advance(t0 + Duration::from_secs(5));
        assert!(!l.skip_vote.is_active());
        assert_eq!(l.resolve_skip_vote(t0 + Duration::from_secs(30)), None);
        assert_eq!(l.cast_skip_vote("bob", Ballot::Yes, t0), Err(LobbyError::NoActiveVote));
    }

    #[test]
    fn skip_result_is_broadcast() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        l.take_notices();
        l.cast_skip_vote("bob", Ballot::Yes, t0).unwrap();
        let ends = l
            .take_notices()
            .into_iter()
            .filter(|n| matches!(n, Notice::Send { event, .. } if event.kind == EventKind::VoteSkipEnd))
            .count();
        assert_eq!(ends, 3);
    }

    #[test]
    fn mute_start_rejections() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);

        assert_eq!(l.start_mute_vote("bob", "bob", t0), Err(LobbyError::SelfMute));
        assert_eq!(l.start_mute_vote("bob", "nobody", t0), Err(LobbyError::UnknownTarget));
        l.start_mute_vote("bob", "cat", t0).unwrap();
        assert_eq!(l.start_mute_vote("ann", "cat", t0), Err(LobbyError::VoteAlreadyActive("mute")));
    }

    #[test]
    fn mute_success_sets_user_and_address_to_same_expiry() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);
        l.start_mute_vote("ann", "cat", t0).unwrap();

        let res = l.cast_mute_vote("bob", Ballot::Yes, t0 + Duration::from_secs(1));
        assert_eq!(res, Ok(VoteProgress::Resolved(VoteOutcome::Passed)));

        let exp = t0 + Duration::from_secs(1) + Duration::from_secs(600);
        assert_eq!(l.member("cat").unwrap().muted_until, Some(exp));
        assert_eq!(l.mutes_by_ip.get("10.0.0.3"), Some(&exp));
        assert_eq!(l.enqueue("cat", meta("v9", 10), t0), Err(LobbyError::Muted(601)));
        assert!(!l.mute_vote.is_active());
    }

    #[test]
    fn mute_fails_without_majority_at_timeout() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat", "dan"], t0);
        l.start_mute_vote("ann", "cat", t0).unwrap();
        l.cast_mute_vote("bob", Ballot::Yes, t0).unwrap();
        l.cast_mute_vote("cat", Ballot::No, t0).unwrap();

        assert_eq!(l.resolve_mute_vote(t0 + Duration::from_secs(30)), Some(VoteOutcome::Failed));
        assert!(l.member("cat").unwrap().muted_until.is_none());
        assert!(l.mutes_by_ip.is_empty());
        assert_eq!(l.resolve_mute_vote(t0 + Duration::from_secs(31)), None);
    }

    #[test]
    fn mute_sticks_to_the_address_after_target_leaves() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);
        l.start_mute_vote("ann", "cat", t0).unwrap();
        l.remove_member("cat");
        l.cast_mute_vote("bob", Ballot::Yes, t0).unwrap();
        assert!(l.mutes_by_ip.contains_key("10.0.0.3"));
    }

    #[test]
    fn mute_vote_cooldown_applies_except_for_creator() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat"], t0);

        // bob is not the creator: cooldown after starting one
        l.start_mute_vote("bob", "cat", t0).unwrap();
        l.resolve_mute_vote(t0 + Duration::from_secs(30));
        assert_eq!(l.start_mute_vote("bob", "cat", t0 + Duration::from_secs(31)), Err(LobbyError::MuteCooldown));
        l.start_mute_vote("bob", "cat", t0 + Duration::from_secs(301)).unwrap();
        l.resolve_mute_vote(t0 + Duration::from_secs(331));

        // ann joined from the creator address
        l.start_mute_vote("ann", "cat", t0 + Duration::from_secs(332)).unwrap();
        l.resolve_mute_vote(t0 + Duration::from_secs(362));
        l.start_mute_vote("ann", "cat", t0 + Duration::from_secs(363)).unwrap();
    }

    #[test]
    fn vote_views_report_requirements() {
        let t0 = Instant::now();
        let mut l = playing_lobby(&["ann", "bob", "cat", "dan"], t0);
        l.start_skip_vote("ann", t0).unwrap();
        l.start_mute_vote("bob", "dan", t0).unwrap();
        let snap = l.snapshot(t0 + Duration::from_secs(10));

        let skip = snap.skip_vote.unwrap();
        assert_eq!((skip.yes, skip.required, skip.remaining_secs), (1, 3, 20));
        let mute = snap.mute_vote.unwrap();
        assert_eq!(mute.subject, "dan");
        assert_eq!(mute.initiator.as_deref(), Some("bob"));
        assert_eq!(mute.required, 3);
    }
}
