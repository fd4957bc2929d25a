//! Lobby state machine: shared video queue, playback, skip/mute votes, and
//! the registry that owns every live lobby and user identity.

pub mod actor;
pub mod lobby;
pub mod manager;
pub mod notify;
pub mod votes;

use serde::{Deserialize, Serialize, Serializer};
use tokio::time::{Duration, Instant};

pub use actor::LobbyHandle;
pub use lobby::LobbySnapshot;
pub use manager::{Identity, LobbyManager};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    #[default]
    #[serde(alias = "linear")]
    Ordered,
    #[serde(alias = "shuffle")]
    Random,
}

impl PlaybackMode {
    /// Unknown input plays in order.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "random" | "shuffle" => PlaybackMode::Random,
            _ => PlaybackMode::Ordered,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ballot {
    Yes,
    No,
}

impl Ballot {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yes" => Some(Ballot::Yes),
            "no" => Some(Ballot::No),
            _ => None,
        }
    }
}

/// What the metadata collaborator reports for a video id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoMeta {
    pub id:       String,
    pub title:    String,
    pub duration: Duration,
}

#[derive(Clone, Debug, Serialize)]
pub struct Video {
    pub id:             String,
    pub title:          String,
    pub url:            String,
    pub submitter_id:   String,
    pub submitter_name: String,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration:       Duration,
    /// Survived a failed skip vote during this play.
    pub was_voted:      bool,
    pub was_skipped:    bool,
}

pub fn embed_url(video_id: &str) -> String {
    format!("https://www.youtube.com/embed/{video_id}?autoplay=1")
}

#[derive(Clone, Debug)]
pub struct Member {
    pub id:          String,
    pub name:        String,
    pub ip:          String,
    pub muted_until: Option<Instant>,
    pub joined_at:   Instant,
}

#[derive(Clone, Debug)]
pub struct NewMember {
    pub id:   String,
    pub name: String,
    pub ip:   String,
}

/// Whole seconds left until `deadline`, rounded up.
pub fn secs_until(deadline: Instant, now: Instant) -> u64 {
    let left = deadline.saturating_duration_since(now);
    left.as_secs() + u64::from(left.subsec_nanos() > 0)
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}
