use std::{env, time::Duration};

use anyhow::Context;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const EVENT_CHANNEL_DEPTH: usize = 32; // per connected member

/* ------------ per-lobby timing & limits ------------ */
#[derive(Clone, Debug)]
pub struct LobbySettings {
    pub idle_expiry:         Duration, // lobby destroyed this long after the last touch
    pub resubmit_cooldown:   Duration, // played video blocked from re-enqueue
    pub vote_timeout:        Duration,
    pub mute_duration:       Duration,
    pub mute_vote_cooldown:  Duration, // per IP, creator exempt
    pub queue_cap:           usize,
    pub max_video_duration:  Duration,
    pub mute_sweep_every:    Duration,
    pub history_sweep_every: Duration,
    pub inbox_depth:         usize,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            idle_expiry:         Duration::from_secs(60 * 60),
            resubmit_cooldown:   Duration::from_secs(60 * 60),
            vote_timeout:        Duration::from_secs(30),
            mute_duration:       Duration::from_secs(10 * 60),
            mute_vote_cooldown:  Duration::from_secs(5 * 60),
            queue_cap:           100,
            max_video_duration:  Duration::from_secs(10 * 60),
            mute_sweep_every:    Duration::from_secs(5),
            history_sweep_every: Duration::from_secs(60),
            inbox_depth:         64,
        }
    }
}

/* ------------ process-wide registry ------------ */
#[derive(Clone, Debug)]
pub struct ManagerSettings {
    pub max_lobbies:      usize,
    pub idle_timeout:     Duration, // user removed after this long without a heartbeat
    pub idle_sweep_every: Duration,
    pub logout_grace:     Duration, // time left on the idle clock after an explicit logout
    pub lobby:            LobbySettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_lobbies:      100,
            idle_timeout:     Duration::from_secs(35),
            idle_sweep_every: Duration::from_secs(10),
            logout_grace:     Duration::from_secs(10),
            lobby:            LobbySettings::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub log_level:   String,
    pub yt_api_key:  Option<String>,
    pub use_scrape:  bool, // key-free metadata lookup, on unless USE_SCRAPE is set to something else than "true"
    pub manager:     ManagerSettings,
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0".into());
        let port = match env::var("PORT") {
            Ok(p) => p.parse::<u16>().with_context(|| format!("invalid PORT {p:?}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let mut manager = ManagerSettings::default();
        if let Ok(max) = env::var("MAX_LOBBIES") {
            manager.max_lobbies = max
                .parse()
                .with_context(|| format!("invalid MAX_LOBBIES {max:?}"))?;
        }

        Ok(Self {
            listen_addr: format!("{host}:{port}"),
            log_level:   parse_level(env::var("LOG_LEVEL").ok().as_deref()).to_string(),
            yt_api_key:  env::var("YT_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            use_scrape:  parse_use_scrape(env::var("USE_SCRAPE").ok().as_deref()),
            manager,
        })
    }
}

fn parse_use_scrape(raw: Option<&str>) -> bool {
    raw.map_or(true, |v| v.trim() == "true")
}

fn parse_level(raw: Option<&str>) -> &'static str {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("debug") => "debug",
        Some("warn")  => "warn",
        Some("error") => "error",
        Some("trace") => "trace",
        _             => DEFAULT_LOG_LEVEL,
    }
}
