use rand::Rng;
use std::env;
use std::time::Duration;

/// App name used on the relay for both the lobby and game rooms
pub const PRESENCE_APP: &str = "chess3d";
pub const PRESENCE_ROOM: &str = "lobby";

pub const DEFAULT_SEARCH_DEPTH: u32 = 10;
pub const SEARCH_DEPTH_MIN: u32 = 1;
pub const SEARCH_DEPTH_MAX: u32 = 20;

pub const MAX_NAME_LEN: usize = 24;
pub const DEFAULT_PLAYER_NAME: &str = "Player";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeControl {
    pub id: &'static str,
    pub label: &'static str,
    /// Starting clock; `None` means untimed
    pub initial_ms: Option<u64>,
    pub increment_ms: u64,
}

impl TimeControl {
    pub fn initial(&self) -> Option<Duration> {
        self.initial_ms.map(Duration::from_millis)
    }

    pub fn increment(&self) -> Duration {
        Duration::from_millis(self.increment_ms)
    }
}

pub const TIME_CONTROLS: &[TimeControl] = &[
    TimeControl { id: "casual", label: "Casual (No Clock)", initial_ms: None, increment_ms: 0 },
    TimeControl { id: "bullet", label: "Bullet 1+0", initial_ms: Some(60_000), increment_ms: 0 },
    TimeControl { id: "blitz", label: "Blitz 3+2", initial_ms: Some(180_000), increment_ms: 2_000 },
    TimeControl { id: "rapid", label: "Rapid 10+0", initial_ms: Some(600_000), increment_ms: 0 },
    TimeControl { id: "classic", label: "Classic 30+0", initial_ms: Some(1_800_000), increment_ms: 0 },
];

/// Look up a time control, falling back to casual
pub fn resolve_time_control(id: &str) -> &'static TimeControl {
    TIME_CONTROLS
        .iter()
        .find(|tc| tc.id == id)
        .unwrap_or(&TIME_CONTROLS[0])
}

/// Engine strength settings sent as UCI options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub skill: u8,
    /// Elo cap; `None` leaves strength unlimited
    pub elo: Option<u16>,
}

pub const AI_PRESETS: &[AiPreset] = &[
    AiPreset { id: "custom", label: "Custom Engine", skill: 20, elo: None },
    AiPreset { id: "beginner", label: "Beginner Bot (~900)", skill: 2, elo: Some(900) },
    AiPreset { id: "club", label: "Club Bot (~1500)", skill: 8, elo: Some(1500) },
    AiPreset { id: "master", label: "Master Bot (~2200)", skill: 16, elo: Some(2200) },
    AiPreset { id: "magnus", label: "Magnus Bot (Approx)", skill: 20, elo: None },
];

pub fn resolve_ai_preset(id: &str) -> &'static AiPreset {
    AI_PRESETS
        .iter()
        .find(|preset| preset.id == id)
        .unwrap_or(&AI_PRESETS[0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    /// Uniformly random legal moves
    Random,
    /// External UCI engine
    Engine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiLevel {
    pub id: &'static str,
    pub label: &'static str,
    pub mode: AiMode,
    pub preset: &'static str,
    pub depth: u32,
}

impl AiLevel {
    pub fn preset(&self) -> &'static AiPreset {
        resolve_ai_preset(self.preset)
    }
}

pub const AI_LEVELS: &[AiLevel] = &[
    AiLevel { id: "pathetic", label: "Pathetic", mode: AiMode::Random, preset: "custom", depth: 1 },
    AiLevel { id: "novice", label: "Novice", mode: AiMode::Engine, preset: "beginner", depth: 4 },
    AiLevel { id: "easy", label: "Easy", mode: AiMode::Engine, preset: "beginner", depth: 6 },
    AiLevel { id: "medium", label: "Medium", mode: AiMode::Engine, preset: "club", depth: 9 },
    AiLevel { id: "hard", label: "Hard", mode: AiMode::Engine, preset: "master", depth: 12 },
    AiLevel { id: "brutal", label: "Brutal", mode: AiMode::Engine, preset: "custom", depth: 16 },
    AiLevel { id: "magnus", label: "Magnus (Approx)", mode: AiMode::Engine, preset: "magnus", depth: 20 },
];

/// Look up an AI level, falling back to the random mover
pub fn resolve_ai_level(id: &str) -> &'static AiLevel {
    AI_LEVELS
        .iter()
        .find(|level| level.id == id)
        .unwrap_or(&AI_LEVELS[0])
}

/// Clamp a requested search depth into the supported range
pub fn clamp_depth(depth: Option<i64>) -> u32 {
    match depth {
        Some(d) => d.clamp(SEARCH_DEPTH_MIN as i64, SEARCH_DEPTH_MAX as i64) as u32,
        None => DEFAULT_SEARCH_DEPTH,
    }
}

/// Collapse whitespace, trim and cap a display name. Empty stays empty.
pub fn clean_player_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_NAME_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Like [`clean_player_name`] but never empty
pub fn sanitize_player_name(raw: &str) -> String {
    let name = clean_player_name(raw);
    if name.is_empty() {
        DEFAULT_PLAYER_NAME.to_string()
    } else {
        name
    }
}

/// Six uppercase alphanumerics
pub fn gen_room_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Relay room name for a game code
pub fn game_room_name(code: &str) -> String {
    format!("room-{}", code.trim().to_uppercase())
}

/// Normalise a user-supplied signalling address into a websocket URL.
///
/// `ws(s)://` is kept, `http(s)://` is mapped to `ws(s)://`, a bare host
/// gets `ws://`. A missing path becomes `/ws`. Returns `None` for input that
/// has no host.
pub fn normalize_signal_url(raw: &str, fallback: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Some(fallback.to_string());
    }

    let lower = value.to_ascii_lowercase();
    let (scheme, rest) = if lower.starts_with("wss://") {
        ("wss", &value[6..])
    } else if lower.starts_with("ws://") {
        ("ws", &value[5..])
    } else if lower.starts_with("https://") {
        ("wss", &value[8..])
    } else if lower.starts_with("http://") {
        ("ws", &value[7..])
    } else if value.contains("://") {
        return None;
    } else {
        ("ws", value)
    };

    let (before_query, query) = match rest.find('?') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let (host, path) = match before_query.find('/') {
        Some(idx) => (&before_query[..idx], &before_query[idx..]),
        None => (before_query, ""),
    };
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return None;
    }
    let path = if path.is_empty() || path == "/" { "/ws" } else { path };

    Some(format!("{}://{}{}{}", scheme, host, path, query))
}

/// Runtime settings read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Relay listen address
    pub relay_bind: String,
    /// Directory served under `/static`
    pub static_dir: String,
    /// Relay websocket URL used by clients
    pub signal_url: String,
    /// UCI engine executable
    pub engine_path: String,
    /// Interface the direct peer channel listens on
    pub direct_bind_host: String,
    /// Host advertised to peers in candidates
    pub direct_advertise_host: String,
    pub search_timeout: Duration,
    pub engine_ready_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            relay_bind: "127.0.0.1:8080".to_string(),
            static_dir: "./static".to_string(),
            signal_url: "ws://127.0.0.1:8080/ws".to_string(),
            engine_path: "stockfish".to_string(),
            direct_bind_host: "0.0.0.0".to_string(),
            direct_advertise_host: "127.0.0.1".to_string(),
            search_timeout: Duration::from_millis(15_000),
            engine_ready_timeout: Duration::from_millis(12_000),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; unset or invalid values keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let signal_url = lookup("SIGNAL_URL")
            .and_then(|raw| normalize_signal_url(&raw, &defaults.signal_url))
            .unwrap_or_else(|| defaults.signal_url.clone());

        Settings {
            relay_bind: text("RELAY_BIND", defaults.relay_bind),
            static_dir: text("STATIC_DIR", defaults.static_dir),
            signal_url,
            engine_path: text("ENGINE_PATH", defaults.engine_path),
            direct_bind_host: text("DIRECT_BIND_HOST", defaults.direct_bind_host),
            direct_advertise_host: text("DIRECT_ADVERTISE_HOST", defaults.direct_advertise_host),
            search_timeout: millis("SEARCH_TIMEOUT_MS", defaults.search_timeout),
            engine_ready_timeout: millis("ENGINE_READY_TIMEOUT_MS", defaults.engine_ready_timeout),
        }
    }
}

/// Format a clock reading as `m:ss`, or `m:ss.t` under ten seconds.
pub fn format_clock(remaining: Option<Duration>) -> String {
    let remaining = match remaining {
        Some(d) => d,
        None => return "--:--".to_string(),
    };
    let ms = remaining.as_millis() as u64;
    let total_secs = ms / 1000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    if ms < 10_000 {
        let tenths = (ms % 1000) / 100;
        format!("{}:{:02}.{}", mins, secs, tenths)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
