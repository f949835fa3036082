//! Server configuration parsed from environment variables.
//!
//! Every knob has a default so a bare `cargo run` starts an in-memory
//! server on port 3000. LLM settings live in [`crate::llm::config`].

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIRROR_LANDS_LIMIT: usize = 20;
pub const DEFAULT_MIRROR_BOOKINGS_LIMIT: usize = 50;
pub const DEFAULT_MIRROR_GUARDS_LIMIT: usize = 50;
pub const DEFAULT_ASSISTANT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_ASSISTANT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_WS_CLIENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Query limits for the collection mirror subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorLimits {
    pub lands: usize,
    pub bookings: usize,
    pub guards: usize,
}

impl Default for MirrorLimits {
    fn default() -> Self {
        Self {
            lands: DEFAULT_MIRROR_LANDS_LIMIT,
            bookings: DEFAULT_MIRROR_BOOKINGS_LIMIT,
            guards: DEFAULT_MIRROR_GUARDS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantConfig {
    /// Upper bound on one LLM round trip before falling back.
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self { timeout_secs: DEFAULT_ASSISTANT_TIMEOUT_SECS, max_tokens: DEFAULT_ASSISTANT_MAX_TOKENS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// `None` selects the in-memory document store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub mirror: MirrorLimits,
    pub assistant: AssistantConfig,
    pub ws_client_channel_capacity: usize,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// - `PORT` (3000), `DATABASE_URL` (unset → in-memory store),
    ///   `DB_MAX_CONNECTIONS` (5)
    /// - `MIRROR_LANDS_LIMIT` (20), `MIRROR_BOOKINGS_LIMIT` (50),
    ///   `MIRROR_GUARDS_LIMIT` (50)
    /// - `ASSISTANT_TIMEOUT_SECS` (20), `ASSISTANT_MAX_TOKENS` (1024)
    /// - `WS_CLIENT_CHANNEL_CAPACITY` (256)
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            mirror: MirrorLimits {
                lands: env_parse("MIRROR_LANDS_LIMIT", DEFAULT_MIRROR_LANDS_LIMIT),
                bookings: env_parse("MIRROR_BOOKINGS_LIMIT", DEFAULT_MIRROR_BOOKINGS_LIMIT),
                guards: env_parse("MIRROR_GUARDS_LIMIT", DEFAULT_MIRROR_GUARDS_LIMIT),
            },
            assistant: AssistantConfig {
                timeout_secs: env_parse("ASSISTANT_TIMEOUT_SECS", DEFAULT_ASSISTANT_TIMEOUT_SECS),
                max_tokens: env_parse("ASSISTANT_MAX_TOKENS", DEFAULT_ASSISTANT_MAX_TOKENS),
            },
            ws_client_channel_capacity: env_parse("WS_CLIENT_CHANNEL_CAPACITY", DEFAULT_WS_CLIENT_CHANNEL_CAPACITY),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            mirror: MirrorLimits::default(),
            assistant: AssistantConfig::default(),
            ws_client_channel_capacity: DEFAULT_WS_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
