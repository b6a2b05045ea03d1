use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8443;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Header carrying the shared webhook secret.
pub const SECRET_TOKEN_HEADER: &str = "x-transport-secret-token";

/// Top-level config (inlet.toml + INLET_* env overrides).
///
/// Every section has defaults, so an empty file yields a runnable config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InletConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret expected in `X-Transport-Secret-Token`.
    /// When unset, the header is not checked.
    pub secret_token: Option<String>,
    /// How long shutdown waits for in-flight dispatches to finish.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            secret_token: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum number of updates admitted and not yet dispatched.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Burst size per sender; the bucket refills at this many tokens per minute.
    #[serde(default = "default_per_user_limit")]
    pub per_user_limit: u32,
    /// Bucket count above which stale buckets are evicted.
    #[serde(default = "default_max_tracked_users")]
    pub max_tracked_users: usize,
    /// Buckets untouched for this long are eligible for eviction.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_user_limit: default_per_user_limit(),
            max_tracked_users: default_max_tracked_users(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_tracked: default_max_tracked(),
            expiry_secs: default_expiry_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Idle time after the last message before a burst is flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Hard cap on messages combined into one unit.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Hard cap on time between the first message of a burst and its flush.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Budget for the reply-metadata lookup made during flush.
    #[serde(default = "default_reply_lookup_timeout_ms")]
    pub reply_lookup_timeout_ms: u64,
    /// Commands dispatched immediately, never buffered.
    #[serde(default = "default_bypass_commands")]
    pub bypass_commands: Vec<String>,
    /// Commands that wait for follow-up text within the debounce window.
    #[serde(default = "default_priority_commands")]
    pub priority_commands: Vec<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_messages: default_max_messages(),
            max_wait_ms: default_max_wait_ms(),
            reply_lookup_timeout_ms: default_reply_lookup_timeout_ms(),
            bypass_commands: default_bypass_commands(),
            priority_commands: default_priority_commands(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Downstream endpoint receiving combined messages as JSON.
    /// When unset, combined messages are only logged.
    pub forward_url: Option<String>,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            forward_url: None,
            timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Tell senders how many of their messages were skipped on overflow.
    #[serde(default = "bool_true")]
    pub notify_overflow: bool,
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_max_concurrent() -> usize {
    64
}
fn default_per_user_limit() -> u32 {
    30
}
fn default_max_tracked_users() -> usize {
    10_000
}
fn default_stale_after_secs() -> u64 {
    600
}
fn default_max_tracked() -> usize {
    10_000
}
fn default_expiry_secs() -> u64 {
    3600
}
fn default_debounce_ms() -> u64 {
    1500
}
fn default_max_messages() -> usize {
    10
}
fn default_max_wait_ms() -> u64 {
    10_000
}
fn default_reply_lookup_timeout_ms() -> u64 {
    2000
}
fn default_bypass_commands() -> Vec<String> {
    ["start", "help", "cancel", "settings"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_priority_commands() -> Vec<String> {
    vec!["ask".to_string()]
}
fn default_dispatch_timeout_secs() -> u64 {
    30
}

impl InletConfig {
    /// Load config from a TOML file with INLET_* env var overrides.
    ///
    /// Path resolution: explicit argument, else `~/.inlet/inlet.toml`.
    /// A missing file is not an error; defaults apply.
    /// Nested env keys use a double underscore: `INLET_BUFFER__MAX_MESSAGES=20`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("INLET_").split("__")),
        )
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> crate::error::Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> crate::error::Result<Self> {
        let config: InletConfig = figment
            .extract()
            .map_err(|e| crate::error::InletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        use crate::error::InletError;

        if self.admission.max_concurrent == 0 {
            return Err(InletError::Config(
                "admission.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.buffer.max_messages == 0 {
            return Err(InletError::Config(
                "buffer.max_messages must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.per_user_limit == 0 {
            return Err(InletError::Config(
                "rate_limit.per_user_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.inlet/inlet.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = InletConfig::from_toml_str("").unwrap();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.rate_limit.per_user_limit, 30);
        assert_eq!(config.buffer.max_messages, 10);
        assert!(config.buffer.bypass_commands.contains(&"help".to_string()));
        assert!(config.telegram.is_none());
    }

    #[test]
    fn sections_override_individual_keys() {
        let config = InletConfig::from_toml_str(
            r#"
            [gateway]
            secret_token = "s3cret"

            [buffer]
            debounce_ms = 250
            max_messages = 4
            bypass_commands = ["/stop"]

            [telegram]
            bot_token = "123:abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.secret_token.as_deref(), Some("s3cret"));
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
        assert_eq!(config.buffer.debounce_ms, 250);
        assert_eq!(config.buffer.max_messages, 4);
        assert_eq!(config.buffer.max_wait_ms, 10_000);
        assert_eq!(config.buffer.bypass_commands, vec!["/stop".to_string()]);
        let telegram = config.telegram.unwrap();
        assert!(telegram.notify_overflow);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = InletConfig::from_toml_str("[admission]\nmax_concurrent = 0").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
