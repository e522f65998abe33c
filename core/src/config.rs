/// Configuration management
use crate::error::{Result, WardError};
use crate::models::{Role, SessionUser};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api";
const DEFAULT_REALTIME_ADDR: &str = "127.0.0.1:5001";

/// Backoff applied between real-time reconnect attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth factor per failed attempt
    pub multiplier: u32,

    /// Give up after this many consecutive failures (None = never)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1).saturating_pow(exp);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST API (e.g. http://host:5000/api)
    pub api_url: String,

    /// host:port of the real-time event channel
    pub realtime_addr: String,

    /// Bearer token sent with every REST call
    pub auth_token: Option<String>,

    /// Session user id (required for chat and the real-time channel)
    pub user_id: Option<String>,

    pub user_name: Option<String>,

    pub user_role: Role,

    /// Per-request timeout for REST calls
    pub request_timeout: Duration,

    /// Timeout for establishing the real-time connection
    pub connect_timeout: Duration,

    /// Quiet period before a search query is sent
    pub search_debounce: Duration,

    /// Queries shorter than this (after trimming) are never sent
    pub search_min_chars: usize,

    pub reconnect: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            realtime_addr: DEFAULT_REALTIME_ADDR.to_string(),
            auth_token: None,
            user_id: None,
            user_name: None,
            user_role: Role::Other,
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            search_debounce: Duration::from_millis(300),
            search_min_chars: 2,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Defaults overlaid with WARDLINK_* environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("WARDLINK_API_URL") {
            config.api_url = url;
        }
        if let Ok(addr) = std::env::var("WARDLINK_REALTIME_ADDR") {
            config.realtime_addr = addr;
        }
        if let Ok(token) = std::env::var("WARDLINK_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Ok(id) = std::env::var("WARDLINK_USER_ID") {
            config.user_id = Some(id);
        }
        if let Ok(name) = std::env::var("WARDLINK_USER_NAME") {
            config.user_name = Some(name);
        }
        if let Ok(role) = std::env::var("WARDLINK_USER_ROLE") {
            config.user_role = Role::from_name(&role);
        }

        config
    }

    /// Parse command line flags on top of the environment.
    ///
    /// Returns the config and the remaining positional arguments
    /// (command and its operands). `args[0]` is the program name.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Self::from_env();
        let mut positional = Vec::new();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--api" | "--realtime" | "--token" | "--user" | "--name" | "--role"
                | "--timeout-ms" | "--debounce-ms" | "--max-reconnects" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        WardError::Config(format!("{} requires a value", flag))
                    })?;
                    config.apply_flag(flag, value)?;
                    i += 2;
                }
                "--" => {
                    positional.extend(args[i + 1..].iter().cloned());
                    break;
                }
                other => {
                    positional.push(other.to_string());
                    i += 1;
                }
            }
        }

        config.validate()?;
        Ok((config, positional))
    }

    fn apply_flag(&mut self, flag: &str, value: &str) -> Result<()> {
        let millis = |v: &str| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| {
                    WardError::Config(format!("{} must be a number of milliseconds", flag))
                })
        };

        match flag {
            "--api" => self.api_url = value.to_string(),
            "--realtime" => self.realtime_addr = value.to_string(),
            "--token" => self.auth_token = Some(value.to_string()),
            "--user" => self.user_id = Some(value.to_string()),
            "--name" => self.user_name = Some(value.to_string()),
            "--role" => self.user_role = Role::from_name(value),
            "--timeout-ms" => self.request_timeout = millis(value)?,
            "--debounce-ms" => self.search_debounce = millis(value)?,
            "--max-reconnects" => {
                let max = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        WardError::Config("--max-reconnects must be a positive number".to_string())
                    })?;
                self.reconnect.max_attempts = Some(max);
            }
            _ => return Err(WardError::Config(format!("Unknown flag {}", flag))),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(WardError::Config(format!(
                "API URL must start with http:// (got {})",
                self.api_url
            )));
        }
        if self.api_url.starts_with("https://") {
            return Err(WardError::Config(
                "https is not supported; put a TLS-terminating proxy in front".to_string(),
            ));
        }
        if self.realtime_addr.rsplit_once(':').is_none() {
            return Err(WardError::Config(format!(
                "Real-time address must be host:port (got {})",
                self.realtime_addr
            )));
        }
        Ok(())
    }

    /// Session user described by the config, if a user id is set
    pub fn session_user(&self) -> Option<SessionUser> {
        self.user_id.as_ref().map(|id| {
            let name = self.user_name.clone().unwrap_or_else(|| id.clone());
            SessionUser::new(id.clone(), name, self.user_role)
        })
    }

    pub fn require_user(&self) -> Result<SessionUser> {
        self.session_user().ok_or_else(|| {
            WardError::Config("A user id is required (--user <id> or WARDLINK_USER_ID)".to_string())
        })
    }
}
