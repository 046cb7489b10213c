//! Configuration resolution for the session manager.
//!
//! [`ManagerConfig::from_env`] resolves each value with a two-tier priority:
//!
//! 1. **Environment Variable** - Parsed when set and valid
//! 2. **Default** - Built-in default value
//!
//! Fields can be overridden on the returned [`ManagerConfig`] afterwards.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 180s | Command execution timeout in seconds |
//! | `SSH_MAX_RETRIES` | 3 | Maximum connect retry attempts |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_CONNECT_SETTLE_MS` | 500ms | Wait after a successful connect |
//! | `SSH_SHELL_SETTLE_MS` | 1000ms | Wait after a successful shell start |
//!
//! The two settle delays are heuristic grace periods. Shell readiness is not
//! observable over SSH, so the manager waits a fixed time for the banner and
//! prompt to flush before reporting success. Zero disables the wait.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default SSH command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 180;

/// Default maximum retry attempts for SSH connection
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default wait after a successful connect, in milliseconds
pub(crate) const DEFAULT_CONNECT_SETTLE_MS: u64 = 500;

/// Default wait after a successful shell start, in milliseconds
pub(crate) const DEFAULT_SHELL_SETTLE_MS: u64 = 1000;

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const CONNECT_SETTLE_MS_ENV_VAR: &str = "SSH_CONNECT_SETTLE_MS";
pub(crate) const SHELL_SETTLE_MS_ENV_VAR: &str = "SSH_SHELL_SETTLE_MS";

/// Pseudo-terminal settings requested when a shell starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Tunables for a [`SessionManager`](crate::ssh::SessionManager) and its transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub compress: bool,
    pub connect_settle: Duration,
    pub shell_settle: Duration,
    pub pty: PtyConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compress: true,
            connect_settle: Duration::from_millis(DEFAULT_CONNECT_SETTLE_MS),
            shell_settle: Duration::from_millis(DEFAULT_SHELL_SETTLE_MS),
            pty: PtyConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Build a configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve(
                CONNECT_TIMEOUT_ENV_VAR,
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
            command_timeout: Duration::from_secs(resolve(
                COMMAND_TIMEOUT_ENV_VAR,
                DEFAULT_COMMAND_TIMEOUT_SECS,
            )),
            max_retries: resolve(MAX_RETRIES_ENV_VAR, DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(resolve(
                RETRY_DELAY_MS_ENV_VAR,
                DEFAULT_RETRY_DELAY_MS,
            )),
            compress: resolve_compression(),
            connect_settle: Duration::from_millis(resolve(
                CONNECT_SETTLE_MS_ENV_VAR,
                DEFAULT_CONNECT_SETTLE_MS,
            )),
            shell_settle: Duration::from_millis(resolve(
                SHELL_SETTLE_MS_ENV_VAR,
                DEFAULT_SHELL_SETTLE_MS,
            )),
            pty: PtyConfig::default(),
        }
    }

    /// Same as the defaults but with both settle delays disabled.
    pub fn without_settle_delays(mut self) -> Self {
        self.connect_settle = Duration::ZERO;
        self.shell_settle = Duration::ZERO;
        self
    }
}

/// Resolve a value with priority: env var -> default.
///
/// Unparseable environment values are ignored.
pub(crate) fn resolve<T: FromStr>(env_var: &str, default: T) -> T {
    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.parse::<T>()
    {
        return value;
    }

    default
}

/// Resolve the compression setting with priority: env var -> default (true)
pub(crate) fn resolve_compression() -> bool {
    match env::var(COMPRESSION_ENV_VAR) {
        Ok(raw) => raw.eq_ignore_ascii_case("true") || raw == "1",
        Err(_) => true,
    }
}
