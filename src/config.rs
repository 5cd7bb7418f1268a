use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

pub struct Config {
    pub discord_token: String,
    pub command_prefix: String,
    pub idle_timeout: Duration,
    pub reconnect_grace: Duration,
    /// Failure streak that drains the rest of the queue; 0 disables the cap.
    pub max_consecutive_failures: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        let discord_token =
            env::var("DISCORD_TOKEN").context("Expected DISCORD_TOKEN in the environment")?;

        let command_prefix = env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string());

        let idle_timeout_secs: u64 = env::var("IDLE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("IDLE_TIMEOUT_SECS must be a number of seconds")?;

        let reconnect_grace_secs: u64 = env::var("RECONNECT_GRACE_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("RECONNECT_GRACE_SECS must be a number of seconds")?;

        let max_consecutive_failures: u32 = env::var("MAX_CONSECUTIVE_FAILURES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("MAX_CONSECUTIVE_FAILURES must be a number")?;

        Ok(Config {
            discord_token,
            command_prefix,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            reconnect_grace: Duration::from_secs(reconnect_grace_secs),
            max_consecutive_failures,
        })
    }
}
