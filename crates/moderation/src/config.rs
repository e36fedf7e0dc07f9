//! Engine configuration.

use serde::Deserialize;
use thiserror::Error;

pub const ENV_IP_EXPIRY_POLICY: &str = "HELPDESK_IP_EXPIRY_POLICY";
pub const ENV_MAX_REASON_LEN: &str = "HELPDESK_MAX_REASON_LEN";
pub const ENV_DERIVE_IP_BLOCKS: &str = "HELPDESK_DERIVE_IP_BLOCKS";

/// How an expired IP-derived block is reversed when an affected actor is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpExpiryPolicy {
    /// Deactivate the IP block and clear every actor still pointing at it.
    #[default]
    Cascade,
    /// Clear only the reconciled actor; the IP block and the other actors are left alone.
    PerActor,
}

impl core::str::FromStr for IpExpiryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cascade" => Ok(IpExpiryPolicy::Cascade),
            "per_actor" => Ok(IpExpiryPolicy::PerActor),
            other => Err(ConfigError::invalid(
                ENV_IP_EXPIRY_POLICY,
                other,
                "expected 'cascade' or 'per_actor'",
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub ip_expiry_policy: IpExpiryPolicy,
    /// Upper bound on a moderator-supplied reason, in characters.
    pub max_reason_len: usize,
    /// Set an actor's block pointer from an active IP block on their request address.
    pub derive_ip_blocks_on_access: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            ip_expiry_policy: IpExpiryPolicy::default(),
            max_reason_len: 255,
            derive_ip_blocks_on_access: true,
        }
    }
}

impl ModerationConfig {
    /// Read overrides from the process environment. Unset variables keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_IP_EXPIRY_POLICY) {
            config.ip_expiry_policy = raw.parse()?;
        }

        if let Some(raw) = lookup(ENV_MAX_REASON_LEN) {
            config.max_reason_len = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(ENV_MAX_REASON_LEN, &raw, format!("{e}")))?;
        }

        if let Some(raw) = lookup(ENV_DERIVE_IP_BLOCKS) {
            config.derive_ip_blocks_on_access = match raw.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(ConfigError::invalid(
                        ENV_DERIVE_IP_BLOCKS,
                        &raw,
                        "expected true/false",
                    ));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reason_len == 0 {
            return Err(ConfigError::invalid(ENV_MAX_REASON_LEN, "0", "must be positive"));
        }
        Ok(())
    }
}
