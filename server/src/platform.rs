//! Host platform bridge
//!
//! Rewards, persisted records and world-visible effects live on an external
//! hosting platform. Sessions never call it directly: every request is
//! wrapped in a [`DeferredCall`](crate::defer::DeferredCall) and executed by
//! the session's defer queue. The platform client itself is opaque here; the
//! built-in [`LoggingPlatform`] only records what would have been sent.

use crate::defer::CallFuture;
use log::info;
use thiserror::Error;

pub const APP_ID_VAR: &str = "ARCADE_PLATFORM_APP_ID";
pub const API_KEY_VAR: &str = "ARCADE_PLATFORM_API_KEY";
pub const ENDPOINT_VAR: &str = "ARCADE_PLATFORM_ENDPOINT";

const DEFAULT_ENDPOINT: &str = "https://platform.invalid/api";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("platform credential `{0}` is not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub app_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl PlatformCredentials {
    pub fn from_env() -> Result<Self, CredentialsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds credentials from any name → value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(CredentialsError::Missing(name))
        };

        Ok(Self {
            app_id: required(APP_ID_VAR)?,
            api_key: required(API_KEY_VAR)?,
            endpoint: lookup(ENDPOINT_VAR).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        })
    }
}

/// Asynchronous effects against the hosting platform
pub trait PlatformClient: Send + Sync {
    fn grant_reward(&self, profile_id: &str, reward: &str, amount: i64) -> CallFuture;

    fn persist_record(&self, key: &str, value: &str) -> CallFuture;

    fn trigger_effect(&self, world: &str, effect: &str) -> CallFuture;
}

/// Platform client that logs requests instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LoggingPlatform {
    credentials: Option<PlatformCredentials>,
}

impl LoggingPlatform {
    pub fn new(credentials: Option<PlatformCredentials>) -> Self {
        Self { credentials }
    }

    fn app(&self) -> String {
        self.credentials
            .as_ref()
            .map(|c| c.app_id.clone())
            .unwrap_or_else(|| "unconfigured".to_string())
    }
}

impl PlatformClient for LoggingPlatform {
    fn grant_reward(&self, profile_id: &str, reward: &str, amount: i64) -> CallFuture {
        let (app, profile_id, reward) = (self.app(), profile_id.to_string(), reward.to_string());
        Box::pin(async move {
            info!("[{}] grant {} x{} to {}", app, reward, amount, profile_id);
            Ok(())
        })
    }

    fn persist_record(&self, key: &str, value: &str) -> CallFuture {
        let (app, key, value) = (self.app(), key.to_string(), value.to_string());
        Box::pin(async move {
            info!("[{}] persist {} = {}", app, key, value);
            Ok(())
        })
    }

    fn trigger_effect(&self, world: &str, effect: &str) -> CallFuture {
        let (app, world, effect) = (self.app(), world.to_string(), effect.to_string());
        Box::pin(async move {
            info!("[{}] effect {} in {}", app, effect, world);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_credentials_require_app_and_key() {
        let err = PlatformCredentials::from_lookup(lookup(&[(API_KEY_VAR, "k")])).unwrap_err();
        assert_eq!(err, CredentialsError::Missing(APP_ID_VAR));

        let err = PlatformCredentials::from_lookup(lookup(&[(APP_ID_VAR, "app"), (API_KEY_VAR, " ")]))
            .unwrap_err();
        assert_eq!(err, CredentialsError::Missing(API_KEY_VAR));
    }

    #[test]
    fn test_credentials_default_endpoint() {
        let credentials =
            PlatformCredentials::from_lookup(lookup(&[(APP_ID_VAR, "app"), (API_KEY_VAR, "k")]))
                .unwrap();
        assert_eq!(credentials.app_id, "app");
        assert_eq!(credentials.endpoint, DEFAULT_ENDPOINT);
    }

    #[tokio::test]
    async fn test_logging_platform_succeeds() {
        let platform = LoggingPlatform::default();
        assert!(platform.grant_reward("p", "coin", 3).await.is_ok());
        assert!(platform.persist_record("k", "v").await.is_ok());
        assert!(platform.trigger_effect("w", "fireworks").await.is_ok());
    }
}
