// Configuration module

mod models;

pub use models::*;

use crate::error::{GatewayError, Result};
use crate::gateway::{ModelRouter, RouteTarget};
use crate::pool::PoolConfig;
use crate::provider::Provider;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::PathBuf;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (prefix: POLYGATE_)
    /// 2. Config file (~/.polygate/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(
                Config::try_from(&Self::default())
                    .map_err(|e| GatewayError::Config(e.to_string()))?,
            )
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("POLYGATE").separator("__"))
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| GatewayError::Config(e.to_string()))
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".polygate")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }

    /// Pool settings in the shape the pool constructor takes.
    pub fn pool_config(&self) -> Result<PoolConfig> {
        let mut reset_hours = HashMap::new();
        for (provider, hour) in &self.pool.reset_hours {
            let provider: Provider = provider
                .parse()
                .map_err(GatewayError::Config)?;
            reset_hours.insert(provider, *hour % 24);
        }
        Ok(PoolConfig {
            cooldown_enabled: self.pool.cooldown_enabled,
            refresh_buffer_seconds: self.pool.refresh_buffer_seconds,
            reset_hours,
        })
    }

    /// Model router built from the configured overrides.
    pub fn model_router(&self) -> Result<ModelRouter> {
        let mut overrides = HashMap::new();
        for (model, target) in &self.routes {
            let provider: Provider = target
                .provider
                .parse()
                .map_err(GatewayError::Config)?;
            overrides.insert(
                model.clone(),
                RouteTarget {
                    provider,
                    upstream_model: target.model.clone(),
                },
            );
        }
        Ok(ModelRouter::new(overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, "file");
        assert!(config.pool.cooldown_enabled);
        assert_eq!(config.pool.refresh_buffer_seconds, 300);
    }

    #[test]
    fn pool_config_parses_reset_hours() {
        let mut config = AppConfig::default();
        config.pool.reset_hours.insert("gemini".to_string(), 7);
        config.pool.reset_hours.insert("claude".to_string(), 26);

        let pool = config.pool_config().unwrap();
        assert_eq!(pool.reset_hours[&Provider::Gemini], 7);
        // Hours wrap into the 0..24 range.
        assert_eq!(pool.reset_hours[&Provider::Claude], 2);
    }

    #[test]
    fn bad_provider_in_routes_is_a_config_error() {
        let mut config = AppConfig::default();
        config.routes.insert(
            "my-model".to_string(),
            RouteOverrideConfig {
                provider: "mistral".to_string(),
                model: "m".to_string(),
            },
        );
        assert!(config.model_router().is_err());
    }

    #[test]
    fn router_override_applies() {
        let mut config = AppConfig::default();
        config.routes.insert(
            "claude-sonnet-4-5".to_string(),
            RouteOverrideConfig {
                provider: "gemini".to_string(),
                model: "gemini-2.5-pro".to_string(),
            },
        );
        let router = config.model_router().unwrap();
        let target = router.route("claude-sonnet-4-5").unwrap();
        assert_eq!(target.provider, Provider::Gemini);
        assert_eq!(target.upstream_model, "gemini-2.5-pro");
    }
}
