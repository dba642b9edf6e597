use crate::config::AppConfig;
use anyhow::{anyhow, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";
pub const ENV_PREFIX: &str = "TRADE_GUARD_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default TOML path and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration source cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration by layering defaults, a TOML file (if present), and
    /// `TRADE_GUARD_`-prefixed environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration source cannot be parsed, or if
    /// the merged engine settings are unusable.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Self::figment(path.as_ref()).extract()?;
        config
            .engine
            .validate()
            .map_err(|e| anyhow!("{}: {e}", path.as_ref().display()))?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
