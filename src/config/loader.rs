use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::presets::RepositoryProfile;
use super::CacheConfig;

/// File name looked up in the solution root when no explicit path is given
pub const CONFIG_FILE_NAME: &str = ".solution-cache.toml";

/// Environment variable snapshot for configuration resolution
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    /// Map of environment variable names to values
    pub vars: HashMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Create snapshot of current environment
    pub fn from_current_env() -> Self {
        let vars = std::env::vars()
            .filter(|(key, _)| key.starts_with("SOLUTION_CACHE_"))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Get environment variable value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Parse environment variable as type T
    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }
}

/// Parse a TOML document into a configuration, validating the result
pub fn parse_config(contents: &str) -> Result<CacheConfig> {
    let config: CacheConfig =
        toml::from_str(contents).context("Failed to parse solution cache configuration")?;
    config.validate()?;
    Ok(config)
}

/// Apply environment overrides on top of a configuration (pure function)
pub fn apply_env_overrides(mut config: CacheConfig, env: &EnvironmentSnapshot) -> CacheConfig {
    if let Some(profile) = env
        .get("SOLUTION_CACHE_PROFILE")
        .and_then(RepositoryProfile::parse)
    {
        config = profile.apply(config);
    }

    if let Some(dir) = env.get("SOLUTION_CACHE_DIR") {
        config.cache_root = Some(PathBuf::from(dir));
    }

    if let Some(bytes) = env.parse::<u64>("SOLUTION_CACHE_MAX_BYTES") {
        config.durable.max_bytes = bytes;
        config.quota.max_bytes = bytes;
    }

    if let Some(bytes) = env.parse::<u64>("SOLUTION_CACHE_MIN_FREE_BYTES") {
        config.quota.min_free_bytes = bytes;
    }

    if let Some(days) = env.parse::<u64>("SOLUTION_CACHE_MAX_AGE_DAYS") {
        config.quota.max_age_days = days;
    }

    if let Some(days) = env.parse::<u64>("SOLUTION_CACHE_UNUSED_AFTER_DAYS") {
        config.quota.unused_after_days = days;
    }

    config
}

/// Load configuration from an explicit file or the solution root, then
/// apply environment overrides.
///
/// A missing file is not an error; defaults are used instead.
pub fn load_config(explicit: Option<&Path>, solution_root: Option<&Path>) -> Result<CacheConfig> {
    let env = EnvironmentSnapshot::from_current_env();
    load_config_with_env(explicit, solution_root, &env)
}

pub fn load_config_with_env(
    explicit: Option<&Path>,
    solution_root: Option<&Path>,
    env: &EnvironmentSnapshot,
) -> Result<CacheConfig> {
    let candidate = explicit
        .map(Path::to_path_buf)
        .or_else(|| solution_root.map(|root| root.join(CONFIG_FILE_NAME)));

    let base = match candidate {
        Some(path) if path.exists() => {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = parse_config(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            log::debug!("Loaded cache config from {}", path.display());
            config
        }
        Some(path) if explicit.is_some() => {
            anyhow::bail!("Config file {} does not exist", path.display())
        }
        _ => CacheConfig::default(),
    };

    let config = apply_env_overrides(base, env);
    config.validate()?;
    Ok(config)
}
