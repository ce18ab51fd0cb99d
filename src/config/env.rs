//! Environment variable configuration
//!
//! Provides `SHARDRUN_*` overrides for the file configuration.

use anyhow::{anyhow, Result};
use std::env;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SHARDRUN";

/// Configuration read from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// SHARDRUN_SHARDS_BROAD
    pub shards_broad: Option<u32>,
    /// SHARDRUN_SHARDS_LEGACY
    pub shards_legacy: Option<u32>,
    /// SHARDRUN_RETRIES
    pub retries: Option<u32>,
    /// SHARDRUN_TIMEOUT, in seconds
    pub timeout: Option<u64>,
    /// SHARDRUN_MODE
    pub mode: Option<String>,
    /// SHARDRUN_CONTINUE_ON_ERROR
    pub continue_on_error: Option<bool>,
    /// SHARDRUN_CONCURRENCY
    pub concurrency: Option<usize>,
    /// SHARDRUN_PUBLISH_RETRIES
    pub publish_retries: Option<u32>,
    /// SHARDRUN_CONFIG
    pub config_file: Option<String>,
    /// SHARDRUN_OUTPUT_DIR
    pub output_dir: Option<String>,
    /// SHARDRUN_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    ///
    /// A set variable that does not parse is an error, as it is on the
    /// command line.
    pub fn load() -> Result<Self> {
        Ok(Self {
            shards_broad: get_env_parse("SHARDS_BROAD")?,
            shards_legacy: get_env_parse("SHARDS_LEGACY")?,
            retries: get_env_parse("RETRIES")?,
            timeout: get_env_parse("TIMEOUT")?,
            mode: get_env("MODE"),
            continue_on_error: get_env_bool("CONTINUE_ON_ERROR")?,
            concurrency: get_env_parse("CONCURRENCY")?,
            publish_retries: get_env_parse("PUBLISH_RETRIES")?,
            config_file: get_env("CONFIG"),
            output_dir: get_env("OUTPUT_DIR"),
            log_level: get_env("LOG"),
        })
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.shards_broad.is_some()
            || self.shards_legacy.is_some()
            || self.retries.is_some()
            || self.timeout.is_some()
            || self.mode.is_some()
            || self.continue_on_error.is_some()
            || self.concurrency.is_some()
            || self.publish_retries.is_some()
            || self.config_file.is_some()
            || self.output_dir.is_some()
            || self.log_level.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_SHARDS_BROAD:      {:?}", ENV_PREFIX, self.shards_broad);
        println!("  {}_SHARDS_LEGACY:     {:?}", ENV_PREFIX, self.shards_legacy);
        println!("  {}_RETRIES:           {:?}", ENV_PREFIX, self.retries);
        println!("  {}_TIMEOUT:           {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_MODE:              {:?}", ENV_PREFIX, self.mode);
        println!("  {}_CONTINUE_ON_ERROR: {:?}", ENV_PREFIX, self.continue_on_error);
        println!("  {}_CONCURRENCY:       {:?}", ENV_PREFIX, self.concurrency);
        println!("  {}_PUBLISH_RETRIES:   {:?}", ENV_PREFIX, self.publish_retries);
        println!("  {}_CONFIG:            {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_OUTPUT_DIR:        {:?}", ENV_PREFIX, self.output_dir);
        println!("  {}_LOG:               {:?}", ENV_PREFIX, self.log_level);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    get_env(name)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| anyhow!("Invalid value for {ENV_PREFIX}_{name}: {v:?}"))
        })
        .transpose()
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Result<Option<bool>> {
    get_env(name)
        .map(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "enabled" => Ok(true),
            "0" | "false" | "no" | "off" | "disabled" => Ok(false),
            _ => Err(anyhow!("Invalid value for {ENV_PREFIX}_{name}: {v:?}")),
        })
        .transpose()
}

/// Print all SHARDRUN environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_SHARDS_BROAD       Shard count for the broad category");
    println!("  {ENV_PREFIX}_SHARDS_LEGACY      Shard count for the legacy category");
    println!("  {ENV_PREFIX}_RETRIES            Extra attempts per shard");
    println!("  {ENV_PREFIX}_TIMEOUT            Per-shard timeout in seconds");
    println!("  {ENV_PREFIX}_MODE               Execution mode (development, production)");
    println!("  {ENV_PREFIX}_CONTINUE_ON_ERROR  Publish even when shards fail (true/false)");
    println!("  {ENV_PREFIX}_CONCURRENCY        Maximum shards running at once");
    println!("  {ENV_PREFIX}_PUBLISH_RETRIES    Extra publish attempts when the sink rejects the report");
    println!("  {ENV_PREFIX}_CONFIG             Path to configuration file");
    println!("  {ENV_PREFIX}_OUTPUT_DIR         Directory reports are written to");
    println!("  {ENV_PREFIX}_LOG                Log level (trace, debug, info, warn, error)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_SHARDS_BROAD=8");
    println!("  export {ENV_PREFIX}_RETRIES=2");
    println!("  shardrun run --runner ./scripts/run-shard.sh");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Environment variables are process-wide; tests that set them take turns
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Sets variables for the lifetime of the guard
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let previous = vars
                .iter()
                .map(|(name, value)| {
                    let key = format!("{ENV_PREFIX}_{name}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, value);
                    (key, old)
                })
                .collect();
            Self {
                previous,
                _lock: lock,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.shards_broad.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_load_numbers() {
        let _guard = EnvGuard::set(&[("SHARDS_LEGACY", "7"), ("TIMEOUT", " 90 ")]);

        let config = EnvConfig::load().unwrap();
        assert_eq!(config.shards_legacy, Some(7));
        assert_eq!(config.timeout, Some(90));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvGuard::set(&[("CONTINUE_ON_ERROR", "yes")]);

        let config = EnvConfig::load().unwrap();
        assert_eq!(config.continue_on_error, Some(true));
    }

    #[test]
    fn test_env_publish_retries() {
        let _guard = EnvGuard::set(&[("PUBLISH_RETRIES", "5")]);

        let config = EnvConfig::load().unwrap();
        assert_eq!(config.publish_retries, Some(5));
    }

    #[test]
    fn test_env_unparseable_values_rejected() {
        {
            let _guard = EnvGuard::set(&[("CONCURRENCY", "many")]);
            let err = EnvConfig::load().unwrap_err();
            assert!(err.to_string().contains("SHARDRUN_CONCURRENCY"));
        }

        let _guard = EnvGuard::set(&[("CONTINUE_ON_ERROR", "maybe")]);
        assert!(EnvConfig::load().is_err());
    }
}
