//! Tracing subscriber setup
//!
//! Diagnostics go to stderr; stdout carries reports and matrices only.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Verbosity named by `--log-level` or `SHARDRUN_LOG`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// `--verbose` beats any named level; unknown names fall back to info
    pub fn resolve(verbose: bool, named: Option<&str>) -> Self {
        match (verbose, named.and_then(Self::from_str)) {
            (true, _) => LogLevel::Debug,
            (false, Some(level)) => level,
            (false, None) => LogLevel::Info,
        }
    }

    fn level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Filter applied when `RUST_LOG` is unset, scoped to this crate
    pub fn directive(self) -> String {
        format!("{}={}", env!("CARGO_PKG_NAME"), self.level())
    }
}

/// Install the global subscriber; `RUST_LOG` overrides `level`
pub fn init_logger(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(LogLevel::from_str(" Warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("loud"), None);
    }

    #[test]
    fn test_verbose_wins() {
        assert_eq!(LogLevel::resolve(true, Some("error")), LogLevel::Debug);
        assert_eq!(LogLevel::resolve(false, Some("warn")), LogLevel::Warn);
        assert_eq!(LogLevel::resolve(false, Some("bogus")), LogLevel::Info);
        assert_eq!(LogLevel::resolve(false, None), LogLevel::Info);
    }

    #[test]
    fn test_directive_scoped_to_crate() {
        assert_eq!(LogLevel::Debug.directive(), "shardrun=DEBUG");
    }
}
