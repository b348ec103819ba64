use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the service.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Immutable caching policy, loaded once at process start.
///
/// The windows are deliberately decoupled from storage: classification is
/// recomputed from `generated_at` on every read, so changing these values
/// takes effect immediately without invalidating anything.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CachePolicy {
    /// Included in every storage key. Bumping it re-addresses the whole
    /// namespace, so all prior entries stop being read (and expire via their
    /// own TTLs) without any explicit deletion.
    pub namespace_version: String,

    /// Reports up to this age are served without triggering a refresh.
    #[serde(with = "humantime_serde")]
    pub fresh_window: Duration,

    /// Additional age during which a report is still served, but a
    /// background refresh is triggered. Beyond it the entry counts as a miss;
    /// the stale-serving window is finite so a dead builder cannot serve
    /// infinitely old data.
    #[serde(with = "humantime_serde")]
    pub stale_window: Duration,

    /// TTL of a refresh lock. Bounds the worst-case duplicate work if a
    /// worker dies without releasing its lock.
    #[serde(with = "humantime_serde")]
    pub lock_duration: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            namespace_version: "v1".into(),
            fresh_window: Duration::from_secs(300),
            stale_window: Duration::from_secs(900),
            lock_duration: Duration::from_secs(30),
        }
    }
}

/// Top-level service configuration.
///
/// Every field is optional in the YAML and falls back to its default, so an
/// absent config file is a valid deployment.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL of the Redis shared by all dashboard processes.
    pub redis_url: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Fine-tune report freshness and refresh locking.
    pub cache: CachePolicy,

    /// The maximum number of report builds running concurrently.
    ///
    /// When all workers are busy, additional refreshes keep their lock and
    /// queue; a burst of distinct hot keys degrades to increased staleness
    /// rather than duplicate work.
    pub max_refresh_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            redis_url: "redis://127.0.0.1/".into(),
            logging: Logging::default(),
            cache: CachePolicy::default(),
            max_refresh_workers: 4,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // serde_yaml happily parses an empty document as all-defaults, which
        // almost always means a fat-fingered path; reject it explicitly.
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
