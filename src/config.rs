//! Collector configuration.
//!
//! Built once at startup by [`ConfigBuilder::build`], validated there, and
//! passed by reference into the scheduler.  Nothing reads configuration from
//! global state afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, FetchError};
use crate::fetch::{FetchOptions, FetcherRegistry, Source};
use crate::request::RequestId;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_JITTER: Duration = Duration::from_secs(23);
pub const DEFAULT_APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Immutable, validated configuration of one collector run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub once: bool,
    pub interval: Duration,
    pub jitter: Duration,
    pub source: Source,
    pub storage_root: PathBuf,
    pub app_name: String,
    /// Upper bound for one attempt on top of the interval-derived deadline.
    pub fetch_timeout: Option<Duration>,
}

impl CollectorConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    once: bool,
    interval: Duration,
    jitter: Duration,
    source: Option<String>,
    storage_root: Option<PathBuf>,
    app_name: Option<String>,
    fetch_timeout: Option<Duration>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            once: false,
            interval: DEFAULT_INTERVAL,
            jitter: DEFAULT_JITTER,
            source: None,
            storage_root: None,
            app_name: None,
            fetch_timeout: None,
        }
    }
}

impl ConfigBuilder {
    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Validate against the protocols `registry` supports.
    ///
    /// Fails fast on an unsupported source prefix, a jitter larger than the
    /// interval (recurring mode only; `once` ignores both), an app name unusable in headers, or a storage root that
    /// exists but cannot be written.  Without a storage root a temporary
    /// directory is created and kept.
    pub fn build(self, registry: &FetcherRegistry) -> Result<CollectorConfig, ConfigError> {
        let source = self.source.ok_or(ConfigError::MissingSource)?;
        let source = registry.parse(source.trim())?;

        if !self.once && self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if !self.once && self.jitter > self.interval {
            return Err(ConfigError::JitterExceedsInterval {
                jitter: self.jitter,
                interval: self.interval,
            });
        }

        let app_name = self
            .app_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        FetchOptions::builder()
            .user_agent(crate::fetch::user_agent_for(&app_name))
            .request_id(RequestId::new().header_value(&app_name))
            .build()
            .map_err(FetchError::from)?;

        let storage_root = match self.storage_root {
            Some(root) => {
                ensure_writable(&root)?;
                root
            }
            None => temp_storage_root(&app_name)?,
        };

        Ok(CollectorConfig {
            once: self.once,
            interval: self.interval,
            jitter: self.jitter,
            source,
            storage_root,
            app_name,
            fetch_timeout: self.fetch_timeout,
        })
    }
}

/// An existing root must be a writable directory.  A missing one is created
/// by the store on first write.
fn ensure_writable(root: &Path) -> Result<(), ConfigError> {
    let meta = match fs::metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ConfigError::StorageNotWritable {
                path: root.to_path_buf(),
                source,
            })
        }
    };
    if !meta.is_dir() {
        return Err(ConfigError::StorageNotDirectory {
            path: root.to_path_buf(),
        });
    }
    tempfile::NamedTempFile::new_in(root)
        .map(drop)
        .map_err(|source| ConfigError::StorageNotWritable {
            path: root.to_path_buf(),
            source,
        })
}

fn temp_storage_root(app_name: &str) -> Result<PathBuf, ConfigError> {
    let prefix = format!(
        "{}-",
        app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
    );
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir()
        .map(|dir| dir.keep())
        .map_err(ConfigError::TempStorage)
}

/// Parse `500ms`, `23s`, `5m`, `1h30m`, or bare seconds (`90`).
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Duration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            _ => return Err(invalid()),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FetcherRegistry {
        FetcherRegistry::with_defaults().unwrap()
    }

    // -- build ---------------------------------------------------------------

    #[test]
    fn defaults_follow_the_classic_collector() {
        let root = tempfile::tempdir().unwrap();
        let config = CollectorConfig::builder()
            .source("https://example.test/data")
            .storage_root(root.path())
            .build(&registry())
            .unwrap();

        assert!(!config.once);
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.jitter, Duration::from_secs(23));
        assert_eq!(config.app_name, "collector");
        assert_eq!(config.source.scheme(), "https");
        assert_eq!(config.storage_root, root.path());
    }

    #[test]
    fn unsupported_source_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        let err = CollectorConfig::builder()
            .source("ftp://example.test/data")
            .storage_root(root.path())
            .build(&registry())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Source(FetchError::UnsupportedProtocol { .. })
        ));

        let err = CollectorConfig::builder().build(&registry()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSource));
    }

    #[test]
    fn jitter_may_not_exceed_interval() {
        let err = CollectorConfig::builder()
            .source("https://example.test/data")
            .interval(Duration::from_secs(10))
            .jitter(Duration::from_secs(11))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, ConfigError::JitterExceedsInterval { .. }));
    }

    #[test]
    fn once_ignores_interval_and_jitter() {
        let root = tempfile::tempdir().unwrap();
        let config = CollectorConfig::builder()
            .source("https://example.test/data")
            .storage_root(root.path())
            .once(true)
            .interval(Duration::from_secs(10))
            .build(&registry())
            .unwrap();
        assert!(config.once);
        assert_eq!(config.jitter, Duration::from_secs(23));
    }

    #[test]
    fn zero_interval_only_allowed_once() {
        let build = |once| {
            CollectorConfig::builder()
                .source("https://example.test/data")
                .storage_root(tempfile::tempdir().unwrap().keep())
                .once(once)
                .interval(Duration::ZERO)
                .jitter(Duration::ZERO)
                .build(&registry())
        };
        assert!(matches!(build(false), Err(ConfigError::ZeroInterval)));
        assert!(build(true).is_ok());
    }

    #[test]
    fn app_name_must_fit_in_a_header() {
        let err = CollectorConfig::builder()
            .source("https://example.test/data")
            .app_name("bad\nname")
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Source(FetchError::Option(_))));
    }

    #[test]
    fn storage_root_must_be_a_directory() {
        let parent = tempfile::tempdir().unwrap();
        let file = parent.path().join("file");
        fs::write(&file, b"x").unwrap();

        let err = CollectorConfig::builder()
            .source("https://example.test/data")
            .storage_root(&file)
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, ConfigError::StorageNotDirectory { .. }));
    }

    #[test]
    fn missing_storage_root_is_accepted() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("later");
        let config = CollectorConfig::builder()
            .source("https://example.test/data")
            .storage_root(&root)
            .build(&registry())
            .unwrap();
        assert_eq!(config.storage_root, root);
    }

    #[test]
    fn temporary_storage_root_when_none_given() {
        let config = CollectorConfig::builder()
            .source("https://example.test/data")
            .app_name("my app")
            .build(&registry())
            .unwrap();

        assert!(config.storage_root.is_dir());
        let name = config.storage_root.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("my_app-"), "{name}");
        fs::remove_dir(&config.storage_root).unwrap();
    }

    // -- parse_duration ------------------------------------------------------

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("23s").unwrap(), Duration::from_secs(23));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_garbage_durations() {
        for bad in ["", "m", "5x", "5m3", "-5s", "1.5h"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn overflowing_durations_are_rejected() {
        for huge in ["99999999999999999h", "999999999999999999m", "18446744073709551615s1s"] {
            assert!(
                matches!(parse_duration(huge), Err(ConfigError::Duration(_))),
                "{huge:?} should overflow"
            );
        }
    }
}
