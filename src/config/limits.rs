use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const MOCK_PIPELINE: &str = "mock";

const BPS_PER_MBPS: f64 = 1_000_000.0;

// -----------------------------------------------------------------------------
// ----- Limits ----------------------------------------------------------------

/// One immutable snapshot of the hot-reloadable gateway settings.
///
/// Components never keep a `Limits` around between calls; they read a fresh
/// snapshot through [`super::ConfigHandle`] every time they decide something.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    /// Per-client frame budget; seeds the capacity and refill rate of new buckets.
    pub max_fps: u32,

    pub max_bandwidth_mbps: f64,

    pub max_concurrent_streams: usize,

    #[serde(deserialize_with = "de_duration")]
    pub heartbeat_interval: Duration,

    /// Sessions idle for longer than this are reaped by the heartbeat sweep.
    #[serde(deserialize_with = "de_duration")]
    pub connection_timeout: Duration,

    #[serde(deserialize_with = "de_duration")]
    pub metrics_interval: Duration,

    /// How long a new connection may wait for a concurrency slot.
    #[serde(deserialize_with = "de_duration")]
    pub admission_timeout: Duration,

    /// Bound on the handshake and on every inbound frame read.
    #[serde(deserialize_with = "de_duration")]
    pub frame_timeout: Duration,

    #[serde(deserialize_with = "de_duration")]
    pub inference_timeout: Duration,

    pub max_frame_size: usize,

    /// Name of the registered inference pipeline frames are dispatched to.
    pub pipeline: String,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_fps: 30,
            max_bandwidth_mbps: 10.0,
            max_concurrent_streams: 100,
            heartbeat_interval: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(30),
            admission_timeout: Duration::from_millis(500),
            frame_timeout: Duration::from_secs(30),
            inference_timeout: Duration::from_secs(5),
            max_frame_size: 1024 * 1024,
            pipeline: MOCK_PIPELINE.to_string(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Limits: Static --------------------------------------------------------

impl Limits {
    pub async fn from_file(path: &Path) -> Result<Limits, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Limits, ConfigError> {
        let limits: Limits = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;
        limits.validate()?;
        Ok(limits)
    }
}

// -----------------------------------------------------------------------------
// ----- Limits: Public --------------------------------------------------------

impl Limits {
    /// Global bandwidth ceiling in bits per second.
    pub fn max_bps(&self) -> u64 {
        (self.max_bandwidth_mbps * BPS_PER_MBPS).round() as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fps == 0 {
            return Err(ConfigError::InvalidField("max_fps".into()));
        }
        if !self.max_bandwidth_mbps.is_finite() || self.max_bandwidth_mbps <= 0.0 {
            return Err(ConfigError::InvalidField("max_bandwidth_mbps".into()));
        }
        if self.max_concurrent_streams == 0 {
            return Err(ConfigError::InvalidField("max_concurrent_streams".into()));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidField("max_frame_size".into()));
        }
        if self.pipeline.trim().is_empty() {
            return Err(ConfigError::InvalidField("pipeline".into()));
        }

        let durations = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("connection_timeout", self.connection_timeout),
            ("metrics_interval", self.metrics_interval),
            ("frame_timeout", self.frame_timeout),
            ("inference_timeout", self.inference_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidField(name.into()));
            }
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Accepts either a humantime string ("250ms", "1m 30s") or integer milliseconds.
fn de_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration string (e.g., \"30s\") or integer milliseconds")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(DurationVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_yields_defaults() {
        let limits = Limits::parse("").unwrap();
        assert_eq!(limits, Limits::default());
        assert_eq!(limits.max_bps(), 10_000_000);
    }

    #[test]
    fn parses_humantime_and_millisecond_durations() {
        let toml = r#"
            max_fps = 15
            max_bandwidth_mbps = 2.5
            heartbeat_interval = "5s"
            connection_timeout = "1m 30s"
            admission_timeout = 250
            pipeline = "gender"
        "#;

        let limits = Limits::parse(toml).unwrap();
        assert_eq!(limits.max_fps, 15);
        assert_eq!(limits.max_bps(), 2_500_000);
        assert_eq!(limits.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(limits.connection_timeout, Duration::from_secs(90));
        assert_eq!(limits.admission_timeout, Duration::from_millis(250));
        assert_eq!(limits.pipeline, "gender");
        assert_eq!(limits.frame_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Limits::parse("max_fps = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(f) if f == "max_fps"));

        let err = Limits::parse("max_bandwidth_mbps = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(f) if f == "max_bandwidth_mbps"));

        let err = Limits::parse("heartbeat_interval = \"0s\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(f) if f == "heartbeat_interval"));

        let err = Limits::parse("frame_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));

        let err = Limits::parse("max_fsp = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"max_concurrent_streams = 8\n").unwrap();

        let limits = Limits::from_file(file.path()).await.unwrap();
        assert_eq!(limits.max_concurrent_streams, 8);

        let err = Limits::from_file(Path::new("/nonexistent/streamgate.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
