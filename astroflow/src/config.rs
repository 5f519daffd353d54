//! Configuration types for the scheduler, reference stages and HTTP surface.

use crate::errors::AstroflowError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstroflowConfig {
    /// Scheduling parameters.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Synthetic feed parameters.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    /// Calibration parameters.
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Detection parameters.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// HTTP server parameters.
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging parameters.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AstroflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON configuration file. Missing sections fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AstroflowError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `ASTROFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, AstroflowError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a variable lookup.
    ///
    /// Recognized keys: `ASTROFLOW_TICK_INTERVAL`, `ASTROFLOW_COOLDOWN`,
    /// `ASTROFLOW_RUN_TIMEOUT`, `ASTROFLOW_BIND`, `ASTROFLOW_LOG`,
    /// `ASTROFLOW_LOG_JSON`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AstroflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ASTROFLOW_TICK_INTERVAL") {
            self.scheduler.tick_interval_seconds = parse_seconds("ASTROFLOW_TICK_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("ASTROFLOW_COOLDOWN") {
            self.scheduler.cooldown_seconds = parse_seconds("ASTROFLOW_COOLDOWN", &v)?;
        }
        if let Some(v) = lookup("ASTROFLOW_RUN_TIMEOUT") {
            self.scheduler.run_timeout_seconds = Some(parse_seconds("ASTROFLOW_RUN_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("ASTROFLOW_BIND") {
            let addr: SocketAddr = v
                .parse()
                .map_err(|e| AstroflowError::config(format!("ASTROFLOW_BIND={v}: {e}")))?;
            self.server.host = addr.ip().to_string();
            self.server.port = addr.port();
        }
        if let Some(v) = lookup("ASTROFLOW_LOG") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("ASTROFLOW_LOG_JSON") {
            self.logging.json = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Sets the tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, seconds: f64) -> Self {
        self.scheduler.tick_interval_seconds = seconds;
        self
    }

    /// Sets the post-run cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, seconds: f64) -> Self {
        self.scheduler.cooldown_seconds = seconds;
        self
    }

    /// Sets the overall-run watchdog.
    #[must_use]
    pub fn with_run_timeout(mut self, seconds: f64) -> Self {
        self.scheduler.run_timeout_seconds = Some(seconds);
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), AstroflowError> {
        self.scheduler.validate()?;
        if self.synthetic.width == 0 || self.synthetic.height == 0 {
            return Err(AstroflowError::config("synthetic frame dimensions must be non-zero"));
        }
        if !(self.detection.sigma_threshold.is_finite() && self.detection.sigma_threshold > 0.0) {
            return Err(AstroflowError::config("detection sigma threshold must be positive"));
        }
        if self.detection.max_detections == 0 {
            return Err(AstroflowError::config("max detections must be at least 1"));
        }
        Ok(())
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<f64, AstroflowError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| AstroflowError::config(format!("{key}={value}: {e}")))
}

/// Scheduling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: f64,
    /// Seconds after a publish during which ticks are dropped.
    #[serde(default)]
    pub cooldown_seconds: f64,
    /// Overall-run watchdog in seconds.
    #[serde(default)]
    pub run_timeout_seconds: Option<f64>,
}

fn default_tick_interval() -> f64 {
    10.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_tick_interval(),
            cooldown_seconds: 0.0,
            run_timeout_seconds: None,
        }
    }
}

impl SchedulerConfig {
    /// Checks that every duration converts and the tick interval is positive.
    pub fn validate(&self) -> Result<(), AstroflowError> {
        self.tick_interval()?;
        self.cooldown()?;
        self.run_timeout()?;
        Ok(())
    }

    /// Tick interval as a `Duration`.
    pub fn tick_interval(&self) -> Result<Duration, AstroflowError> {
        let interval = seconds_to_duration("tick interval", self.tick_interval_seconds)?;
        if interval.is_zero() {
            return Err(AstroflowError::config("tick interval must be a positive number of seconds"));
        }
        Ok(interval)
    }

    /// Cooldown as a `Duration`.
    pub fn cooldown(&self) -> Result<Duration, AstroflowError> {
        seconds_to_duration("cooldown", self.cooldown_seconds)
    }

    /// Watchdog as a `Duration`.
    pub fn run_timeout(&self) -> Result<Option<Duration>, AstroflowError> {
        let Some(seconds) = self.run_timeout_seconds else {
            return Ok(None);
        };
        let timeout = seconds_to_duration("run timeout", seconds)?;
        if timeout.is_zero() {
            return Err(AstroflowError::config("run timeout must be a positive number of seconds"));
        }
        Ok(Some(timeout))
    }
}

fn seconds_to_duration(name: &str, seconds: f64) -> Result<Duration, AstroflowError> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| AstroflowError::config(format!("{name} of {seconds} seconds is unusable: {e}")))
}

/// Parameters of the synthetic observation feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Frame width in pixels.
    #[serde(default = "default_frame_side")]
    pub width: usize,
    /// Frame height in pixels.
    #[serde(default = "default_frame_side")]
    pub height: usize,
    /// Sky background level.
    #[serde(default = "default_background")]
    pub background: f32,
    /// Peak noise amplitude.
    #[serde(default = "default_noise")]
    pub noise: f32,
    /// Number of injected point sources.
    #[serde(default = "default_sources")]
    pub sources: usize,
    /// Exposure time written to the header.
    #[serde(default = "default_exposure")]
    pub exposure_seconds: f64,
    /// `TELESCOP` header value.
    #[serde(default = "default_telescope")]
    pub telescope: String,
    /// `OBSERVER` header value.
    #[serde(default = "default_observer")]
    pub observer: String,
}

fn default_frame_side() -> usize {
    100
}

fn default_background() -> f32 {
    100.0
}

fn default_noise() -> f32 {
    10.0
}

fn default_sources() -> usize {
    3
}

fn default_exposure() -> f64 {
    30.0
}

fn default_telescope() -> String {
    "DummyScope".to_string()
}

fn default_observer() -> String {
    "AI_Pipeline".to_string()
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: default_frame_side(),
            height: default_frame_side(),
            background: default_background(),
            noise: default_noise(),
            sources: default_sources(),
            exposure_seconds: default_exposure(),
            telescope: default_telescope(),
            observer: default_observer(),
        }
    }
}

/// Calibration parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Subtract the mean background before detection.
    #[serde(default)]
    pub subtract_background: bool,
}

/// Detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Threshold above the mean, in standard deviations.
    #[serde(default = "default_sigma_threshold")]
    pub sigma_threshold: f64,
    /// Upper bound on detections per frame.
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    /// Minimum Chebyshev distance between kept detections.
    #[serde(default = "default_min_separation")]
    pub min_separation: usize,
}

fn default_sigma_threshold() -> f64 {
    5.0
}

fn default_max_detections() -> usize {
    16
}

fn default_min_separation() -> usize {
    3
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sigma_threshold: default_sigma_threshold(),
            max_detections: default_max_detections(),
            min_separation: default_min_separation(),
        }
    }
}

/// HTTP server parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AstroflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick_interval().unwrap(), Duration::from_secs(10));
        assert!(config.scheduler.run_timeout().unwrap().is_none());
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AstroflowConfig::default();
        config
            .apply_env(lookup(&[
                ("ASTROFLOW_TICK_INTERVAL", "2.5"),
                ("ASTROFLOW_RUN_TIMEOUT", "30"),
                ("ASTROFLOW_BIND", "0.0.0.0:9000"),
                ("ASTROFLOW_LOG_JSON", "true"),
            ]))
            .unwrap();

        assert_eq!(config.scheduler.tick_interval().unwrap(), Duration::from_millis(2500));
        assert_eq!(config.scheduler.run_timeout().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(config.logging.json);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = AstroflowConfig::default();
        let err = config
            .apply_env(lookup(&[("ASTROFLOW_TICK_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, AstroflowError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_non_positive_tick() {
        let config = AstroflowConfig::default().with_tick_interval(0.0);
        assert!(config.validate().is_err());

        let config = AstroflowConfig::default().with_run_timeout(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_durations() {
        for seconds in [1e20, f64::NAN, f64::INFINITY, -1.0] {
            let config = AstroflowConfig::default().with_tick_interval(seconds);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, AstroflowError::Config(_)), "tick {seconds}");

            let config = AstroflowConfig::default().with_cooldown(seconds);
            assert!(config.validate().is_err(), "cooldown {seconds}");
        }

        let config = AstroflowConfig::default().with_run_timeout(1e20);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_accessors_error_instead_of_panicking() {
        let scheduler = SchedulerConfig {
            tick_interval_seconds: -1.0,
            cooldown_seconds: 1e30,
            run_timeout_seconds: Some(f64::NAN),
        };
        assert!(scheduler.tick_interval().is_err());
        assert!(scheduler.cooldown().is_err());
        assert!(scheduler.run_timeout().is_err());
        assert!(scheduler.validate().is_err());
    }

    #[test]
    fn test_sub_millisecond_tick_is_accepted() {
        let config = AstroflowConfig::default().with_tick_interval(0.0005);
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick_interval().unwrap(), Duration::from_micros(500));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AstroflowConfig =
            serde_json::from_str(r#"{"scheduler": {"tick_interval_seconds": 1.0}}"#).unwrap();
        assert_eq!(config.scheduler.tick_interval_seconds, 1.0);
        assert_eq!(config.synthetic, SyntheticConfig::default());
        assert_eq!(config.detection.max_detections, 16);
    }
}
