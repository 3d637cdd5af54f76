//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! A missing file falls back to defaults with a warning. A file that exists
//! but does not parse or carries invalid tracking parameters is an error.

use crate::services::kalman::KalmanParams;
use crate::services::settings::TrackerSettings;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Where position batches come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressMode {
    /// Subscribe to batches published on an MQTT topic
    Mqtt,
    /// Read one batch per line from a JSONL file
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "site".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    pub safe_radius_m: f64,
    pub stale_threshold_minutes: f64,
    pub jitter_snap_m: f64,
    /// Displacement between `Safe` reports that counts as moving
    pub movement_threshold_m: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        let settings = TrackerSettings::default();
        Self {
            safe_radius_m: settings.safe_radius_m,
            stale_threshold_minutes: settings.stale_threshold_minutes,
            jitter_snap_m: settings.jitter_snap_m,
            movement_threshold_m: settings.movement_threshold_m,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub tick_length: f64,
    pub initial_position_variance: f64,
    pub initial_velocity_variance: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let params = KalmanParams::default();
        Self {
            process_noise: params.process_noise,
            measurement_noise: params.measurement_noise,
            tick_length: params.tick_length,
            initial_position_variance: params.initial_position_variance,
            initial_velocity_variance: params.initial_velocity_variance,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub trend_capacity: usize,
    pub raw_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { trend_capacity: 30, raw_window: 1 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrackingConfig {
    /// Entities never tracked (e.g. the account owner's own device)
    #[serde(default)]
    pub ignored_entities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: default_poll_interval() }
    }
}

fn default_poll_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_ingress_mode")]
    pub mode: IngressMode,
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_ingress_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub replay_file: Option<String>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            mode: default_ingress_mode(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            topic: default_ingress_topic(),
            username: None,
            password: None,
            replay_file: None,
        }
    }
}

fn default_ingress_mode() -> IngressMode {
    IngressMode::Mqtt
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_ingress_topic() -> String {
    "geofence/observations".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    #[serde(default = "default_egress_file")]
    pub file: String,
    #[serde(default)]
    pub mqtt_enabled: bool,
    #[serde(default = "default_snapshots_topic")]
    pub mqtt_topic: String,
    #[serde(default = "default_alerts_topic")]
    pub alerts_topic: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            file: default_egress_file(),
            mqtt_enabled: false,
            mqtt_topic: default_snapshots_topic(),
            alerts_topic: default_alerts_topic(),
        }
    }
}

fn default_egress_file() -> String {
    "snapshots.jsonl".to_string()
}

fn default_snapshots_topic() -> String {
    "geofence/snapshots".to_string()
}

fn default_alerts_topic() -> String {
    "geofence/alerts".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    tracker: TrackerSettings,
    poll_interval_secs: u64,
    ingress_mode: IngressMode,
    mqtt_host: String,
    mqtt_port: u16,
    ingress_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    replay_file: Option<String>,
    egress_file: String,
    mqtt_egress_enabled: bool,
    snapshots_topic: String,
    alerts_topic: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config
            .tracker
            .validate()
            .with_context(|| format!("Invalid tracking parameters in {}", path.display()))?;
        Ok(config)
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { site, geofence, filter, history, tracking, polling, ingress, egress, metrics } =
            toml_config;

        let tracker = TrackerSettings {
            safe_radius_m: geofence.safe_radius_m,
            stale_threshold_minutes: geofence.stale_threshold_minutes,
            jitter_snap_m: geofence.jitter_snap_m,
            movement_threshold_m: geofence.movement_threshold_m,
            trend_capacity: history.trend_capacity,
            raw_window: history.raw_window,
            filter: KalmanParams {
                process_noise: filter.process_noise,
                measurement_noise: filter.measurement_noise,
                tick_length: filter.tick_length,
                initial_position_variance: filter.initial_position_variance,
                initial_velocity_variance: filter.initial_velocity_variance,
            },
            ignored_entities: tracking.ignored_entities,
        };

        Self {
            site_id: site.id,
            tracker,
            poll_interval_secs: polling.interval_secs,
            ingress_mode: ingress.mode,
            mqtt_host: ingress.mqtt_host,
            mqtt_port: ingress.mqtt_port,
            ingress_topic: ingress.topic,
            mqtt_username: ingress.username,
            mqtt_password: ingress.password,
            replay_file: ingress.replay_file,
            egress_file: egress.file,
            mqtt_egress_enabled: egress.mqtt_enabled,
            snapshots_topic: egress.mqtt_topic,
            alerts_topic: egress.alerts_topic,
            metrics_interval_secs: metrics.interval_secs,
            prometheus_port: metrics.prometheus_port,
            config_file,
        }
    }

    /// Load from `path`, falling back to defaults only when the file is missing
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(file = %path.display(), "config_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Engine parameters built from the geofence, filter, history and
    /// tracking sections
    pub fn tracker_settings(&self) -> TrackerSettings {
        self.tracker.clone()
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    pub fn ingress_mode(&self) -> IngressMode {
        self.ingress_mode
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn ingress_topic(&self) -> &str {
        &self.ingress_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn replay_file(&self) -> Option<&str> {
        self.replay_file.as_deref()
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn snapshots_topic(&self) -> &str {
        &self.snapshots_topic
    }

    pub fn alerts_topic(&self) -> &str {
        &self.alerts_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point egress at a temp file
    #[cfg(test)]
    pub fn with_egress_file(mut self, file: impl Into<String>) -> Self {
        self.egress_file = file.into();
        self
    }
}
