//! The canary's configuration surface (§6), as plain structs composed into
//! one top-level `AppConfig`: nested structs each with their own `Default`
//! impl.

use std::time::Duration;

use crate::model::RenditionSelector;

#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Tick cadence. Floor of 0.5s (§5).
    pub frequency: Duration,
    pub stale_timeout: Duration,
    pub http_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(5),
            stale_timeout: Duration::from_secs(12),
            http_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaveConfig {
    pub save_manifests: bool,
    pub save_segments: bool,
    pub save_tracking: bool,
    pub gzip_on_save: bool,
    pub day_partitioned: bool,
    pub output_root: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub region: Option<String>,
    pub namespace: String,
    pub dashboards: bool,
    /// Also append every published batch as NDJSON here, independent of `enabled`.
    pub ndjson_path: Option<std::path::PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: None,
            namespace: "canary".to_string(),
            dashboards: false,
            ndjson_path: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdBreakConfig {
    /// EMT mode: ads detected by segment-name / period-id substring instead
    /// of SCTE-35 markers (§4.5.1).
    pub emt_mode: bool,
    pub ad_segment_substring: Option<String>,
    pub tracking_requests: bool,
    pub playhead_aware_tracking: bool,
    pub check_tracking_events: bool,
}

#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// §4.5 step 4: issue GET/HEAD for each new segment to measure response
    /// time/size/4xx/5xx in addition to the manifest poll itself.
    pub segment_requests: bool,
    pub segment_request_method_is_head: bool,
    pub compare_manifests: bool,
    /// §9 open question: Smooth metrics-publish is intentionally disabled by
    /// default, matching the original source where the call is commented out.
    pub smooth_metrics_enabled: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            segment_requests: false,
            segment_request_method_is_head: true,
            compare_manifests: false,
            smooth_metrics_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadTestConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
    pub stdout_mirror: bool,
    pub log_dir: Option<std::path::PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            stdout_mirror: true,
            log_dir: None,
        }
    }
}

/// One endpoint's fully resolved monitoring configuration: the union of
/// global flags and any per-endpoint override carried by the endpoints file.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub manifest_url: String,
    pub tracking_url: Option<String>,
    pub forced_type: Option<crate::model::StreamType>,
    pub selector: RenditionSelector,
}

/// The fully resolved application configuration (§6). Immutable after load.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub timing: TimingConfig,
    pub save: SaveConfig,
    pub metrics: MetricsConfig,
    pub ad_break: AdBreakConfig,
    pub request: RequestConfig,
    pub load_test: LoadTestConfig,
    pub logging: LoggingConfig,
    pub property_tags: Vec<(String, String)>,
    pub initial_buffer_sec: f64,
}

impl AppConfig {
    /// `frequency` is clamped to the §5 floor of 0.5s.
    pub fn normalize(mut self) -> Self {
        let floor = Duration::from_millis(500);
        if self.timing.frequency < floor {
            self.timing.frequency = floor;
        }
        self
    }
}
