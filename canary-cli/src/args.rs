//! Command-line surface (§6), `clap` derive: one flat struct, no subcommands
//! (the canary only ever does one thing -- watch the configured endpoints
//! until interrupted).

use std::path::PathBuf;

use canary_engine::{RenditionSelector, Role, StreamType};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Black-box canary for HLS/DASH/Smooth Streaming endpoints", long_about = None)]
pub struct Args {
    /// Path to a `name,manifest_url[,tracking_url]` endpoints file (§6).
    #[arg(short = 'e', long)]
    pub endpoints_file: Option<PathBuf>,

    /// Monitor a single URL instead of (or in addition to) an endpoints file.
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Name to report this single URL under; defaults to its host.
    #[arg(long, requires = "url")]
    pub name: Option<String>,

    /// Tracking-companion URL for the single-URL endpoint.
    #[arg(long, requires = "url")]
    pub tracking_url: Option<String>,

    /// Force the stream type instead of auto-detecting it from the URL suffix.
    #[arg(long, value_parser = parse_stream_type)]
    pub force_type: Option<StreamType>,

    /// Which renditions to monitor: `all`, `player`, or a selector like `v3`/`a1`/`s1`.
    #[arg(long, default_value = "player", value_parser = parse_selector)]
    pub mode: RenditionSelector,

    /// Poll cadence in seconds (floored at 0.5s, §5).
    #[arg(long, default_value_t = 5.0)]
    pub frequency_sec: f64,

    /// Seconds of silence before a rendition is declared stale (§3 invariant 5).
    #[arg(long, default_value_t = 12.0)]
    pub stale_timeout_sec: f64,

    /// Per-request HTTP timeout (connect + read), in seconds.
    #[arg(long, default_value_t = 3.0)]
    pub http_timeout_sec: f64,

    /// Assumed client-side input buffer at session start, in seconds.
    #[arg(long, default_value_t = 30.0)]
    pub initial_buffer_sec: f64,

    /// Persist fetched manifest bodies via the `BlobSink`.
    #[arg(long)]
    pub save_manifests: bool,

    /// Persist fetched/requested segment bodies via the `BlobSink`.
    #[arg(long)]
    pub save_segments: bool,

    /// Persist tracking-companion responses via the `BlobSink`.
    #[arg(long)]
    pub save_tracking: bool,

    /// Gzip blobs before writing them to disk.
    #[arg(long)]
    pub gzip_on_save: bool,

    /// Partition saved blobs into `YYYY-MM-DD/` subdirectories.
    #[arg(long)]
    pub day_partitioned: bool,

    /// Root directory for saved blobs; required if any `--save-*` flag is set.
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    /// Turn on metrics publishing (always logged via `tracing`; see `--metrics-ndjson-path`
    /// for a second, file-backed sink).
    #[arg(long)]
    pub metrics_on: bool,

    /// Region label attached to published metrics, if any.
    #[arg(long)]
    pub metrics_region: Option<String>,

    /// Metrics namespace.
    #[arg(long, default_value = "canary")]
    pub metrics_namespace: String,

    /// Reserved for a future dashboards integration; currently only logged.
    #[arg(long)]
    pub dashboards: bool,

    /// Also append every published metrics batch as newline-delimited JSON here.
    #[arg(long)]
    pub metrics_ndjson_path: Option<PathBuf>,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `canary_engine=debug`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit structured logs as JSON instead of the default text format.
    #[arg(long)]
    pub log_json: bool,

    /// Also mirror file-logged output to stdout (default: on; pass to disable).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub stdout_mirror: bool,

    /// Directory for daily-rotated log files. Logging goes to stdout only if omitted.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Arbitrary `key=value` tags attached as extra metric dimensions; may be repeated.
    #[arg(long = "tag", value_parser = parse_tag)]
    pub property_tags: Vec<(String, String)>,

    /// Load-test mode: skip parsing/validation and just measure request latency (§4.5.4).
    #[arg(long)]
    pub load_test: bool,

    /// Detect ad breaks by segment-name/period-id substring instead of SCTE-35 markers.
    #[arg(long)]
    pub emt_mode: bool,

    /// Substring identifying an ad segment/period in EMT mode.
    #[arg(long, requires = "emt_mode")]
    pub ad_segment_substring: Option<String>,

    /// Poll the tracking companion; required for ad-break exit confirmation (§4.5.3).
    #[arg(long)]
    pub tracking_requests: bool,

    /// Include the estimated playhead position in tracking-companion requests.
    #[arg(long)]
    pub playhead_aware_tracking: bool,

    /// Warn if a tracking document never reports the expected event types for a break.
    #[arg(long)]
    pub check_tracking_events: bool,

    /// Issue a GET/HEAD request per discovered segment (§4.5 step 4).
    #[arg(long)]
    pub segment_requests: bool,

    /// Use HEAD instead of GET for `--segment-requests`.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub segment_request_method_is_head: bool,

    /// Compare raw manifest bytes poll-over-poll in addition to the parsed diff.
    #[arg(long)]
    pub compare_manifests: bool,
}

fn parse_stream_type(s: &str) -> Result<StreamType, String> {
    match s.to_ascii_lowercase().as_str() {
        "hls" => Ok(StreamType::Hls),
        "dash" => Ok(StreamType::Dash),
        "smooth" => Ok(StreamType::Smooth),
        other => Err(format!("unknown stream type `{other}` (expected hls, dash, or smooth)")),
    }
}

/// `all` | `player` | `<role-letter><ordinal>`, e.g. `v3`, `a1`, `s0` (§4.3).
fn parse_selector(s: &str) -> Result<RenditionSelector, String> {
    match s.to_ascii_lowercase().as_str() {
        "all" => return Ok(RenditionSelector::All),
        "player" => return Ok(RenditionSelector::Player),
        _ => {}
    }
    let mut chars = s.chars();
    let role = match chars.next() {
        Some('v') => Role::Video,
        Some('a') => Role::Audio,
        Some('s') => Role::Subtitle,
        _ => return Err(format!("invalid selector `{s}` (expected all, player, or v/a/s + ordinal)")),
    };
    let ordinal: u32 = chars.as_str().parse().map_err(|_| format!("invalid selector ordinal in `{s}`"))?;
    Ok(RenditionSelector::Single { role, ordinal })
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    let (key, value) = s.split_once('=').ok_or_else(|| format!("tag `{s}` must be `key=value`"))?;
    Ok((key.to_string(), value.to_string()))
}
