//! `canary` binary entry point. Wires the parsed CLI surface (`args.rs`) into
//! an `AppConfig`, builds the shared `AppContext`, spawns one
//! `EndpointSupervisor` per configured endpoint, and waits for a shutdown
//! signal. Grounded on `rust-srec/src/main.rs`'s top-level shape (mimalloc
//! global allocator, `#[tokio::main]`, `tokio::select!` over SIGINT/SIGTERM,
//! graceful drain) and `rust-srec/src/logging/mod.rs`'s tracing-appender
//! setup, simplified to this crate's scope (no reloadable filter, no log
//! broadcast -- the canary has no API server to stream them to).

mod args;

use std::sync::Arc;

use anyhow::Context;
use canary_engine::config::{
    AdBreakConfig, AppConfig, EndpointConfig, LoadTestConfig, LoggingConfig, MetricsConfig, RequestConfig, SaveConfig, TimingConfig,
};
use canary_engine::context::AppContext;
use canary_engine::endpoints::parse_endpoints_file;
use canary_engine::fetcher::Fetcher;
use canary_engine::metrics::{CompositeMetricsSink, MetricsSink, NdjsonFileMetricsSink, TracingMetricsSink};
use canary_engine::sinks::{BlobSink, FileBlobSink, NoopBlobSink};
use canary_engine::supervisor::EndpointSupervisor;
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use args::Args;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const USER_AGENT: &str = concat!("streaming-media-canary/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    let config = Arc::new(build_config(&args).context("invalid configuration")?);
    info!(endpoints = config.endpoints.len(), frequency_sec = config.timing.frequency.as_secs_f64(), "canary starting");

    let client = reqwest::Client::builder()
        .timeout(config.timing.http_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let fetcher = Arc::new(Fetcher::new(client, config.timing.http_timeout, USER_AGENT));

    let metrics_sink = build_metrics_sink(&config);
    let blob_sink = build_blob_sink(&config);

    let ctx = Arc::new(AppContext::new(Arc::clone(&config), fetcher, metrics_sink, blob_sink));

    let mut supervisors = JoinSet::new();
    for endpoint in config.endpoints.clone() {
        let ctx = Arc::clone(&ctx);
        supervisors.spawn(EndpointSupervisor::new(endpoint, ctx).run());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, shutting down");
        }
        _ = drain(&mut supervisors) => {
            warn!("all endpoint supervisors exited on their own");
        }
    }

    ctx.cancellation.cancel();
    let drain_budget = config.timing.frequency + config.timing.http_timeout;
    if tokio::time::timeout(drain_budget, drain(&mut supervisors)).await.is_err() {
        warn!("supervisors did not drain in time, aborting");
        supervisors.abort_all();
    }

    info!("canary stopped");
    Ok(())
}

/// Waits for every supervisor task to finish, logging (but not propagating)
/// any panic so one endpoint's bug can't wedge shutdown of the others.
async fn drain(supervisors: &mut JoinSet<()>) {
    while let Some(joined) = supervisors.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "a supervisor task panicked");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

/// Plain stdout/file `tracing-subscriber` setup -- no reload handle, no
/// broadcast layer, since nothing in this binary ever changes the filter at
/// runtime or streams logs to a client. Each combination of
/// (file-or-not) x (json-or-not) x (mirror-or-not) is written out explicitly
/// as its own `registry().with(...).with(...)` chain rather than boxed.
fn init_logging(args: &Args) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let Some(dir) = &args.log_dir else {
        if args.log_json {
            registry.with(fmt::layer().json().with_target(true)).try_init().context("failed to install tracing subscriber")?;
        } else {
            registry.with(fmt::layer().with_target(true)).try_init().context("failed to install tracing subscriber")?;
        }
        return Ok(None);
    };

    std::fs::create_dir_all(dir).with_context(|| format!("failed to create log directory `{}`", dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(dir, "canary.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match (args.stdout_mirror, args.log_json) {
        (true, true) => {
            registry
                .with(fmt::layer().json().with_target(true))
                .with(fmt::layer().json().with_writer(non_blocking).with_ansi(false).with_target(true))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        (true, false) => {
            registry
                .with(fmt::layer().with_target(true))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        (false, true) => {
            registry
                .with(fmt::layer().json().with_writer(non_blocking).with_ansi(false).with_target(true))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        (false, false) => {
            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
    }
    Ok(Some(guard))
}

/// Resolves the full `AppConfig` from parsed args: endpoints file entries,
/// a single `--url` endpoint (additive, per the flag's own doc comment), and
/// every other flag mapped onto its `config.rs` struct (§6).
fn build_config(args: &Args) -> anyhow::Result<AppConfig> {
    let mut endpoints: Vec<EndpointConfig> = Vec::new();

    if let Some(path) = &args.endpoints_file {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| canary_engine::ConfigError::EndpointsFileUnreadable { path: path.display().to_string(), source })?;
        let mut from_file = parse_endpoints_file(&contents, args.mode.clone())?;
        for endpoint in &mut from_file {
            endpoint.forced_type = args.force_type;
        }
        endpoints.append(&mut from_file);
    }

    if let Some(url) = &args.url {
        let name = args.name.clone().unwrap_or_else(|| host_of(url));
        endpoints.push(EndpointConfig {
            name,
            manifest_url: url.clone(),
            tracking_url: args.tracking_url.clone(),
            forced_type: args.force_type,
            selector: args.mode.clone(),
        });
    }

    if endpoints.is_empty() {
        anyhow::bail!(canary_engine::ConfigError::NoEndpoints);
    }

    if (args.save_manifests || args.save_segments || args.save_tracking) && args.output_root.is_none() {
        anyhow::bail!("--save-manifests/--save-segments/--save-tracking require --output-root");
    }

    if args.emt_mode && args.ad_segment_substring.is_none() {
        anyhow::bail!("--emt-mode requires --ad-segment-substring");
    }

    Ok(AppConfig {
        endpoints,
        timing: TimingConfig {
            frequency: secs(args.frequency_sec),
            stale_timeout: secs(args.stale_timeout_sec),
            http_timeout: secs(args.http_timeout_sec),
        },
        save: SaveConfig {
            save_manifests: args.save_manifests,
            save_segments: args.save_segments,
            save_tracking: args.save_tracking,
            gzip_on_save: args.gzip_on_save,
            day_partitioned: args.day_partitioned,
            output_root: args.output_root.clone(),
        },
        metrics: MetricsConfig {
            enabled: args.metrics_on,
            region: args.metrics_region.clone(),
            namespace: args.metrics_namespace.clone(),
            dashboards: args.dashboards,
            ndjson_path: args.metrics_ndjson_path.clone(),
        },
        ad_break: AdBreakConfig {
            emt_mode: args.emt_mode,
            ad_segment_substring: args.ad_segment_substring.clone(),
            tracking_requests: args.tracking_requests,
            playhead_aware_tracking: args.playhead_aware_tracking,
            check_tracking_events: args.check_tracking_events,
        },
        request: RequestConfig {
            segment_requests: args.segment_requests,
            segment_request_method_is_head: args.segment_request_method_is_head,
            compare_manifests: args.compare_manifests,
            smooth_metrics_enabled: false,
        },
        load_test: LoadTestConfig { enabled: args.load_test },
        logging: LoggingConfig {
            level: args.log_level.clone(),
            json_format: args.log_json,
            stdout_mirror: args.stdout_mirror,
            log_dir: args.log_dir.clone(),
        },
        property_tags: args.property_tags.clone(),
        initial_buffer_sec: args.initial_buffer_sec,
    }
    .normalize())
}

fn secs(value: f64) -> std::time::Duration {
    std::time::Duration::from_secs_f64(value.max(0.0))
}

fn host_of(url: &str) -> String {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_else(|| url.to_string())
}

/// Composes the tracing sink (gated on `--metrics-on`) with the optional
/// NDJSON file sink (gated independently on `--metrics-ndjson-path`); an empty
/// composite is a no-op publisher, so "metrics off" needs no separate type.
fn build_metrics_sink(config: &AppConfig) -> Arc<dyn MetricsSink> {
    let mut sinks: Vec<Arc<dyn MetricsSink>> = Vec::new();
    if config.metrics.enabled {
        sinks.push(Arc::new(TracingMetricsSink::new(config.metrics.namespace.clone())));
    }
    if let Some(path) = &config.metrics.ndjson_path {
        sinks.push(Arc::new(NdjsonFileMetricsSink::new(path.clone())));
    }
    Arc::new(CompositeMetricsSink::new(sinks))
}

fn build_blob_sink(config: &AppConfig) -> Arc<dyn BlobSink> {
    if config.save.save_manifests || config.save.save_segments || config.save.save_tracking {
        if let Some(root) = &config.save.output_root {
            return Arc::new(FileBlobSink::new(root.clone(), config.save.day_partitioned, config.save.gzip_on_save));
        }
    }
    Arc::new(NoopBlobSink)
}
