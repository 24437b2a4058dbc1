//! Endpoint Supervisor (C8): one long-lived task per configured endpoint.
//! Runs the premonitor (fetch the top manifest, classify it, discover and
//! select renditions, probe an anchor for each), spawns a Monitor per
//! selected rendition, and restarts the whole endpoint with a flat 5s backoff
//! if any of them ever exits. Grounded on `hls/coordinator.rs`'s
//! `setup_and_spawn`/`AllTaskHandles` shape: one task owns the fan-out and
//! waits on the first child to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::config::EndpointConfig;
use crate::context::AppContext;
use crate::correlator::CorrelationBucket;
use crate::endpoints::detect_stream_type;
use crate::error::{ConfigError, FetchError, ParseError};
use crate::fetcher::{FetchCategory, FetchMethod};
use crate::formats::{format_for, hls, select_renditions};
use crate::lipsync::{DashLipSyncBucket, SmoothSyncBucket};
use crate::model::{Rendition, RenditionSelector, StreamType};
use crate::monitor::{Monitor, SharedBuckets};
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};

/// One configured endpoint's supervising task.
pub struct EndpointSupervisor {
    config: EndpointConfig,
    ctx: Arc<AppContext>,
}

impl EndpointSupervisor {
    pub fn new(config: EndpointConfig, ctx: Arc<AppContext>) -> Self {
        Self { config, ctx }
    }

    /// Runs forever (until the root cancellation token fires), restarting the
    /// endpoint from scratch with a flat 5s backoff whenever every Monitor for
    /// it has exited (§4.8).
    pub async fn run(self) {
        let policy = RetryPolicy::endpoint_restart();
        let token = self.ctx.child_token();
        let name = self.config.name.clone();

        let result = retry_with_backoff(&policy, &token, |attempt| {
            let endpoint_token = token.child_token();
            async move {
                if attempt > 0 {
                    info!(endpoint = %name, attempt, "restarting endpoint supervisor");
                }
                match self.run_once(endpoint_token).await {
                    Ok(()) => RetryAction::Success(()),
                    Err(reason) => RetryAction::Retry(reason),
                }
            }
        })
        .await;

        if let Err(e) = result {
            info!(endpoint = %self.config.name, error = %e, "endpoint supervisor stopped");
        }
    }

    /// One premonitor + fan-out cycle. Returns once every Monitor it spawned
    /// has exited, or the supplied token is cancelled.
    async fn run_once(&self, token: CancellationToken) -> Result<(), String> {
        let stream_type = self
            .config
            .forced_type
            .or_else(|| detect_stream_type(&self.config.manifest_url))
            .ok_or_else(|| ConfigError::UndeterminedEndpointType { url: self.config.manifest_url.clone() }.to_string())?;

        let manifest_url = Url::parse(&self.config.manifest_url).map_err(|e| e.to_string())?;
        let tracking_url = self.config.tracking_url.as_deref().map(Url::parse).transpose().map_err(|e| e.to_string())?;

        let outcome = self.ctx.fetcher.fetch(&manifest_url, FetchMethod::Get, FetchCategory::Manifest, &token).await;
        let top_level = outcome.result.map_err(|e: FetchError| e.to_string())?;

        let format = format_for(stream_type);
        let discovered = format.discover(&top_level.bytes, &manifest_url).map_err(|e: ParseError| e.to_string())?;
        let selected = select_renditions(stream_type, &discovered, &self.config.selector);
        if selected.is_empty() {
            return Err("rendition selector matched nothing".to_string());
        }

        let hls_is_primary = stream_type == StreamType::Hls && hls::classify(&top_level.bytes) == hls::HlsKind::Primary;
        let from_primary = stream_type != StreamType::Hls || hls_is_primary;

        for rendition in &selected {
            self.ctx.rendition_registry.record(stream_type, rendition_name(&self.config.name, rendition));
        }

        let shared = self.build_shared_buckets(stream_type, &selected);
        let member_count = if shared.correlation.is_some() { selected.len() } else { 1 };

        if let Some(bucket) = &shared.correlation {
            tokio::spawn(watch_correlation_bucket(
                Arc::clone(bucket),
                self.ctx.config.timing.frequency.as_secs_f64(),
                token.child_token(),
            ));
        }

        let mut monitors = JoinSet::new();
        for rendition in selected {
            let anchor = self.probe_rendition(&*format, stream_type, &manifest_url, &top_level.bytes, &rendition, &token).await?;
            let Some(anchor) = anchor else {
                warn!(endpoint = %self.config.name, role = ?rendition.role, "rendition produced no segments at probe time, skipping");
                continue;
            };

            let name = rendition_name(&self.config.name, &rendition);
            let monitor = Monitor::new(
                self.config.name.clone(),
                name,
                rendition,
                stream_type,
                anchor,
                Arc::clone(&self.ctx),
                tracking_url.clone(),
                from_primary,
                member_count,
                shared.clone(),
                token.child_token(),
            );
            monitors.spawn(monitor.run());
        }

        if monitors.is_empty() {
            return Err("no rendition could be probed".to_string());
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    monitors.abort_all();
                    return Ok(());
                }
                joined = monitors.join_next() => {
                    match joined {
                        None => return Ok(()),
                        Some(Ok(Ok(()))) => continue,
                        Some(Ok(Err(crate::error::MonitorError::Cancelled))) => {
                            monitors.abort_all();
                            return Ok(());
                        }
                        Some(Ok(Err(reason))) => {
                            warn!(endpoint = %self.config.name, error = %reason, "a monitor exited");
                            monitors.abort_all();
                            token.cancel();
                            return Err(reason.to_string());
                        }
                        Some(Err(join_err)) => {
                            warn!(endpoint = %self.config.name, error = %join_err, "a monitor task panicked");
                            monitors.abort_all();
                            token.cancel();
                            return Err(join_err.to_string());
                        }
                    }
                }
            }
        }
    }

    fn build_shared_buckets(&self, stream_type: StreamType, selected: &[Rendition]) -> SharedBuckets {
        let wants_correlation = matches!(self.config.selector, RenditionSelector::All) && stream_type == StreamType::Hls;
        let wants_lip_sync = matches!(self.config.selector, RenditionSelector::All | RenditionSelector::Player) && selected.len() > 1;

        SharedBuckets {
            correlation: wants_correlation.then(|| Arc::new(CorrelationBucket::new())),
            dash_lip_sync: (wants_lip_sync && stream_type == StreamType::Dash).then(|| Arc::new(DashLipSyncBucket::new())),
            smooth_sync: (wants_lip_sync && stream_type == StreamType::Smooth).then(|| Arc::new(SmoothSyncBucket::new())),
        }
    }

    /// HLS-primary renditions point at their own media playlist, fetched and
    /// probed independently. DASH/Smooth/HLS-media renditions already live in
    /// `top_level_bytes`, the same document that was just fetched.
    async fn probe_rendition(
        &self,
        format: &dyn crate::formats::ManifestFormat,
        stream_type: StreamType,
        manifest_url: &Url,
        top_level_bytes: &[u8],
        rendition: &Rendition,
        token: &CancellationToken,
    ) -> Result<Option<crate::model::Anchor>, String> {
        if stream_type == StreamType::Hls && hls::classify(top_level_bytes) == hls::HlsKind::Primary {
            let outcome = self.ctx.fetcher.fetch(&rendition.url, FetchMethod::Get, FetchCategory::Manifest, token).await;
            let response = outcome.result.map_err(|e| e.to_string())?;
            let view = format.parse(&response.bytes, &rendition.url, rendition).map_err(|e| e.to_string())?;
            Ok(format.probe(&view, rendition))
        } else {
            let view = format.parse(top_level_bytes, manifest_url, rendition).map_err(|e| e.to_string())?;
            Ok(format.probe(&view, rendition))
        }
    }
}

fn rendition_name(endpoint: &str, rendition: &Rendition) -> String {
    format!("{endpoint}-{}-{}", role_str(rendition.role), rendition.ordinal)
}

fn role_str(role: crate::model::Role) -> &'static str {
    match role {
        crate::model::Role::Video => "video",
        crate::model::Role::Audio => "audio",
        crate::model::Role::Subtitle => "subtitle",
    }
}

/// Periodically evicts a shared correlation bucket that has grown past the
/// unexpectedly-long threshold, tearing down the endpoint so it restarts
/// clean (§4.6). Spawned alongside an endpoint's monitors whenever it has a
/// `CorrelationBucket`.
pub async fn watch_correlation_bucket(bucket: Arc<CorrelationBucket>, frequency_sec: f64, token: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {
                if bucket.check_unexpectedly_long(frequency_sec) {
                    token.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn rendition_name_combines_role_and_ordinal() {
        let r = Rendition {
            role: Role::Audio,
            ordinal: 2,
            url: Url::parse("https://example.com/a.m3u8").unwrap(),
            anchor_key: crate::model::AnchorKey::HlsUrl("https://example.com/a.m3u8".to_string()),
        };
        assert_eq!(rendition_name("ep", &r), "ep-audio-2");
    }
}
