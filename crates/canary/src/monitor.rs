//! Monitor State Machine (C5): one long-lived task per rendition driving the
//! §4.5 tick loop. Grounded on `mesio`'s `SegmentScheduler` (a long-lived task
//! owning state across polls, holding handles to its collaborators) and
//! `coordinator.rs`'s spawn/cancellation idiom. This is the hub where every
//! other module in this crate gets wired together.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::adbreak;
use crate::context::AppContext;
use crate::correlator::CorrelationBucket;
use crate::error::MonitorError;
use crate::events::MonitorEvent;
use crate::fetcher::{FetchCategory, FetchMethod};
use crate::formats::{compare_last_segment, scan_from_anchor, ManifestFormat};
use crate::lipsync::{self, DashLipSyncBucket, PtsSample, SmoothSyncBucket};
use crate::metrics::PollMetrics;
use crate::model::{AdState, CorrelationEntry, ManifestHeaders, ManifestView, Rendition, RenditionState, Role, Seq, SegmentRecord, StreamType};
use crate::sinks::BlobCategory;
use crate::tracking::{self, TrackingDocument};

/// Cross-rendition collaborators a Monitor may hold, depending on the
/// endpoint's `RenditionSelector` (§4.6, §4.5.2). `None` when the endpoint is
/// in `single` mode, where there is nothing to correlate against.
#[derive(Clone, Default)]
pub struct SharedBuckets {
    pub correlation: Option<Arc<CorrelationBucket>>,
    pub dash_lip_sync: Option<Arc<DashLipSyncBucket>>,
    pub smooth_sync: Option<Arc<SmoothSyncBucket>>,
}

/// Everything one Monitor task needs to run a single rendition (§4.5).
pub struct Monitor {
    endpoint_name: String,
    rendition_name: String,
    rendition: Rendition,
    stream_type: StreamType,
    format: Box<dyn ManifestFormat>,
    ctx: Arc<AppContext>,
    tracking_url: Option<Url>,
    /// True when this Monitor was spawned from a primary manifest's
    /// rediscovery rather than at endpoint startup; staleness then terminates
    /// the task instead of just logging (§4.5 step 10).
    from_primary: bool,
    correlation_member_count: usize,
    shared: SharedBuckets,
    token: CancellationToken,
    state: RenditionState,
}

impl Monitor {
    pub fn new(
        endpoint_name: impl Into<String>,
        rendition_name: impl Into<String>,
        rendition: Rendition,
        stream_type: StreamType,
        anchor: crate::model::Anchor,
        ctx: Arc<AppContext>,
        tracking_url: Option<Url>,
        from_primary: bool,
        correlation_member_count: usize,
        shared: SharedBuckets,
        token: CancellationToken,
    ) -> Self {
        let format = crate::formats::format_for(stream_type);
        let state = RenditionState::new(
            anchor,
            ctx.config.initial_buffer_sec,
            ctx.config.timing.stale_timeout.as_secs_f64(),
        );
        Self {
            endpoint_name: endpoint_name.into(),
            rendition_name: rendition_name.into(),
            rendition,
            stream_type,
            format,
            ctx,
            tracking_url,
            from_primary,
            correlation_member_count,
            shared,
            token,
            state,
        }
    }

    fn frequency(&self) -> Duration {
        self.ctx.config.timing.frequency
    }

    /// Drives the tick loop until cancelled, or (§4.5 step 10) until this
    /// rendition goes stale having been spawned from a primary manifest.
    pub async fn run(mut self) -> Result<(), MonitorError> {
        if self.ctx.config.load_test.enabled {
            return self.run_load_test().await;
        }

        let mut scheduled = Instant::now();
        loop {
            if self.token.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            let now = Instant::now();
            if scheduled > now {
                tokio::select! {
                    _ = self.token.cancelled() => return Err(MonitorError::Cancelled),
                    _ = tokio::time::sleep(scheduled - now) => {}
                }
            } else if now - scheduled > Duration::from_secs(1) {
                warn!(
                    rendition = %self.rendition_name,
                    overrun_ms = (now - scheduled).as_millis() as u64,
                    "tick overrun; poll is falling behind its configured frequency"
                );
            }
            scheduled += self.frequency();

            match self.tick().await {
                ControlFlow::Continue(()) => {}
                ControlFlow::Break(()) => return Err(MonitorError::StaleFromPrimary),
            }
        }
    }

    /// §4.5.4 load-test mode: issues GET requests at the configured cadence
    /// and records only latency/status metrics, bypassing every parsing and
    /// state-tracking step. Used to characterize an endpoint's raw HTTP
    /// behavior under sustained polling without canary logic in the loop.
    async fn run_load_test(mut self) -> Result<(), MonitorError> {
        let mut scheduled = Instant::now();
        loop {
            if self.token.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }
            let now = Instant::now();
            if scheduled > now {
                tokio::select! {
                    _ = self.token.cancelled() => return Err(MonitorError::Cancelled),
                    _ = tokio::time::sleep(scheduled - now) => {}
                }
            }
            scheduled += self.frequency();

            let outcome = self
                .ctx
                .fetcher
                .fetch(&self.rendition.url, FetchMethod::Get, FetchCategory::Manifest, &self.token)
                .await;
            let mut metrics = PollMetrics::new(self.rendition_name.clone(), self.stream_type);
            metrics.scalar("manifestresponsetime", outcome.latency_ms as f64);
            match outcome.result {
                Ok(resp) => metrics.scalar("manifestsize", resp.bytes.len() as f64),
                Err(err) => {
                    if let Some(suffix) = err.metric_suffix() {
                        metrics.observe(&format!("manifest{suffix}"), 1.0);
                    }
                }
            }
            if let Err(e) = self.ctx.metrics_sink.publish(metrics.finish()).await {
                warn!(rendition = %self.rendition_name, error = %e, "metrics publish failed");
            }
        }
    }

    /// One tick: fetch, parse, diff against the anchor, update every piece of
    /// per-rendition state, publish metrics. Returns `Break` only when this
    /// rendition should terminate (stale, spawned from a primary).
    async fn tick(&mut self) -> ControlFlow<()> {
        let mut metrics = PollMetrics::new(self.rendition_name.clone(), self.stream_type);
        let mut new_content_sec = 0.0;
        let mut had_new_segment = false;

        let outcome = self
            .ctx
            .fetcher
            .fetch(&self.rendition.url, FetchMethod::Get, FetchCategory::Manifest, &self.token)
            .await;
        metrics.scalar("manifestresponsetime", outcome.latency_ms as f64);

        match outcome.result {
            Err(err) => {
                if let Some(suffix) = err.metric_suffix() {
                    metrics.observe(&format!("manifest{suffix}"), 1.0);
                }
                warn!(rendition = %self.rendition_name, error = %err, "manifest fetch failed");
            }
            Ok(response) => {
                metrics.scalar("manifestsize", response.bytes.len() as f64);

                if self.ctx.config.save.save_manifests {
                    self.save_blob(BlobCategory::Manifest, "manifest", &response.bytes).await;
                }

                match self.format.parse(&response.bytes, &self.rendition.url, &self.rendition) {
                    Err(err) => {
                        warn!(rendition = %self.rendition_name, error = %err, "manifest parse failed");
                    }
                    Ok(view) => {
                        self.detect_header_change(&view.headers);
                        let (consumed, any_new) = self.process_view(&view, &mut metrics).await;
                        new_content_sec = consumed;
                        had_new_segment = any_new;
                        self.state.last_manifest_headers = Some(view.headers);
                    }
                }
            }
        }

        // Tracking companion (§4.5.3): poll while a break is open and not yet
        // confirmed, regardless of whether this tick's manifest fetch produced
        // new segments.
        if self.state.ad_state.in_break && !self.state.ad_state.tracking_confirmed {
            self.poll_tracking(&mut metrics).await;
        }

        // §4.5 step 8: content shortage ring buffer.
        self.state.content_window.push(new_content_sec);
        let shortage_threshold = 0.25 * 2.0 * self.frequency().as_secs_f64();
        if self.state.content_window.shortage(shortage_threshold) {
            warn!(
                rendition = %self.rendition_name,
                window = ?self.state.content_window.as_slice_vec(),
                "content shortage: new content has fallen well behind wall-clock time"
            );
            metrics.scalar("contentshortage", 1.0);
        } else {
            metrics.scalar("contentshortage", 0.0);
        }

        // §4.5 step 9: session / input-buffer accounting.
        let now = Instant::now();
        self.state.session.content_duration_sec += new_content_sec;
        let input_buffer_sec = self.state.session.input_buffer_sec(now);
        metrics.scalar("inputbuffersize", input_buffer_sec);
        if input_buffer_sec < 0.0 && had_new_segment {
            info!(rendition = %self.rendition_name, "input buffer exhausted; restarting session accounting");
            self.state.session.restart(now);
        }

        // §3 invariant 6: any poll that produced a new segment pushes the
        // staleness deadline back out, before it's checked below.
        if had_new_segment {
            self.state.session.reset_stale(now);
        }

        // §4.5 step 10: staleness.
        let stale = self.state.is_stale(now);
        metrics.scalar("stale", if stale { 1.0 } else { 0.0 });
        if stale {
            warn!(rendition = %self.rendition_name, from_primary = self.from_primary, "rendition is stale");
        }

        if let Err(e) = self.ctx.metrics_sink.publish(metrics.finish()).await {
            warn!(rendition = %self.rendition_name, error = %e, "metrics publish failed");
        }

        if stale && self.from_primary {
            info!(rendition = %self.rendition_name, "stale monitor spawned from a primary manifest; terminating for re-resolution");
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// §4.5 steps 3-7: anchor scan, per-new-segment processing, anchor-missing
    /// handling, and PDT drift. Returns the sum of new segment durations and
    /// whether any new segment was found.
    async fn process_view(&mut self, view: &ManifestView, metrics: &mut PollMetrics) -> (f64, bool) {
        let scan = scan_from_anchor(view, &self.state.anchor.seq);

        if let (Some(confirmed), Some(prev)) = (scan.confirmed, self.state.last_confirmed_segment.as_ref()) {
            let diffs = compare_last_segment(prev, confirmed);
            if !diffs.is_empty() {
                warn!(rendition = %self.rendition_name, fields = ?diffs, "last-known segment changed between polls");
            }
        }

        if !scan.found_last() {
            // §4.5 step 5: the window slid past the anchor entirely. Do not
            // advance the anchor or treat anything as a new segment -- doing
            // so would reset staleness on every tick and this rendition would
            // never be recognized as needing re-resolution.
            warn!(
                rendition = %self.rendition_name,
                anchor_seq = ?self.state.anchor.seq,
                "anchor segment no longer present in manifest window"
            );
            return (0.0, false);
        }

        let mut new_content_sec = 0.0;
        for segment in scan.new_segments.iter().copied() {
            self.process_new_segment(segment, &view.headers, metrics).await;
            new_content_sec += segment.duration_sec;
        }

        if let Some(last) = scan.new_segments.last() {
            self.state.anchor.seq = last.seq.clone();
            self.state.anchor.cumulative_duration_sec += new_content_sec;
            self.state.last_confirmed_segment = Some((*last).clone());
        } else if let Some(confirmed) = scan.confirmed {
            self.state.last_confirmed_segment = Some(confirmed.clone());
        }

        if let Some((anchor_pdt, cum)) = &self.state.pdt_anchor {
            let now_utc = chrono::Utc::now();
            let delta_sec = (*anchor_pdt - now_utc).num_milliseconds() as f64 / 1000.0 + cum;
            metrics.scalar("pdtdelta", delta_sec);
        }

        (new_content_sec, !scan.new_segments.is_empty())
    }

    /// §4.5 step 4 and its fan-out: duration accounting, the TARGETDURATION
    /// inconsistency check, discontinuity, ad-break transitions, lip-sync
    /// bucket contribution, cross-rendition correlation, PDT tracking, and
    /// the optional per-segment HTTP request.
    async fn process_new_segment(&mut self, segment: &SegmentRecord, headers: &ManifestHeaders, metrics: &mut PollMetrics) {
        metrics.observe("segmentduration", segment.duration_sec);

        if let Some(target) = headers.target_duration_sec {
            if segment.duration_sec > target.round() {
                warn!(
                    rendition = %self.rendition_name,
                    duration_sec = segment.duration_sec,
                    target_duration_sec = target,
                    "segment duration exceeds TARGETDURATION"
                );
            }
        }

        if segment.discontinuity_flag {
            metrics.observe("discontinuity", 1.0);
        }

        self.process_ad_break(segment, metrics);
        self.track_pdt(segment, headers);
        self.contribute_lip_sync(segment);
        self.contribute_correlation(segment);

        if self.ctx.config.save.save_segments {
            // Fetched separately below when `segment_requests` is enabled;
            // otherwise there is no body to persist.
        }

        if self.ctx.config.request.segment_requests {
            self.request_segment(segment, metrics).await;
        }
    }

    fn process_ad_break(&mut self, segment: &SegmentRecord, metrics: &mut PollMetrics) {
        let ad_break = &self.ctx.config.ad_break;
        let events = if ad_break.emt_mode {
            let substring = ad_break.ad_segment_substring.as_deref().unwrap_or("_ad_");
            adbreak::observe_emt(&mut self.state.ad_state, segment, substring)
        } else {
            adbreak::observe_non_emt(&mut self.state.ad_state, segment)
        };

        for event in events {
            match event {
                MonitorEvent::AdBreakEnter { advertised_duration_sec } => {
                    metrics.observe("adbreak", 1.0);
                    if let Some(d) = advertised_duration_sec {
                        metrics.scalar("addurationadvertised", d);
                    }
                }
                MonitorEvent::AdBreakExit { actual_duration_sec } => {
                    metrics.scalar("addurationactual", actual_duration_sec);
                    let advertised = self.state.ad_state.advertised_duration_sec;
                    metrics.observe("addurationdelta", actual_duration_sec - advertised);
                    tracking::warn_if_unconfirmed_on_exit(&self.state.ad_state);
                }
                _ => {}
            }
        }
    }

    fn track_pdt(&mut self, segment: &SegmentRecord, headers: &ManifestHeaders) {
        if segment.pdt_explicit {
            let actual = segment.pdt.expect("pdt_explicit implies pdt is set");
            if let Some((anchor_pdt, cum)) = &self.state.pdt_anchor {
                let predicted = *anchor_pdt + chrono::Duration::milliseconds((*cum * 1000.0) as i64);
                let delta_sec = (actual - predicted).num_milliseconds() as f64 / 1000.0;
                let target = headers.target_duration_sec.unwrap_or(0.0);
                if delta_sec < 0.0 || delta_sec > 2.0 * target {
                    warn!(
                        rendition = %self.rendition_name,
                        delta_sec,
                        direction = if delta_sec < 0.0 { "negative" } else { "positive" },
                        "unexpected PDT jump"
                    );
                }
            }
            self.state.pdt_anchor = Some((actual, 0.0));
        } else if let Some((_, cum)) = &mut self.state.pdt_anchor {
            *cum += segment.duration_sec;
        }
    }

    fn contribute_lip_sync(&mut self, segment: &SegmentRecord) {
        match self.stream_type {
            StreamType::Dash => {
                if let (Some(bucket), Some(pts_sec)) = (&self.shared.dash_lip_sync, segment.pts_sec()) {
                    bucket.record(segment.seq.clone(), PtsSample { role: self.rendition.role, pts_sec });
                    for (seq, delta_sec) in bucket.drain_deltas() {
                        if let Some(event) = lipsync::evaluate_dash_delta(&mut self.state.lip_sync_offending, delta_sec) {
                            self.log_dash_lip_sync(&seq, event);
                        }
                    }
                }
            }
            StreamType::Smooth => {
                if let (Some(bucket), Some(tsec)) = (&self.shared.smooth_sync, segment.pts_sec()) {
                    let updated = bucket.update(self.rendition.role, tsec);
                    for event in lipsync::evaluate_smooth(&updated) {
                        self.log_smooth_sync(event);
                    }
                }
            }
            StreamType::Hls => {}
        }
    }

    fn log_dash_lip_sync(&self, seq: &Seq, event: lipsync::LipSyncEvent) {
        match event {
            lipsync::LipSyncEvent::Warn { delta_sec } => {
                warn!(rendition = %self.endpoint_name, seq = ?seq, delta_sec, "A/V PTS delta across renditions exceeds 100ms")
            }
            lipsync::LipSyncEvent::Recovered { delta_sec } => {
                info!(rendition = %self.endpoint_name, seq = ?seq, delta_sec, "A/V PTS delta now within 100ms")
            }
        }
    }

    fn log_smooth_sync(&self, event: lipsync::SmoothSyncEvent) {
        match event {
            lipsync::SmoothSyncEvent::AvDelta { delta_sec } => {
                warn!(endpoint = %self.endpoint_name, delta_sec, "Smooth Streaming A/V tsec delta exceeds 50ms")
            }
            lipsync::SmoothSyncEvent::SubtitleDelta { delta_sec } => {
                warn!(endpoint = %self.endpoint_name, delta_sec, "Smooth Streaming subtitle tsec delta exceeds 500ms")
            }
        }
    }

    fn contribute_correlation(&self, segment: &SegmentRecord) {
        let Some(bucket) = &self.shared.correlation else { return };
        bucket.contribute(
            segment.seq.clone(),
            CorrelationEntry {
                role: self.rendition.role,
                duration_sec: segment.duration_sec,
                discontinuity_flag: segment.discontinuity_flag,
                discontinuity_seq: segment.discontinuity_seq,
                pdt: segment.pdt,
                pdt_explicit: segment.pdt_explicit,
            },
        );
        bucket.drain_and_compare(self.correlation_member_count);
        bucket.check_unexpectedly_long(self.frequency().as_secs_f64());
    }

    async fn request_segment(&self, segment: &SegmentRecord, metrics: &mut PollMetrics) {
        let method = if self.ctx.config.request.segment_request_method_is_head {
            FetchMethod::Head
        } else {
            FetchMethod::Get
        };
        let outcome = self.ctx.fetcher.fetch(&segment.url, method, FetchCategory::Segment, &self.token).await;
        metrics.observe("segmentresponsetime", outcome.latency_ms as f64);
        match outcome.result {
            Ok(resp) => {
                let size = resp.content_length.unwrap_or(resp.bytes.len() as u64);
                metrics.observe("segmentsize", size as f64);
                if self.ctx.config.save.save_segments && !resp.bytes.is_empty() {
                    self.save_blob(BlobCategory::Segment, "segment", &resp.bytes).await;
                }
            }
            Err(err) => {
                if let Some(suffix) = err.metric_suffix() {
                    metrics.observe(&format!("segment{suffix}"), 1.0);
                }
            }
        }
    }

    async fn poll_tracking(&mut self, metrics: &mut PollMetrics) {
        let Some(mut url) = self.tracking_url.clone() else { return };
        let ad_break = &self.ctx.config.ad_break;
        let playhead_sec = self.state.session.content_duration_sec;
        if ad_break.playhead_aware_tracking {
            url.set_query(Some(&tracking::playhead_query_param(playhead_sec)));
        }

        let outcome = self.ctx.fetcher.fetch(&url, FetchMethod::Get, FetchCategory::Tracking, &self.token).await;
        metrics.scalar("trackingresponsetime", outcome.latency_ms as f64);
        let Ok(response) = outcome.result else {
            return;
        };

        if self.ctx.config.save.save_tracking {
            self.save_blob(BlobCategory::Tracking, "tracking", &response.bytes).await;
        }

        let document: TrackingDocument = match serde_json::from_slice(&response.bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(rendition = %self.rendition_name, error = %e, "tracking document did not parse");
                return;
            }
        };

        tracking::observe(
            &mut self.state.ad_state,
            &document,
            playhead_sec,
            self.frequency().as_secs_f64(),
            ad_break.check_tracking_events,
        );
    }

    fn detect_header_change(&mut self, headers: &ManifestHeaders) {
        let Some(prev) = &self.state.last_manifest_headers else { return };
        if prev.target_duration_sec != headers.target_duration_sec {
            info!(rendition = %self.rendition_name, from = ?prev.target_duration_sec, to = ?headers.target_duration_sec, "TARGETDURATION changed");
        }
        if prev.version != headers.version {
            info!(rendition = %self.rendition_name, from = ?prev.version, to = ?headers.version, "manifest version changed");
        }
    }

    async fn save_blob(&self, category: BlobCategory, suffix: &str, bytes: &[u8]) {
        if let Err(e) = self.ctx.blob_sink.save(category, &self.rendition_name, suffix, bytes).await {
            warn!(rendition = %self.rendition_name, error = %e, "blob save failed");
        }
    }
}

/// Initial per-rendition `AdState`, in case a future caller needs to seed a
/// Monitor mid-break (not currently exercised; kept narrow).
#[allow(dead_code)]
fn fresh_ad_state() -> AdState {
    AdState::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Anchor, AnchorKey, FormatSpecific, Rendition, RenditionSelector};

    fn rendition() -> Rendition {
        Rendition {
            role: Role::Video,
            ordinal: 0,
            url: Url::parse("https://example.com/media.m3u8").unwrap(),
            anchor_key: AnchorKey::HlsUrl("https://example.com/media.m3u8".to_string()),
        }
    }

    fn seg(seq: u64, duration: f64, discontinuity: bool) -> SegmentRecord {
        SegmentRecord {
            seq: Seq::Hls(seq),
            duration_sec: duration,
            discontinuity_flag: discontinuity,
            discontinuity_seq: 0,
            pdt: None,
            pdt_explicit: false,
            url: Url::parse("https://example.com/seg.ts").unwrap(),
            format_specific: FormatSpecific::default(),
            ad_marker: None,
        }
    }

    fn view(segments: Vec<SegmentRecord>) -> ManifestView {
        ManifestView { headers: ManifestHeaders { target_duration_sec: Some(6.0), ..Default::default() }, segments }
    }

    #[tokio::test]
    async fn process_view_advances_anchor_and_sums_new_duration() {
        let ctx = test_context();
        let anchor = Anchor { seq: Seq::Hls(100), cumulative_duration_sec: 0.0 };
        let mut monitor = Monitor::new(
            "ep",
            "ep-video-0",
            rendition(),
            StreamType::Hls,
            anchor,
            ctx,
            None,
            false,
            1,
            SharedBuckets::default(),
            CancellationToken::new(),
        );

        let v = view(vec![seg(100, 6.0, false), seg(101, 6.0, false), seg(102, 6.0, false)]);
        let mut metrics = PollMetrics::new("ep-video-0", StreamType::Hls);
        let (consumed, had_new) = monitor.process_view(&v, &mut metrics).await;
        assert!(had_new);
        assert!((consumed - 12.0).abs() < f64::EPSILON);
        assert_eq!(monitor.state.anchor.seq, Seq::Hls(102));
    }

    #[tokio::test]
    async fn process_view_does_not_advance_anchor_when_window_slid_past() {
        let ctx = test_context();
        let anchor = Anchor { seq: Seq::Hls(50), cumulative_duration_sec: 0.0 };
        let mut monitor = Monitor::new(
            "ep",
            "ep-video-0",
            rendition(),
            StreamType::Hls,
            anchor,
            ctx,
            None,
            false,
            1,
            SharedBuckets::default(),
            CancellationToken::new(),
        );

        let v = view(vec![seg(200, 6.0, false), seg(201, 6.0, false)]);
        let mut metrics = PollMetrics::new("ep-video-0", StreamType::Hls);
        let (consumed, had_new) = monitor.process_view(&v, &mut metrics).await;
        assert!(!had_new);
        assert_eq!(consumed, 0.0);
        assert_eq!(monitor.state.anchor.seq, Seq::Hls(50));
    }

    #[tokio::test]
    async fn discontinuity_segment_observes_metric() {
        let ctx = test_context();
        let anchor = Anchor { seq: Seq::Hls(1), cumulative_duration_sec: 0.0 };
        let mut monitor = Monitor::new(
            "ep",
            "ep-video-0",
            rendition(),
            StreamType::Hls,
            anchor,
            ctx,
            None,
            false,
            1,
            SharedBuckets::default(),
            CancellationToken::new(),
        );
        let v = view(vec![seg(1, 6.0, false), seg(2, 6.0, true)]);
        let mut metrics = PollMetrics::new("ep-video-0", StreamType::Hls);
        monitor.process_view(&v, &mut metrics).await;
        let batch = metrics.finish();
        assert!(batch.records.iter().any(|r| r.name == "discontinuity"));
    }

    fn test_context() -> Arc<AppContext> {
        use crate::config::{AppConfig, EndpointConfig, SaveConfig, TimingConfig};
        use crate::metrics::TracingMetricsSink;
        use crate::model::RenditionSelector;
        use crate::sinks::NoopBlobSink;
        use std::time::Duration as StdDuration;

        let config = Arc::new(AppConfig {
            endpoints: vec![EndpointConfig {
                name: "ep".to_string(),
                manifest_url: "https://example.com/media.m3u8".to_string(),
                tracking_url: None,
                forced_type: None,
                selector: RenditionSelector::Single { role: Role::Video, ordinal: 0 },
            }],
            timing: TimingConfig { frequency: StdDuration::from_millis(50), ..Default::default() },
            save: SaveConfig::default(),
            metrics: Default::default(),
            ad_break: Default::default(),
            request: Default::default(),
            load_test: Default::default(),
            logging: Default::default(),
            property_tags: Vec::new(),
            initial_buffer_sec: 30.0,
        });
        let fetcher = Arc::new(crate::fetcher::Fetcher::new(reqwest::Client::new(), StdDuration::from_secs(3), "canary-test"));
        Arc::new(AppContext::new(config, fetcher, Arc::new(TracingMetricsSink::new("canary")), Arc::new(NoopBlobSink)))
    }
}
