//! The canonical data model shared by every manifest format (§3).

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use url::Url;

/// Which of the three adaptive-bitrate families an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Hls,
    Dash,
    Smooth,
}

/// A configured top-level endpoint. Immutable after load.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub manifest_url: Url,
    pub tracking_url: Option<Url>,
    pub stream_type: StreamType,
}

/// One selectable stream (role + quality) within a multi-variant manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Video,
    Audio,
    Subtitle,
}

/// How the Rendition Discoverer (C3) picks renditions to monitor.
#[derive(Debug, Clone)]
pub enum RenditionSelector {
    Single { role: Role, ordinal: u32 },
    Player,
    All,
}

/// A rendition discovered within an endpoint, keyed per-format.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub role: Role,
    pub ordinal: u32,
    pub url: Url,
    pub anchor_key: AnchorKey,
}

/// Format-specific identity a rendition is addressed by across polls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnchorKey {
    HlsUrl(String),
    DashRepresentation { representation_id: String, mime_type: String },
    SmoothStream { stream_type: String, quality_level: u32 },
}

/// Opaque total ordering of a segment within one rendition (§3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Seq {
    /// HLS media-sequence number.
    Hls(u64),
    /// DASH (period id, derived segment number).
    Dash(String, u64),
    /// Smooth Streaming segment start time `t`.
    Smooth(u64),
}

impl Seq {
    pub fn as_hls(&self) -> Option<u64> {
        match self {
            Seq::Hls(n) => Some(*n),
            _ => None,
        }
    }
}

/// DASH/Smooth-specific per-segment fields that don't generalize cleanly.
#[derive(Debug, Clone, Default)]
pub struct FormatSpecific {
    pub presentation_time_offset: Option<u64>,
    pub timescale: Option<u64>,
    pub period_id: Option<String>,
    /// DASH `SegmentTimeline` `@t` of this segment (the timeline clock, not the
    /// derived `number` that `Seq::Dash` orders by). PTS is computed from this,
    /// not from `number` (§4.5.2, GLOSSARY).
    pub timeline_t: Option<u64>,
}

/// A single segment as it appears in a canonical `ManifestView` (§3).
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub seq: Seq,
    pub duration_sec: f64,
    pub discontinuity_flag: bool,
    pub discontinuity_seq: u64,
    pub pdt: Option<DateTime<Utc>>,
    pub pdt_explicit: bool,
    pub url: Url,
    pub format_specific: FormatSpecific,
    pub ad_marker: Option<AdMarker>,
}

impl SegmentRecord {
    /// PTS = (t - pto) / timescale (DASH) or t / timescale (Smooth); §4.5 step 4.
    pub fn pts_sec(&self) -> Option<f64> {
        let t = match &self.seq {
            Seq::Dash(..) => self.format_specific.timeline_t?,
            Seq::Smooth(t) => *t,
            Seq::Hls(_) => return None,
        };
        let timescale = self.format_specific.timescale.unwrap_or(1).max(1);
        let pto = self.format_specific.presentation_time_offset.unwrap_or(0);
        Some((t.saturating_sub(pto)) as f64 / timescale as f64)
    }
}

/// SCTE-35-ish ad signaling captured at the header/period level.
#[derive(Debug, Clone)]
pub struct ScteEvent {
    pub segmentation_type_id: Option<u8>,
    pub segmentation_duration: Option<f64>,
    pub out_of_network_indicator: Option<bool>,
}

/// Ad-break signaling attached to the segment a tag precedes (§4.5.1). HLS
/// carries these per-segment since `CUE-OUT`/`DATERANGE` "attach to" the next
/// URI line; DASH carries `PeriodStart` on the first segment of a period
/// whose leading SCTE event signals a break.
#[derive(Debug, Clone)]
pub enum AdMarker {
    CueOut { duration_sec: Option<f64> },
    CueIn,
    DaterangeOut { id: String, duration_sec: Option<f64> },
    DaterangeIn { id: String },
    PeriodStart { segmentation_type_id: Option<u8>, duration_sec: Option<f64> },
}

/// Header-level attributes of a manifest (§3).
#[derive(Debug, Clone, Default)]
pub struct ManifestHeaders {
    pub target_duration_sec: Option<f64>,
    pub version: Option<u32>,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub supplemental_property_utc: Option<String>,
    pub event_stream: Vec<ScteEvent>,
    pub period_list: Vec<String>,
    pub media_sequence: Option<u64>,
    pub discontinuity_sequence: Option<u64>,
    pub is_primary: bool,
}

/// Canonical, pure-parse output of a manifest (C2).
#[derive(Debug, Clone, Default)]
pub struct ManifestView {
    pub headers: ManifestHeaders,
    pub segments: Vec<SegmentRecord>,
}

impl ManifestView {
    pub fn segment_with_seq(&self, seq: &Seq) -> Option<&SegmentRecord> {
        self.segments.iter().find(|s| &s.seq == seq)
    }
}

/// The anchor a Prober (C4) hands to a freshly started Monitor.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub seq: Seq,
    pub cumulative_duration_sec: f64,
}

/// Ad-break tracking state, owned by one Monitor (§3).
#[derive(Debug, Clone, Default)]
pub struct AdState {
    pub in_break: bool,
    pub advertised_duration_sec: f64,
    pub actual_duration_sec: f64,
    pub break_start: Option<Instant>,
    pub tracking_confirmed: bool,
    pub daterange_id: Option<String>,
    /// Last DASH period id a segment was seen in; lets the non-EMT tracker
    /// recognize "a new period with no leading ad marker" (§4.5.1 exit) by
    /// identity rather than by overloading the unrelated discontinuity
    /// counter.
    pub last_period_id: Option<String>,
}

/// Session-level input-buffer accounting (§3 invariant 5).
#[derive(Debug, Clone)]
pub struct SessionState {
    pub start: Instant,
    pub content_duration_sec: f64,
    pub initial_buffer_sec: f64,
    pub next_stale: Instant,
    pub stale_timeout_sec: f64,
}

impl SessionState {
    pub fn new(now: Instant, initial_buffer_sec: f64, stale_timeout_sec: f64) -> Self {
        Self {
            start: now,
            content_duration_sec: 0.0,
            initial_buffer_sec,
            next_stale: now + std::time::Duration::from_secs_f64(stale_timeout_sec),
            stale_timeout_sec,
        }
    }

    /// `input_buffer_sec = initial_buffer - elapsed_wall + content_duration_sec`.
    pub fn input_buffer_sec(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        self.initial_buffer_sec - elapsed + self.content_duration_sec
    }

    pub fn restart(&mut self, now: Instant) {
        self.start = now;
        self.content_duration_sec = 0.0;
    }

    /// §3 invariant 6 / §4.5 step 10: `next_stale_monotonic` is reset on
    /// every poll that produced at least one new segment.
    pub fn reset_stale(&mut self, now: Instant) {
        self.next_stale = now + std::time::Duration::from_secs_f64(self.stale_timeout_sec);
    }
}

/// Ring buffer of the last 10 poll-deltas of new content duration (§4.5 step 8).
#[derive(Debug, Clone)]
pub struct ContentWindow {
    slots: VecDeque<f64>,
    capacity: usize,
}

impl Default for ContentWindow {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ContentWindow {
    pub fn new(capacity: usize) -> Self {
        Self { slots: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, new_content_sec: f64) {
        if self.slots.len() == self.capacity {
            self.slots.pop_front();
        }
        self.slots.push_back(new_content_sec);
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// §4.5 step 8 / §8: fires iff the ring is full, entries [0..n-2] are all
    /// strictly positive, and entries [n-2..n] sum below `threshold`.
    pub fn shortage(&self, threshold: f64) -> bool {
        if !self.is_full() || self.capacity < 2 {
            return false;
        }
        let split = self.capacity - 2;
        let head_all_positive = self.slots.iter().take(split).all(|&v| v > 0.0);
        let tail_sum: f64 = self.slots.iter().skip(split).sum();
        head_all_positive && tail_sum < threshold
    }

    pub fn as_slice_vec(&self) -> Vec<f64> {
        self.slots.iter().copied().collect()
    }
}

/// Owned by one Monitor task; never shared mutably (§3).
#[derive(Debug, Clone)]
pub struct RenditionState {
    pub anchor: Anchor,
    pub last_header_snapshot: ManifestHeaders,
    pub ad_state: AdState,
    pub session: SessionState,
    pub content_window: ContentWindow,
    pub periods_seen: Vec<String>,
    pub pdt_anchor: Option<(DateTime<Utc>, f64)>,
    pub last_manifest_headers: Option<ManifestHeaders>,
    /// Last tick's lip-sync state, to support the "now within 100ms" recovery log (§4.5.2).
    pub lip_sync_offending: bool,
    /// Snapshot of the segment at `anchor.seq` as last observed, for
    /// `compare_last_segment` on the following poll (§4.5 step 4).
    pub last_confirmed_segment: Option<SegmentRecord>,
}

impl RenditionState {
    pub fn new(anchor: Anchor, initial_buffer_sec: f64, stale_timeout_sec: f64) -> Self {
        let now = Instant::now();
        Self {
            anchor,
            last_header_snapshot: ManifestHeaders::default(),
            ad_state: AdState::default(),
            session: SessionState::new(now, initial_buffer_sec, stale_timeout_sec),
            content_window: ContentWindow::default(),
            periods_seen: Vec::new(),
            pdt_anchor: None,
            last_manifest_headers: None,
            lip_sync_offending: false,
            last_confirmed_segment: None,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.session.next_stale
    }
}

/// One rendition's contribution to a correlation bucket entry (§4.6).
#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub role: Role,
    pub duration_sec: f64,
    pub discontinuity_flag: bool,
    pub discontinuity_seq: u64,
    pub pdt: Option<DateTime<Utc>>,
    pub pdt_explicit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn content_window_not_full_never_shortages() {
        let mut window = ContentWindow::new(10);
        for _ in 0..9 {
            window.push(6.0);
        }
        assert!(!window.shortage(3.0));
    }

    proptest! {
        /// §8: "Content-shortage alarm fires iff the ring has 10 entries AND
        /// entries [0..7] are all > 0 AND entries [8..9] sum < 0.5 * frequency."
        #[test]
        fn shortage_matches_spec_predicate(
            head in prop::collection::vec(0.01f64..20.0, 8),
            tail in prop::collection::vec(0.0f64..20.0, 2),
            frequency in 1.0f64..10.0,
        ) {
            let mut window = ContentWindow::new(10);
            for v in &head {
                window.push(*v);
            }
            for v in &tail {
                window.push(*v);
            }
            let threshold = 0.5 * frequency;
            let expected = head.iter().all(|&v| v > 0.0) && tail.iter().sum::<f64>() < threshold;
            prop_assert_eq!(window.shortage(threshold), expected);
        }
    }
}
