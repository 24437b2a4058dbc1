//! Three format-specific state machines behind one trait (§9 redesign: "three
//! format branches in one giant function" -> `ManifestFormat` + a single
//! format-agnostic anchor scan). `parse`/`discover`/`probe` are pure; the
//! per-tick diff in `monitor.rs` is generic across formats because every
//! parser normalizes `discontinuity_flag` at parse time (§3).

pub mod dash;
pub mod hls;
pub mod smooth;

use url::Url;

use crate::error::ParseError;
use crate::model::{Anchor, ManifestView, Rendition, RenditionSelector, Seq, SegmentRecord, StreamType};

/// Operations a format implements (C2 parse, C3 discover, C4 probe). The
/// per-rendition diff loop in `monitor.rs` is shared across all three and is
/// not part of this trait.
pub trait ManifestFormat: Send + Sync {
    fn stream_type(&self) -> StreamType;

    /// Parses a manifest into one rendition's canonical segment view. For
    /// HLS the fetched bytes already belong to a single media playlist, so
    /// `rendition` only matters to DASH/Smooth, where every representation
    /// lives in one shared document and `rendition.anchor_key` selects which
    /// one to extract. Pure: no I/O, no logging side effects.
    fn parse(&self, bytes: &[u8], manifest_url: &Url, rendition: &Rendition) -> Result<ManifestView, ParseError>;

    /// Enumerates the renditions addressable from whatever manifest was
    /// fetched at the endpoint's configured URL (C3). For HLS this may be a
    /// primary (multi-variant) manifest or, if the endpoint points directly
    /// at a media playlist, a single synthetic rendition. For DASH/Smooth
    /// every representation/quality level lives in the one document.
    fn discover(&self, bytes: &[u8], manifest_url: &Url) -> Result<Vec<Rendition>, ParseError>;

    /// Computes the "last known segment" anchor to start monitoring a
    /// rendition from (C4).
    fn probe(&self, view: &ManifestView, rendition: &Rendition) -> Option<Anchor>;
}

pub fn format_for(stream_type: StreamType) -> Box<dyn ManifestFormat> {
    match stream_type {
        StreamType::Hls => Box::new(hls::HlsFormat),
        StreamType::Dash => Box::new(dash::DashFormat),
        StreamType::Smooth => Box::new(smooth::SmoothFormat),
    }
}

/// Dispatches to the per-format `select` (C3's selector application). Each
/// format's `Rendition` shape differs enough (HLS variant URL vs. DASH/Smooth
/// representation id) that `select` stays a free function per module rather
/// than living on the trait.
pub fn select_renditions(stream_type: StreamType, renditions: &[Rendition], selector: &RenditionSelector) -> Vec<Rendition> {
    match stream_type {
        StreamType::Hls => hls::select(renditions, selector),
        StreamType::Dash => dash::select(renditions, selector),
        StreamType::Smooth => smooth::select(renditions, selector),
    }
}

/// Result of walking a freshly parsed view against a rendition's anchor
/// (§4.5 steps 3-5). Format-agnostic: every parser already normalized
/// `discontinuity_flag`/`seq` ordering, so there is nothing format-specific
/// left to decide here.
#[derive(Debug)]
pub struct AnchorScan<'a> {
    /// The segment at `seq == anchor.seq`, if the window still contains it.
    pub confirmed: Option<&'a SegmentRecord>,
    /// Segments with `seq > anchor.seq`, in ascending order.
    pub new_segments: Vec<&'a SegmentRecord>,
}

impl AnchorScan<'_> {
    pub fn found_last(&self) -> bool {
        self.confirmed.is_some()
    }
}

/// Walks `view` from the start, discarding anything with `seq < anchor.seq`
/// (window slide), confirming the segment at `seq == anchor.seq`, and
/// collecting everything after it as new (§4.5 step 4).
pub fn scan_from_anchor<'a>(view: &'a ManifestView, anchor_seq: &Seq) -> AnchorScan<'a> {
    let mut confirmed = None;
    let mut new_segments = Vec::new();
    for segment in &view.segments {
        if &segment.seq < anchor_seq {
            continue;
        }
        if &segment.seq == anchor_seq {
            confirmed = Some(segment);
            continue;
        }
        new_segments.push(segment);
    }
    new_segments.sort_by(|a, b| a.seq.cmp(&b.seq));
    AnchorScan { confirmed, new_segments }
}

/// §4.5 step 3 / §8 round-trip property: comparing a confirmed segment
/// against itself (or the previous poll's snapshot of the same `seq`) must
/// report no differences save for the fields explicitly ignored (`pdt` when
/// interpolated, `pdt_explicit` itself; §4.5 step 3).
pub fn compare_last_segment(prev: &SegmentRecord, now: &SegmentRecord) -> Vec<&'static str> {
    let mut diffs = Vec::new();
    if prev.duration_sec != now.duration_sec {
        diffs.push("duration_sec");
    }
    if prev.discontinuity_flag != now.discontinuity_flag {
        diffs.push("discontinuity_flag");
    }
    if prev.discontinuity_seq != now.discontinuity_seq {
        diffs.push("discontinuity_seq");
    }
    if prev.url != now.url {
        diffs.push("url");
    }
    if prev.pdt_explicit && now.pdt_explicit && prev.pdt != now.pdt {
        diffs.push("pdt");
    }
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormatSpecific;

    fn seg(seq: u64, duration: f64) -> SegmentRecord {
        SegmentRecord {
            seq: Seq::Hls(seq),
            duration_sec: duration,
            discontinuity_flag: false,
            discontinuity_seq: 0,
            pdt: None,
            pdt_explicit: false,
            url: Url::parse("https://example.com/seg.ts").unwrap(),
            format_specific: FormatSpecific::default(),
            ad_marker: None,
        }
    }

    #[test]
    fn scan_slides_window_and_confirms_anchor() {
        let view = ManifestView { headers: Default::default(), segments: vec![seg(103, 6.0), seg(104, 6.0), seg(105, 6.0)] };
        let scan = scan_from_anchor(&view, &Seq::Hls(104));
        assert!(scan.found_last());
        assert_eq!(scan.new_segments.len(), 1);
        assert_eq!(scan.new_segments[0].seq, Seq::Hls(105));
    }

    #[test]
    fn scan_reports_missing_anchor_when_window_slid_past() {
        let view = ManifestView { headers: Default::default(), segments: vec![seg(110, 6.0), seg(111, 6.0)] };
        let scan = scan_from_anchor(&view, &Seq::Hls(104));
        assert!(!scan.found_last());
        assert_eq!(scan.new_segments.len(), 2);
    }

    #[test]
    fn compare_last_segment_is_reflexive() {
        let s = seg(100, 6.0);
        assert!(compare_last_segment(&s, &s).is_empty());
    }

    #[test]
    fn compare_last_segment_ignores_interpolated_pdt() {
        let mut a = seg(100, 6.0);
        let mut b = seg(100, 6.0);
        a.pdt = Some(chrono::Utc::now());
        a.pdt_explicit = false;
        b.pdt = Some(chrono::Utc::now() + chrono::Duration::seconds(30));
        b.pdt_explicit = false;
        assert!(compare_last_segment(&a, &b).is_empty());
    }
}
