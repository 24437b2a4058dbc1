//! §4.5.1 ad-break tracker: two independent modes (non-EMT, SCTE-35/CUE/
//! DATERANGE-driven; EMT, segment-name/period-id substring-driven), shared
//! across HLS and DASH segment streams by operating purely on
//! `SegmentRecord::ad_marker` and `format_specific.period_id`.

use tracing::warn;

use crate::events::MonitorEvent;
use crate::model::{AdMarker, AdState, SegmentRecord};

/// Non-EMT: drives `AdState` off `SegmentRecord::ad_marker` (HLS `CUE-OUT`/
/// `CUE-IN`/`DATERANGE`, or DASH `PeriodStart`). Call once per new segment,
/// in `seq` order.
pub fn observe_non_emt(state: &mut AdState, segment: &SegmentRecord) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    match &segment.ad_marker {
        Some(AdMarker::CueOut { duration_sec }) => {
            enter(state, &mut events, None, *duration_sec, segment.duration_sec);
        }
        Some(AdMarker::DaterangeOut { id, duration_sec }) => {
            enter(state, &mut events, Some(id.clone()), *duration_sec, segment.duration_sec);
        }
        Some(AdMarker::PeriodStart { duration_sec, .. }) => {
            enter(state, &mut events, None, *duration_sec, segment.duration_sec);
        }
        Some(AdMarker::CueIn) => exit(state, &mut events),
        Some(AdMarker::DaterangeIn { id }) => {
            if state.daterange_id.as_deref() == Some(id.as_str()) {
                exit(state, &mut events);
            }
        }
        None => {
            if is_period_exit(state, segment) {
                exit(state, &mut events);
            }
            if state.in_break {
                state.actual_duration_sec += segment.duration_sec;
            }
        }
    }
    if let Some(period_id) = &segment.format_specific.period_id {
        state.last_period_id = Some(period_id.clone());
    }
    events
}

/// A DASH period change with no leading ad marker, while `in_break`, is an
/// implicit exit (§4.5.1: "exit is the first new period without such a
/// marker"). HLS has no period concept, so this never fires there.
fn is_period_exit(state: &AdState, segment: &SegmentRecord) -> bool {
    let Some(period_id) = &segment.format_specific.period_id else { return false };
    state.in_break && state.last_period_id.as_deref() != Some(period_id.as_str())
}

fn enter(
    state: &mut AdState,
    events: &mut Vec<MonitorEvent>,
    id: Option<String>,
    advertised_duration_sec: Option<f64>,
    entering_segment_duration_sec: f64,
) {
    if state.in_break {
        warn!(advertised_duration_sec, "nested ad break: entering a new break while already in one");
    }
    state.in_break = true;
    state.advertised_duration_sec = advertised_duration_sec.unwrap_or(0.0);
    // The segment carrying the entry marker is itself inside the break
    // (HLS attaches `CUE-OUT`/`DATERANGE` to the first ad segment, not to a
    // marker-only line), so it counts toward `actual_duration_sec` too.
    state.actual_duration_sec = entering_segment_duration_sec;
    state.break_start = Some(std::time::Instant::now());
    state.tracking_confirmed = false;
    state.daterange_id = id;
    events.push(MonitorEvent::AdBreakEnter { advertised_duration_sec });
}

fn exit(state: &mut AdState, events: &mut Vec<MonitorEvent>) {
    if !state.in_break {
        return;
    }
    let actual = state.actual_duration_sec;
    if state.advertised_duration_sec > 0.0 {
        let delta = actual - state.advertised_duration_sec;
        if delta.abs() > 1.0 {
            warn!(
                advertised_duration_sec = state.advertised_duration_sec,
                actual_duration_sec = actual,
                delta_sec = delta,
                "ad break duration differs from advertised duration"
            );
        }
    }
    state.in_break = false;
    state.daterange_id = None;
    events.push(MonitorEvent::AdBreakExit { actual_duration_sec: actual });
}

/// EMT mode: entry/exit driven by a configured substring in the segment URL
/// (HLS) or `_`-suffixed period id (DASH) rather than SCTE-35 markers
/// (§4.5.1, Glossary "EMT").
pub fn observe_emt(state: &mut AdState, segment: &SegmentRecord, ad_substring: &str) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    let looks_like_ad = match &segment.format_specific.period_id {
        Some(period_id) => period_id.contains('_'),
        None => segment.url.as_str().contains(ad_substring),
    };

    if looks_like_ad && !state.in_break {
        enter(state, &mut events, None, None, segment.duration_sec);
    } else if !looks_like_ad && state.in_break {
        exit(state, &mut events);
    } else if state.in_break {
        state.actual_duration_sec += segment.duration_sec;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormatSpecific;
    use url::Url;

    fn seg(duration: f64, ad_marker: Option<AdMarker>) -> SegmentRecord {
        SegmentRecord {
            seq: crate::model::Seq::Hls(1),
            duration_sec: duration,
            discontinuity_flag: false,
            discontinuity_seq: 0,
            pdt: None,
            pdt_explicit: false,
            url: Url::parse("https://example.com/seg.ts").unwrap(),
            format_specific: FormatSpecific::default(),
            ad_marker,
        }
    }

    fn dash_seg(duration: f64, period_id: &str, ad_marker: Option<AdMarker>) -> SegmentRecord {
        SegmentRecord {
            format_specific: FormatSpecific { period_id: Some(period_id.to_string()), ..FormatSpecific::default() },
            ..seg(duration, ad_marker)
        }
    }

    #[test]
    fn dash_period_with_no_marker_implicitly_exits_break() {
        let mut state = AdState::default();
        observe_non_emt(
            &mut state,
            &dash_seg(60.0, "ad-period", Some(AdMarker::PeriodStart { segmentation_type_id: Some(52), duration_sec: Some(60.0) })),
        );
        assert!(state.in_break);
        observe_non_emt(&mut state, &dash_seg(2.0, "ad-period", None));

        let exit_events = observe_non_emt(&mut state, &dash_seg(6.0, "content-period", None));
        assert!(!state.in_break);
        assert!(matches!(exit_events[0], MonitorEvent::AdBreakExit { actual_duration_sec } if (actual_duration_sec - 62.0).abs() < f64::EPSILON));
    }

    #[test]
    fn dash_segments_within_same_period_do_not_exit_break() {
        let mut state = AdState::default();
        observe_non_emt(
            &mut state,
            &dash_seg(60.0, "ad-period", Some(AdMarker::PeriodStart { segmentation_type_id: Some(52), duration_sec: Some(60.0) })),
        );
        let events = observe_non_emt(&mut state, &dash_seg(2.0, "ad-period", None));
        assert!(events.is_empty());
        assert!(state.in_break);
    }

    #[test]
    fn cue_out_then_cue_in_pairs_enter_and_exit() {
        // §8.2: `CUE-OUT:30.0` attaches to the first of three 10s ad
        // segments (hls.rs parser behavior), so the marker segment's own
        // duration counts toward `actual_duration_sec`.
        let mut state = AdState::default();
        let enter_events = observe_non_emt(&mut state, &seg(10.0, Some(AdMarker::CueOut { duration_sec: Some(30.0) })));
        assert!(matches!(enter_events[0], MonitorEvent::AdBreakEnter { advertised_duration_sec: Some(30.0) }));
        assert!(state.in_break);

        observe_non_emt(&mut state, &seg(10.0, None));
        observe_non_emt(&mut state, &seg(10.0, None));
        let exit_events = observe_non_emt(&mut state, &seg(0.0, Some(AdMarker::CueIn)));
        assert!(!state.in_break);
        assert!(matches!(exit_events[0], MonitorEvent::AdBreakExit { actual_duration_sec } if (actual_duration_sec - 30.0).abs() < f64::EPSILON));
    }

    #[test]
    fn cue_out_longer_than_advertised_reports_positive_delta() {
        let mut state = AdState::default();
        observe_non_emt(&mut state, &seg(10.0, Some(AdMarker::CueOut { duration_sec: Some(30.0) })));
        observe_non_emt(&mut state, &seg(10.0, None));
        observe_non_emt(&mut state, &seg(10.0, None));
        observe_non_emt(&mut state, &seg(5.0, None));
        let exit_events = observe_non_emt(&mut state, &seg(0.0, Some(AdMarker::CueIn)));
        assert!(matches!(exit_events[0], MonitorEvent::AdBreakExit { actual_duration_sec } if (actual_duration_sec - 35.0).abs() < f64::EPSILON));
    }

    #[test]
    fn daterange_in_only_exits_on_matching_id() {
        let mut state = AdState::default();
        observe_non_emt(&mut state, &seg(10.0, Some(AdMarker::DaterangeOut { id: "ad-1".to_string(), duration_sec: Some(30.0) })));
        observe_non_emt(&mut state, &seg(0.0, Some(AdMarker::DaterangeIn { id: "ad-2".to_string() })));
        assert!(state.in_break, "mismatched id must not close the break");
        observe_non_emt(&mut state, &seg(0.0, Some(AdMarker::DaterangeIn { id: "ad-1".to_string() })));
        assert!(!state.in_break);
    }

    #[test]
    fn nested_entry_resets_actual_duration_and_stays_in_break() {
        let mut state = AdState::default();
        observe_non_emt(&mut state, &seg(10.0, Some(AdMarker::CueOut { duration_sec: Some(30.0) })));
        observe_non_emt(&mut state, &seg(20.0, None));
        observe_non_emt(&mut state, &seg(5.0, Some(AdMarker::CueOut { duration_sec: Some(15.0) })));
        assert!(state.in_break);
        assert_eq!(state.actual_duration_sec, 5.0);
        assert_eq!(state.advertised_duration_sec, 15.0);
    }

    #[test]
    fn emt_mode_detects_entry_and_exit_via_url_substring() {
        let mut state = AdState::default();
        let mut ad_seg = seg(10.0, None);
        ad_seg.url = Url::parse("https://example.com/ad-break/seg1.ts").unwrap();
        let entry = observe_emt(&mut state, &ad_seg, "ad-break");
        assert!(!entry.is_empty());
        assert!(state.in_break);

        let content_seg = seg(10.0, None);
        let exit = observe_emt(&mut state, &content_seg, "ad-break");
        assert!(!exit.is_empty());
        assert!(!state.in_break);
    }
}
