//! §4.5.3 tracking companion: polls an ad-server's JSON tracking endpoint
//! while a break is open and cross-checks it against the SCTE-driven
//! `AdState` the ad-break tracker (`adbreak.rs`) already maintains.

use serde::Deserialize;
use tracing::{info, warn};

use crate::model::AdState;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingDocument {
    #[serde(default)]
    pub avails: Vec<Avail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Avail {
    #[serde(rename = "availId")]
    pub avail_id: String,
    #[serde(rename = "startTimeInSeconds")]
    pub start_time_sec: f64,
    #[serde(rename = "durationInSeconds")]
    pub duration_sec: f64,
    #[serde(default)]
    pub ads: Vec<Ad>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ad {
    #[serde(rename = "adId")]
    pub ad_id: String,
    #[serde(rename = "durationInSeconds", default)]
    pub duration_sec: Option<f64>,
    #[serde(rename = "creativeId", default)]
    pub creative_id: Option<String>,
    #[serde(rename = "adTitle", default)]
    pub ad_title: Option<String>,
    #[serde(rename = "trackingEvents", default)]
    pub tracking_events: Vec<TrackingEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,
}

/// The minimum set of tracking events every ad must carry (§4.5.3).
pub const REQUIRED_EVENT_TYPES: &[&str] = &["impression", "start", "firstQuartile", "midpoint", "thirdQuartile", "complete"];

impl Ad {
    /// Event types named in `REQUIRED_EVENT_TYPES` that this ad's
    /// `trackingEvents` does not carry.
    pub fn missing_event_types(&self) -> Vec<&'static str> {
        REQUIRED_EVENT_TYPES
            .iter()
            .copied()
            .filter(|required| !self.tracking_events.iter().any(|e| e.event_type == *required))
            .collect()
    }
}

impl Avail {
    fn contains_playhead(&self, playhead_sec: f64) -> bool {
        playhead_sec >= self.start_time_sec && playhead_sec <= self.start_time_sec + self.duration_sec
    }
}

/// Query-string suffix for playhead-aware tracking requests (§4.5.3:
/// `?aws.playheadPositionInSeconds=<round(playhead)>`).
pub fn playhead_query_param(playhead_sec: f64) -> String {
    format!("aws.playheadPositionInSeconds={}", playhead_sec.round() as i64)
}

/// §4.5.3: while `in_break` and not yet confirmed, find the avail straddling
/// `playhead_sec`, mark the break confirmed, and warn on drift. Returns
/// `true` if this call newly confirmed the break.
pub fn observe(
    state: &mut AdState,
    document: &TrackingDocument,
    playhead_sec: f64,
    frequency_sec: f64,
    check_tracking_events: bool,
) -> bool {
    if !state.in_break || state.tracking_confirmed {
        return false;
    }

    let Some(avail) = document.avails.iter().find(|a| a.contains_playhead(playhead_sec)) else {
        return false;
    };

    state.tracking_confirmed = true;
    info!(
        avail_id = %avail.avail_id,
        ad_count = avail.ads.len(),
        ads = ?avail.ads.iter().map(|a| a.ad_id.as_str()).collect::<Vec<_>>(),
        "tracking avail confirmed for open ad break"
    );

    let playhead_drift = (playhead_sec - avail.start_time_sec).abs();
    let break_age = state.break_start.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
    if playhead_drift > 3.0 * frequency_sec || break_age > 3.0 * frequency_sec {
        warn!(
            playhead_drift_sec = playhead_drift,
            break_age_sec = break_age,
            threshold_sec = 3.0 * frequency_sec,
            "tracking avail confirmed with significant drift from playhead/break start"
        );
    }

    if check_tracking_events {
        for ad in &avail.ads {
            let missing = ad.missing_event_types();
            if !missing.is_empty() {
                warn!(ad_id = %ad.ad_id, missing = ?missing, "ad is missing required tracking events");
            }
        }
    }

    true
}

/// §4.5.3: on exit from a break, warn if tracking never confirmed.
pub fn warn_if_unconfirmed_on_exit(state: &AdState) {
    if !state.tracking_confirmed {
        warn!("did not find expected tracking info for ad break");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avail(id: &str, start: f64, duration: f64, ads: Vec<Ad>) -> Avail {
        Avail { avail_id: id.to_string(), start_time_sec: start, duration_sec: duration, ads }
    }

    fn ad_with_events(id: &str, events: &[&str]) -> Ad {
        Ad {
            ad_id: id.to_string(),
            duration_sec: Some(15.0),
            creative_id: None,
            ad_title: None,
            tracking_events: events.iter().map(|e| TrackingEvent { event_type: e.to_string() }).collect(),
        }
    }

    #[test]
    fn confirms_avail_containing_playhead() {
        let mut state = AdState { in_break: true, ..Default::default() };
        let doc = TrackingDocument { avails: vec![avail("a1", 100.0, 30.0, vec![])] };
        let confirmed = observe(&mut state, &doc, 110.0, 5.0, false);
        assert!(confirmed);
        assert!(state.tracking_confirmed);
    }

    #[test]
    fn does_not_confirm_when_not_in_break() {
        let mut state = AdState::default();
        let doc = TrackingDocument { avails: vec![avail("a1", 100.0, 30.0, vec![])] };
        assert!(!observe(&mut state, &doc, 110.0, 5.0, false));
    }

    #[test]
    fn skips_when_already_confirmed() {
        let mut state = AdState { in_break: true, tracking_confirmed: true, ..Default::default() };
        let doc = TrackingDocument { avails: vec![avail("a1", 100.0, 30.0, vec![])] };
        assert!(!observe(&mut state, &doc, 110.0, 5.0, false));
    }

    #[test]
    fn missing_event_types_reports_gaps() {
        let ad = ad_with_events("ad-1", &["impression", "start"]);
        let missing = ad.missing_event_types();
        assert_eq!(missing, vec!["firstQuartile", "midpoint", "thirdQuartile", "complete"]);
    }

    #[test]
    fn complete_event_set_reports_nothing_missing() {
        let ad = ad_with_events("ad-1", REQUIRED_EVENT_TYPES);
        assert!(ad.missing_event_types().is_empty());
    }

    #[test]
    fn playhead_query_param_rounds_to_nearest_second() {
        assert_eq!(playhead_query_param(12.6), "aws.playheadPositionInSeconds=13");
        assert_eq!(playhead_query_param(12.4), "aws.playheadPositionInSeconds=12");
    }

    #[test]
    fn deserializes_document_shape() {
        let json = r#"{"avails":[{"availId":"a1","startTimeInSeconds":0,"durationInSeconds":30,
            "ads":[{"adId":"ad1","durationInSeconds":15,"creativeId":"c1","adTitle":"t",
            "trackingEvents":[{"eventType":"impression"}]}]}]}"#;
        let doc: TrackingDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.avails.len(), 1);
        assert_eq!(doc.avails[0].ads[0].ad_id, "ad1");
    }
}
