//! DASH (MPEG-DASH) parser/discoverer/prober (C2/C3/C4). XML is decoded with
//! `quick-xml`'s `serde` integration, with the `serialize`/`overlapped-lists`
//! features already carried in `Cargo.toml`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::ParseError;
use crate::formats::ManifestFormat;
use crate::model::{
    AdMarker, AnchorKey, FormatSpecific, ManifestHeaders, ManifestView, Rendition, RenditionSelector, Role, ScteEvent,
    Seq, SegmentRecord, StreamType,
};
use crate::model::Anchor;
use crate::scte35::is_ad_break_start;

pub struct DashFormat;

impl ManifestFormat for DashFormat {
    fn stream_type(&self) -> StreamType {
        StreamType::Dash
    }

    fn parse(&self, bytes: &[u8], manifest_url: &Url, rendition: &Rendition) -> Result<ManifestView, ParseError> {
        let AnchorKey::DashRepresentation { representation_id, mime_type } = &rendition.anchor_key else {
            return Err(ParseError::Dash("DASH parse called with a non-DASH anchor key".to_string()));
        };
        let mpd = decode(bytes)?;
        extract_view(&mpd, representation_id, mime_type, manifest_url)
    }

    fn discover(&self, bytes: &[u8], manifest_url: &Url) -> Result<Vec<Rendition>, ParseError> {
        let mpd = decode(bytes)?;
        discover_representations(&mpd, manifest_url)
    }

    fn probe(&self, view: &ManifestView, _rendition: &Rendition) -> Option<Anchor> {
        probe(view)
    }
}

fn decode(bytes: &[u8]) -> Result<Mpd, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Dash(format!("non-utf8 MPD: {e}")))?;
    quick_xml::de::from_str(text).map_err(ParseError::from)
}

#[derive(Debug, Deserialize)]
#[serde(rename = "MPD")]
struct Mpd {
    #[serde(rename = "@availabilityStartTime", default)]
    availability_start_time: Option<String>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
    #[serde(rename = "EventStream", default)]
    event_streams: Vec<EventStream>,
}

#[derive(Debug, Deserialize)]
struct AdaptationSet {
    #[serde(rename = "@mimeType", default)]
    mime_type: Option<String>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SupplementalProperty", default)]
    supplemental_properties: Vec<SupplementalProperty>,
    #[serde(rename = "Representation", default)]
    representations: Vec<Representation>,
}

#[derive(Debug, Deserialize)]
struct SupplementalProperty {
    #[serde(rename = "@schemeIdUri", default)]
    scheme_id_uri: Option<String>,
    #[serde(rename = "@value", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Representation {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
}

#[derive(Debug, Deserialize, Clone)]
struct SegmentTemplate {
    #[serde(rename = "@presentationTimeOffset", default)]
    presentation_time_offset: Option<u64>,
    #[serde(rename = "@timescale", default)]
    timescale: Option<u64>,
    #[serde(rename = "@startNumber", default)]
    start_number: Option<u64>,
    #[serde(rename = "SegmentTimeline", default)]
    segment_timeline: Option<SegmentTimeline>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct SegmentTimeline {
    /// Interleaved `<S>`/nonstandard `<Pattern>` children, order-preserving
    /// (§4.2's "DASH `<Pattern r>` repeat element is nonstandard" note, §9
    /// open question: keep parsing it for corpus compatibility, never
    /// advertise it as a distinct `ManifestView` field).
    #[serde(rename = "$value", default)]
    entries: Vec<TimelineEntry>,
}

#[derive(Debug, Deserialize, Clone)]
enum TimelineEntry {
    S(STag),
    Pattern(PatternTag),
}

#[derive(Debug, Deserialize, Clone, Default)]
struct STag {
    #[serde(rename = "@t", default)]
    t: Option<u64>,
    #[serde(rename = "@d", default)]
    d: u64,
    #[serde(rename = "@r", default)]
    r: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct PatternTag {
    #[serde(rename = "@r", default)]
    r: Option<i64>,
    #[serde(rename = "S", default)]
    s: Vec<STag>,
}

#[derive(Debug, Deserialize)]
struct EventStream {
    #[serde(rename = "@timescale", default)]
    timescale: Option<u64>,
    #[serde(rename = "Event", default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "SpliceInfoSection", default)]
    splice_info: Option<SpliceInfoSection>,
}

#[derive(Debug, Deserialize)]
struct SpliceInfoSection {
    #[serde(rename = "SpliceInsert", default)]
    splice_insert: Option<SpliceInsert>,
    #[serde(rename = "TimeSignal", default)]
    time_signal: Option<TimeSignal>,
}

#[derive(Debug, Deserialize)]
struct SpliceInsert {
    #[serde(rename = "@outOfNetworkIndicator", default)]
    out_of_network_indicator: Option<bool>,
    #[serde(rename = "@spliceEventId", default)]
    splice_event_id: Option<String>,
    #[serde(rename = "@availNum", default)]
    avail_num: Option<u32>,
    #[serde(rename = "@uniqueProgramId", default)]
    unique_program_id: Option<String>,
    #[serde(rename = "BreakDuration", default)]
    break_duration: Option<BreakDuration>,
    #[serde(rename = "@autoReturn", default)]
    auto_return: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BreakDuration {
    #[serde(rename = "@duration", default)]
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TimeSignal {
    #[serde(rename = "SegmentationDescriptor", default)]
    segmentation_descriptor: Option<SegmentationDescriptor>,
}

#[derive(Debug, Deserialize)]
struct SegmentationDescriptor {
    #[serde(rename = "@segmentationEventId", default)]
    segmentation_event_id: Option<String>,
    #[serde(rename = "@segmentationDuration", default)]
    segmentation_duration: Option<u64>,
    #[serde(rename = "@segmentationTypeId", default)]
    segmentation_type_id: Option<u8>,
}

fn infer_role(mime_type: &str) -> Role {
    if mime_type.starts_with("video/") {
        Role::Video
    } else if mime_type.starts_with("audio/") {
        Role::Audio
    } else {
        Role::Subtitle
    }
}

/// C3: enumerate `Representation`s across the last (current) period, keyed
/// by `(representation_id, mimeType)` (§4.3: "From DASH/Smooth, enumerates
/// Representation/QualityLevel similarly keyed by mimeType/Type").
fn discover_representations(mpd: &Mpd, manifest_url: &Url) -> Result<Vec<Rendition>, ParseError> {
    let Some(period) = mpd.periods.last() else {
        return Err(ParseError::Dash("MPD has no Period elements".to_string()));
    };
    let mut renditions = Vec::new();
    let mut ordinal_by_role: std::collections::HashMap<Role, u32> = std::collections::HashMap::new();
    for adaptation_set in &period.adaptation_sets {
        let mime_type = adaptation_set.mime_type.clone().unwrap_or_default();
        let role = infer_role(&mime_type);
        for representation in &adaptation_set.representations {
            let representation_id = representation.id.clone().unwrap_or_else(|| format!("{mime_type}#{}", renditions.len()));
            let entry = ordinal_by_role.entry(role).or_insert(0);
            *entry += 1;
            renditions.push(Rendition {
                role,
                ordinal: *entry,
                url: manifest_url.clone(),
                anchor_key: AnchorKey::DashRepresentation { representation_id, mime_type: mime_type.clone() },
            });
        }
    }
    Ok(renditions)
}

pub fn select(renditions: &[Rendition], selector: &RenditionSelector) -> Vec<Rendition> {
    crate::formats::hls::select(renditions, selector)
}

fn effective_template<'a>(adaptation_set: &'a AdaptationSet, representation: &'a Representation) -> Option<&'a SegmentTemplate> {
    representation.segment_template.as_ref().or(adaptation_set.segment_template.as_ref())
}

fn expand_timeline(timeline: &SegmentTimeline) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut cursor = 0u64;
    for entry in &timeline.entries {
        match entry {
            TimelineEntry::S(s) => {
                let mut t = s.t.unwrap_or(cursor);
                let repeats = s.r.unwrap_or(0).max(0) as u64;
                for _ in 0..=repeats {
                    out.push((t, s.d));
                    t += s.d;
                }
                cursor = t;
            }
            TimelineEntry::Pattern(pattern) => {
                let repeats = pattern.r.unwrap_or(0).max(0) as u64;
                for _ in 0..=repeats {
                    for s in &pattern.s {
                        let t = s.t.unwrap_or(cursor);
                        out.push((t, s.d));
                        cursor = t + s.d;
                    }
                }
            }
        }
    }
    out
}

/// Extracts one representation's segment view across every period in the
/// MPD (C2). `seq = (period_id, derived_number)`.
fn extract_view(mpd: &Mpd, representation_id: &str, mime_type: &str, manifest_url: &Url) -> Result<ManifestView, ParseError> {
    let mut headers = ManifestHeaders::default();
    headers.availability_start_time = mpd.availability_start_time.as_deref().and_then(parse_xml_datetime);
    headers.period_list = mpd.periods.iter().filter_map(|p| p.id.clone()).collect();

    let mut segments = Vec::new();
    let mut disc_seq = 0u64;

    for period in &mpd.periods {
        let period_id = period.id.clone().unwrap_or_default();
        let Some(adaptation_set) = period
            .adaptation_sets
            .iter()
            .find(|a| a.mime_type.as_deref() == Some(mime_type) && a.representations.iter().any(|r| r.id.as_deref() == Some(representation_id)))
        else {
            continue;
        };
        let Some(representation) = adaptation_set.representations.iter().find(|r| r.id.as_deref() == Some(representation_id)) else {
            continue;
        };
        let Some(template) = effective_template(adaptation_set, representation) else {
            if mime_type.starts_with("video/") {
                return Err(ParseError::MissingSegmentTemplate);
            }
            continue;
        };
        let Some(timeline) = template.segment_timeline.as_ref() else {
            continue;
        };

        let start_number = template.start_number.unwrap_or(1);
        let timescale = template.timescale.unwrap_or(1).max(1);
        let pto = template.presentation_time_offset.unwrap_or(0);
        let expanded = expand_timeline(timeline);

        let ad_break_period = period_starts_ad_break(period);
        let leading_scte = period_leading_scte(period);
        headers.event_stream.extend(period_scte_events(period));

        for (idx, (t, d)) in expanded.iter().enumerate() {
            let discontinuity_flag = idx > 0 && (expanded[idx - 1].0 + expanded[idx - 1].1 != *t);
            if discontinuity_flag {
                disc_seq += 1;
            }
            let number = start_number + idx as u64;
            let ad_marker = if idx == 0 && ad_break_period {
                let (segmentation_type_id, duration_sec) = leading_scte.unwrap_or((None, None));
                Some(AdMarker::PeriodStart { segmentation_type_id, duration_sec })
            } else {
                None
            };
            segments.push(SegmentRecord {
                seq: Seq::Dash(period_id.clone(), number),
                duration_sec: *d as f64 / timescale as f64,
                discontinuity_flag,
                discontinuity_seq: disc_seq,
                pdt: None,
                pdt_explicit: false,
                url: manifest_url.clone(),
                format_specific: FormatSpecific {
                    presentation_time_offset: Some(pto),
                    timescale: Some(timescale),
                    period_id: Some(period_id.clone()),
                    timeline_t: Some(*t),
                },
                ad_marker,
            });
        }
    }

    Ok(ManifestView { headers, segments })
}

/// §4.5.1 non-EMT DASH ad-break entry: "a new `Period` whose first SCTE
/// event is either `SpliceInsert outOfNetworkIndicator=true` or a
/// `SegmentationDescriptor` with `segmentationTypeId` in the ad-break-start
/// set."
pub fn period_starts_ad_break(period: &Period) -> bool {
    let Some(event_stream) = period.event_streams.first() else { return false };
    let Some(first_event) = event_stream.events.first() else { return false };
    let Some(splice_info) = &first_event.splice_info else { return false };
    if let Some(insert) = &splice_info.splice_insert
        && insert.out_of_network_indicator == Some(true)
    {
        return true;
    }
    if let Some(signal) = &splice_info.time_signal
        && let Some(descriptor) = &signal.segmentation_descriptor
        && let Some(type_id) = descriptor.segmentation_type_id
    {
        return is_ad_break_start(type_id);
    }
    false
}

/// `(segmentationTypeId, segmentationDuration_sec)` of the period's leading
/// SCTE event, for `AdMarker::PeriodStart` -- the advertised duration §4.5.1
/// wants recorded on break entry.
fn period_leading_scte(period: &Period) -> Option<(Option<u8>, Option<f64>)> {
    let event_stream = period.event_streams.first()?;
    let timescale = event_stream.timescale.unwrap_or(1).max(1) as f64;
    let first_event = event_stream.events.first()?;
    let splice_info = first_event.splice_info.as_ref()?;
    if let Some(signal) = &splice_info.time_signal
        && let Some(descriptor) = &signal.segmentation_descriptor
    {
        let duration_sec = descriptor.segmentation_duration.map(|d| d as f64 / timescale);
        return Some((descriptor.segmentation_type_id, duration_sec));
    }
    if let Some(insert) = &splice_info.splice_insert {
        let duration_sec = insert.break_duration.as_ref().and_then(|b| b.duration).map(|d| d as f64 / timescale);
        return Some((None, duration_sec));
    }
    None
}

fn period_scte_events(period: &Period) -> Vec<ScteEvent> {
    let mut out = Vec::new();
    for stream in &period.event_streams {
        let timescale = stream.timescale.unwrap_or(1).max(1) as f64;
        for event in &stream.events {
            let Some(splice_info) = &event.splice_info else { continue };
            if let Some(insert) = &splice_info.splice_insert {
                out.push(ScteEvent {
                    segmentation_type_id: None,
                    segmentation_duration: insert.break_duration.as_ref().and_then(|b| b.duration).map(|d| d as f64 / timescale),
                    out_of_network_indicator: insert.out_of_network_indicator,
                });
            }
            if let Some(signal) = &splice_info.time_signal
                && let Some(descriptor) = &signal.segmentation_descriptor
            {
                out.push(ScteEvent {
                    segmentation_type_id: descriptor.segmentation_type_id,
                    segmentation_duration: descriptor.segmentation_duration.map(|d| d as f64 / timescale),
                    out_of_network_indicator: None,
                });
            }
        }
    }
    out
}

fn parse_xml_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Captures per-AdaptationSet `SupplementalProperty@value` for UTC alignment
/// checks (§4.2), returned alongside the per-representation PTO already
/// folded into each `SegmentRecord::format_specific`.
pub fn supplemental_property_utc(mpd_bytes: &[u8]) -> Option<String> {
    let mpd = decode(mpd_bytes).ok()?;
    mpd.periods.iter().flat_map(|p| &p.adaptation_sets).flat_map(|a| &a.supplemental_properties).find_map(|p| {
        if p.scheme_id_uri.as_deref() == Some("urn:mpeg:dash:utc:http-iso:2014") || p.scheme_id_uri.is_some() {
            p.value.clone()
        } else {
            None
        }
    })
}

/// C4: last segment of the final period on the selected representation.
pub fn probe(view: &ManifestView) -> Option<Anchor> {
    let last = view.segments.last()?;
    let cumulative_duration_sec = view.segments.iter().map(|s| s.duration_sec).sum();
    Some(Anchor { seq: last.seq.clone(), cumulative_duration_sec })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://cdn.example.com/live/stream.mpd").unwrap()
    }

    const SIMPLE_MPD: &str = r#"<?xml version="1.0"?>
<MPD availabilityStartTime="2026-01-01T00:00:00Z">
  <Period id="p1">
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate timescale="1000" startNumber="1" presentationTimeOffset="0">
        <SegmentTimeline>
          <S t="0" d="2000" r="2"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn decodes_basic_mpd() {
        let mpd = decode(SIMPLE_MPD.as_bytes()).unwrap();
        assert_eq!(mpd.periods.len(), 1);
        assert_eq!(mpd.periods[0].adaptation_sets[0].representations[0].id.as_deref(), Some("v0"));
    }

    #[test]
    fn expands_segment_timeline_with_repeat_count() {
        let mpd = decode(SIMPLE_MPD.as_bytes()).unwrap();
        let timeline = mpd.periods[0].adaptation_sets[0].segment_template.as_ref().unwrap().segment_timeline.as_ref().unwrap();
        let expanded = expand_timeline(timeline);
        assert_eq!(expanded, vec![(0, 2000), (2000, 2000), (4000, 2000)]);
    }

    #[test]
    fn discovers_representation_as_video_rendition() {
        let mpd = decode(SIMPLE_MPD.as_bytes()).unwrap();
        let renditions = discover_representations(&mpd, &url()).unwrap();
        assert_eq!(renditions.len(), 1);
        assert_eq!(renditions[0].role, Role::Video);
    }

    #[test]
    fn extracts_view_with_derived_numbers_and_pts() {
        let mpd = decode(SIMPLE_MPD.as_bytes()).unwrap();
        let view = extract_view(&mpd, "v0", "video/mp4", &url()).unwrap();
        assert_eq!(view.segments.len(), 3);
        assert_eq!(view.segments[0].seq, Seq::Dash("p1".to_string(), 1));
        assert_eq!(view.segments[2].seq, Seq::Dash("p1".to_string(), 3));
        assert_eq!(view.segments[1].pts_sec(), Some(2.0));
    }

    #[test]
    fn missing_template_on_video_representation_errors() {
        let mpd_str = r#"<MPD><Period id="p1"><AdaptationSet mimeType="video/mp4"><Representation id="v0"/></AdaptationSet></Period></MPD>"#;
        let mpd = decode(mpd_str.as_bytes()).unwrap();
        let err = extract_view(&mpd, "v0", "video/mp4", &url()).unwrap_err();
        assert!(matches!(err, ParseError::MissingSegmentTemplate));
    }

    #[test]
    fn pattern_element_expands_like_inline_s_runs() {
        let mpd_str = r#"<MPD><Period id="p1"><AdaptationSet mimeType="video/mp4">
          <SegmentTemplate timescale="1000" startNumber="1">
            <SegmentTimeline><Pattern r="1"><S t="0" d="1000"/><S d="1000"/></Pattern></SegmentTimeline>
          </SegmentTemplate>
          <Representation id="v0"/>
        </AdaptationSet></Period></MPD>"#;
        let mpd = decode(mpd_str.as_bytes()).unwrap();
        let view = extract_view(&mpd, "v0", "video/mp4", &url()).unwrap();
        assert_eq!(view.segments.len(), 4);
    }

    #[test]
    fn splice_insert_out_of_network_flags_ad_break_start() {
        let mpd_str = r#"<MPD><Period id="p1">
          <EventStream><Event><SpliceInfoSection><SpliceInsert outOfNetworkIndicator="true"/></SpliceInfoSection></Event></EventStream>
        </Period></MPD>"#;
        let mpd = decode(mpd_str.as_bytes()).unwrap();
        assert!(period_starts_ad_break(&mpd.periods[0]));
    }

    #[test]
    fn segmentation_descriptor_type_52_flags_ad_break_start() {
        let mpd_str = r#"<MPD><Period id="p1">
          <EventStream><Event><SpliceInfoSection><TimeSignal><SegmentationDescriptor segmentationTypeId="52" segmentationDuration="60000"/></TimeSignal></SpliceInfoSection></Event></EventStream>
        </Period></MPD>"#;
        let mpd = decode(mpd_str.as_bytes()).unwrap();
        assert!(period_starts_ad_break(&mpd.periods[0]));
        let events = period_scte_events(&mpd.periods[0]);
        assert_eq!(events[0].segmentation_type_id, Some(52));
    }
}
