//! HLS parser/discoverer/prober (C2/C3/C4 for the `#EXT-X-*` family).
//!
//! The per-tag tokenizer below is hand-rolled rather than built on
//! `m3u8_rs`'s typed segment fields: the canary needs exact SCTE-35
//! `DATERANGE`/`CUE-OUT`/`CUE-IN` semantics (§4.2) that a generic playlist
//! parser doesn't model as first-class data. `m3u8_rs` is still used for the
//! one place its typed API is a clean fit: classifying and enumerating a
//! master playlist's variants/alternatives (C3) by calling `parse_playlist_res`
//! to distinguish `MasterPlaylist`/`MediaPlaylist`.

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::ParseError;
use crate::formats::ManifestFormat;
use crate::model::{
    AdMarker, AnchorKey, FormatSpecific, ManifestHeaders, ManifestView, Rendition, RenditionSelector, Role, ScteEvent,
    Seq, SegmentRecord, StreamType,
};
use crate::model::Anchor;

pub struct HlsFormat;

impl ManifestFormat for HlsFormat {
    fn stream_type(&self) -> StreamType {
        StreamType::Hls
    }

    fn parse(&self, bytes: &[u8], manifest_url: &Url, _rendition: &Rendition) -> Result<ManifestView, ParseError> {
        parse_media_playlist(bytes, manifest_url)
    }

    fn discover(&self, bytes: &[u8], manifest_url: &Url) -> Result<Vec<Rendition>, ParseError> {
        discover_renditions(bytes, manifest_url)
    }

    fn probe(&self, view: &ManifestView, _rendition: &Rendition) -> Option<Anchor> {
        probe(view)
    }
}

/// Which shape the top-level fetched manifest turned out to be (§2 control
/// flow: "decides HLS-primary (multi-rendition) vs HLS-media (single)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsKind {
    Primary,
    Media,
}

/// §4.2 "Is-primary detection: presence of any `#EXT-X-STREAM-INF:` or
/// `#EXT-X-MEDIA:`." A cheap text scan rather than a full parse, since the
/// premonitor needs this before deciding which parser path to take at all.
pub fn classify(bytes: &[u8]) -> HlsKind {
    let text = String::from_utf8_lossy(bytes);
    let is_primary = text
        .lines()
        .any(|l| l.starts_with("#EXT-X-STREAM-INF:") || l.starts_with("#EXT-X-MEDIA:"));
    if is_primary { HlsKind::Primary } else { HlsKind::Media }
}

/// C3: enumerate `{role, ordinal, URL, attrs}` from a primary manifest's
/// variants (`#EXT-X-STREAM-INF` -> role=Video) and alternatives
/// (`#EXT-X-MEDIA` -> role=TYPE), deduplicated by URL and numbered per role.
/// If the manifest has no variants/alternatives at all it is itself a media
/// playlist, and discovery yields the single synthetic rendition (§4.3).
pub fn discover_renditions(bytes: &[u8], manifest_url: &Url) -> Result<Vec<Rendition>, ParseError> {
    match m3u8_rs::parse_playlist_res(bytes) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
            let mut renditions = Vec::new();
            let mut seen_urls = std::collections::HashSet::new();
            let mut ordinal_by_role: std::collections::HashMap<Role, u32> = std::collections::HashMap::new();

            for variant in &master.variants {
                if variant.is_i_frame {
                    continue;
                }
                let Ok(url) = resolve(manifest_url, &variant.uri) else { continue };
                if !seen_urls.insert(url.to_string()) {
                    continue;
                }
                let ordinal = bump(&mut ordinal_by_role, Role::Video);
                renditions.push(Rendition {
                    role: Role::Video,
                    ordinal,
                    url: url.clone(),
                    anchor_key: AnchorKey::HlsUrl(url.to_string()),
                });
            }

            for alt in &master.alternatives {
                let Some(uri) = alt.uri.as_deref() else { continue };
                let role = match alt.media_type {
                    m3u8_rs::AlternativeMediaType::Audio => Role::Audio,
                    m3u8_rs::AlternativeMediaType::Subtitles => Role::Subtitle,
                    _ => continue,
                };
                let Ok(url) = resolve(manifest_url, uri) else { continue };
                if !seen_urls.insert(url.to_string()) {
                    continue;
                }
                let ordinal = bump(&mut ordinal_by_role, role);
                renditions.push(Rendition { role, ordinal, url: url.clone(), anchor_key: AnchorKey::HlsUrl(url.to_string()) });
            }

            Ok(renditions)
        }
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) | Err(_) => Ok(vec![Rendition {
            role: Role::Video,
            ordinal: 1,
            url: manifest_url.clone(),
            anchor_key: AnchorKey::HlsUrl(manifest_url.to_string()),
        }]),
    }
}

fn bump(map: &mut std::collections::HashMap<Role, u32>, role: Role) -> u32 {
    let entry = map.entry(role).or_insert(0);
    *entry += 1;
    *entry
}

fn resolve(base: &Url, uri: &str) -> Result<Url, url::ParseError> {
    Url::parse(uri).or_else(|_| base.join(uri))
}

/// Applies a selection mode (§4.3) to a discovered rendition list.
pub fn select(renditions: &[Rendition], selector: &RenditionSelector) -> Vec<Rendition> {
    match selector {
        RenditionSelector::All => renditions.to_vec(),
        RenditionSelector::Single { role, ordinal } => renditions
            .iter()
            .filter(|r| r.role == *role && r.ordinal == *ordinal)
            .cloned()
            .collect(),
        RenditionSelector::Player => {
            let mut picked = Vec::new();
            for role in [Role::Video, Role::Audio, Role::Subtitle] {
                if let Some(r) = renditions.iter().find(|r| r.role == role && r.ordinal == 1) {
                    picked.push(r.clone());
                }
            }
            picked
        }
    }
}

/// C4: `last_media_sequence = media_sequence + segment_count - 1`, plus
/// cumulative manifest duration.
pub fn probe(view: &ManifestView) -> Option<Anchor> {
    let last = view.segments.last()?;
    let cumulative_duration_sec = view.segments.iter().map(|s| s.duration_sec).sum();
    Some(Anchor { seq: last.seq.clone(), cumulative_duration_sec })
}

/// Line-oriented tag state accumulated while walking toward the next segment
/// URI line (§4.2: "pending tags attach to it").
#[derive(Default)]
struct PendingTags {
    discontinuity: bool,
    pdt: Option<(DateTime<Utc>, bool)>,
    cue_out_duration: Option<f64>,
    cue_in: bool,
    daterange_scte_out: Option<(String, Option<f64>)>,
    daterange_scte_in: Option<String>,
    duration_sec: Option<f64>,
}

pub fn parse_media_playlist(bytes: &[u8], manifest_url: &Url) -> Result<ManifestView, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Hls(format!("non-utf8 playlist: {e}")))?;

    let mut headers = ManifestHeaders::default();
    let mut media_sequence: u64 = 0;
    let mut disc_seq: u64 = 0;
    let mut segments = Vec::new();
    let mut pending = PendingTags::default();
    let mut emitted = 0u64;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXT-X-VERSION:") {
            headers.version = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            headers.target_duration_sec = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = rest.trim().parse().unwrap_or(0);
            headers.media_sequence = Some(media_sequence);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-DISCONTINUITY-SEQUENCE:") {
            disc_seq = rest.trim().parse().unwrap_or(0);
            headers.discontinuity_sequence = Some(disc_seq);
        } else if line.starts_with("#EXT-X-DISCONTINUITY") {
            disc_seq += 1;
            pending.discontinuity = true;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PROGRAM-DATE-TIME:") {
            if let Some(pdt) = parse_pdt(rest.trim()) {
                pending.pdt = Some((pdt, true));
            }
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let duration_str = rest.split(',').next().unwrap_or(rest);
            pending.duration_sec = duration_str.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("#EXT-X-CUE-OUT") {
            let duration = rest.strip_prefix(':').and_then(|d| d.trim().parse().ok());
            pending.cue_out_duration = Some(duration.unwrap_or(0.0));
        } else if line.starts_with("#EXT-X-CUE-IN") {
            pending.cue_in = true;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-DATERANGE:") {
            let attrs = parse_attribute_list(rest);
            let id = attrs.get("ID").cloned().unwrap_or_default();
            if attrs.contains_key("SCTE35-OUT") {
                let duration = attrs
                    .get("DURATION")
                    .or_else(|| attrs.get("PLANNED-DURATION"))
                    .and_then(|v| v.parse().ok());
                pending.daterange_scte_out = Some((id, duration));
            }
            if attrs.contains_key("SCTE35-IN") {
                pending.daterange_scte_in = Some(id);
            }
        } else if !line.starts_with('#') {
            let seq_num = media_sequence + emitted;
            let resolved = resolve(manifest_url, line).map_err(|e| ParseError::Hls(format!("bad segment URI `{line}`: {e}")))?;
            let duration_sec = pending.duration_sec.take().unwrap_or(0.0);

            if let Some(target) = headers.target_duration_sec
                && duration_sec > target.round()
            {
                headers.event_stream.push(ScteEvent {
                    segmentation_type_id: None,
                    segmentation_duration: Some(duration_sec),
                    out_of_network_indicator: None,
                });
            }

            let mut ad_marker = None;
            if let Some((id, duration)) = pending.daterange_scte_out.take() {
                headers.event_stream.push(ScteEvent {
                    segmentation_type_id: Some(34),
                    segmentation_duration: duration,
                    out_of_network_indicator: Some(true),
                });
                // §9 open question: kept as observed -- a blank `ID` still
                // produces this ScteEvent but never drives `AdState` below.
                if !id.is_empty() {
                    ad_marker = Some(AdMarker::DaterangeOut { id, duration_sec: duration });
                }
            } else if let Some(id) = pending.daterange_scte_in.take() {
                ad_marker = Some(AdMarker::DaterangeIn { id });
            } else if let Some(duration) = pending.cue_out_duration.take() {
                ad_marker = Some(AdMarker::CueOut { duration_sec: Some(duration) });
            } else if pending.cue_in {
                ad_marker = Some(AdMarker::CueIn);
            }

            segments.push(SegmentRecord {
                seq: Seq::Hls(seq_num),
                duration_sec,
                discontinuity_flag: pending.discontinuity,
                discontinuity_seq: disc_seq,
                pdt: pending.pdt.map(|(t, _)| t),
                pdt_explicit: pending.pdt.is_some(),
                url: resolved,
                format_specific: FormatSpecific::default(),
                ad_marker,
            });
            emitted += 1;
            pending = PendingTags::default();
        }
    }

    headers.is_primary = false;
    Ok(ManifestView { headers, segments })
}

fn parse_pdt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Parses a comma-delimited `KEY=VALUE` / `KEY="VALUE"` attribute list as
/// used by `#EXT-X-DATERANGE` and `#EXT-X-STREAM-INF` (§4.2).
fn parse_attribute_list(s: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    let mut parts = Vec::new();
    for (idx, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&s[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    for part in parts {
        let Some((k, v)) = part.trim().split_once('=') else { continue };
        let v = v.trim().trim_matches('"');
        out.insert(k.trim().to_string(), v.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://cdn.example.com/live/stream.m3u8").unwrap()
    }

    #[test]
    fn parses_steady_state_segments() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:100\n\
            #EXTINF:6.0,\nseg100.ts\n#EXTINF:6.0,\nseg101.ts\n#EXTINF:6.0,\nseg102.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        assert_eq!(view.segments.len(), 3);
        assert_eq!(view.segments[0].seq, Seq::Hls(100));
        assert_eq!(view.segments[2].seq, Seq::Hls(102));
        assert_eq!(view.headers.target_duration_sec, Some(6.0));
    }

    #[test]
    fn discontinuity_increments_seq_and_flags_next_segment() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n#EXT-X-DISCONTINUITY-SEQUENCE:0\n\
            #EXTINF:6.0,\nseg1.ts\n#EXT-X-DISCONTINUITY\n#EXTINF:6.0,\nseg2.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        assert!(!view.segments[0].discontinuity_flag);
        assert_eq!(view.segments[0].discontinuity_seq, 0);
        assert!(view.segments[1].discontinuity_flag);
        assert_eq!(view.segments[1].discontinuity_seq, 1);
    }

    #[test]
    fn cue_out_and_cue_in_are_recognized() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n#EXT-X-CUE-OUT:30.0\n#EXTINF:10.0,\nad1.ts\n\
            #EXTINF:10.0,\nad2.ts\n#EXTINF:10.0,\nad3.ts\n#EXT-X-CUE-IN\n#EXTINF:6.0,\nback.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        assert_eq!(view.segments.len(), 4);
    }

    #[test]
    fn explicit_pdt_is_parsed_with_milliseconds() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n#EXT-X-PROGRAM-DATE-TIME:2026-01-01T00:00:00.500Z\n\
            #EXTINF:6.0,\nseg1.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        assert!(view.segments[0].pdt_explicit);
        assert!(view.segments[0].pdt.is_some());
    }

    #[test]
    fn daterange_scte35_out_with_id_and_duration() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n\
            #EXT-X-DATERANGE:ID=\"ad-1\",START-DATE=\"2026-01-01T00:00:00Z\",SCTE35-OUT=0xFC002,DURATION=30.0\n\
            #EXTINF:10.0,\nseg1.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        assert_eq!(view.headers.event_stream.len(), 1);
        assert_eq!(view.headers.event_stream[0].segmentation_duration, Some(30.0));
    }

    #[test]
    fn extinf_exceeding_target_duration_is_recorded() {
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:9.5,\nseg1.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        assert_eq!(view.headers.event_stream.len(), 1);
    }

    #[test]
    fn classify_detects_primary_via_stream_inf() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000000\nvariant.m3u8\n";
        assert_eq!(classify(master.as_bytes()), HlsKind::Primary);
        let media = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:6.0,\nseg1.ts\n";
        assert_eq!(classify(media.as_bytes()), HlsKind::Media);
    }

    #[test]
    fn probe_returns_last_segment_as_anchor() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:100\n#EXTINF:6.0,\nseg100.ts\n#EXTINF:6.0,\nseg101.ts\n";
        let view = parse_media_playlist(playlist.as_bytes(), &url()).unwrap();
        let anchor = probe(&view).unwrap();
        assert_eq!(anchor.seq, Seq::Hls(101));
        assert_eq!(anchor.cumulative_duration_sec, 12.0);
    }

    #[test]
    fn select_single_picks_matching_role_and_ordinal() {
        let renditions = vec![
            Rendition { role: Role::Video, ordinal: 1, url: url(), anchor_key: AnchorKey::HlsUrl("a".into()) },
            Rendition { role: Role::Audio, ordinal: 1, url: url(), anchor_key: AnchorKey::HlsUrl("b".into()) },
        ];
        let picked = select(&renditions, &RenditionSelector::Single { role: Role::Audio, ordinal: 1 });
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].role, Role::Audio);
    }
}
