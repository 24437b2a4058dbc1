//! Smooth Streaming parser/discoverer/prober (C2/C3/C4). Same `quick-xml`
//! serde approach as `dash.rs`; the wire shape is a flat `<SmoothStreamingMedia>`
//! with one `<StreamIndex>` per track and `<c t d r>` chunk runs instead of
//! DASH's nested Period/AdaptationSet/Representation tree.

use quick_xml::de::from_str;
use url::Url;

use crate::error::ParseError;
use crate::formats::ManifestFormat;
use crate::model::{
    Anchor, AnchorKey, FormatSpecific, ManifestHeaders, ManifestView, Rendition, RenditionSelector, Role, Seq,
    SegmentRecord, StreamType,
};
use serde::Deserialize;

pub struct SmoothFormat;

impl ManifestFormat for SmoothFormat {
    fn stream_type(&self) -> StreamType {
        StreamType::Smooth
    }

    fn parse(&self, bytes: &[u8], manifest_url: &Url, rendition: &Rendition) -> Result<ManifestView, ParseError> {
        let AnchorKey::SmoothStream { stream_type, quality_level } = &rendition.anchor_key else {
            return Err(ParseError::Smooth("Smooth parse called with a non-Smooth anchor key".to_string()));
        };
        let media = decode(bytes)?;
        extract_view(&media, stream_type, *quality_level, manifest_url)
    }

    fn discover(&self, bytes: &[u8], manifest_url: &Url) -> Result<Vec<Rendition>, ParseError> {
        let media = decode(bytes)?;
        discover_streams(&media, manifest_url)
    }

    fn probe(&self, view: &ManifestView, _rendition: &Rendition) -> Option<Anchor> {
        probe(view)
    }
}

fn decode(bytes: &[u8]) -> Result<SmoothStreamingMedia, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Smooth(format!("non-utf8 manifest: {e}")))?;
    from_str(text).map_err(ParseError::from)
}

#[derive(Debug, Deserialize)]
#[serde(rename = "SmoothStreamingMedia")]
struct SmoothStreamingMedia {
    #[serde(rename = "@TimeScale", default)]
    timescale: Option<u64>,
    #[serde(rename = "StreamIndex", default)]
    stream_indexes: Vec<StreamIndex>,
}

#[derive(Debug, Deserialize)]
struct StreamIndex {
    #[serde(rename = "@Type", default)]
    stream_type: Option<String>,
    #[serde(rename = "@Url", default)]
    url_template: Option<String>,
    #[serde(rename = "QualityLevel", default)]
    quality_levels: Vec<QualityLevel>,
    #[serde(rename = "c", default)]
    chunks: Vec<Chunk>,
}

#[derive(Debug, Deserialize)]
struct QualityLevel {
    #[serde(rename = "@Index", default)]
    index: Option<u32>,
    #[serde(rename = "@FourCC", default)]
    four_cc: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct Chunk {
    #[serde(rename = "@t", default)]
    t: Option<u64>,
    #[serde(rename = "@d", default)]
    d: Option<u64>,
    #[serde(rename = "@r", default)]
    r: Option<i64>,
}

fn role_for(stream_type: &str) -> Role {
    match stream_type {
        "video" => Role::Video,
        "audio" => Role::Audio,
        _ => Role::Subtitle,
    }
}

/// C3: one rendition per `(StreamIndex.Type, QualityLevel.Index)`. An audio
/// `StreamIndex` whose first `QualityLevel` carries a `FourCC` other than
/// `AACL` is skipped entirely, matching the original monitor's codec gate.
fn discover_streams(media: &SmoothStreamingMedia, manifest_url: &Url) -> Result<Vec<Rendition>, ParseError> {
    let mut renditions = Vec::new();
    let mut ordinal_by_role: std::collections::HashMap<Role, u32> = std::collections::HashMap::new();
    for stream_index in &media.stream_indexes {
        let stream_type = stream_index.stream_type.clone().unwrap_or_default();
        let role = role_for(&stream_type);
        if role == Role::Audio
            && let Some(first) = stream_index.quality_levels.first()
            && let Some(four_cc) = &first.four_cc
            && four_cc != "AACL"
        {
            continue;
        }
        for quality_level in &stream_index.quality_levels {
            let quality_level_index = quality_level.index.unwrap_or(0);
            let entry = ordinal_by_role.entry(role).or_insert(0);
            *entry += 1;
            renditions.push(Rendition {
                role,
                ordinal: *entry,
                url: manifest_url.clone(),
                anchor_key: AnchorKey::SmoothStream { stream_type: stream_type.clone(), quality_level: quality_level_index },
            });
        }
    }
    Ok(renditions)
}

pub fn select(renditions: &[Rendition], selector: &RenditionSelector) -> Vec<Rendition> {
    crate::formats::hls::select(renditions, selector)
}

/// Expands `<c t d r>` runs: `t` inherited from the previous chunk's end when
/// absent, repeated `r+1` times, exactly like DASH's `<S>` run (§4.2).
fn expand_chunks(chunks: &[Chunk]) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut cursor = 0u64;
    for chunk in chunks {
        let mut t = chunk.t.unwrap_or(cursor);
        let d = chunk.d.unwrap_or(0);
        let repeats = chunk.r.unwrap_or(0).max(0) as u64;
        for _ in 0..=repeats {
            out.push((t, d));
            t += d;
        }
        cursor = t;
    }
    out
}

fn extract_view(media: &SmoothStreamingMedia, stream_type: &str, quality_level: u32, manifest_url: &Url) -> Result<ManifestView, ParseError> {
    let Some(stream_index) = media
        .stream_indexes
        .iter()
        .find(|s| s.stream_type.as_deref() == Some(stream_type) && s.quality_levels.iter().any(|q| q.index.unwrap_or(0) == quality_level))
    else {
        return Err(ParseError::Smooth(format!("no StreamIndex for type {stream_type}")));
    };

    let timescale = media.timescale.unwrap_or(10_000_000).max(1);
    let expanded = expand_chunks(&stream_index.chunks);
    let mut segments = Vec::with_capacity(expanded.len());

    for (idx, (t, d)) in expanded.iter().enumerate() {
        let discontinuity_flag = idx > 0 && (expanded[idx - 1].0 + expanded[idx - 1].1 != *t);
        segments.push(SegmentRecord {
            seq: Seq::Smooth(*t),
            duration_sec: *d as f64 / timescale as f64,
            discontinuity_flag,
            discontinuity_seq: 0,
            pdt: None,
            pdt_explicit: false,
            url: manifest_url.clone(),
            format_specific: FormatSpecific {
                presentation_time_offset: Some(0),
                timescale: Some(timescale),
                period_id: None,
                timeline_t: Some(*t),
            },
            ad_marker: None,
        });
    }

    let headers = ManifestHeaders { is_primary: false, ..Default::default() };
    Ok(ManifestView { headers, segments })
}

/// C4: last chunk of the selected stream's quality level.
pub fn probe(view: &ManifestView) -> Option<Anchor> {
    let last = view.segments.last()?;
    let cumulative_duration_sec = view.segments.iter().map(|s| s.duration_sec).sum();
    Some(Anchor { seq: last.seq.clone(), cumulative_duration_sec })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://cdn.example.com/live/stream/Manifest").unwrap()
    }

    const MANIFEST: &str = r#"<?xml version="1.0"?>
<SmoothStreamingMedia TimeScale="10000000">
  <StreamIndex Type="video" Url="QualityLevels({bitrate})/Fragments(video={start time})">
    <QualityLevel Index="0"/>
    <c t="0" d="20000000" r="2"/>
  </StreamIndex>
  <StreamIndex Type="audio">
    <QualityLevel Index="0"/>
    <c t="0" d="20000000"/>
  </StreamIndex>
</SmoothStreamingMedia>"#;

    #[test]
    fn decodes_stream_indexes_and_quality_levels() {
        let media = decode(MANIFEST.as_bytes()).unwrap();
        assert_eq!(media.stream_indexes.len(), 2);
        assert_eq!(media.stream_indexes[0].quality_levels[0].index, Some(0));
    }

    #[test]
    fn expands_chunk_runs_with_repeat_count() {
        let media = decode(MANIFEST.as_bytes()).unwrap();
        let expanded = expand_chunks(&media.stream_indexes[0].chunks);
        assert_eq!(expanded, vec![(0, 20_000_000), (20_000_000, 20_000_000), (40_000_000, 20_000_000)]);
    }

    #[test]
    fn discovers_video_and_audio_renditions() {
        let media = decode(MANIFEST.as_bytes()).unwrap();
        let renditions = discover_streams(&media, &url()).unwrap();
        assert_eq!(renditions.len(), 2);
        assert!(renditions.iter().any(|r| r.role == Role::Video));
        assert!(renditions.iter().any(|r| r.role == Role::Audio));
    }

    #[test]
    fn extracts_view_with_tsec_from_timescale() {
        let media = decode(MANIFEST.as_bytes()).unwrap();
        let view = extract_view(&media, "video", 0, &url()).unwrap();
        assert_eq!(view.segments.len(), 3);
        assert_eq!(view.segments[0].duration_sec, 2.0);
        assert_eq!(view.segments[1].pts_sec(), Some(2.0));
    }

    #[test]
    fn non_aacl_audio_stream_is_skipped() {
        let manifest = r#"<SmoothStreamingMedia TimeScale="10000000">
          <StreamIndex Type="audio"><QualityLevel Index="0" FourCC="WMAP"/><c t="0" d="20000000"/></StreamIndex>
        </SmoothStreamingMedia>"#;
        let media = decode(manifest.as_bytes()).unwrap();
        let renditions = discover_streams(&media, &url()).unwrap();
        assert!(renditions.is_empty());
    }

    #[test]
    fn missing_stream_type_errors() {
        let media = decode(MANIFEST.as_bytes()).unwrap();
        let err = extract_view(&media, "text", 0, &url()).unwrap_err();
        assert!(matches!(err, ParseError::Smooth(_)));
    }
}
