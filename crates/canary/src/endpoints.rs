//! Endpoints file reader (§6): `name,manifest_url[,tracking_url]`, comma
//! delimited, `#`-comments and blank lines skipped, type auto-detected by URL
//! suffix.

use crate::config::EndpointConfig;
use crate::error::ConfigError;
use crate::model::{RenditionSelector, StreamType};

pub fn detect_stream_type(url: &str) -> Option<StreamType> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.ends_with(".m3u8") {
        Some(StreamType::Hls)
    } else if path.ends_with(".mpd") {
        Some(StreamType::Dash)
    } else if path.ends_with("Manifest") || path.ends_with(".ism") {
        Some(StreamType::Smooth)
    } else {
        None
    }
}

/// Parses the plain-text endpoints file into `EndpointConfig`s. Each line is
/// independent; a malformed line is a fatal `ConfigError` (startup-time
/// validation, per §7's `ConfigError` classification).
pub fn parse_endpoints_file(contents: &str, selector: RenditionSelector) -> Result<Vec<EndpointConfig>, ConfigError>
where
    RenditionSelector: Clone,
{
    let mut endpoints = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ConfigError::MalformedEndpointsLine {
                line_no: idx + 1,
                line: raw_line.to_string(),
            });
        }
        let name = parts[0].to_string();
        let manifest_url = parts[1].to_string();
        let tracking_url = parts.get(2).map(|s| s.to_string());
        endpoints.push(EndpointConfig {
            name,
            manifest_url,
            tracking_url,
            forced_type: None,
            selector: selector.clone(),
        });
    }
    if endpoints.is_empty() {
        return Err(ConfigError::NoEndpoints);
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_suffixes() {
        assert!(matches!(detect_stream_type("https://x/a.m3u8"), Some(StreamType::Hls)));
        assert!(matches!(detect_stream_type("https://x/a.mpd"), Some(StreamType::Dash)));
        assert!(matches!(detect_stream_type("https://x/a.ism/Manifest"), Some(StreamType::Smooth)));
        assert!(detect_stream_type("https://x/unknown").is_none());
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let text = "# a comment\n\nfoo,https://x/a.m3u8\n";
        let parsed = parse_endpoints_file(text, RenditionSelector::All).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "foo");
    }

    #[test]
    fn parses_optional_tracking_url() {
        let text = "foo,https://x/a.m3u8,https://x/track\n";
        let parsed = parse_endpoints_file(text, RenditionSelector::All).unwrap();
        assert_eq!(parsed[0].tracking_url.as_deref(), Some("https://x/track"));
    }

    #[test]
    fn rejects_malformed_line() {
        let text = "foo\n";
        let err = parse_endpoints_file(text, RenditionSelector::All).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedEndpointsLine { line_no: 1, .. }));
    }

    #[test]
    fn rejects_empty_file() {
        let err = parse_endpoints_file("# only comments\n", RenditionSelector::All).unwrap_err();
        assert!(matches!(err, ConfigError::NoEndpoints));
    }
}
