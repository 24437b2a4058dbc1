use reqwest::StatusCode;

/// Errors raised while resolving configuration or the endpoints file.
///
/// Fatal at startup: the process exits with a non-zero code without ever
/// spawning a supervisor task.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read endpoints file `{path}`: {source}")]
    EndpointsFileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed endpoints file line {line_no}: `{line}`")]
    MalformedEndpointsLine { line_no: usize, line: String },

    #[error("could not determine endpoint type for `{url}`; pass --force-type")]
    UndeterminedEndpointType { url: String },

    #[error("invalid rendition selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("no endpoints configured")]
    NoEndpoints,
}

/// Errors from a single HTTP fetch (C1). Never fatal; always mapped back to a
/// warning and a metric by the caller.
#[derive(Debug, thiserror::Error, Clone)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("connect error: {0}")]
    ConnectError(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("read timed out")]
    ReadTimeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("OS-level I/O error: {0}")]
    Os(String),

    #[error("HTTP {status} for {category} request to {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        category: &'static str,
    },

    #[error("other transport error: {0}")]
    Other(String),
}

impl FetchError {
    /// §4.1/§4.7: which of the `<cat>4xx` / `<cat>5xx` / `<cat>timeouterror`
    /// counters this error contributes to, if any.
    pub fn metric_suffix(&self) -> Option<&'static str> {
        match self {
            FetchError::HttpStatus { status, .. } if status.is_client_error() => Some("4xx"),
            FetchError::HttpStatus { status, .. } if status.is_server_error() => Some("5xx"),
            FetchError::ConnectTimeout | FetchError::ReadTimeout => Some("timeouterror"),
            _ => None,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            if err.is_connect() {
                FetchError::ConnectTimeout
            } else {
                FetchError::ReadTimeout
            }
        } else if err.is_connect() {
            FetchError::ConnectError(err.to_string())
        } else {
            FetchError::Other(err.to_string())
        }
    }
}

/// Errors from parsing manifest bytes into a `ManifestView` (C2). Logged as a
/// warning; the poll that produced it is dropped and the anchor is not
/// advanced (§4.5 step 3, §7).
#[derive(Debug, thiserror::Error, Clone)]
pub enum ParseError {
    #[error("malformed HLS playlist: {0}")]
    Hls(String),

    #[error("malformed DASH manifest: {0}")]
    Dash(String),

    #[error("malformed Smooth Streaming manifest: {0}")]
    Smooth(String),

    #[error("representation/adaptation set missing required SegmentTemplate")]
    MissingSegmentTemplate,

    #[error("XML decode error: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        ParseError::Xml(e.to_string())
    }
}

impl From<quick_xml::DeError> for ParseError {
    fn from(e: quick_xml::DeError) -> Self {
        ParseError::Xml(e.to_string())
    }
}

/// Manifest-logic violations that are not parse failures but are still
/// noteworthy: e.g. a segment's `EXTINF` exceeding `TARGETDURATION`, a DASH
/// period closing under 0.5s, an unexpected PDT jump. Never fatal (§7).
#[derive(Debug, thiserror::Error, Clone)]
pub enum Inconsistency {
    #[error("segment duration {duration_sec} exceeds TARGETDURATION {target_duration_sec}")]
    ExtinfExceedsTargetDuration {
        duration_sec: f64,
        target_duration_sec: f64,
    },

    #[error("period closed with duration {duration_sec}s (< 0.5s)")]
    ShortPeriodDuration { duration_sec: f64 },

    #[error("PDT jump of {delta_sec}s ({direction})")]
    PdtJump { delta_sec: f64, direction: &'static str },

    #[error("nested ad break: entering a new break while already in one")]
    NestedAdBreak,

    #[error("last segment not found at anchor seq {anchor_seq}")]
    LastSegmentMissing { anchor_seq: String },

    #[error("cross-rendition mismatch at seq {seq}: {field}")]
    CorrelationMismatch { seq: String, field: &'static str },
}

/// Errors publishing a metrics batch (C7) or persisting a blob (external save
/// hooks). Logged; the next tick tries again (§7).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("metrics publish failed: {0}")]
    MetricsPublish(String),

    #[error("blob persist failed: {0}")]
    BlobPersist(#[from] std::io::Error),
}

/// Top-level error for anything a Monitor task can terminate with.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("rendition became stale and was spawned from a primary manifest")]
    StaleFromPrimary,
}
