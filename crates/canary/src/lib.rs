//! canary-engine: a black-box streaming-media canary.
//!
//! Polls HLS/DASH/Smooth Streaming manifest endpoints on a steady cadence and
//! validates, from the outside, that each monitored rendition is producing a
//! live, well-formed, timely stream.

pub mod adbreak;
pub mod config;
pub mod context;
pub mod correlator;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod formats;
pub mod lipsync;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod retry;
pub mod scte35;
pub mod sinks;
pub mod supervisor;
pub mod tracking;

pub use context::AppContext;
pub use error::{ConfigError, FetchError, Inconsistency, MonitorError, ParseError, SinkError};
pub use model::{AnchorKey, Endpoint, ManifestView, Rendition, RenditionSelector, RenditionState, Role, SegmentRecord, StreamType};
