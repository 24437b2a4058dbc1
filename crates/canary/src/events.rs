//! Normalized events a format's `diff` produces, consumed uniformly by the
//! Monitor tick loop instead of branching on format inline (§9 redesign).

use crate::error::ParseError;
use crate::model::SegmentRecord;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    NewSegment(SegmentRecord),
    LastSegmentMissing,
    AdBreakEnter { advertised_duration_sec: Option<f64> },
    AdBreakExit { actual_duration_sec: f64 },
    Discontinuity { discontinuity_seq: u64 },
    PdtJump { delta_sec: f64 },
    HeaderChange { field: &'static str },
    ParseError(ParseError),
}
