//! Cross-Rendition Correlator (C6). Scope: HLS `all-renditions` mode only
//! (§4.6). Shared across every Monitor of one endpoint; guarded by a single
//! `parking_lot::Mutex` (§5: "the only shared mutable state besides the
//! rendition-name registry").

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::warn;

use crate::model::{CorrelationEntry, Role, Seq};

/// Shared per-endpoint mapping from segment `seq` to each rendition's
/// contribution, drained once every expected rendition has contributed.
#[derive(Default)]
pub struct CorrelationBucket {
    inner: Mutex<BTreeMap<Seq, Vec<CorrelationEntry>>>,
}

impl CorrelationBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// A Monitor calls this once per new segment it observes (§4.5 step 4).
    pub fn contribute(&self, seq: Seq, entry: CorrelationEntry) {
        self.inner.lock().entry(seq).or_default().push(entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every entry whose contributor count equals `member_count` and
    /// compares the contributions (§4.6). Returns a list of mismatches found,
    /// each already logged at `warn`.
    pub fn drain_and_compare(&self, member_count: usize) -> Vec<CorrelationMismatch> {
        let mut guard = self.inner.lock();
        let ready: Vec<Seq> = guard.iter().filter(|(_, v)| v.len() == member_count).map(|(k, _)| k.clone()).collect();
        let mut mismatches = Vec::new();
        for seq in ready {
            if let Some(entries) = guard.remove(&seq) {
                mismatches.extend(compare_entries(&seq, &entries));
            }
        }
        mismatches
    }

    /// §4.6: "If bucket length grows beyond `5 * frequency` entries, log
    /// 'unexpectedly long' and signal monitors to stop." Returns `true` when
    /// the bucket has grown past the threshold -- the caller (supervisor)
    /// decides how to signal its monitors.
    pub fn check_unexpectedly_long(&self, frequency_sec: f64) -> bool {
        let threshold = (5.0 * frequency_sec).round() as usize;
        let len = self.len();
        if len > threshold {
            warn!(len, threshold, "correlation bucket grew unexpectedly long; a rendition is not keeping up");
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationMismatch {
    DiscontinuitySeq,
    Discontinuity,
    VideoPdt,
    VideoDuration,
}

/// §4.6's four comparisons across one `seq`'s contributions.
fn compare_entries(seq: &Seq, entries: &[CorrelationEntry]) -> Vec<CorrelationMismatch> {
    let mut mismatches = Vec::new();

    if !all_equal(entries.iter().map(|e| e.discontinuity_seq)) {
        warn!(seq = ?seq, "cross-rendition discontinuity_seq mismatch");
        mismatches.push(CorrelationMismatch::DiscontinuitySeq);
    }
    if !all_equal(entries.iter().map(|e| e.discontinuity_flag)) {
        warn!(seq = ?seq, "cross-rendition discontinuity flag mismatch");
        mismatches.push(CorrelationMismatch::Discontinuity);
    }

    let video: Vec<&CorrelationEntry> = entries.iter().filter(|e| e.role == Role::Video).collect();
    if !all_equal(video.iter().filter(|e| e.pdt_explicit).map(|e| e.pdt)) {
        warn!(seq = ?seq, "cross-rendition video PDT mismatch");
        mismatches.push(CorrelationMismatch::VideoPdt);
    }
    if !all_equal(video.iter().map(|e| e.duration_sec.to_bits())) {
        warn!(seq = ?seq, "cross-rendition video duration mismatch");
        mismatches.push(CorrelationMismatch::VideoDuration);
    }

    mismatches
}

fn all_equal<T: PartialEq, I: IntoIterator<Item = T>>(iter: I) -> bool {
    let mut iter = iter.into_iter();
    let Some(first) = iter.next() else { return true };
    iter.all(|v| v == first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: Role, duration: f64, disc_seq: u64) -> CorrelationEntry {
        CorrelationEntry {
            role,
            duration_sec: duration,
            discontinuity_flag: false,
            discontinuity_seq: disc_seq,
            pdt: None,
            pdt_explicit: false,
        }
    }

    #[test]
    fn drains_only_once_all_members_contributed() {
        let bucket = CorrelationBucket::new();
        bucket.contribute(Seq::Hls(1), entry(Role::Video, 6.0, 0));
        assert!(bucket.drain_and_compare(2).is_empty());
        assert_eq!(bucket.len(), 1);

        bucket.contribute(Seq::Hls(1), entry(Role::Audio, 6.0, 0));
        let mismatches = bucket.drain_and_compare(2);
        assert!(mismatches.is_empty());
        assert!(bucket.is_empty());
    }

    #[test]
    fn detects_video_duration_mismatch() {
        let bucket = CorrelationBucket::new();
        bucket.contribute(Seq::Hls(1), entry(Role::Video, 6.0, 0));
        bucket.contribute(Seq::Hls(1), entry(Role::Video, 6.1, 0));
        let mismatches = bucket.drain_and_compare(2);
        assert!(mismatches.contains(&CorrelationMismatch::VideoDuration));
    }

    #[test]
    fn detects_discontinuity_seq_mismatch() {
        let bucket = CorrelationBucket::new();
        bucket.contribute(Seq::Hls(1), entry(Role::Video, 6.0, 0));
        bucket.contribute(Seq::Hls(1), entry(Role::Audio, 6.0, 1));
        let mismatches = bucket.drain_and_compare(2);
        assert!(mismatches.contains(&CorrelationMismatch::DiscontinuitySeq));
    }

    #[test]
    fn unexpectedly_long_threshold_is_five_times_frequency() {
        let bucket = CorrelationBucket::new();
        for n in 0..11u64 {
            bucket.contribute(Seq::Hls(n), entry(Role::Video, 6.0, 0));
        }
        assert!(bucket.check_unexpectedly_long(2.0));
        assert!(!bucket.check_unexpectedly_long(3.0));
    }
}
