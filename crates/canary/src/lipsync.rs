//! §4.5.2 A/V sync checks: DASH per-`(period, number)` PTS delta across
//! representations sharing one endpoint, and Smooth Streaming's simpler
//! video/audio/subtitle `tsec` comparison. Both reuse the correlator's
//! shared-bucket-behind-a-mutex idiom (`correlator.rs`) since the data to
//! compare crosses Monitor task boundaries.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::model::{Role, Seq};

#[derive(Debug, Clone, Copy)]
pub struct PtsSample {
    pub role: Role,
    pub pts_sec: f64,
}

/// Shared across every DASH representation Monitor of one endpoint in
/// `all`/`player` selection mode.
#[derive(Default)]
pub struct DashLipSyncBucket {
    inner: Mutex<HashMap<Seq, Vec<PtsSample>>>,
}

impl DashLipSyncBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, seq: Seq, sample: PtsSample) {
        self.inner.lock().entry(seq).or_default().push(sample);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every entry with ≥ 2 contributors and returns its PTS delta
    /// `max(pts) - min(pts)` (§4.5.2, §8).
    pub fn drain_deltas(&self) -> Vec<(Seq, f64)> {
        let mut guard = self.inner.lock();
        let ready: Vec<Seq> = guard.iter().filter(|(_, v)| v.len() >= 2).map(|(k, _)| k.clone()).collect();
        let mut out = Vec::with_capacity(ready.len());
        for seq in ready {
            if let Some(samples) = guard.remove(&seq) {
                let max = samples.iter().map(|s| s.pts_sec).fold(f64::MIN, f64::max);
                let min = samples.iter().map(|s| s.pts_sec).fold(f64::MAX, f64::min);
                out.push((seq, max - min));
            }
        }
        out
    }

    /// Drops entries stuck waiting for a representation that never came
    /// (e.g. a period with no audio rendition); mirrors the correlator's
    /// "unexpectedly long" eviction (§4.6) so the bucket doesn't grow
    /// unbounded across a long-running stream.
    pub fn evict_older_than(&self, max_entries: usize) -> usize {
        let mut guard = self.inner.lock();
        let excess = guard.len().saturating_sub(max_entries);
        if excess == 0 {
            return 0;
        }
        let mut keys: Vec<Seq> = guard.keys().cloned().collect();
        keys.sort();
        for key in keys.into_iter().take(excess) {
            guard.remove(&key);
        }
        excess
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LipSyncEvent {
    Warn { delta_sec: f64 },
    Recovered { delta_sec: f64 },
}

/// Warn once on first offending tick, log recovery once back under the
/// 100ms threshold (§4.5.2: "a subsequent tick below the threshold logs a
/// 'now within 100 ms' recovery info"). `offending` is monitor-owned state
/// (`RenditionState::lip_sync_offending`).
pub fn evaluate_dash_delta(offending: &mut bool, delta_sec: f64) -> Option<LipSyncEvent> {
    const THRESHOLD_SEC: f64 = 0.1;
    if delta_sec > THRESHOLD_SEC {
        let was_offending = *offending;
        *offending = true;
        if was_offending { None } else { Some(LipSyncEvent::Warn { delta_sec }) }
    } else if *offending {
        *offending = false;
        Some(LipSyncEvent::Recovered { delta_sec })
    } else {
        None
    }
}

/// Latest known `tsec` per role for one Smooth Streaming endpoint, updated
/// by whichever Monitor (video/audio/subtitle) just saw a new chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmoothSyncState {
    pub video_tsec: Option<f64>,
    pub audio_tsec: Option<f64>,
    pub subtitle_tsec: Option<f64>,
}

#[derive(Default)]
pub struct SmoothSyncBucket {
    inner: Mutex<SmoothSyncState>,
}

impl SmoothSyncBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, role: Role, tsec: f64) -> SmoothSyncState {
        let mut guard = self.inner.lock();
        match role {
            Role::Video => guard.video_tsec = Some(tsec),
            Role::Audio => guard.audio_tsec = Some(tsec),
            Role::Subtitle => guard.subtitle_tsec = Some(tsec),
        }
        *guard
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothSyncEvent {
    AvDelta { delta_sec: f64 },
    SubtitleDelta { delta_sec: f64 },
}

/// §4.5.2 Smooth sibling check: latest video `tsec` vs audio (> 0.05s warn)
/// and vs subtitle (> 0.5s warn).
pub fn evaluate_smooth(state: &SmoothSyncState) -> Vec<SmoothSyncEvent> {
    let mut events = Vec::new();
    if let (Some(v), Some(a)) = (state.video_tsec, state.audio_tsec) {
        let delta = (v - a).abs();
        if delta > 0.05 {
            events.push(SmoothSyncEvent::AvDelta { delta_sec: delta });
        }
    }
    if let (Some(v), Some(s)) = (state.video_tsec, state.subtitle_tsec) {
        let delta = (v - s).abs();
        if delta > 0.5 {
            events.push(SmoothSyncEvent::SubtitleDelta { delta_sec: delta });
        }
    }
    events
}
