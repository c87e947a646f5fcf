// The post-encoder unit (spec.md §3 "Coded frame") and its invariants
// (spec.md §3, §8).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::clock::HwTimestamps;
use crate::descriptors::StreamId;
use crate::error::PipelineError;
use crate::frame::payload::Payload;
use crate::metadata::MetadataItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedFrameKind {
    Video,
    Audio,
}

pub struct CodedFrame {
    pub output_stream_id: StreamId,
    pub kind: CodedFrameKind,
    pub payload: Payload,
    /// Scheduling PTS, 27 MHz — the value used to order work before mux
    /// assembly; see `real_pts`/`real_dts` for the wire-facing content clock.
    pub pts: i64,
    pub real_pts: i64,
    pub real_dts: i64,
    pub cpb_initial_arrival_time: i64,
    pub cpb_final_arrival_time: i64,
    pub random_access: bool,
    /// I-picture flag; unused (always true) for audio.
    pub priority: bool,
    pub hw_timestamps: HwTimestamps,
    pub metadata: Vec<MetadataItem>,
}

impl CodedFrame {
    /// spec.md §3/§8 per-frame invariants:
    ///   real_dts <= real_pts
    ///   cpb_initial <= cpb_final <= real_dts <= real_pts   (video only)
    pub fn check_invariants(&self) -> Result<(), PipelineError> {
        if self.real_dts > self.real_pts {
            return Err(PipelineError::InvariantViolated(format!(
                "real_dts ({}) > real_pts ({}) on stream {:?}",
                self.real_dts, self.real_pts, self.output_stream_id
            )));
        }
        if self.kind == CodedFrameKind::Video {
            if self.cpb_initial_arrival_time > self.cpb_final_arrival_time {
                return Err(PipelineError::InvariantViolated(format!(
                    "cpb_initial ({}) > cpb_final ({}) on stream {:?}",
                    self.cpb_initial_arrival_time, self.cpb_final_arrival_time, self.output_stream_id
                )));
            }
            if self.cpb_final_arrival_time > self.real_dts {
                return Err(PipelineError::InvariantViolated(format!(
                    "cpb_final ({}) > real_dts ({}) on stream {:?}",
                    self.cpb_final_arrival_time, self.real_dts, self.output_stream_id
                )));
            }
        }
        Ok(())
    }
}

/// Tracks, per output stream, the last emitted `real_dts` so callers can
/// enforce spec.md §3's "Within one output_stream_id, coded-frame real_dts
/// is strictly monotonic" invariant and drop (rather than reorder) any
/// frame that would violate it — matching §5's "any coded frame that would
/// violate [PCR monotonicity] is dropped and counted rather than forcibly
/// reordered".
#[derive(Default)]
pub struct DtsMonotonicGuard {
    last_dts: Mutex<HashMap<StreamId, i64>>,
}

impl DtsMonotonicGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` (and records `real_dts`) if this frame may proceed;
    /// `false` if it would violate strict monotonicity for its stream and
    /// must be dropped instead.
    pub fn admit(&self, stream: StreamId, real_dts: i64) -> bool {
        let mut guard = self.last_dts.lock().unwrap();
        match guard.get(&stream) {
            Some(&last) if real_dts <= last => false,
            _ => {
                guard.insert(stream, real_dts);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HwTimestamps;

    fn frame(real_dts: i64, real_pts: i64, cpb_i: i64, cpb_f: i64) -> CodedFrame {
        CodedFrame {
            output_stream_id: StreamId(1),
            kind: CodedFrameKind::Video,
            payload: Payload::owned(vec![0u8; 4]),
            pts: real_dts,
            real_pts,
            real_dts,
            cpb_initial_arrival_time: cpb_i,
            cpb_final_arrival_time: cpb_f,
            random_access: false,
            priority: false,
            hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: 0, hw_video_pts: 0 },
            metadata: Vec::new(),
        }
    }

    #[test]
    fn well_formed_frame_passes() {
        assert!(frame(1000, 1200, 500, 900).check_invariants().is_ok());
    }

    #[test]
    fn dts_greater_than_pts_is_rejected() {
        assert!(frame(1200, 1000, 500, 900).check_invariants().is_err());
    }

    #[test]
    fn cpb_final_after_dts_is_rejected() {
        assert!(frame(1000, 1200, 500, 1100).check_invariants().is_err());
    }

    #[test]
    fn dts_monotonic_guard_rejects_non_increasing_and_is_per_stream() {
        let guard = DtsMonotonicGuard::new();
        let s1 = StreamId(1);
        let s2 = StreamId(2);
        assert!(guard.admit(s1, 100));
        assert!(guard.admit(s1, 200));
        assert!(!guard.admit(s1, 200), "equal dts must be rejected");
        assert!(!guard.admit(s1, 150), "earlier dts must be rejected");
        // A different stream starts its own monotonic sequence.
        assert!(guard.admit(s2, 50));
    }
}
