// The AV-sync clock model (spec.md §5) — the hardest single piece of the
// pipeline.
//
// Three clocks exist: the capture hardware's audio PTS counter
// (`C_hw_audio`), its video PTS counter (`C_hw_video`), and each codec's
// internal PTS counter (`C_codec`). `C_hw_audio` is elected master. Every
// raw frame carries both hardware counters at capture time; audio encoders
// schedule output PTS directly from `C_hw_audio`, while video encoders
// re-base the codec's own `real_pts`/`real_dts` onto the audio master so
// that video tracks audio through signal drop-outs where the two hardware
// clocks jump independently.
//
// The reference unit throughout is `OBE_CLOCK_HZ` — 27 MHz — matching
// original_source/common/common.h's `#define OBE_CLOCK 27000000LL`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::descriptors::HwStatusFlags;

pub const OBE_CLOCK_HZ: i64 = 27_000_000;

/// The MPEG wire clock (PCR/PTS/DTS) runs at 90 kHz; 27 MHz is exactly 300x.
const MPEG_PTS_DIVISOR: i64 = OBE_CLOCK_HZ / 90_000;

pub fn ticks_27mhz_to_90khz(ticks_27mhz: i64) -> i64 {
    ticks_27mhz.div_euclid(MPEG_PTS_DIVISOR)
}

pub fn ticks_90khz_to_27mhz(ticks_90khz: i64) -> i64 {
    ticks_90khz * MPEG_PTS_DIVISOR
}

pub fn ms_to_27mhz_ticks(ms: i32) -> i64 {
    (ms as i64 * OBE_CLOCK_HZ) / 1000
}

/// The dual hw-clock reading every raw frame carries, captured at the
/// instant of capture (spec.md §3: "hw_timestamps — capture wall-clock, and
/// a dual audio/video PTS pair both in a 27 MHz reference clock").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwTimestamps {
    pub wall_clock_ns: u64,
    pub hw_audio_pts: i64,
    pub hw_video_pts: i64,
}

impl HwTimestamps {
    /// `Δ = C_hw_audio − C_hw_video`.
    pub fn drift(&self) -> i64 {
        self.hw_audio_pts - self.hw_video_pts
    }
}

/// The shared master clock state for one pipeline run. `C_hw_audio` is the
/// master; the clock's only job is remembering the capture-time origin so
/// every later PTS is expressed relative to it and is never negative
/// (spec.md §8 boundary behavior: "later frames never produce a negative
/// output PTS").
#[derive(Debug)]
pub struct AvSyncClock {
    origin_hw_audio_pts: AtomicI64,
    initialized: AtomicBool,
}

impl Default for AvSyncClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AvSyncClock {
    pub fn new() -> Self {
        Self {
            origin_hw_audio_pts: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    /// Establish (on the first call only) `hw_audio_pts` as the clock
    /// origin, and return that origin.
    fn observe_origin(&self, hw_audio_pts: i64) -> i64 {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.origin_hw_audio_pts.store(hw_audio_pts, Ordering::SeqCst);
        }
        self.origin_hw_audio_pts.load(Ordering::SeqCst)
    }

    /// `hw_audio_pts`, expressed relative to the pipeline's capture-time
    /// origin. Always >= 0 for any frame at or after the one that
    /// established the origin.
    pub fn relative_pts(&self, hw_audio_pts: i64) -> i64 {
        hw_audio_pts - self.observe_origin(hw_audio_pts)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

/// Schedule an audio coded frame's output PTS: `C_hw_audio` (relative to
/// origin) plus the codec's lookahead offset plus the operator-configured
/// `audio_offset_ms` (spec.md §5, §6's `audio_encoder.*_offset_ms`).
pub fn schedule_audio_pts(
    clock: &AvSyncClock,
    hw_audio_pts: i64,
    codec_lookahead_ticks: i64,
    audio_offset_ms: i32,
) -> i64 {
    clock.relative_pts(hw_audio_pts) + codec_lookahead_ticks + ms_to_27mhz_ticks(audio_offset_ms)
}

/// Re-base a video encoder's codec-internal `real_pts`/`real_dts` onto the
/// audio master clock (spec.md §5):
///
///   real_dts = C_hw_audio(source frame) + scheduling_offset
///              − (codec_pts − codec_dts)
///   real_pts = real_dts + (codec_pts − codec_dts)
///
/// so that `real_dts <= real_pts` always holds as long as the codec itself
/// never reports `codec_dts > codec_pts` (true for every H.264/HEVC
/// reorder model: DTS never follows PTS).
pub fn rebase_video_timestamps(
    clock: &AvSyncClock,
    source_hw_audio_pts: i64,
    scheduling_offset: i64,
    codec_pts: i64,
    codec_dts: i64,
) -> (i64, i64) {
    let rel = clock.relative_pts(source_hw_audio_pts);
    let pts_dts_delta = codec_pts - codec_dts;
    let real_dts = rel + scheduling_offset - pts_dts_delta;
    let real_pts = real_dts + pts_dts_delta;
    (real_dts, real_pts)
}

/// The 1080i half-duplex correction (spec.md §5, §9): a legacy fixup tied
/// to a specific capture-card firmware generation, gated behind
/// `HwStatusFlags::half_duplex` rather than generalized to every
/// interlaced format. Decomposes the hw audio/video drift into whole-frame
/// and fractional components and subtracts the fractional part from the
/// audio PTS on the first frame after a reset, anchoring audio to the
/// nearest video-frame boundary.
#[derive(Debug, Default)]
pub struct HalfDuplexCorrection {
    pending: AtomicBool,
}

impl HalfDuplexCorrection {
    pub fn new() -> Self {
        Self { pending: AtomicBool::new(true) }
    }

    /// Re-arm the correction so it fires again on the next frame — called
    /// whenever the input stage observes a clock reset (e.g. after LOS
    /// recovery, spec.md §4.5's "resets its fill estimate" sibling for the
    /// clock side).
    pub fn reset(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    fn decompose(drift: i64, frame_duration_ticks: i64) -> (i64, i64) {
        let whole = drift.div_euclid(frame_duration_ticks);
        let fractional = drift - whole * frame_duration_ticks;
        (whole, fractional)
    }

    /// Apply the correction to `scheduled_audio_pts` if `hw_status.half_duplex`
    /// is set and this is the first frame since construction or the last
    /// `reset()`. A no-op otherwise.
    pub fn apply(
        &self,
        scheduled_audio_pts: i64,
        drift: i64,
        frame_duration_ticks: i64,
        hw_status: HwStatusFlags,
    ) -> i64 {
        if !hw_status.half_duplex {
            return scheduled_audio_pts;
        }
        if self
            .pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let (_, fractional) = Self::decompose(drift, frame_duration_ticks);
            return scheduled_audio_pts - fractional;
        }
        scheduled_audio_pts
    }
}
