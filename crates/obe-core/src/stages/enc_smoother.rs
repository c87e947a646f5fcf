// Encode smoothing (spec.md §4.5): paces video coded frames out at the
// VBV-modeled rate rather than forwarding them as fast as the encoder
// produces them, so a bursty encoder (lookahead flush, scene-cut I-frame)
// doesn't dump a pile of frames on the mux at once.
//
// Modeled as a leaky-bucket fill estimate: each frame's size drains the
// bucket at the stream's nominal bitrate and the stage sleeps for however
// long the bucket says it must before forwarding. On input signal loss the
// input stage requests a reset of this estimate (spec.md §4.5: "it resets
// its fill estimate to zero to avoid locking speedcontrol in an underflow
// state"), applied here the next time a frame is popped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::frame::CodedFrame;
use crate::queue::{PushOutcome, Queue};
use crate::stages::mux::MuxInput;

/// VBV parameters the smoother paces against (spec.md §4.5, mirroring
/// `obe_encoder_params_t`'s `bitrate`/`vbv_buffer_size`).
#[derive(Debug, Clone, Copy)]
pub struct SmootherConfig {
    pub bitrate_bps: u64,
    pub vbv_buffer_bits: u64,
}

pub struct EncSmootherStage;

impl EncSmootherStage {
    pub fn spawn(
        name: impl Into<String>,
        cfg: SmootherConfig,
        input: Arc<Queue<CodedFrame>>,
        output: Arc<Queue<MuxInput>>,
        reset_flag: Arc<SmootherResetFlag>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            let mut fill_bits: i64 = 0;
            let mut last_tick = Instant::now();

            while !cancel.load(Ordering::SeqCst) {
                let Some(frame) = input.pop() else { break };

                if reset_flag.take() {
                    debug!("enc smoother '{name}': input signal loss, resetting fill estimate");
                    fill_bits = 0;
                    last_tick = Instant::now();
                }

                let frame_bits = frame.payload.len() as i64 * 8;

                let now = Instant::now();
                let elapsed = now.duration_since(last_tick);
                last_tick = now;
                let drained = (cfg.bitrate_bps as f64 * elapsed.as_secs_f64()) as i64;
                fill_bits = (fill_bits - drained).max(0);

                fill_bits += frame_bits;
                if fill_bits as u64 > cfg.vbv_buffer_bits {
                    let overflow_bits = fill_bits as u64 - cfg.vbv_buffer_bits;
                    let stall = Duration::from_secs_f64(overflow_bits as f64 / cfg.bitrate_bps as f64);
                    thread::sleep(stall);
                    fill_bits = cfg.vbv_buffer_bits as i64;
                    last_tick = Instant::now();
                }

                if matches!(output.push(MuxInput::Coded(frame)), PushOutcome::Cancelled(_)) {
                    break;
                }
            }
            output.cancel();
            debug!("enc smoother '{name}' exiting");
        })
    }
}

/// Resets the smoother's fill estimate — requested by the input stage the
/// moment it observes a signal-loss event (spec.md §4.5).
#[derive(Debug, Default)]
pub struct SmootherResetFlag(std::sync::atomic::AtomicBool);

impl SmootherResetFlag {
    pub fn new() -> Self {
        Self(std::sync::atomic::AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HwTimestamps;
    use crate::descriptors::StreamId;
    use crate::frame::{CodedFrameKind, Payload};

    fn coded_frame(bytes: usize) -> CodedFrame {
        CodedFrame {
            output_stream_id: StreamId(1),
            kind: CodedFrameKind::Video,
            payload: Payload::owned(vec![0u8; bytes]),
            pts: 0,
            real_pts: 0,
            real_dts: 0,
            cpb_initial_arrival_time: 0,
            cpb_final_arrival_time: 0,
            random_access: true,
            priority: true,
            hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: 0, hw_video_pts: 0 },
            metadata: Vec::new(),
        }
    }

    #[test]
    fn forwards_every_frame_in_order() {
        let input: Arc<Queue<CodedFrame>> = Arc::new(Queue::unbounded("in"));
        let output: Arc<Queue<MuxInput>> = Arc::new(Queue::unbounded("out"));
        let cancel = Arc::new(AtomicBool::new(false));

        for _ in 0..5 {
            input.push(coded_frame(100));
        }
        input.cancel();

        let cfg = SmootherConfig { bitrate_bps: 8_000_000, vbv_buffer_bits: 4_000_000 };
        let reset_flag = Arc::new(SmootherResetFlag::new());
        let handle = EncSmootherStage::spawn("test", cfg, input, Arc::clone(&output), reset_flag, cancel);
        handle.join().unwrap();

        let mut count = 0;
        while output.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn reset_flag_round_trips() {
        let flag = SmootherResetFlag::new();
        assert!(!flag.take());
        flag.request();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn los_reset_flag_zeroes_fill_estimate_before_next_frame_is_paced() {
        let input: Arc<Queue<CodedFrame>> = Arc::new(Queue::unbounded("in"));
        let output: Arc<Queue<MuxInput>> = Arc::new(Queue::unbounded("out"));
        let cancel = Arc::new(AtomicBool::new(false));
        let reset_flag = Arc::new(SmootherResetFlag::new());

        // frame 1 overflows the (tiny) VBV buffer and forces the stage into
        // an overflow stall; while it's asleep we request a reset, then
        // enqueue frame 2. If the reset truly zeroes the fill estimate,
        // frame 2 must be forwarded immediately rather than inheriting frame
        // 1's overflow.
        input.push(coded_frame(5_000));

        let cfg = SmootherConfig { bitrate_bps: 100_000, vbv_buffer_bits: 1_000 };
        let started = Instant::now();
        let handle = EncSmootherStage::spawn("test", cfg, Arc::clone(&input), Arc::clone(&output), Arc::clone(&reset_flag), cancel);

        thread::sleep(Duration::from_millis(100));
        reset_flag.request();
        input.push(coded_frame(100));
        input.cancel();

        handle.join().unwrap();

        assert!(
            started.elapsed() < Duration::from_millis(900),
            "the reset must prevent frame 2 from waiting out frame 1's overflow on top of its own stall"
        );
        let mut count = 0;
        while output.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
