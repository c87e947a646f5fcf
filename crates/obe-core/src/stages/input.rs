// Input stage (spec.md §2 step 1, §4.4's sibling for capture, §6 inbound
// interface, §8 Scenario 2).
//
// `CaptureAdapter` is the external collaborator spec.md §6 describes:
// "each adapter implements probe() and open() ... begins pushing raw frames
// into the filter queue." The vendor-SDK half of that (Decklink/Vega/NDI)
// is explicitly out of scope (spec.md §1); `InputStage` is the core-owned
// half — the thread that drives the adapter, applies `inject_frame_enable`
// LOS recovery, and does the queue push with the one documented backpressure
// exception (spec.md §5: input-to-filter drops oldest rather than stalling).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::clock::HwTimestamps;
use crate::control::{ControlBlock, RuntimeVar};
use crate::descriptors::InputStreamDescriptor;
use crate::error::{Counters, PipelineError};
use crate::frame::RawFrame;
use crate::queue::{PushOutcome, Queue};
use crate::stages::enc_smoother::SmootherResetFlag;

/// One event a capture adapter produces. `probe()` happens once up front;
/// `next_event()` is the adapter's steady-state blocking call.
pub enum CaptureEvent {
    Frame(RawFrame),
    SignalLost,
    SignalRecovered,
}

pub trait CaptureAdapter: Send {
    fn probe(&mut self) -> Result<Vec<InputStreamDescriptor>, PipelineError>;

    /// Blocks until the next capture event is ready. Returns `None` only
    /// when the adapter itself has been told to stop (used to unwind the
    /// input thread promptly instead of relying solely on the cancel flag).
    fn next_event(&mut self) -> Option<CaptureEvent>;
}

pub struct InputStage;

impl InputStage {
    /// Spawns the input thread. `frame_duration_ticks` is the nominal video
    /// frame duration in 27 MHz ticks, used to advance the injected frame's
    /// PTS and hw timestamps on each repeat.
    pub fn spawn(
        name: impl Into<String>,
        mut adapter: Box<dyn CaptureAdapter>,
        out: Arc<Queue<RawFrame>>,
        frame_duration_ticks: i64,
        counters: Arc<Counters>,
        control: Arc<ControlBlock>,
        smoother_reset: Arc<SmootherResetFlag>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            info!("input stage '{name}' starting");
            let mut last_good_video: Option<RawFrame> = None;
            let mut injected_since_loss: u32 = 0;
            let mut signal_lost = false;

            while !cancel.load(Ordering::SeqCst) {
                let event = match adapter.next_event() {
                    Some(e) => e,
                    None => break,
                };
                match event {
                    CaptureEvent::Frame(frame) => {
                        signal_lost = false;
                        injected_since_loss = 0;
                        if frame.is_video() {
                            last_good_video = Some(RawFrame {
                                input_stream_id: frame.input_stream_id,
                                hw_timestamps: frame.hw_timestamps,
                                pts: frame.pts,
                                metadata: Vec::new(),
                                kind: crate::frame::RawFrameKind::Video(
                                    frame.as_video().unwrap().duplicate_for_injection(),
                                ),
                            });
                        }
                        push_with_overflow_drop(&out, frame, &counters, &name);
                    }
                    CaptureEvent::SignalLost => {
                        if !signal_lost {
                            warn!("input stage '{name}' lost signal");
                            counters.note_los();
                            smoother_reset.request();
                        }
                        signal_lost = true;

                        let inject_enabled = control.get(RuntimeVar::SdiInputInjectFrameEnable) != 0;
                        let count_max = control.get(RuntimeVar::SdiInputInjectFrameCountMax).max(0) as u32;

                        if inject_enabled && injected_since_loss < count_max {
                            if let Some(last) = &last_good_video {
                                let hw = HwTimestamps {
                                    wall_clock_ns: last.hw_timestamps.wall_clock_ns,
                                    hw_audio_pts: last.hw_timestamps.hw_audio_pts
                                        + frame_duration_ticks * (injected_since_loss as i64 + 1),
                                    hw_video_pts: last.hw_timestamps.hw_video_pts
                                        + frame_duration_ticks * (injected_since_loss as i64 + 1),
                                };
                                let pts = last.pts + frame_duration_ticks * (injected_since_loss as i64 + 1);
                                if let Some(injected) = last.duplicate_for_injection(pts, hw) {
                                    injected_since_loss += 1;
                                    push_with_overflow_drop(&out, injected, &counters, &name);
                                }
                            }
                        }
                        // Audio is intentionally not repeated (spec.md §8
                        // Scenario 2: "audio is muted during the gap").
                    }
                    CaptureEvent::SignalRecovered => {
                        if signal_lost {
                            info!("input stage '{name}' signal recovered after {injected_since_loss} injected frames");
                        }
                        signal_lost = false;
                        injected_since_loss = 0;
                    }
                }
            }
            out.cancel();
            info!("input stage '{name}' exiting");
        })
    }
}

/// spec.md §5: "The one exception is input-stage-to-filter: if the filter
/// queue is full, the input stage drops the oldest frame and increments a
/// drop counter." Implemented by constructing the filter-input queue with
/// `OverflowPolicy::DropOldest`; this just records the drop.
fn push_with_overflow_drop(out: &Queue<RawFrame>, frame: RawFrame, counters: &Counters, name: &str) {
    match out.push(frame) {
        PushOutcome::Pushed => {}
        PushOutcome::DroppedOldest(_dropped) => {
            counters.note_filter_overflow_drop();
            warn!("input stage '{name}' dropped oldest frame: filter queue full");
        }
        PushOutcome::Cancelled(_) | PushOutcome::FatalCeilingExceeded { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::StreamId;
    use crate::frame::{Colorspace, FieldDominance, Payload, RawFrameKind, VideoFrameData, VideoPayload};
    use crate::queue::OverflowPolicy;
    use std::sync::Mutex;

    fn video_frame(pts: i64) -> RawFrame {
        RawFrame {
            input_stream_id: StreamId(1),
            hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: pts, hw_video_pts: pts },
            pts,
            metadata: Vec::new(),
            kind: RawFrameKind::Video(VideoFrameData {
                payload: VideoPayload::Planar { planes: vec![Payload::owned(vec![1, 2, 3])], strides: vec![3] },
                width: 1920,
                height: 1080,
                colorspace: Colorspace::Yuv422P10Le,
                interlaced: true,
                field_dominance: FieldDominance::TopFieldFirst,
                sar: None,
                user_data: Vec::new(),
            }),
        }
    }

    struct ScriptedAdapter {
        events: Mutex<Vec<Option<CaptureEvent>>>,
    }

    impl CaptureAdapter for ScriptedAdapter {
        fn probe(&mut self) -> Result<Vec<InputStreamDescriptor>, PipelineError> {
            Ok(Vec::new())
        }
        fn next_event(&mut self) -> Option<CaptureEvent> {
            self.events.lock().unwrap().pop()
        }
    }

    #[test]
    fn los_injects_up_to_count_max_then_stops() {
        let out: Arc<Queue<RawFrame>> = Arc::new(Queue::bounded("filter-in", 256, OverflowPolicy::DropOldest, None));
        let counters = Arc::new(Counters::new());
        let control = Arc::new(ControlBlock::new());
        control.set(RuntimeVar::SdiInputInjectFrameEnable, 1);
        control.set(RuntimeVar::SdiInputInjectFrameCountMax, 3);
        let cancel = Arc::new(AtomicBool::new(false));

        // Script, popped in reverse: one good frame, then 5 LOS events, then None.
        let mut events = vec![Some(CaptureEvent::Frame(video_frame(1000)))];
        for _ in 0..5 {
            events.push(Some(CaptureEvent::SignalLost));
        }
        events.push(None);
        events.reverse();
        let adapter = Box::new(ScriptedAdapter { events: Mutex::new(events) });
        let smoother_reset = Arc::new(SmootherResetFlag::new());

        let handle = InputStage::spawn(
            "test",
            adapter,
            Arc::clone(&out),
            3000,
            Arc::clone(&counters),
            control,
            Arc::clone(&smoother_reset),
            cancel,
        );
        handle.join().unwrap();
        assert!(smoother_reset.take(), "LOS must request an enc-smoother fill-estimate reset");

        // 1 real frame + 3 injected repeats = 4 total, LOS events 4 and 5 inject nothing.
        let mut count = 0;
        while out.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(counters.los_events.load(Ordering::SeqCst), 1);
    }
}
