// Encoder dispatch (spec.md §4.4): video/audio codec adapters, clock
// re-base, SEI timestamping, SCTE-104->35 conversion, live-reconfigure or
// reopen-with-IDR, and the 1800-item fatal queue guard.
//
// `VideoEncoder`/`AudioEncoder` are the external collaborators spec.md §6
// names (x264/x265/libfdk_aac are explicitly out of scope per §1). Each
// submitted raw frame's hw timestamps and metadata ride along inside the
// codec adapter's own reorder buffer and come back out attached to the
// `EncodedBuffer`s `poll()` yields — mirroring how `x264_picture_t`'s opaque
// pointer carries the source frame's side data through the real encoder's
// B-frame reorder window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use uuid::Uuid;

use crate::clock::{rebase_video_timestamps, schedule_audio_pts, AvSyncClock, HwTimestamps};
use crate::control::{ControlBlock, RuntimeVar};
use crate::descriptors::StreamId;
use crate::error::{Counters, PipelineError};
use crate::frame::{CodedFrame, CodedFrameKind, DtsMonotonicGuard, Payload, RawFrame};
use crate::metadata::{scte104_to_scte35, MetadataItem};
use crate::queue::{PushOutcome, Queue};
use crate::stages::mux::MuxInput;

pub struct EncodedBuffer {
    pub payload: Payload,
    pub codec_pts: i64,
    pub codec_dts: i64,
    pub random_access: bool,
    pub priority: bool,
    pub cpb_initial_arrival_time: i64,
    pub cpb_final_arrival_time: i64,
    /// The hw timestamps and metadata of the raw frame this buffer was
    /// encoded from, carried through the codec adapter's reorder window.
    pub source_hw_timestamps: HwTimestamps,
    pub source_metadata: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureOutcome {
    Applied,
    Unsupported,
}

pub trait VideoEncoder: Send {
    fn submit(&mut self, frame: RawFrame) -> Result<(), PipelineError>;
    fn poll(&mut self) -> Vec<EncodedBuffer>;
    fn reconfigure(&mut self, var: RuntimeVar, value: i64) -> ReconfigureOutcome;
    /// Closes and reopens the codec; the caller is guaranteed the first
    /// buffer `poll()` yields afterward is an IDR.
    fn reopen(&mut self) -> Result<(), PipelineError>;
    /// Lookahead + B-frame reorder depth, in 27 MHz ticks, used both to
    /// drive SCTE-104 PTS adjustment and the mux's `drop_early` threshold.
    fn frame_latency_ticks(&self) -> i64;
}

pub trait AudioEncoder: Send {
    fn submit(&mut self, frame: RawFrame) -> Result<(), PipelineError>;
    fn poll(&mut self) -> Vec<EncodedBuffer>;
    fn frame_latency_ticks(&self) -> i64;
}

/// Where a video encoder's coded frames go after encoding: through
/// enc-smoothing (generic latency mode) or straight to the mux (low /
/// lowest latency, spec.md §4.4's final bullet).
pub enum VideoSink {
    ToSmoothing(Arc<Queue<CodedFrame>>),
    DirectToMux(Arc<Queue<MuxInput>>),
}

pub struct VideoEncoderStageConfig {
    pub output_stream_id: StreamId,
    pub scte35_output_stream_id: Option<StreamId>,
    pub smpte2038_output_stream_id: Option<StreamId>,
    /// Pipeline-wide marker the SEI-timestamping search looks for in the
    /// outgoing NAL buffer (spec.md §4.4: "locate the pipeline's UUID
    /// marker ... and overwrite the 'exited encoder' fields").
    pub sei_marker: Uuid,
}

pub struct VideoEncoderStage;

impl VideoEncoderStage {
    pub fn spawn(
        name: impl Into<String>,
        cfg: VideoEncoderStageConfig,
        mut encoder: Box<dyn VideoEncoder>,
        input: Arc<Queue<RawFrame>>,
        sink: VideoSink,
        mux_for_metadata: Arc<Queue<MuxInput>>,
        clock: Arc<AvSyncClock>,
        control: Arc<ControlBlock>,
        counters: Arc<Counters>,
        dts_guard: Arc<DtsMonotonicGuard>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            info!("video encoder '{name}' starting");
            const RECONFIGURABLE: &[RuntimeVar] = &[
                RuntimeVar::CodecX264Bitrate,
                RuntimeVar::CodecX265Bitrate,
                RuntimeVar::CodecX264Lookahead,
                RuntimeVar::CodecX264KeyintMin,
                RuntimeVar::CodecX264KeyintMax,
                RuntimeVar::CodecX265Qpmin,
            ];

            'outer: while !cancel.load(Ordering::SeqCst) {
                for var in RECONFIGURABLE {
                    if let Some(value) = control.take_changed(*var) {
                        match encoder.reconfigure(*var, value) {
                            ReconfigureOutcome::Applied => {
                                info!("video encoder '{name}' applied {} = {value}", var.name());
                            }
                            ReconfigureOutcome::Unsupported => {
                                warn!("video encoder '{name}' reopening for unsupported live change of {}", var.name());
                                if let Err(e) = encoder.reopen() {
                                    error!("video encoder '{name}' failed to reopen: {e}");
                                    break 'outer;
                                }
                            }
                        }
                    }
                }

                let Some(frame) = input.pop() else { break };
                let sei_timestamping = control.get(RuntimeVar::VideoEncoderSeiTimestamping) != 0;

                if let Err(e) = encoder.submit(frame) {
                    counters.note_codec_failure();
                    warn!("video encoder '{name}' frame submit failed: {e}");
                    continue;
                }

                for mut buf in encoder.poll() {
                    let (real_dts, real_pts) = rebase_video_timestamps(
                        &clock,
                        buf.source_hw_timestamps.hw_audio_pts,
                        0,
                        buf.codec_pts,
                        buf.codec_dts,
                    );

                    if !dts_guard.admit(cfg.output_stream_id, real_dts) {
                        counters.note_late_drop();
                        warn!("video encoder '{name}' dropped a non-monotonic coded frame");
                        continue;
                    }

                    if sei_timestamping {
                        stamp_sei_timestamp(&mut buf.payload, cfg.sei_marker);
                    }

                    emit_metadata(&buf.source_metadata, &cfg, encoder.as_ref(), &mux_for_metadata);

                    let coded = CodedFrame {
                        output_stream_id: cfg.output_stream_id,
                        kind: CodedFrameKind::Video,
                        payload: buf.payload,
                        pts: real_pts,
                        real_pts,
                        real_dts,
                        cpb_initial_arrival_time: buf.cpb_initial_arrival_time,
                        cpb_final_arrival_time: buf.cpb_final_arrival_time,
                        random_access: buf.random_access,
                        priority: buf.priority,
                        hw_timestamps: buf.source_hw_timestamps,
                        metadata: Vec::new(),
                    };

                    match &sink {
                        VideoSink::ToSmoothing(q) => {
                            push_fatal(q, coded, &counters, &name);
                        }
                        VideoSink::DirectToMux(q) => {
                            if matches!(q.push(MuxInput::Coded(coded)), PushOutcome::Cancelled(_)) {
                                break 'outer;
                            }
                        }
                    }
                }
            }
            match &sink {
                VideoSink::ToSmoothing(q) => q.cancel(),
                VideoSink::DirectToMux(q) => q.cancel(),
            }
            info!("video encoder '{name}' exiting");
        })
    }
}

fn emit_metadata(
    items: &[MetadataItem],
    cfg: &VideoEncoderStageConfig,
    encoder: &dyn VideoEncoder,
    mux: &Arc<Queue<MuxInput>>,
) {
    for item in items {
        match item {
            MetadataItem::Scte104(msg) => {
                if let Some(output_stream_id) = cfg.scte35_output_stream_id {
                    let section = scte104_to_scte35(msg, encoder.frame_latency_ticks());
                    mux.push(MuxInput::Scte35 { output_stream_id, section });
                }
            }
            MetadataItem::Smpte2038(packet) => {
                if let Some(output_stream_id) = cfg.smpte2038_output_stream_id {
                    mux.push(MuxInput::Smpte2038 { output_stream_id, packet: packet.clone() });
                }
            }
        }
    }
}

/// spec.md §4.4: "locate the pipeline's UUID marker in the outgoing NAL
/// buffer and overwrite the 'exited encoder' fields with the current wall
/// clock." The 8 bytes immediately following the marker carry the
/// nanosecond timestamp.
fn stamp_sei_timestamp(payload: &mut Payload, marker: Uuid) {
    if let Payload::Owned(bytes) = payload {
        let needle = marker.as_bytes();
        if let Some(pos) = bytes.windows(needle.len()).position(|w| w == needle) {
            let field_start = pos + needle.len();
            if field_start + 8 <= bytes.len() {
                let now_ns = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
                bytes[field_start..field_start + 8].copy_from_slice(&now_ns.to_le_bytes());
            }
        }
    }
}

pub struct AudioEncoderStageConfig {
    pub output_stream_id: StreamId,
    pub audio_offset_var: RuntimeVar,
}

pub struct AudioEncoderStage;

impl AudioEncoderStage {
    pub fn spawn(
        name: impl Into<String>,
        cfg: AudioEncoderStageConfig,
        mut encoder: Box<dyn AudioEncoder>,
        input: Arc<Queue<RawFrame>>,
        mux_queue: Arc<Queue<MuxInput>>,
        clock: Arc<AvSyncClock>,
        control: Arc<ControlBlock>,
        counters: Arc<Counters>,
        dts_guard: Arc<DtsMonotonicGuard>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            info!("audio encoder '{name}' starting");
            while !cancel.load(Ordering::SeqCst) {
                let Some(frame) = input.pop() else { break };
                let offset_ms = control.get(cfg.audio_offset_var) as i32;

                if let Err(e) = encoder.submit(frame) {
                    counters.note_codec_failure();
                    warn!("audio encoder '{name}' frame submit failed: {e}");
                    continue;
                }

                for buf in encoder.poll() {
                    let real_pts = schedule_audio_pts(
                        &clock,
                        buf.source_hw_timestamps.hw_audio_pts,
                        encoder.frame_latency_ticks(),
                        offset_ms,
                    );
                    // Audio carries no B-frame reorder, so dts == pts.
                    if !dts_guard.admit(cfg.output_stream_id, real_pts) {
                        counters.note_late_drop();
                        continue;
                    }
                    let coded = CodedFrame {
                        output_stream_id: cfg.output_stream_id,
                        kind: CodedFrameKind::Audio,
                        payload: buf.payload,
                        pts: real_pts,
                        real_pts,
                        real_dts: real_pts,
                        cpb_initial_arrival_time: real_pts,
                        cpb_final_arrival_time: real_pts,
                        random_access: true,
                        priority: true,
                        hw_timestamps: buf.source_hw_timestamps,
                        metadata: Vec::new(),
                    };
                    if matches!(mux_queue.push(MuxInput::Coded(coded)), PushOutcome::Cancelled(_)) {
                        break;
                    }
                }
            }
            mux_queue.cancel();
            info!("audio encoder '{name}' exiting");
        })
    }
}

/// spec.md §4.4's fatal guard: encoder-input-queue overflow beyond 1800
/// items terminates the process. The guard lives on the *output* side of
/// the video encoder here — enc-smoothing's queue is the one whose cap
/// models the codec's own backlog when smoothing is present.
fn push_fatal(queue: &Queue<CodedFrame>, frame: CodedFrame, counters: &Counters, name: &str) {
    match queue.push(frame) {
        PushOutcome::FatalCeilingExceeded { size, ceiling } => {
            error!(
                "video encoder '{name}': enc-smoothing queue exceeded hard ceiling ({size} >= {ceiling}); upstream stalled, terminating"
            );
            counters.note_codec_failure();
            std::process::exit(1);
        }
        PushOutcome::DroppedOldest(_) => {
            counters.note_filter_overflow_drop();
        }
        PushOutcome::Pushed | PushOutcome::Cancelled(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AudioPcmData, RawFrameKind};
    use std::sync::Mutex;

    struct FixedLatencyAudioEncoder {
        latency_ticks: i64,
        pending: Mutex<Vec<EncodedBuffer>>,
    }

    impl AudioEncoder for FixedLatencyAudioEncoder {
        fn submit(&mut self, frame: RawFrame) -> Result<(), PipelineError> {
            self.pending.lock().unwrap().push(EncodedBuffer {
                payload: Payload::owned(vec![1, 2, 3]),
                codec_pts: frame.pts,
                codec_dts: frame.pts,
                random_access: true,
                priority: true,
                cpb_initial_arrival_time: 0,
                cpb_final_arrival_time: 0,
                source_hw_timestamps: frame.hw_timestamps,
                source_metadata: Vec::new(),
            });
            Ok(())
        }
        fn poll(&mut self) -> Vec<EncodedBuffer> {
            std::mem::take(&mut *self.pending.lock().unwrap())
        }
        fn frame_latency_ticks(&self) -> i64 {
            self.latency_ticks
        }
    }

    #[test]
    fn audio_encoder_stage_schedules_pts_from_master_clock() {
        let input: Arc<Queue<RawFrame>> = Arc::new(Queue::unbounded("audio-in"));
        let mux_queue: Arc<Queue<MuxInput>> = Arc::new(Queue::unbounded("mux-in"));
        let clock = Arc::new(AvSyncClock::new());
        let control = Arc::new(ControlBlock::new());
        let counters = Arc::new(Counters::new());
        let dts_guard = Arc::new(DtsMonotonicGuard::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let frame = RawFrame {
            input_stream_id: StreamId(2),
            hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: 1_000_000, hw_video_pts: 1_000_000 },
            pts: 1_000_000,
            metadata: Vec::new(),
            kind: RawFrameKind::AudioPcm(AudioPcmData {
                channels: vec![vec![0; 4]],
                channel_layout: crate::descriptors::ChannelLayout::MONO,
                sample_rate: 48_000,
                frame_sample_count: 4,
            }),
        };
        input.push(frame);
        input.cancel();

        let encoder = Box::new(FixedLatencyAudioEncoder { latency_ticks: 500, pending: Mutex::new(Vec::new()) });
        let cfg = AudioEncoderStageConfig { output_stream_id: StreamId(34), audio_offset_var: RuntimeVar::AudioEncoderMp2OffsetMs };

        let handle = AudioEncoderStage::spawn(
            "test", cfg, encoder, input, Arc::clone(&mux_queue), clock, control, counters, dts_guard, cancel,
        );
        handle.join().unwrap();

        match mux_queue.pop() {
            Some(MuxInput::Coded(frame)) => {
                // relative_pts(1_000_000) establishes origin -> 0, plus 500 latency, plus 0 offset.
                assert_eq!(frame.real_pts, 500);
            }
            other => panic!("expected one coded audio frame, got {other:?}"),
        }
    }
}
