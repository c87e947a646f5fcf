// Pipeline construction and shutdown (spec.md §5).
//
// Wires every stage's queues, spawns every stage thread, and on `shutdown`
// sets every cancel flag, broadcasts every queue, then joins leaves-first:
// outputs -> smoothing -> mux -> encoders -> filters -> inputs. Each stage
// is individually testable in isolation (see each `stages::*` module); this
// module only owns the wiring.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::clock::AvSyncClock;
use crate::control::ControlBlock;
use crate::descriptors::{LatencyMode, StreamId};
use crate::error::Counters;
use crate::frame::{CodedFrame, DtsMonotonicGuard, MuxedData, RawFrame};
use crate::queue::Queue;
use crate::stages::audio_filter::{AudioFilterStage, AudioOutputRoute};
use crate::stages::enc_smoother::{EncSmootherStage, SmootherConfig, SmootherResetFlag};
use crate::stages::encoder::{
    AudioEncoder, AudioEncoderStage, AudioEncoderStageConfig, VideoEncoder, VideoEncoderStage,
    VideoEncoderStageConfig, VideoSink,
};
use crate::stages::input::{CaptureAdapter, InputStage};
use crate::stages::mux::{MuxStage, PsiAssembler};
use crate::stages::mux_smoother::{MuxSmootherConfig, MuxSmootherStage};
use crate::stages::output::{OutputConfig, OutputStage, Transport};
use crate::stages::video_filter::{VideoFilterConfig, VideoFilterStage};

/// One PCM audio output: its route (gain/channel layout/debug effects) and
/// the codec that encodes the route's demuxed PCM.
pub struct AudioOutputSpec {
    pub route: AudioOutputRoute,
    pub encoder: Box<dyn AudioEncoder>,
    pub stage_cfg: AudioEncoderStageConfig,
}

/// One AC-3/E-AC-3 bitstream passthrough output: forwarded to the mux
/// untouched, so it carries no codec of its own (spec.md §4.3's bitstream
/// path).
pub struct BitstreamOutputSpec {
    pub input_stream_id: StreamId,
    pub output_stream_id: StreamId,
    pub audio_offset_ms: i32,
}

pub struct PipelineConfig {
    pub frame_duration_ticks: i64,
    pub capture: Box<dyn CaptureAdapter>,
    pub video_filter: VideoFilterConfig,
    pub video_encoder: Box<dyn VideoEncoder>,
    pub video_stage_cfg: VideoEncoderStageConfig,
    pub latency_mode: LatencyMode,
    pub enc_smoother: SmootherConfig,
    pub audio_outputs: Vec<AudioOutputSpec>,
    pub bitstream_outputs: Vec<BitstreamOutputSpec>,
    pub assembler: Box<dyn PsiAssembler>,
    pub pid_lookup: std::collections::HashMap<StreamId, u16>,
    pub mux_smoother: MuxSmootherConfig,
    pub outputs: Vec<(OutputConfig, Box<dyn Transport>)>,
}

/// A running pipeline's threads and the queues/flags needed to stop them.
/// Built by `Pipeline::start`; torn down by `Pipeline::shutdown`.
pub struct Pipeline {
    cancel: Arc<AtomicBool>,
    counters: Arc<Counters>,
    control: Arc<ControlBlock>,

    input_queue: Arc<Queue<RawFrame>>,
    video_filter_queue: Arc<Queue<RawFrame>>,
    audio_queues: Vec<Arc<Queue<RawFrame>>>,
    video_encoder_input_queue: Arc<Queue<RawFrame>>,
    mux_input_queue: Arc<Queue<crate::stages::mux::MuxInput>>,
    mux_output_queue: Arc<Queue<MuxedData>>,
    smoothed_output_queue: Arc<Queue<MuxedData>>,

    output_handles: Vec<JoinHandle<()>>,
    mux_smoother_handle: JoinHandle<()>,
    mux_handle: JoinHandle<()>,
    video_encoder_handle: JoinHandle<()>,
    enc_smoother_handle: Option<JoinHandle<()>>,
    audio_encoder_handles: Vec<JoinHandle<()>>,
    video_filter_handle: JoinHandle<()>,
    audio_filter_handle: JoinHandle<()>,
    input_handle: JoinHandle<()>,
}

impl Pipeline {
    pub fn start(cfg: PipelineConfig) -> Pipeline {
        let cancel = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::new());
        let control = Arc::new(ControlBlock::new());
        let clock = Arc::new(AvSyncClock::new());
        let dts_guard = Arc::new(DtsMonotonicGuard::new());
        let smoother_reset = Arc::new(SmootherResetFlag::new());

        let input_queue: Arc<Queue<RawFrame>> = Arc::new(Queue::bounded(
            "input-to-filter",
            64,
            crate::queue::OverflowPolicy::DropOldest,
            None,
        ));
        let video_filter_queue: Arc<Queue<RawFrame>> = Arc::new(Queue::unbounded("video-filter-out"));
        let video_encoder_input_queue: Arc<Queue<RawFrame>> = Arc::new(Queue::encoder_input("video-enc-in", 64));
        let mux_input_queue: Arc<Queue<crate::stages::mux::MuxInput>> = Arc::new(Queue::unbounded("mux-in"));
        let mux_output_queue: Arc<Queue<MuxedData>> = Arc::new(Queue::unbounded("mux-out"));
        let smoothed_output_queue: Arc<Queue<MuxedData>> = Arc::new(Queue::unbounded("mux-smoothed-out"));

        let input_handle = InputStage::spawn(
            "input",
            cfg.capture,
            Arc::clone(&input_queue),
            cfg.frame_duration_ticks,
            Arc::clone(&counters),
            Arc::clone(&control),
            Arc::clone(&smoother_reset),
            Arc::clone(&cancel),
        );

        // Video frames flow input -> video filter -> video encoder input;
        // audio PCM/bitstream frames flow input -> audio filter -> per-route
        // queues. A single demux thread splits the input queue by kind onto
        // two internal unbounded queues the filter stages actually consume.
        let video_raw_queue: Arc<Queue<RawFrame>> = Arc::new(Queue::unbounded("input-video-split"));
        let audio_raw_queue: Arc<Queue<RawFrame>> = Arc::new(Queue::unbounded("input-audio-split"));
        let demux_cancel = Arc::clone(&cancel);
        let (demux_in, demux_video_out, demux_audio_out) =
            (Arc::clone(&input_queue), Arc::clone(&video_raw_queue), Arc::clone(&audio_raw_queue));
        let demux_handle = std::thread::spawn(move || {
            while !demux_cancel.load(std::sync::atomic::Ordering::SeqCst) {
                let Some(frame) = demux_in.pop() else { break };
                if frame.is_video() {
                    demux_video_out.push(frame);
                } else {
                    demux_audio_out.push(frame);
                }
            }
            demux_video_out.cancel();
            demux_audio_out.cancel();
        });

        let video_filter_handle = VideoFilterStage::spawn(
            "video-filter",
            cfg.video_filter,
            video_raw_queue,
            Arc::clone(&video_filter_queue),
            Arc::clone(&counters),
            Arc::clone(&cancel),
        );

        // Bridges the filter's unbounded output into the encoder's
        // fatal-ceiling-guarded input queue.
        let bridge_cancel = Arc::clone(&cancel);
        let (bridge_in, bridge_out) = (Arc::clone(&video_filter_queue), Arc::clone(&video_encoder_input_queue));
        let video_bridge_handle = std::thread::spawn(move || {
            while !bridge_cancel.load(std::sync::atomic::Ordering::SeqCst) {
                let Some(frame) = bridge_in.pop() else { break };
                bridge_out.push(frame);
            }
            bridge_out.cancel();
        });

        let video_sink = if cfg.latency_mode.uses_enc_smoothing() {
            VideoSink::ToSmoothing(Arc::new(Queue::unbounded("video-coded")))
        } else {
            VideoSink::DirectToMux(Arc::clone(&mux_input_queue))
        };

        let enc_smoother_handle = if let VideoSink::ToSmoothing(coded_queue) = &video_sink {
            Some(EncSmootherStage::spawn(
                "enc-smoother",
                cfg.enc_smoother,
                Arc::clone(coded_queue),
                Arc::clone(&mux_input_queue),
                Arc::clone(&smoother_reset),
                Arc::clone(&cancel),
            ))
        } else {
            None
        };

        let video_encoder_handle = VideoEncoderStage::spawn(
            "video-encoder",
            cfg.video_stage_cfg,
            cfg.video_encoder,
            Arc::clone(&video_encoder_input_queue),
            video_sink,
            Arc::clone(&mux_input_queue),
            Arc::clone(&clock),
            Arc::clone(&control),
            Arc::clone(&counters),
            Arc::clone(&dts_guard),
            Arc::clone(&cancel),
        );

        let mut audio_queues = Vec::new();
        let mut routes = Vec::new();
        let mut audio_encoder_handles = Vec::new();
        for spec in cfg.audio_outputs {
            audio_queues.push(Arc::clone(&spec.route.queue));
            let route_queue = Arc::clone(&spec.route.queue);
            routes.push(spec.route);
            audio_encoder_handles.push(AudioEncoderStage::spawn(
                "audio-encoder",
                spec.stage_cfg,
                spec.encoder,
                route_queue,
                Arc::clone(&mux_input_queue),
                Arc::clone(&clock),
                Arc::clone(&control),
                Arc::clone(&counters),
                Arc::clone(&dts_guard),
                Arc::clone(&cancel),
            ));
        }

        let mut bitstream_routes = Vec::new();
        for spec in cfg.bitstream_outputs {
            let queue: Arc<Queue<RawFrame>> = Arc::new(Queue::unbounded("bitstream-passthrough"));
            audio_queues.push(Arc::clone(&queue));
            bitstream_routes.push((spec.input_stream_id, Arc::clone(&queue), spec.audio_offset_ms));
            let mux_queue = Arc::clone(&mux_input_queue);
            let passthrough_cancel = Arc::clone(&cancel);
            let output_stream_id = spec.output_stream_id;
            audio_encoder_handles.push(std::thread::spawn(move || {
                while !passthrough_cancel.load(std::sync::atomic::Ordering::SeqCst) {
                    let Some(frame) = queue.pop() else { break };
                    let real_pts = frame.pts;
                    let coded = CodedFrame {
                        output_stream_id,
                        kind: crate::frame::CodedFrameKind::Audio,
                        payload: match frame.kind {
                            crate::frame::RawFrameKind::AudioBitstream(b) => b.payload,
                            _ => continue,
                        },
                        pts: real_pts,
                        real_pts,
                        real_dts: real_pts,
                        cpb_initial_arrival_time: real_pts,
                        cpb_final_arrival_time: real_pts,
                        random_access: true,
                        priority: true,
                        hw_timestamps: frame.hw_timestamps,
                        metadata: Vec::new(),
                    };
                    mux_queue.push(crate::stages::mux::MuxInput::Coded(coded));
                }
                mux_queue.cancel();
            }));
        }

        let audio_filter_handle = AudioFilterStage::spawn(
            "audio-filter",
            routes,
            bitstream_routes,
            audio_raw_queue,
            Arc::clone(&counters),
            Arc::clone(&cancel),
        );

        let mux_handle = MuxStage::spawn(
            "mux",
            cfg.assembler,
            cfg.pid_lookup,
            cfg.frame_duration_ticks,
            Arc::clone(&mux_input_queue),
            Arc::clone(&mux_output_queue),
            Arc::clone(&counters),
            Arc::clone(&cancel),
        );

        let mux_smoother_handle = MuxSmootherStage::spawn(
            "mux-smoother",
            cfg.mux_smoother,
            Arc::clone(&mux_output_queue),
            Arc::clone(&smoothed_output_queue),
            Arc::clone(&control),
            Arc::clone(&counters),
            Arc::clone(&cancel),
        );

        let meter = Arc::new(crate::stages::output::BpsMeter::new());
        let mut output_handles = Vec::new();
        for (out_cfg, transport) in cfg.outputs {
            output_handles.push(OutputStage::spawn(
                "output",
                out_cfg,
                transport,
                Arc::clone(&smoothed_output_queue),
                Arc::clone(&control),
                Arc::clone(&counters),
                Arc::clone(&meter),
                Arc::clone(&cancel),
            ));
        }

        // The demux and bridge helper threads aren't named stages in
        // spec.md's model; fold them into the filter-stage join group so
        // shutdown ordering still matches §5.
        let video_filter_handle = std::thread::spawn(move || {
            demux_handle.join().ok();
            video_filter_handle.join().ok();
            video_bridge_handle.join().ok();
        });

        Pipeline {
            cancel,
            counters,
            control,
            input_queue,
            video_filter_queue,
            audio_queues,
            video_encoder_input_queue,
            mux_input_queue,
            mux_output_queue,
            smoothed_output_queue,
            output_handles,
            mux_smoother_handle,
            mux_handle,
            video_encoder_handle,
            enc_smoother_handle,
            audio_encoder_handles,
            video_filter_handle,
            audio_filter_handle,
            input_handle,
        }
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn control(&self) -> &Arc<ControlBlock> {
        &self.control
    }

    /// Cancels every stage and joins leaves-first (spec.md §5): outputs,
    /// then smoothing, then mux, then encoders, then filters, then inputs.
    pub fn shutdown(self) {
        self.cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        self.input_queue.cancel();
        self.video_filter_queue.cancel();
        for q in &self.audio_queues {
            q.cancel();
        }
        self.video_encoder_input_queue.cancel();
        self.mux_input_queue.cancel();
        self.mux_output_queue.cancel();
        self.smoothed_output_queue.cancel();

        for h in self.output_handles {
            h.join().ok();
        }
        self.mux_smoother_handle.join().ok();
        self.mux_handle.join().ok();
        self.video_encoder_handle.join().ok();
        if let Some(h) = self.enc_smoother_handle {
            h.join().ok();
        }
        for h in self.audio_encoder_handles {
            h.join().ok();
        }
        self.video_filter_handle.join().ok();
        self.audio_filter_handle.join().ok();
        self.input_handle.join().ok();
    }
}
