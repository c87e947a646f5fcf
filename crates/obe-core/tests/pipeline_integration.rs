// End-to-end pipeline wiring tests (spec.md §5): construct a full
// `Pipeline` from the mock adapters in `obe-testkit` and verify frames
// survive capture -> filter -> encode -> mux -> smoothing -> output without
// any vendor SDK, and that clean shutdown joins every stage.

use std::collections::HashMap;

use obe_core::clock::HwTimestamps;
use obe_core::descriptors::{ChannelLayout, LatencyMode, OutputStreamDescriptor, StreamId};
use obe_core::frame::{
    AudioBitstreamData, AudioPcmData, Colorspace, FieldDominance, Payload, RawFrame, RawFrameKind,
    VideoFrameData, VideoPayload,
};
use obe_core::pipeline::{AudioOutputSpec, BitstreamOutputSpec, Pipeline, PipelineConfig};
use obe_core::stages::audio_filter::{AudioOutputRoute, DebugAudioEffect};
use obe_core::stages::encoder::{AudioEncoderStageConfig, VideoEncoderStageConfig};
use obe_core::stages::enc_smoother::SmootherConfig;
use obe_core::stages::input::CaptureEvent;
use obe_core::stages::mux_smoother::MuxSmootherConfig;
use obe_core::stages::output::OutputConfig;
use obe_core::stages::video_filter::VideoFilterConfig;
use obe_core::queue::Queue;
use obe_core::control::RuntimeVar;
use obe_testkit::{MockAudioEncoder, MockVideoEncoder, PassthroughAssembler, RecordingTransport, ScriptedCaptureAdapter};

const VIDEO_OUT: StreamId = StreamId(1);
const AUDIO_OUT: StreamId = StreamId(2);
const VIDEO_PID: u16 = 33;
const AUDIO_PID: u16 = 34;

fn video_filter_cfg() -> VideoFilterConfig {
    VideoFilterConfig {
        recognized_colorspaces: vec![Colorspace::Yuv420P],
        output_width: 1920,
        output_height: 1080,
        output_colorspace: Colorspace::Yuv420P,
        pal_blanking: false,
        vbi_line_count: 0,
        pad: None,
        default_sar_4_3: true,
    }
}

fn video_frame(pts: i64, input_stream_id: StreamId) -> RawFrame {
    RawFrame {
        input_stream_id,
        hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: pts, hw_video_pts: pts },
        pts,
        metadata: Vec::new(),
        kind: RawFrameKind::Video(VideoFrameData {
            payload: VideoPayload::Planar {
                planes: vec![Payload::owned(vec![16u8; 1920 * 1080])],
                strides: vec![1920],
            },
            width: 1920,
            height: 1080,
            colorspace: Colorspace::Yuv420P,
            interlaced: false,
            field_dominance: FieldDominance::Progressive,
            sar: None,
            user_data: Vec::new(),
        }),
    }
}

fn audio_pcm_frame(pts: i64, input_stream_id: StreamId) -> RawFrame {
    RawFrame {
        input_stream_id,
        hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: pts, hw_video_pts: pts },
        pts,
        metadata: Vec::new(),
        kind: RawFrameKind::AudioPcm(AudioPcmData {
            channels: vec![vec![0i32; 4]; 16],
            channel_layout: ChannelLayout { channel_count: 16 },
            sample_rate: 48_000,
            frame_sample_count: 4,
        }),
    }
}

fn audio_route() -> AudioOutputRoute {
    AudioOutputRoute {
        descriptor: OutputStreamDescriptor {
            id: AUDIO_OUT,
            pid: AUDIO_PID,
            language_code: None,
            audio_offset_ms: 0,
            source_sdi_audio_pair: 1,
            source_mono_channel: 0,
            scte35_pids: Vec::new(),
            smpte2038_pid: None,
            smpte2031_pid: None,
            gain_db: None,
        },
        output_channel_layout: ChannelLayout::STEREO,
        gain_linear: 1.0,
        debug_effects: DebugAudioEffect::empty(),
        queue: std::sync::Arc::new(Queue::unbounded("audio-route")),
    }
}

fn base_config(
    events: Vec<CaptureEvent>,
    bitstream_outputs: Vec<BitstreamOutputSpec>,
    extra_pids: HashMap<StreamId, u16>,
) -> (PipelineConfig, RecordingTransport) {
    let mut pid_lookup = HashMap::new();
    pid_lookup.insert(VIDEO_OUT, VIDEO_PID);
    pid_lookup.insert(AUDIO_OUT, AUDIO_PID);
    pid_lookup.extend(extra_pids);

    let transport = RecordingTransport::new();
    let cfg = PipelineConfig {
        frame_duration_ticks: 27_000_000 / 25,
        capture: Box::new(ScriptedCaptureAdapter::new(Vec::new(), events)),
        video_filter: video_filter_cfg(),
        video_encoder: Box::new(MockVideoEncoder::new(1200, 5_000_000)),
        video_stage_cfg: VideoEncoderStageConfig {
            output_stream_id: VIDEO_OUT,
            scte35_output_stream_id: None,
            smpte2038_output_stream_id: None,
            sei_marker: uuid::Uuid::new_v4(),
        },
        latency_mode: LatencyMode::Low,
        enc_smoother: SmootherConfig { bitrate_bps: 5_000_000, vbv_buffer_bits: 2_000_000 },
        audio_outputs: vec![AudioOutputSpec {
            route: audio_route(),
            encoder: Box::new(MockAudioEncoder::new(300)),
            stage_cfg: AudioEncoderStageConfig {
                output_stream_id: AUDIO_OUT,
                audio_offset_var: RuntimeVar::AudioEncoderMp2OffsetMs,
            },
        }],
        bitstream_outputs,
        assembler: Box::new(PassthroughAssembler::new()),
        pid_lookup,
        mux_smoother: MuxSmootherConfig { nominal_item_interval_ms: 20 },
        outputs: vec![(
            OutputConfig { video_pid: VIDEO_PID, audio_pids: vec![AUDIO_PID], pmt_pid: 0, sei_marker: None },
            Box::new(transport.clone()),
        )],
    };
    (cfg, transport)
}

#[test]
fn pipeline_carries_video_and_audio_frames_to_the_transport() {
    let events = vec![
        CaptureEvent::Frame(video_frame(1_000_000, StreamId(10))),
        CaptureEvent::Frame(audio_pcm_frame(1_000_000, StreamId(11))),
        CaptureEvent::Frame(video_frame(1_100_000, StreamId(10))),
    ];
    let (cfg, transport) = base_config(events, Vec::new(), HashMap::new());

    let pipeline = Pipeline::start(cfg);
    pipeline.shutdown();

    let sent = transport.sent_buffers();
    assert!(!sent.is_empty(), "expected at least one muxed buffer to reach the transport");
    for buf in &sent {
        assert_eq!(buf.len() % 188, 0, "every transmitted buffer must be TS-packet aligned");
    }
}

#[test]
fn bitstream_passthrough_output_reaches_transport_without_a_codec() {
    const BITSTREAM_IN: StreamId = StreamId(20);
    const BITSTREAM_OUT: StreamId = StreamId(21);
    const BITSTREAM_PID: u16 = 40;

    let mut extra = HashMap::new();
    extra.insert(BITSTREAM_OUT, BITSTREAM_PID);

    let bitstream_frame = RawFrame {
        input_stream_id: BITSTREAM_IN,
        hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: 2_000_000, hw_video_pts: 2_000_000 },
        pts: 2_000_000,
        metadata: Vec::new(),
        kind: RawFrameKind::AudioBitstream(AudioBitstreamData { payload: Payload::owned(vec![0xAC, 0x3A, 0x55]) }),
    };

    let events = vec![CaptureEvent::Frame(bitstream_frame)];
    let bitstream_outputs = vec![BitstreamOutputSpec {
        input_stream_id: BITSTREAM_IN,
        output_stream_id: BITSTREAM_OUT,
        audio_offset_ms: 0,
    }];
    let (cfg, transport) = base_config(events, bitstream_outputs, extra);

    let pipeline = Pipeline::start(cfg);
    pipeline.shutdown();

    let sent = transport.sent_buffers();
    assert!(!sent.is_empty(), "the bitstream frame must reach the transport without a video/audio codec in its path");
}
