// Mock video/audio codec adapters: a pass-through "encoder" that wraps each
// submitted raw frame's bytes in a fixed-size header and reports a constant
// B-frame reorder delay, standing in for x264/x265/libfdk_aac (spec.md §1:
// "the codecs themselves ... are out of scope").

use std::collections::VecDeque;

use obe_core::control::RuntimeVar;
use obe_core::error::PipelineError;
use obe_core::frame::{Payload, RawFrame};
use obe_core::stages::encoder::{AudioEncoder, EncodedBuffer, ReconfigureOutcome, VideoEncoder};

pub struct MockVideoEncoder {
    reorder_delay_ticks: i64,
    bitrate_bps: i64,
    pending: VecDeque<RawFrame>,
}

impl MockVideoEncoder {
    pub fn new(reorder_delay_ticks: i64, bitrate_bps: i64) -> Self {
        Self { reorder_delay_ticks, bitrate_bps, pending: VecDeque::new() }
    }

    fn encode_one(&self, frame: &RawFrame) -> EncodedBuffer {
        let payload_len = frame
            .as_video()
            .map(|v| match &v.payload {
                obe_core::frame::VideoPayload::Planar { planes, .. } => planes.iter().map(|p| p.len()).sum(),
                obe_core::frame::VideoPayload::CompressedPassthrough(p) => p.len(),
            })
            .unwrap_or(0);
        let bytes = vec![0xAAu8; payload_len.max(1)];
        EncodedBuffer {
            payload: Payload::owned(bytes),
            codec_pts: frame.pts + self.reorder_delay_ticks,
            codec_dts: frame.pts,
            random_access: true,
            priority: true,
            cpb_initial_arrival_time: frame.pts - self.reorder_delay_ticks,
            cpb_final_arrival_time: frame.pts,
            source_hw_timestamps: frame.hw_timestamps,
            source_metadata: frame.metadata.clone(),
        }
    }
}

impl VideoEncoder for MockVideoEncoder {
    fn submit(&mut self, frame: RawFrame) -> Result<(), PipelineError> {
        self.pending.push_back(frame);
        Ok(())
    }

    fn poll(&mut self) -> Vec<EncodedBuffer> {
        self.pending.drain(..).map(|f| self.encode_one(&f)).collect()
    }

    fn reconfigure(&mut self, var: RuntimeVar, value: i64) -> ReconfigureOutcome {
        match var {
            RuntimeVar::CodecX264Bitrate | RuntimeVar::CodecX265Bitrate => {
                self.bitrate_bps = value;
                ReconfigureOutcome::Applied
            }
            _ => ReconfigureOutcome::Unsupported,
        }
    }

    fn reopen(&mut self) -> Result<(), PipelineError> {
        self.pending.clear();
        Ok(())
    }

    fn frame_latency_ticks(&self) -> i64 {
        self.reorder_delay_ticks
    }
}

pub struct MockAudioEncoder {
    latency_ticks: i64,
    pending: VecDeque<RawFrame>,
}

impl MockAudioEncoder {
    pub fn new(latency_ticks: i64) -> Self {
        Self { latency_ticks, pending: VecDeque::new() }
    }
}

impl AudioEncoder for MockAudioEncoder {
    fn submit(&mut self, frame: RawFrame) -> Result<(), PipelineError> {
        self.pending.push_back(frame);
        Ok(())
    }

    fn poll(&mut self) -> Vec<EncodedBuffer> {
        self.pending
            .drain(..)
            .map(|frame| EncodedBuffer {
                payload: Payload::owned(vec![0xBBu8; 4]),
                codec_pts: frame.pts,
                codec_dts: frame.pts,
                random_access: true,
                priority: true,
                cpb_initial_arrival_time: frame.pts,
                cpb_final_arrival_time: frame.pts,
                source_hw_timestamps: frame.hw_timestamps,
                source_metadata: frame.metadata.clone(),
            })
            .collect()
    }

    fn frame_latency_ticks(&self) -> i64 {
        self.latency_ticks
    }
}
