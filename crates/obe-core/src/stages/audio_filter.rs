// Audio filter (spec.md §4.3): per-output channel demux, dB gain, debug
// effects, and bitstream forwarding.
//
// `DebugAudioEffect` is supplemented from `original_source/filters/audio/
// audio.c`'s per-channel `channel_effects[MAX_CHANNELS]` bitmask — carried
// here as a `bitflags` type (borrowed from the wider example pack, since
// neither the teacher nor any of the other four example repos reach for a
// bitmask crate) rather than a raw integer, so unit tests can assert on a
// specific effect without bit-twiddling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use log::{debug, warn};

use crate::clock::ms_to_27mhz_ticks;
use crate::descriptors::{ChannelLayout, OutputStreamDescriptor, StreamId};
use crate::error::Counters;
use crate::frame::{AudioBitstreamData, AudioPcmData, RawFrame, RawFrameKind};
use crate::queue::{PushOutcome, Queue};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugAudioEffect: u8 {
        const MUTE       = 0b0000_0001;
        const STATIC     = 0b0000_0010;
        const BUZZ       = 0b0000_0100;
        const ATTENUATE  = 0b0000_1000;
        const CLIP       = 0b0001_0000;
    }
}

#[derive(Debug, Clone)]
pub struct AudioOutputRoute {
    pub descriptor: OutputStreamDescriptor,
    pub output_channel_layout: ChannelLayout,
    /// Parsed from the operator's dB gain string; `1.0` is unity.
    pub gain_linear: f32,
    pub debug_effects: DebugAudioEffect,
    pub queue: Arc<Queue<RawFrame>>,
}

/// Parses an operator-facing dB string (`"-6dB"`, `"+3.5"`) to a linear
/// scaler (spec.md §4.3 step 3).
pub fn parse_gain_db(s: &str) -> Option<f32> {
    let trimmed = s.trim().trim_end_matches("dB").trim_end_matches("db");
    trimmed.parse::<f32>().ok().map(|db| 10f32.powf(db / 20.0))
}

pub struct AudioFilterStage;

impl AudioFilterStage {
    pub fn spawn(
        name: impl Into<String>,
        routes: Vec<AudioOutputRoute>,
        bitstream_routes: Vec<(StreamId, Arc<Queue<RawFrame>>, i32)>,
        input: Arc<Queue<RawFrame>>,
        counters: Arc<Counters>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                let Some(frame) = input.pop() else { break };
                match &frame.kind {
                    RawFrameKind::AudioPcm(_) => {
                        for route in &routes {
                            if let Some(out_frame) = demux_and_process(&frame, route) {
                                push(&route.queue, out_frame, &counters, &name);
                            }
                        }
                    }
                    RawFrameKind::AudioBitstream(_) => {
                        for (stream_id, queue, offset_ms) in &bitstream_routes {
                            if *stream_id == frame.input_stream_id {
                                let out_frame = forward_bitstream(&frame, *offset_ms);
                                push(queue, out_frame, &counters, &name);
                                break;
                            }
                        }
                    }
                    RawFrameKind::Video(_) => {}
                }
            }
            for route in &routes {
                route.queue.cancel();
            }
            debug!("audio filter '{name}' exiting");
        })
    }
}

fn push(queue: &Queue<RawFrame>, frame: RawFrame, counters: &Counters, name: &str) {
    match queue.push(frame) {
        PushOutcome::Pushed => {}
        PushOutcome::DroppedOldest(_) => {
            counters.note_filter_overflow_drop();
            warn!("audio filter '{name}' dropped oldest frame: encoder queue full");
        }
        PushOutcome::Cancelled(_) | PushOutcome::FatalCeilingExceeded { .. } => {}
    }
}

/// spec.md §4.3 steps 1-4: allocate a frame sized to the output's channel
/// layout, copy from `2*(sdi_audio_pair-1) + mono_channel`, apply gain, then
/// debug effects.
fn demux_and_process(frame: &RawFrame, route: &AudioOutputRoute) -> Option<RawFrame> {
    let pcm = frame.as_audio_pcm()?;
    let pair = route.descriptor.source_sdi_audio_pair;
    let mono = route.descriptor.source_mono_channel;
    let base_offset = 2 * (pair as usize - 1) + mono as usize;
    let k = route.output_channel_layout.channel_count as usize;

    let mut channels = Vec::with_capacity(k);
    for ch in 0..k {
        let src_idx = base_offset + ch;
        let mut samples = pcm.channels.get(src_idx).cloned().unwrap_or_default();
        apply_gain(&mut samples, route.gain_linear);
        apply_debug_effects(&mut samples, route.debug_effects, ch);
        channels.push(samples);
    }

    Some(RawFrame {
        input_stream_id: route.descriptor.id,
        hw_timestamps: frame.hw_timestamps,
        pts: frame.pts + ms_to_27mhz_ticks(route.descriptor.audio_offset_ms),
        metadata: frame.metadata.clone(),
        kind: RawFrameKind::AudioPcm(AudioPcmData {
            channels,
            channel_layout: route.output_channel_layout,
            sample_rate: pcm.sample_rate,
            frame_sample_count: pcm.frame_sample_count,
        }),
    })
}

fn apply_gain(samples: &mut [i32], gain_linear: f32) {
    if (gain_linear - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in samples.iter_mut() {
        *s = ((*s as f64) * gain_linear as f64).round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    }
}

fn apply_debug_effects(samples: &mut [i32], effects: DebugAudioEffect, channel_index: usize) {
    if effects.contains(DebugAudioEffect::MUTE) {
        samples.fill(0);
        return;
    }
    if effects.contains(DebugAudioEffect::STATIC) {
        for (i, s) in samples.iter_mut().enumerate() {
            *s = if (i + channel_index) % 2 == 0 { i16::MAX as i32 } else { i16::MIN as i32 };
        }
    }
    if effects.contains(DebugAudioEffect::BUZZ) {
        for (i, s) in samples.iter_mut().enumerate() {
            *s = *s + if i % 4 < 2 { 2000 } else { -2000 };
        }
    }
    if effects.contains(DebugAudioEffect::ATTENUATE) {
        for s in samples.iter_mut() {
            *s /= 8;
        }
    }
    if effects.contains(DebugAudioEffect::CLIP) {
        for s in samples.iter_mut() {
            *s = (*s).clamp(-16_000_000, 16_000_000);
        }
    }
}

/// spec.md §4.3's bitstream path: forward the single incoming AC-3
/// passthrough frame unchanged except for the configured PTS offset.
fn forward_bitstream(frame: &RawFrame, audio_offset_ms: i32) -> RawFrame {
    let bitstream = match &frame.kind {
        RawFrameKind::AudioBitstream(b) => AudioBitstreamData { payload: b.payload.duplicate() },
        _ => unreachable!("forward_bitstream called on non-bitstream frame"),
    };
    RawFrame {
        input_stream_id: frame.input_stream_id,
        hw_timestamps: frame.hw_timestamps,
        pts: frame.pts + ms_to_27mhz_ticks(audio_offset_ms),
        metadata: frame.metadata.clone(),
        kind: RawFrameKind::AudioBitstream(bitstream),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_db_parses_to_expected_linear_scaler() {
        assert!((parse_gain_db("0dB").unwrap() - 1.0).abs() < 1e-6);
        assert!((parse_gain_db("-6dB").unwrap() - 0.5012).abs() < 1e-3);
        assert!((parse_gain_db("+6").unwrap() - 1.995).abs() < 1e-2);
    }

    #[test]
    fn mute_effect_zeroes_samples() {
        let mut samples = vec![1000, -1000, 500];
        apply_debug_effects(&mut samples, DebugAudioEffect::MUTE, 0);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn demux_extracts_channel_offset_matching_spec_formula() {
        let mut channels = vec![Vec::new(); 16];
        for (i, ch) in channels.iter_mut().enumerate() {
            *ch = vec![i as i32; 4];
        }
        let frame = RawFrame {
            input_stream_id: StreamId(1),
            hw_timestamps: crate::clock::HwTimestamps { wall_clock_ns: 0, hw_audio_pts: 0, hw_video_pts: 0 },
            pts: 0,
            metadata: Vec::new(),
            kind: RawFrameKind::AudioPcm(AudioPcmData {
                channels,
                channel_layout: ChannelLayout { channel_count: 16 },
                sample_rate: 48_000,
                frame_sample_count: 4,
            }),
        };
        let descriptor = OutputStreamDescriptor {
            id: StreamId(10),
            pid: 34,
            language_code: None,
            audio_offset_ms: 0,
            source_sdi_audio_pair: 2, // pair 2, mono 1 -> offset 2*(2-1)+1 = 3
            source_mono_channel: 1,
            scte35_pids: Vec::new(),
            smpte2038_pid: None,
            smpte2031_pid: None,
            gain_db: None,
        };
        let route = AudioOutputRoute {
            descriptor,
            output_channel_layout: ChannelLayout::MONO,
            gain_linear: 1.0,
            debug_effects: DebugAudioEffect::empty(),
            queue: Arc::new(Queue::unbounded("test")),
        };
        let out = demux_and_process(&frame, &route).unwrap();
        match out.kind {
            RawFrameKind::AudioPcm(pcm) => assert_eq!(pcm.channels[0], vec![3, 3, 3, 3]),
            _ => panic!("expected audio pcm"),
        }
    }
}
