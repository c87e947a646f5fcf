// The runtime control variable block (spec.md §6, §9 DESIGN NOTES):
//
//   "Global mutable state (several counters, debug-injection flags, and
//    bitrate-update flags) is used for runtime control. Re-architect as a
//    single atomic-fields control block published read-only to stages,
//    mutated only by the command parser; each stage reads once per frame."
//
// Every setter in spec.md §6 takes an `int64` and a name from one flat
// namespace. `RuntimeVar` enumerates the recognized names; `ControlBlock`
// holds the live values plus the "new value available" flag live-reconfigure
// parameters need, plus the one-shot semantics fault-injection variables
// need (reading a raised flag consumes it back to 0).
//
// The two SCTE-104 filter commands (`scte104.filter.add`,
// `scte104.filters.clear`) aren't `int64` setters — they take structured
// arguments — so they get their own small API rather than being shoehorned
// into the int64 namespace.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeVar {
    SdiInputInjectFrameEnable,
    SdiInputInjectFrameCountMax,
    AudioEncoderAc3OffsetMs,
    AudioEncoderMp2OffsetMs,
    CodecX264Bitrate,
    CodecX265Bitrate,
    CodecX264Lookahead,
    CodecX264KeyintMin,
    CodecX264KeyintMax,
    CodecX265Qpmin,
    UdpOutputDropNextVideoPacket,
    UdpOutputDropNextAudioPacket,
    UdpOutputDropNextPatPacket,
    UdpOutputDropNextPmtPacket,
    UdpOutputScrambleNextVideoPacket,
    UdpOutputTeiNextPacket,
    UdpOutputBadSyncNextPacket,
    UdpOutputLatencyAlertMs,
    UdpOutputTransportPayloadSize,
    MuxSmootherTrimMs,
    VideoEncoderSeiTimestamping,
}

impl RuntimeVar {
    pub const ALL: &'static [RuntimeVar] = &[
        RuntimeVar::SdiInputInjectFrameEnable,
        RuntimeVar::SdiInputInjectFrameCountMax,
        RuntimeVar::AudioEncoderAc3OffsetMs,
        RuntimeVar::AudioEncoderMp2OffsetMs,
        RuntimeVar::CodecX264Bitrate,
        RuntimeVar::CodecX265Bitrate,
        RuntimeVar::CodecX264Lookahead,
        RuntimeVar::CodecX264KeyintMin,
        RuntimeVar::CodecX264KeyintMax,
        RuntimeVar::CodecX265Qpmin,
        RuntimeVar::UdpOutputDropNextVideoPacket,
        RuntimeVar::UdpOutputDropNextAudioPacket,
        RuntimeVar::UdpOutputDropNextPatPacket,
        RuntimeVar::UdpOutputDropNextPmtPacket,
        RuntimeVar::UdpOutputScrambleNextVideoPacket,
        RuntimeVar::UdpOutputTeiNextPacket,
        RuntimeVar::UdpOutputBadSyncNextPacket,
        RuntimeVar::UdpOutputLatencyAlertMs,
        RuntimeVar::UdpOutputTransportPayloadSize,
        RuntimeVar::MuxSmootherTrimMs,
        RuntimeVar::VideoEncoderSeiTimestamping,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RuntimeVar::SdiInputInjectFrameEnable => "sdi_input.inject_frame_enable",
            RuntimeVar::SdiInputInjectFrameCountMax => "sdi_input.inject_frame_count_max",
            RuntimeVar::AudioEncoderAc3OffsetMs => "audio_encoder.ac3_offset_ms",
            RuntimeVar::AudioEncoderMp2OffsetMs => "audio_encoder.mp2_offset_ms",
            RuntimeVar::CodecX264Bitrate => "codec.x264.bitrate",
            RuntimeVar::CodecX265Bitrate => "codec.x265.bitrate",
            RuntimeVar::CodecX264Lookahead => "codec.x264.lookahead",
            RuntimeVar::CodecX264KeyintMin => "codec.x264.keyint_min",
            RuntimeVar::CodecX264KeyintMax => "codec.x264.keyint_max",
            RuntimeVar::CodecX265Qpmin => "codec.x265.qpmin",
            RuntimeVar::UdpOutputDropNextVideoPacket => "udp_output.drop_next_video_packet",
            RuntimeVar::UdpOutputDropNextAudioPacket => "udp_output.drop_next_audio_packet",
            RuntimeVar::UdpOutputDropNextPatPacket => "udp_output.drop_next_pat_packet",
            RuntimeVar::UdpOutputDropNextPmtPacket => "udp_output.drop_next_pmt_packet",
            RuntimeVar::UdpOutputScrambleNextVideoPacket => "udp_output.scramble_next_video_packet",
            RuntimeVar::UdpOutputTeiNextPacket => "udp_output.tei_next_packet",
            RuntimeVar::UdpOutputBadSyncNextPacket => "udp_output.bad_sync_next_packet",
            RuntimeVar::UdpOutputLatencyAlertMs => "udp_output.latency_alert_ms",
            RuntimeVar::UdpOutputTransportPayloadSize => "udp_output.transport_payload_size",
            RuntimeVar::MuxSmootherTrimMs => "mux_smoother.trim_ms",
            RuntimeVar::VideoEncoderSeiTimestamping => "video_encoder.sei_timestamping",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.name() == name)
    }

    /// Parameters that raise a "new value available" flag for the encoder
    /// to pick up on the next frame boundary (spec.md §4.4 reconfiguration).
    pub fn is_live_reconfigurable(self) -> bool {
        matches!(
            self,
            RuntimeVar::CodecX264Bitrate
                | RuntimeVar::CodecX265Bitrate
                | RuntimeVar::CodecX264Lookahead
                | RuntimeVar::CodecX264KeyintMin
                | RuntimeVar::CodecX264KeyintMax
                | RuntimeVar::CodecX265Qpmin
        )
    }

    /// One-shot fault-injection variables: reading a nonzero value consumes
    /// it back to 0 (spec.md §6, §8: "the variable reads 0 afterwards").
    pub fn is_one_shot(self) -> bool {
        matches!(
            self,
            RuntimeVar::UdpOutputDropNextVideoPacket
                | RuntimeVar::UdpOutputDropNextAudioPacket
                | RuntimeVar::UdpOutputDropNextPatPacket
                | RuntimeVar::UdpOutputDropNextPmtPacket
                | RuntimeVar::UdpOutputScrambleNextVideoPacket
                | RuntimeVar::UdpOutputTeiNextPacket
                | RuntimeVar::UdpOutputBadSyncNextPacket
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterIndex {
    All,
    Index(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scte104FilterRule {
    pub pid: u16,
    pub as_index: FilterIndex,
    pub dpi_pid_index: FilterIndex,
}

/// The single control block published read-only to every stage. Mutated
/// only by the command parser (an external collaborator per spec.md §1);
/// each stage reads it at most once per frame boundary.
pub struct ControlBlock {
    values: Mutex<HashMap<RuntimeVar, i64>>,
    changed: Mutex<HashSet<RuntimeVar>>,
    scte104_filters: Mutex<Vec<Scte104FilterRule>>,
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBlock {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            changed: Mutex::new(HashSet::new()),
            scte104_filters: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, var: RuntimeVar, value: i64) {
        let value = if var == RuntimeVar::MuxSmootherTrimMs {
            value.clamp(0, 2000)
        } else {
            value
        };
        self.values.lock().unwrap().insert(var, value);
        if var.is_live_reconfigurable() {
            self.changed.lock().unwrap().insert(var);
        }
    }

    pub fn get(&self, var: RuntimeVar) -> i64 {
        *self.values.lock().unwrap().get(&var).unwrap_or(&0)
    }

    /// Read a one-shot fault-injection variable. Returns `true` exactly
    /// once per `set`, then the variable reads 0 again.
    pub fn take_one_shot(&self, var: RuntimeVar) -> bool {
        debug_assert!(var.is_one_shot(), "{:?} is not a one-shot variable", var);
        let mut values = self.values.lock().unwrap();
        let raised = values.get(&var).copied().unwrap_or(0) != 0;
        if raised {
            values.insert(var, 0);
        }
        raised
    }

    /// Consume the "new value available" flag for a live-reconfigurable
    /// codec parameter. Returns the current value exactly once per change;
    /// `None` if nothing changed since the last call.
    pub fn take_changed(&self, var: RuntimeVar) -> Option<i64> {
        let mut changed = self.changed.lock().unwrap();
        if changed.remove(&var) {
            Some(self.get(var))
        } else {
            None
        }
    }

    pub fn add_scte104_filter(&self, rule: Scte104FilterRule) {
        self.scte104_filters.lock().unwrap().push(rule);
    }

    pub fn clear_scte104_filters(&self) {
        self.scte104_filters.lock().unwrap().clear();
    }

    pub fn scte104_filters(&self) -> Vec<Scte104FilterRule> {
        self.scte104_filters.lock().unwrap().clone()
    }

    pub fn dump(&self) -> HashMap<&'static str, i64> {
        let values = self.values.lock().unwrap();
        RuntimeVar::ALL.iter().map(|v| (v.name(), *values.get(v).unwrap_or(&0))).collect()
    }
}
