// Stream identity and per-stream configuration (spec.md §3, §6; supplemented
// from original_source/common/common.h's obe_int_input_stream_t and
// obe_device_t).
//
// Every descriptor is keyed by a stable `StreamId`, never by position in a
// `Vec` — spec.md §9's open question about the SMPTE-2031 pid-index bug is
// resolved here by construction: nothing in this crate indexes a stream by
// array position.

use serde::{Deserialize, Serialize};

/// Stable identity for an input or output stream. Never reused within a
/// pipeline's lifetime and never derived from a collection index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodecKind {
    Avc,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodecKind {
    Mp2,
    Ac3,
    Eac3,
    Aac,
}

impl AudioCodecKind {
    /// Samples per coded frame, from original_source/common/common.h's
    /// `AC3_NUM_SAMPLES` / `MP2_NUM_SAMPLES` / `AAC_NUM_SAMPLES`.
    pub fn samples_per_frame(self) -> usize {
        match self {
            AudioCodecKind::Mp2 => 1152,
            AudioCodecKind::Ac3 | AudioCodecKind::Eac3 => 1536,
            AudioCodecKind::Aac => 1024,
        }
    }

    pub fn is_bitstream_passthrough_capable(self) -> bool {
        matches!(self, AudioCodecKind::Ac3 | AudioCodecKind::Eac3)
    }
}

/// Latency mode controls whether encoder-smoothing (spec.md §4.5) is present
/// between the encoder and mux stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyMode {
    Generic,
    Low,
    Lowest,
}

impl LatencyMode {
    pub fn uses_enc_smoothing(self) -> bool {
        matches!(self, LatencyMode::Generic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub channel_count: u8,
}

impl ChannelLayout {
    pub const MONO: ChannelLayout = ChannelLayout { channel_count: 1 };
    pub const STEREO: ChannelLayout = ChannelLayout { channel_count: 2 };
    pub const SURROUND_5_1: ChannelLayout = ChannelLayout { channel_count: 6 };
}

/// Capture-card firmware capability flags. Currently carries exactly the
/// half-duplex 1080i correction flag (spec.md §9, §5): a legacy fixup tied
/// to a specific card generation, gated behind this flag rather than
/// generalized to all interlaced formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwStatusFlags {
    pub half_duplex: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputStreamDescriptor {
    pub id: StreamId,
    pub lang_code: Option<String>,
    /// Timebase of the transport-level clock (normally 27 MHz / 1).
    pub transport_timebase: (i32, i32),
    /// Timebase of the codec-internal clock, which may differ.
    pub codec_timebase: (i32, i32),
    /// SDI audio group pair, 1-8 (original_source: `sdi_audio_pair`).
    pub sdi_audio_pair: u8,
    pub hw_status: HwStatusFlags,
    pub is_hdr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEncoderParams {
    pub bitrate_kbps: u32,
    pub vbv_max_kbps: u32,
    pub vbv_buf_kbps: u32,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub sar_num: u32,
    pub sar_den: u32,
    pub interlaced: bool,
    pub tff: bool,
    pub gop_min: u32,
    pub gop_max: u32,
    pub bframes: u32,
    pub lookahead: u32,
    pub threads: u32,
    pub profile: String,
    pub level: String,
    pub csp: crate::frame::Colorspace,
    pub qp_min: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioEncoderParams {
    pub codec_kind: AudioCodecKind,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub bitrate_kbps: u32,
    pub frames_per_pes: u32,
    /// AC-3 dialnorm, in negative LKFS; unused for other codecs.
    pub dialnorm: Option<i32>,
    pub aac_profile_and_level: Option<String>,
    pub is_latm: bool,
}

/// Per-output encoder/mux configuration (spec.md §3's "Output stream
/// descriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputStreamDescriptor {
    pub id: StreamId,
    pub pid: u16,
    pub language_code: Option<String>,
    pub audio_offset_ms: i32,
    /// Which SDI audio pair (1-8) and which mono channel within it (0 = L,
    /// 1 = R, or 0 for a true mono extraction) this output is demuxed from.
    pub source_sdi_audio_pair: u8,
    pub source_mono_channel: u8,
    pub scte35_pids: Vec<u16>,
    pub smpte2038_pid: Option<u16>,
    pub smpte2031_pid: Option<u16>,
    pub gain_db: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_codec_sample_patterns_match_original_constants() {
        assert_eq!(AudioCodecKind::Mp2.samples_per_frame(), 1152);
        assert_eq!(AudioCodecKind::Ac3.samples_per_frame(), 1536);
        assert_eq!(AudioCodecKind::Eac3.samples_per_frame(), 1536);
        assert_eq!(AudioCodecKind::Aac.samples_per_frame(), 1024);
    }

    #[test]
    fn only_generic_latency_mode_uses_enc_smoothing() {
        assert!(LatencyMode::Generic.uses_enc_smoothing());
        assert!(!LatencyMode::Low.uses_enc_smoothing());
        assert!(!LatencyMode::Lowest.uses_enc_smoothing());
    }
}
