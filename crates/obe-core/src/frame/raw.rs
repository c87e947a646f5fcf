// The pre-encoder unit (spec.md §3 "Raw frame").

use crate::clock::HwTimestamps;
use crate::descriptors::{ChannelLayout, StreamId};
use crate::frame::payload::Payload;
use crate::frame::userdata::UserData;
use crate::metadata::MetadataItem;

/// Pixel formats the video filter recognizes (spec.md §4.2: "Fails with
/// InvalidColorspace if pixel format is not one of the recognized set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Yuv422P10Le,
    Yuv420P10Le,
    Yuv420P,
}

impl Colorspace {
    pub fn bit_depth(self) -> u8 {
        match self {
            Colorspace::Yuv422P10Le | Colorspace::Yuv420P10Le => 10,
            Colorspace::Yuv420P => 8,
        }
    }

    pub fn is_422(self) -> bool {
        matches!(self, Colorspace::Yuv422P10Le)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDominance {
    Progressive,
    TopFieldFirst,
    BottomFieldFirst,
}

/// Either planar pixel data or an already-compressed buffer the capture
/// hardware produced directly (spec.md §4.2 step 1, the passthrough check).
pub enum VideoPayload {
    Planar { planes: Vec<Payload>, strides: Vec<usize> },
    CompressedPassthrough(Payload),
}

pub struct VideoFrameData {
    pub payload: VideoPayload,
    pub width: u32,
    pub height: u32,
    pub colorspace: Colorspace,
    pub interlaced: bool,
    pub field_dominance: FieldDominance,
    /// Sample aspect ratio, set once derived from AFD/WSS or defaulted
    /// (spec.md §4.2 steps 6-7). `None` until the video filter assigns it.
    pub sar: Option<(u32, u32)>,
    pub user_data: Vec<UserData>,
}

impl VideoPayload {
    /// An independent heap copy, decoupled from any device slot the source
    /// payload may have been borrowed from.
    pub fn duplicate(&self) -> VideoPayload {
        match self {
            VideoPayload::Planar { planes, strides } => VideoPayload::Planar {
                planes: planes.iter().map(Payload::duplicate).collect(),
                strides: strides.clone(),
            },
            VideoPayload::CompressedPassthrough(p) => VideoPayload::CompressedPassthrough(p.duplicate()),
        }
    }
}

impl VideoFrameData {
    /// A frame-repeat copy for `sdi_input.inject_frame_enable` (spec.md §8
    /// Scenario 2): pixel data is duplicated independently of the source's
    /// device slot, and ancillary user-data is dropped — a repeated frame
    /// carries no fresh VANC/VBI content of its own.
    pub fn duplicate_for_injection(&self) -> VideoFrameData {
        VideoFrameData {
            payload: self.payload.duplicate(),
            width: self.width,
            height: self.height,
            colorspace: self.colorspace,
            interlaced: self.interlaced,
            field_dominance: self.field_dominance,
            sar: self.sar,
            user_data: Vec::new(),
        }
    }
}

/// Planar PCM, always carried as S32P (signed 32-bit planar) per spec.md
/// §4.3's "gain ... applied to S32P samples" — one `Vec<i32>` per channel,
/// indexed exactly as the SDI 16-channel group layout the audio filter
/// demuxes from.
pub struct AudioPcmData {
    pub channels: Vec<Vec<i32>>,
    pub channel_layout: ChannelLayout,
    pub sample_rate: u32,
    pub frame_sample_count: usize,
}

pub struct AudioBitstreamData {
    pub payload: Payload,
}

pub enum RawFrameKind {
    Video(VideoFrameData),
    AudioPcm(AudioPcmData),
    AudioBitstream(AudioBitstreamData),
}

/// The pre-encoder unit. Single-owner: produced by exactly one stage,
/// consumed/destroyed by exactly one downstream stage (spec.md §3
/// invariant). Destruction is plain `Drop` — `Payload::drop` plays the role
/// of the original's `release_data`, and freeing the `RawFrame` struct
/// itself (automatic) plays the role of `release_frame`; there is no
/// separate step to forget.
pub struct RawFrame {
    pub input_stream_id: StreamId,
    pub hw_timestamps: HwTimestamps,
    pub pts: i64,
    pub metadata: Vec<MetadataItem>,
    pub kind: RawFrameKind,
}

impl RawFrame {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, RawFrameKind::Video(_))
    }

    pub fn as_video(&self) -> Option<&VideoFrameData> {
        match &self.kind {
            RawFrameKind::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_video_mut(&mut self) -> Option<&mut VideoFrameData> {
        match &mut self.kind {
            RawFrameKind::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_audio_pcm(&self) -> Option<&AudioPcmData> {
        match &self.kind {
            RawFrameKind::AudioPcm(a) => Some(a),
            _ => None,
        }
    }

    /// Build a repeated frame for LOS frame injection (spec.md §8 Scenario
    /// 2): `None` for anything but a video frame — the scenario mutes audio
    /// during the gap rather than repeating it.
    pub fn duplicate_for_injection(&self, pts: i64, hw_timestamps: crate::clock::HwTimestamps) -> Option<RawFrame> {
        let video = self.as_video()?;
        Some(RawFrame {
            input_stream_id: self.input_stream_id,
            hw_timestamps,
            pts,
            metadata: Vec::new(),
            kind: RawFrameKind::Video(video.duplicate_for_injection()),
        })
    }
}
