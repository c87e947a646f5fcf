// The three message kinds that flow along the pipeline's queues (spec.md
// §3): raw frame (pre-encoder), coded frame (post-encoder), muxed data
// (post-mux). Split into one module per kind, plus the shared `Payload`
// ownership type and the move-only `UserData` list.

mod coded;
mod muxed;
mod payload;
mod raw;
mod userdata;

pub use coded::{CodedFrame, CodedFrameKind, DtsMonotonicGuard};
pub use muxed::{MuxedData, TS_PACKET_LEN, TS_SYNC_BYTE};
pub use payload::{Payload, ReleaseHook};
pub use raw::{
    AudioBitstreamData, AudioPcmData, Colorspace, FieldDominance, RawFrame, RawFrameKind,
    VideoFrameData, VideoPayload,
};
pub use userdata::{Cea608Field, UserData};
