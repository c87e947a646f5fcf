// crates/obe-testkit/src/lib.rs
//
// Mock capture/codec/mux/transport adapters so obe-core's pipeline can be
// exercised end-to-end without any vendor SDK (Decklink, x264, libmpegts,
// ...) — all of which spec.md §1 places out of scope for this crate.

pub mod mock_capture;
pub mod mock_codec;
pub mod mock_mux;
pub mod mock_transport;

pub use mock_capture::ScriptedCaptureAdapter;
pub use mock_codec::{MockAudioEncoder, MockVideoEncoder};
pub use mock_mux::PassthroughAssembler;
pub use mock_transport::RecordingTransport;
