// crates/obe-core/src/lib.rs

pub mod clock;
pub mod control;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod pipeline;
pub mod queue;
pub mod stages;

pub use control::{ControlBlock, RuntimeVar};
pub use descriptors::StreamId;
pub use error::{Counters, PipelineError};
pub use pipeline::{Pipeline, PipelineConfig};
