// Error kinds for the pipeline engine.
//
// Per spec.md §7, errors come in five flavors with different propagation
// rules: transient signal conditions and per-frame codec failures are
// logged and counted, never thrown across a stage boundary; configuration
// errors are rejected before the pipeline starts; codec init failure and
// encoder-queue overflow are fatal and must reach the operator.
//
// `PipelineError` is reserved for the paths that are allowed to propagate:
// pipeline/stage construction and the fatal queue-overflow guard. Per-frame
// and transient conditions are recorded in `Counters` instead.

use thiserror::Error;

use crate::descriptors::StreamId;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid colorspace: {0:?} is not a recognized pixel format")]
    InvalidColorspace(crate::frame::Colorspace),

    #[error("configuration rejected for stream {stream:?}: {reason}")]
    InvalidConfiguration { stream: StreamId, reason: String },

    #[error("codec initialization failed for stream {stream:?}: {reason}")]
    CodecInitFailed { stream: StreamId, reason: String },

    #[error(
        "encoder input queue '{queue_name}' exceeded the hard ceiling of {ceiling} items; \
         upstream has stalled, terminating"
    )]
    QueueOverflow { queue_name: String, ceiling: usize, size: usize },

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("coded frame invariant violated: {0}")]
    InvariantViolated(String),
}

/// Transient, per-frame, and fault-injection conditions that are logged and
/// counted rather than propagated (spec.md §7: "Propagation: errors are
/// reported by log and by counters ... they are never thrown across stage
/// boundaries").
#[derive(Debug, Default)]
pub struct Counters {
    pub los_events: std::sync::atomic::AtomicU64,
    pub frames_dropped_late: std::sync::atomic::AtomicU64,
    pub frames_dropped_filter_overflow: std::sync::atomic::AtomicU64,
    pub codec_frame_failures: std::sync::atomic::AtomicU64,
    pub transport_write_failures: std::sync::atomic::AtomicU64,
    pub mux_pcr_violations_dropped: std::sync::atomic::AtomicU64,
    pub latency_alerts: std::sync::atomic::AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &std::sync::atomic::AtomicU64) -> u64 {
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1
    }

    pub fn note_los(&self) -> u64 {
        Self::bump(&self.los_events)
    }

    pub fn note_late_drop(&self) -> u64 {
        Self::bump(&self.frames_dropped_late)
    }

    pub fn note_filter_overflow_drop(&self) -> u64 {
        Self::bump(&self.frames_dropped_filter_overflow)
    }

    pub fn note_codec_failure(&self) -> u64 {
        Self::bump(&self.codec_frame_failures)
    }

    pub fn note_transport_failure(&self) -> u64 {
        Self::bump(&self.transport_write_failures)
    }

    pub fn note_pcr_violation_drop(&self) -> u64 {
        Self::bump(&self.mux_pcr_violations_dropped)
    }

    pub fn note_latency_alert(&self) -> u64 {
        Self::bump(&self.latency_alerts)
    }
}
