// Mux smoothing (spec.md §4.6's sibling in §4.5 family, §6's
// `mux_smoother.trim_ms`): holds muxed TS buffers in a constant-delay FIFO
// before handing them to the output stage, so output pacing is decoupled
// from the mux's own bursty packetization (PSI tables, PCR inserts land
// irregularly even though the wire rate must be constant).
//
// `trim_ms` (clamped to [0, 2000] by `ControlBlock::set`) is the target
// FIFO depth in wall-clock time; the smoother delays each buffer by exactly
// that much rather than letting the delay vary with upstream burstiness.
// If the *input* queue's own backlog implies a wait longer than the
// operator's configured `udp_output.latency_alert_ms`, a latency alert is
// raised (spec.md §6) and the buffer is still forwarded, never dropped —
// mux smoothing trims delay, it does not shed load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::control::{ControlBlock, RuntimeVar};
use crate::error::Counters;
use crate::frame::MuxedData;
use crate::queue::{PushOutcome, Queue};

pub struct MuxSmootherConfig {
    /// Nominal wall-clock duration one muxed buffer represents, used to
    /// estimate backlog-induced latency for the alert threshold.
    pub nominal_item_interval_ms: u64,
}

pub struct MuxSmootherStage;

impl MuxSmootherStage {
    pub fn spawn(
        name: impl Into<String>,
        cfg: MuxSmootherConfig,
        input: Arc<Queue<MuxedData>>,
        output: Arc<Queue<MuxedData>>,
        control: Arc<ControlBlock>,
        counters: Arc<Counters>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                let arrival = Instant::now();
                let backlog_ms = input.size() as u64 * cfg.nominal_item_interval_ms;
                let alert_threshold_ms = control.get(RuntimeVar::UdpOutputLatencyAlertMs);
                if alert_threshold_ms > 0 && backlog_ms > alert_threshold_ms as u64 {
                    counters.note_latency_alert();
                    warn!(
                        "mux smoother '{name}': backlog {backlog_ms}ms exceeds alert threshold {alert_threshold_ms}ms"
                    );
                }

                let Some(item) = input.pop() else { break };

                let trim_ms = control.get(RuntimeVar::MuxSmootherTrimMs).max(0) as u64;
                let target = arrival + Duration::from_millis(trim_ms);
                let now = Instant::now();
                if target > now {
                    thread::sleep(target - now);
                }

                if matches!(output.push(item), PushOutcome::Cancelled(_)) {
                    break;
                }
            }
            // Drain without the pacing delay: shutdown must not stall on a
            // trim window that will never be observed by an output stage
            // that is also exiting (spec.md §5's leaves-first drain order).
            input.drain_with(drop);
            output.cancel();
            debug!("mux smoother '{name}' exiting");
        })
    }
}
