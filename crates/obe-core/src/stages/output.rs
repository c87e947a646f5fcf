// Output stage (spec.md §4.7): per-destination thread, reads muxed TS
// buffers off the mux-smoothing queue and writes them to a transport (UDP,
// RTP, ASI, file — all external per spec.md §1's "network and hardware I/O
// ... out of scope"). `Transport` is the narrow contract this core drives.
//
// Three responsibilities live here and nowhere else: wire-timestamp SEI
// stamping (a second stamp after the encoder's own, marking "time
// transmitted to wire" rather than "time exited encoder"), the one-shot
// fault-injection packet mutations (spec.md §6/§8), and a 2-second
// sliding-window bits-per-second meter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use uuid::Uuid;

use crate::control::{ControlBlock, RuntimeVar};
use crate::error::{Counters, PipelineError};
use crate::frame::{MuxedData, TS_PACKET_LEN, TS_SYNC_BYTE};
use crate::queue::Queue;

pub trait Transport: Send {
    fn send(&mut self, packets: &[u8]) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub video_pid: u16,
    pub audio_pids: Vec<u16>,
    pub pmt_pid: u16,
    /// `None` disables SEI wire-timestamping entirely regardless of the
    /// `video_encoder.sei_timestamping` control variable.
    pub sei_marker: Option<Uuid>,
}

const PAT_PID: u16 = 0;

fn packet_pid(packet: &[u8]) -> u16 {
    (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16
}

/// A 2-second sliding-window outbound bps meter (spec.md §4.7).
#[derive(Default)]
pub struct BpsMeter {
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl BpsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: u64) {
        let mut samples = self.samples.lock().unwrap();
        let now = Instant::now();
        samples.push_back((now, bytes));
        while samples
            .front()
            .is_some_and(|(t, _)| now.duration_since(*t).as_secs_f64() > 2.0)
        {
            samples.pop_front();
        }
    }

    pub fn current_bps(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        let Some((oldest, _)) = samples.front() else { return 0.0 };
        let span = oldest.elapsed().as_secs_f64().max(1e-6).min(2.0);
        let total_bytes: u64 = samples.iter().map(|(_, b)| *b).sum();
        (total_bytes as f64 * 8.0) / span
    }
}

pub struct OutputStage;

impl OutputStage {
    pub fn spawn(
        name: impl Into<String>,
        cfg: OutputConfig,
        mut transport: Box<dyn Transport>,
        input: Arc<Queue<MuxedData>>,
        control: Arc<ControlBlock>,
        counters: Arc<Counters>,
        meter: Arc<BpsMeter>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                let Some(muxed) = input.pop() else { break };
                let mut buf = muxed.packets.as_slice().to_vec();

                let sei_enabled =
                    cfg.sei_marker.is_some() && control.get(RuntimeVar::VideoEncoderSeiTimestamping) != 0;
                if sei_enabled {
                    stamp_wire_timestamp(&mut buf, cfg.sei_marker.unwrap());
                }

                apply_fault_injection(&mut buf, &cfg, &control);

                let sendable = drop_flagged_packets(&mut buf, &cfg, &control);
                if sendable.is_empty() {
                    continue;
                }

                meter.record(sendable.len() as u64);
                if let Err(e) = transport.send(&sendable) {
                    counters.note_transport_failure();
                    warn!("output '{name}' transport write failed: {e}");
                }
            }
            debug!("output '{name}' exiting");
        })
    }
}

/// spec.md §4.7: "searches each 188-byte-aligned packet for the pipeline's
/// UUID marker and stamps 'time transmitted to wire' fields" — the 8 bytes
/// right after the marker, same convention as the encoder's own stamp.
fn stamp_wire_timestamp(buf: &mut [u8], marker: Uuid) {
    let needle = marker.as_bytes();
    let mut i = 0;
    while i + needle.len() <= buf.len() {
        if &buf[i..i + needle.len()] == needle {
            let field_start = i + needle.len();
            if field_start + 8 <= buf.len() {
                let now_ns =
                    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
                buf[field_start..field_start + 8].copy_from_slice(&now_ns.to_le_bytes());
            }
            i = field_start;
        } else {
            i += 1;
        }
    }
}

/// Applies the mutation-style one-shot fault injectors (scramble, TEI, bad
/// sync) in place, each consuming its flag at most once across the whole
/// buffer (spec.md §8: "the next TS packet ... subsequent packets
/// unchanged").
fn apply_fault_injection(buf: &mut [u8], cfg: &OutputConfig, control: &ControlBlock) {
    let mut scramble_pending = control.take_one_shot(RuntimeVar::UdpOutputScrambleNextVideoPacket);
    let mut tei_pending = control.take_one_shot(RuntimeVar::UdpOutputTeiNextPacket);
    let mut bad_sync_pending = control.take_one_shot(RuntimeVar::UdpOutputBadSyncNextPacket);

    for packet in buf.chunks_mut(TS_PACKET_LEN) {
        if packet.len() != TS_PACKET_LEN {
            break;
        }
        if scramble_pending && packet_pid(packet) == cfg.video_pid {
            packet[3] |= 0b1100_0000;
            scramble_pending = false;
        }
        if tei_pending {
            packet[1] |= 0b1000_0000;
            tei_pending = false;
        }
        if bad_sync_pending {
            packet[0] = !TS_SYNC_BYTE;
            bad_sync_pending = false;
        }
    }
}

/// Applies the drop-style one-shot fault injectors, returning a new buffer
/// with the targeted packet omitted entirely (spec.md §8: "exactly one TS
/// packet ... is not emitted").
fn drop_flagged_packets(buf: &mut Vec<u8>, cfg: &OutputConfig, control: &ControlBlock) -> Vec<u8> {
    let mut drop_video = control.take_one_shot(RuntimeVar::UdpOutputDropNextVideoPacket);
    let mut drop_audio = control.take_one_shot(RuntimeVar::UdpOutputDropNextAudioPacket);
    let mut drop_pat = control.take_one_shot(RuntimeVar::UdpOutputDropNextPatPacket);
    let mut drop_pmt = control.take_one_shot(RuntimeVar::UdpOutputDropNextPmtPacket);

    if !(drop_video || drop_audio || drop_pat || drop_pmt) {
        return std::mem::take(buf);
    }

    let mut out = Vec::with_capacity(buf.len());
    for packet in buf.chunks(TS_PACKET_LEN) {
        if packet.len() != TS_PACKET_LEN {
            out.extend_from_slice(packet);
            continue;
        }
        let pid = packet_pid(packet);
        if drop_video && pid == cfg.video_pid {
            drop_video = false;
            continue;
        }
        if drop_audio && cfg.audio_pids.contains(&pid) {
            drop_audio = false;
            continue;
        }
        if drop_pat && pid == PAT_PID {
            drop_pat = false;
            continue;
        }
        if drop_pmt && pid == cfg.pmt_pid {
            drop_pmt = false;
            continue;
        }
        out.extend_from_slice(packet);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Payload;

    fn packet_with_pid(pid: u16) -> Vec<u8> {
        let mut p = vec![0u8; TS_PACKET_LEN];
        p[0] = TS_SYNC_BYTE;
        p[1] = ((pid >> 8) & 0x1F) as u8;
        p[2] = (pid & 0xFF) as u8;
        p
    }

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }
    impl Transport for RecordingTransport {
        fn send(&mut self, packets: &[u8]) -> Result<(), PipelineError> {
            self.sent.lock().unwrap().push(packets.to_vec());
            Ok(())
        }
    }

    #[test]
    fn drop_next_video_packet_removes_exactly_one_video_pid_packet() {
        let control = Arc::new(ControlBlock::new());
        control.set(RuntimeVar::UdpOutputDropNextVideoPacket, 1);
        let cfg = OutputConfig { video_pid: 33, audio_pids: vec![34], pmt_pid: 4096, sei_marker: None };

        let mut buf = Vec::new();
        buf.extend(packet_with_pid(0));
        buf.extend(packet_with_pid(33));
        buf.extend(packet_with_pid(33));
        let sendable = drop_flagged_packets(&mut buf, &cfg, &control);

        assert_eq!(sendable.len() / TS_PACKET_LEN, 2, "exactly one video packet must be dropped");
        assert_eq!(control.get(RuntimeVar::UdpOutputDropNextVideoPacket), 0);
    }

    #[test]
    fn scramble_next_video_packet_sets_scrambling_bits_once() {
        let control = Arc::new(ControlBlock::new());
        control.set(RuntimeVar::UdpOutputScrambleNextVideoPacket, 1);
        let cfg = OutputConfig { video_pid: 33, audio_pids: vec![], pmt_pid: 4096, sei_marker: None };

        let mut buf = Vec::new();
        buf.extend(packet_with_pid(33));
        buf.extend(packet_with_pid(33));
        apply_fault_injection(&mut buf, &cfg, &control);

        assert_eq!(buf[3] & 0b1100_0000, 0b1100_0000);
        assert_eq!(buf[TS_PACKET_LEN + 3] & 0b1100_0000, 0, "only the first matching packet is scrambled");
    }

    #[test]
    fn bps_meter_reflects_recorded_bytes_within_window() {
        let meter = BpsMeter::new();
        meter.record(125_000); // 1 megabit
        assert!(meter.current_bps() > 0.0);
    }

    #[test]
    fn output_stage_forwards_muxed_buffers_to_transport() {
        let input: Arc<Queue<MuxedData>> = Arc::new(Queue::unbounded("in"));
        let control = Arc::new(ControlBlock::new());
        let counters = Arc::new(Counters::new());
        let meter = Arc::new(BpsMeter::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));

        let mut buf = Vec::new();
        buf.extend(packet_with_pid(33));
        input.push(MuxedData { packets: Payload::owned(buf), pcr_values: vec![1000] });
        input.cancel();

        let cfg = OutputConfig { video_pid: 33, audio_pids: vec![34], pmt_pid: 4096, sei_marker: None };
        let transport = Box::new(RecordingTransport { sent: Arc::clone(&sent) });
        let handle = OutputStage::spawn("test", cfg, transport, input, control, counters, meter, cancel);
        handle.join().unwrap();

        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
