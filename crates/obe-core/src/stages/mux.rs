// Mux stage (spec.md §4.6, §4.9, §5's PCR-monotonicity invariant).
//
// `PsiAssembler` is the external collaborator spec.md §6 names: the
// libmpegts-equivalent PSI/PES table assembly is explicitly out of scope
// (spec.md §1), so this trait is the narrow contract the core drives it
// through. `MuxInput` is the shared queue's item type — it has to carry
// more than `spec.md`'s "coded frame" because §4.9 routes converted SCTE-35
// sections and pass-through SMPTE-2038 packets onto the very same queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::descriptors::StreamId;
use crate::error::Counters;
use crate::frame::{CodedFrame, CodedFrameKind, MuxedData, TS_PACKET_LEN};
use crate::metadata::{Scte35SpliceInsert, Smpte2038Packet};
use crate::queue::Queue;

pub enum MuxInput {
    Coded(CodedFrame),
    Scte35 { output_stream_id: StreamId, section: Scte35SpliceInsert },
    Smpte2038 { output_stream_id: StreamId, packet: Smpte2038Packet },
}

impl std::fmt::Debug for MuxInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuxInput::Coded(c) => write!(f, "Coded(stream={:?})", c.output_stream_id),
            MuxInput::Scte35 { output_stream_id, .. } => write!(f, "Scte35(stream={output_stream_id:?})"),
            MuxInput::Smpte2038 { output_stream_id, .. } => write!(f, "Smpte2038(stream={output_stream_id:?})"),
        }
    }
}

pub trait PsiAssembler: Send {
    /// Packetizes one coded payload for `pid`, returning TS packets plus
    /// any PCR values written into them.
    fn packetize_coded(
        &mut self,
        pid: u16,
        payload: &[u8],
        real_dts: i64,
        real_pts: i64,
        random_access: bool,
    ) -> (Vec<u8>, Vec<i64>);

    fn packetize_scte35(&mut self, pid: u16, section: &Scte35SpliceInsert) -> Vec<u8>;

    fn packetize_smpte2038(&mut self, pid: u16, packet: &Smpte2038Packet) -> Vec<u8>;
}

pub struct MuxStage;

impl MuxStage {
    /// `pid_lookup` maps an output stream's `StreamId` to its configured
    /// PID, and `frame_interval_ticks` is the nominal video frame duration
    /// in 27 MHz ticks used by the `drop_early` threshold (spec.md §4.6:
    /// "older than the current mux clock by more than one frame interval").
    pub fn spawn(
        name: impl Into<String>,
        mut assembler: Box<dyn PsiAssembler>,
        pid_lookup: HashMap<StreamId, u16>,
        frame_interval_ticks: i64,
        input: Arc<Queue<MuxInput>>,
        output: Arc<Queue<MuxedData>>,
        counters: Arc<Counters>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            let mut mux_clock: i64 = i64::MIN;
            let mut last_pcr: i64 = i64::MIN;

            while !cancel.load(Ordering::SeqCst) {
                let Some(item) = input.pop() else { break };
                let Some(pid) = pid_for(&item, &pid_lookup) else {
                    warn!("mux '{name}': no PID configured for stream, dropping item");
                    continue;
                };

                match item {
                    MuxInput::Coded(frame) => {
                        if mux_clock != i64::MIN && frame.real_dts < mux_clock - frame_interval_ticks {
                            counters.note_late_drop();
                            warn!("mux '{name}' dropped a late coded frame (real_dts behind mux clock)");
                            continue;
                        }
                        mux_clock = mux_clock.max(frame.real_dts);

                        let (packets, pcr_values) = assembler.packetize_coded(
                            pid,
                            frame.payload.as_slice(),
                            frame.real_dts,
                            frame.real_pts,
                            frame.random_access,
                        );
                        if let Some(&max_pcr) = pcr_values.iter().max() {
                            if last_pcr != i64::MIN && max_pcr <= last_pcr {
                                counters.note_pcr_violation_drop();
                                warn!("mux '{name}' dropped a frame that would violate PCR monotonicity");
                                continue;
                            }
                            last_pcr = max_pcr;
                        }
                        emit(&output, packets, pcr_values, &name);
                    }
                    MuxInput::Scte35 { section, .. } => {
                        let packets = assembler.packetize_scte35(pid, &section);
                        emit(&output, packets, Vec::new(), &name);
                    }
                    MuxInput::Smpte2038 { packet, .. } => {
                        let packets = assembler.packetize_smpte2038(pid, &packet);
                        emit(&output, packets, Vec::new(), &name);
                    }
                }
            }
            output.cancel();
            debug!("mux '{name}' exiting");
        })
    }
}

fn pid_for(item: &MuxInput, lookup: &HashMap<StreamId, u16>) -> Option<u16> {
    let stream = match item {
        MuxInput::Coded(frame) => frame.output_stream_id,
        MuxInput::Scte35 { output_stream_id, .. } => *output_stream_id,
        MuxInput::Smpte2038 { output_stream_id, .. } => *output_stream_id,
    };
    lookup.get(&stream).copied()
}

fn emit(output: &Queue<MuxedData>, packets: Vec<u8>, pcr_values: Vec<i64>, name: &str) {
    if packets.is_empty() {
        return;
    }
    debug_assert_eq!(packets.len() % TS_PACKET_LEN, 0, "mux '{name}' produced an unaligned TS buffer");
    let muxed = MuxedData { packets: crate::frame::Payload::owned(packets), pcr_values };
    output.push(muxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HwTimestamps;
    use crate::frame::Payload;

    struct FakeAssembler;
    impl PsiAssembler for FakeAssembler {
        fn packetize_coded(&mut self, _pid: u16, payload: &[u8], real_dts: i64, _real_pts: i64, _ra: bool) -> (Vec<u8>, Vec<i64>) {
            let mut pkt = vec![0u8; TS_PACKET_LEN];
            pkt[0] = crate::frame::TS_SYNC_BYTE;
            pkt[1] = payload.first().copied().unwrap_or(0);
            (pkt, vec![real_dts])
        }
        fn packetize_scte35(&mut self, _pid: u16, _s: &Scte35SpliceInsert) -> Vec<u8> {
            let mut pkt = vec![0u8; TS_PACKET_LEN];
            pkt[0] = crate::frame::TS_SYNC_BYTE;
            pkt
        }
        fn packetize_smpte2038(&mut self, _pid: u16, _p: &Smpte2038Packet) -> Vec<u8> {
            vec![crate::frame::TS_SYNC_BYTE; TS_PACKET_LEN]
        }
    }

    fn coded(stream: StreamId, real_dts: i64) -> CodedFrame {
        CodedFrame {
            output_stream_id: stream,
            kind: CodedFrameKind::Video,
            payload: Payload::owned(vec![7]),
            pts: real_dts,
            real_pts: real_dts + 100,
            real_dts,
            cpb_initial_arrival_time: real_dts - 200,
            cpb_final_arrival_time: real_dts - 50,
            random_access: true,
            priority: true,
            hw_timestamps: HwTimestamps { wall_clock_ns: 0, hw_audio_pts: real_dts, hw_video_pts: real_dts },
            metadata: Vec::new(),
        }
    }

    #[test]
    fn drops_frames_that_would_violate_pcr_monotonicity() {
        let input: Arc<Queue<MuxInput>> = Arc::new(Queue::unbounded("mux-in"));
        let output: Arc<Queue<MuxedData>> = Arc::new(Queue::unbounded("mux-out"));
        let counters = Arc::new(Counters::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let mut lookup = HashMap::new();
        lookup.insert(StreamId(1), 33u16);

        input.push(MuxInput::Coded(coded(StreamId(1), 10_000)));
        input.push(MuxInput::Coded(coded(StreamId(1), 5_000))); // would move PCR backward
        input.push(MuxInput::Coded(coded(StreamId(1), 20_000)));
        input.cancel();

        let handle = MuxStage::spawn(
            "test", Box::new(FakeAssembler), lookup, 3000, input, Arc::clone(&output), Arc::clone(&counters), cancel,
        );
        handle.join().unwrap();

        let mut count = 0;
        while output.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 2, "the backward-PCR frame must be dropped, not reordered");
        assert_eq!(counters.mux_pcr_violations_dropped.load(Ordering::SeqCst), 1);
    }
}
