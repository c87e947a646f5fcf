// A `PsiAssembler` that packetizes payloads into 188-byte TS packets without
// real PSI/PAT/PMT table logic, standing in for libmpegts (spec.md §1: "PSI
// table assembly ... out of scope"). PCR values are synthesized directly
// from the caller-supplied DTS so mux-stage PCR-monotonicity tests exercise
// real drop behavior against a predictable clock.

use obe_core::frame::{TS_PACKET_LEN, TS_SYNC_BYTE};
use obe_core::metadata::{Scte35SpliceInsert, Smpte2038Packet};
use obe_core::stages::mux::PsiAssembler;

pub struct PassthroughAssembler;

impl PassthroughAssembler {
    pub fn new() -> Self {
        Self
    }

    fn packetize(pid: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in payload.chunks(TS_PACKET_LEN - 4) {
            let mut pkt = vec![0u8; TS_PACKET_LEN];
            pkt[0] = TS_SYNC_BYTE;
            pkt[1] = (pid >> 8) as u8 & 0x1F;
            pkt[2] = (pid & 0xFF) as u8;
            let body_len = chunk.len().min(TS_PACKET_LEN - 4);
            pkt[4..4 + body_len].copy_from_slice(&chunk[..body_len]);
            out.extend_from_slice(&pkt);
        }
        if out.is_empty() {
            let mut pkt = vec![0u8; TS_PACKET_LEN];
            pkt[0] = TS_SYNC_BYTE;
            pkt[1] = (pid >> 8) as u8 & 0x1F;
            pkt[2] = (pid & 0xFF) as u8;
            out.extend_from_slice(&pkt);
        }
        out
    }
}

impl Default for PassthroughAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PsiAssembler for PassthroughAssembler {
    fn packetize_coded(
        &mut self,
        pid: u16,
        payload: &[u8],
        real_dts: i64,
        _real_pts: i64,
        _random_access: bool,
    ) -> (Vec<u8>, Vec<i64>) {
        let packets = Self::packetize(pid, payload);
        (packets, vec![real_dts])
    }

    fn packetize_scte35(&mut self, pid: u16, section: &Scte35SpliceInsert) -> Vec<u8> {
        Self::packetize(pid, &section.pts_time_90k.to_le_bytes())
    }

    fn packetize_smpte2038(&mut self, pid: u16, packet: &Smpte2038Packet) -> Vec<u8> {
        Self::packetize(pid, &packet.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packetize_produces_188_aligned_output_with_sync_bytes() {
        let mut assembler = PassthroughAssembler::new();
        let (packets, pcr) = assembler.packetize_coded(33, &[1, 2, 3, 4], 1000, 1200, true);
        assert_eq!(packets.len() % TS_PACKET_LEN, 0);
        assert_eq!(pcr, vec![1000]);
        for chunk in packets.chunks(TS_PACKET_LEN) {
            assert_eq!(chunk[0], TS_SYNC_BYTE);
        }
    }
}
