// The mux stage's output unit (spec.md §3 "Muxed data"): a TS-packet buffer
// (a whole multiple of 188 bytes) plus the set of PCR values it carries.

use crate::frame::payload::Payload;

pub const TS_PACKET_LEN: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

pub struct MuxedData {
    pub packets: Payload,
    pub pcr_values: Vec<i64>,
}

impl MuxedData {
    pub fn packet_count(&self) -> usize {
        self.packets.len() / TS_PACKET_LEN
    }

    /// spec.md §8: "length is a multiple of 188".
    pub fn is_length_aligned(&self) -> bool {
        self.packets.len() % TS_PACKET_LEN == 0
    }

    /// spec.md §8: "the first byte of each 188-byte slot is 0x47 unless
    /// bad_sync_next_packet has been raised for that packet". `corrupted_at`
    /// names packet indices allowed to violate sync (fault injection).
    pub fn sync_bytes_ok(&self, corrupted_at: &[usize]) -> bool {
        let data = self.packets.as_slice();
        for (i, chunk) in data.chunks(TS_PACKET_LEN).enumerate() {
            if chunk.len() != TS_PACKET_LEN {
                return false;
            }
            if chunk[0] != TS_SYNC_BYTE && !corrupted_at.contains(&i) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(n: usize) -> Payload {
        let mut buf = vec![0u8; n * TS_PACKET_LEN];
        for chunk in buf.chunks_mut(TS_PACKET_LEN) {
            chunk[0] = TS_SYNC_BYTE;
        }
        Payload::owned(buf)
    }

    #[test]
    fn length_is_multiple_of_188() {
        let m = MuxedData { packets: packets(3), pcr_values: vec![] };
        assert!(m.is_length_aligned());
        assert_eq!(m.packet_count(), 3);
    }

    #[test]
    fn detects_unaligned_buffers() {
        let mut buf = packets(2).as_slice().to_vec();
        buf.push(0);
        let m = MuxedData { packets: Payload::owned(buf), pcr_values: vec![] };
        assert!(!m.is_length_aligned());
    }

    #[test]
    fn sync_byte_check_allows_only_declared_corruption() {
        let mut buf = packets(2).as_slice().to_vec();
        buf[TS_PACKET_LEN] = 0x00; // corrupt packet 1's sync byte
        let m = MuxedData { packets: Payload::owned(buf), pcr_values: vec![] };
        assert!(!m.sync_bytes_ok(&[]));
        assert!(m.sync_bytes_ok(&[1]));
    }
}
