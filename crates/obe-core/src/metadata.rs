// The SCTE-104 / SCTE-35 / SMPTE-2038 metadata path (spec.md §4.9, §8).
//
// SCTE-104 VANC messages are attached to the raw video frame that contained
// them and ride through the video filter untouched — metadata is opaque to
// pixel ops. At the encoder they are converted to SCTE-35 section bytes,
// their `pts_adjustment` incremented by the codec's known frame-latency
// (the original's x264.c does the equivalent with `si.pts_adjustment +=
// offset`), then emitted to the mux queue under the output stream whose PID
// matches the configured SCTE-35 PID.
//
// SMPTE 2038 PES bypasses conversion entirely: packets forward to the 2038
// output stream PID unchanged.

use crate::clock::OBE_CLOCK_HZ;

/// An SCTE-104 message as received over VANC, already parsed down to the
/// one field the pipeline's splice path cares about: a preroll in seconds
/// against the frame it arrived on, expressed as 27 MHz ticks from the
/// frame's own capture PTS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scte104Message {
    /// `source_pts`: the 27 MHz hw-audio PTS of the raw frame this message
    /// was attached to (spec.md §8: "the in-message's preroll mapped
    /// through (source_pts + codec_frame_latency)").
    pub source_pts: i64,
    /// Requested splice point, expressed as a duration from `source_pts`.
    pub preroll: std::time::Duration,
    pub splice_event_id: u32,
    pub out_of_network: bool,
}

/// A minimal SCTE-35 `splice_insert` section — only the fields the pipeline
/// computes; the byte-level section assembly (CRC, table framing) is the
/// external PSI/PES assembler's job per spec.md §1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scte35SpliceInsert {
    pub splice_event_id: u32,
    pub out_of_network: bool,
    /// `splice_time.pts_time`, 90 kHz MPEG PTS units (33-bit wire field),
    /// after the codec-latency adjustment.
    pub pts_time_90k: i64,
    /// Carried forward so a re-muxer or downstream validator can recompute
    /// the pre-adjustment value.
    pub pts_adjustment_90k: i64,
}

/// Convert an SCTE-104 VANC message to an outbound SCTE-35 `splice_insert`,
/// adding the codec's lookahead/reorder latency to the splice PTS so the
/// section lands on the mux frame-accurately (spec.md §4.4, §4.9).
///
/// `codec_frame_latency_ticks` is the codec's total output delay (lookahead
/// + B-frame reorder depth, in 27 MHz ticks) at the moment this frame was
/// encoded.
pub fn scte104_to_scte35(
    msg: &Scte104Message,
    codec_frame_latency_ticks: i64,
) -> Scte35SpliceInsert {
    let preroll_ticks = duration_to_27mhz_ticks(msg.preroll);
    let target_pts_27mhz = msg.source_pts + preroll_ticks + codec_frame_latency_ticks;
    Scte35SpliceInsert {
        splice_event_id: msg.splice_event_id,
        out_of_network: msg.out_of_network,
        pts_time_90k: crate::clock::ticks_27mhz_to_90khz(target_pts_27mhz),
        pts_adjustment_90k: crate::clock::ticks_27mhz_to_90khz(codec_frame_latency_ticks),
    }
}

fn duration_to_27mhz_ticks(d: std::time::Duration) -> i64 {
    (d.as_secs_f64() * OBE_CLOCK_HZ as f64).round() as i64
}

/// An SMPTE 2038 PES packet, carried unchanged from VANC capture to its
/// configured output PID — no conversion, unlike SCTE-104.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smpte2038Packet {
    pub pts_27mhz: i64,
    pub payload: Vec<u8>,
}

/// Ancillary items attached to a frame's `metadata` list (spec.md §3),
/// carried forward opaquely from raw frame to coded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataItem {
    Scte104(Scte104Message),
    Smpte2038(Smpte2038Packet),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// spec.md §8 Scenario 1: SCTE-104 "splice in 6s", codec latency folded
    /// in, target pts_time within one frame of the 6-second mark.
    #[test]
    fn scte104_round_trip_lands_within_one_frame_of_target() {
        let source_pts = 27_000_000 * 100; // arbitrary capture time, 100s in
        let msg = Scte104Message {
            source_pts,
            preroll: Duration::from_secs(6),
            splice_event_id: 1,
            out_of_network: false,
        };
        let frame_duration_90k = 90_000 * 1001 / 30_000; // ~3003 ticks at 29.97i
        let codec_latency_frames = 4i64;
        let codec_latency_ticks =
            crate::clock::ticks_90khz_to_27mhz(frame_duration_90k) * codec_latency_frames;

        let section = scte104_to_scte35(&msg, codec_latency_ticks);

        let expected_90k = crate::clock::ticks_27mhz_to_90khz(source_pts)
            + 6 * 90_000
            + codec_latency_frames * frame_duration_90k;

        assert!(
            (section.pts_time_90k - expected_90k).abs() <= frame_duration_90k,
            "section pts {} not within one frame of expected {}",
            section.pts_time_90k,
            expected_90k
        );
    }

    #[test]
    fn smpte2038_packets_are_unconverted_pass_through() {
        let p = Smpte2038Packet { pts_27mhz: 12345, payload: vec![1, 2, 3] };
        let item = MetadataItem::Smpte2038(p.clone());
        match item {
            MetadataItem::Smpte2038(inner) => assert_eq!(inner, p),
            _ => panic!("expected Smpte2038 variant"),
        }
    }
}
