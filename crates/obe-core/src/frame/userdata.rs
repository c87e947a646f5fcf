// Frame-attached ancillary user-data (spec.md §9 DESIGN NOTES):
//
//   "Userdata attached to frames then transferred to codecs ... currently a
//    list of raw pointers with ownership handoff by setting the source
//    pointer to null after copy. Re-architect as a move-only list of typed
//    variants (SEI::T35 | SEI::Unregistered | Ancillary::SCTE104 |
//    Ancillary::SMPTE2038 | ...), moved atomically into the codec's "extra
//    SEI" slot."
//
// `UserData` covers the items the video filter attaches directly to a raw
// frame (spec.md §4.2 step 6): CEA-608/708, AFD, bar data, and generic T.35.
// SCTE-104/SMPTE-2038 ancillary items travel on `RawFrame::metadata`
// (crate::metadata) instead, since they bypass the video filter entirely
// (spec.md §4.9) rather than becoming SEI.
//
// Ownership transfer to the encoder is "moved atomically" by `Vec::drain`
// or `std::mem::take` at the call site — there is no separate
// take-and-null-out step to get wrong.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cea608Field {
    Field1,
    Field2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserData {
    /// Raw CEA-608 byte pairs for one field.
    Cea608 { field: Cea608Field, bytes: Vec<u8> },
    /// A fully-formed CEA-708 Caption Distribution Packet.
    Cea708Cdp { bytes: Vec<u8> },
    /// Active Format Description code (SMPTE 2016-3), 0-15.
    Afd { afd: u8 },
    /// Bar data (top/bottom or left/right bar line numbers).
    BarData { top: u16, bottom: u16, left: u16, right: u16 },
    /// Generic ITU-T T.35 payload, used for anything not covered by the
    /// named variants above (e.g. a "DTG1" or "GA94" wrapper that the video
    /// filter assembled from WSS/AFD conversion).
    T35 { country_code: u8, provider_code: u16, payload: Vec<u8> },
}

impl UserData {
    /// The SEI payload "kind" tag, used for logging and for tests asserting
    /// on which user-data types survived a pipeline run without having to
    /// match the full payload.
    pub fn kind_name(&self) -> &'static str {
        match self {
            UserData::Cea608 { .. } => "cea608",
            UserData::Cea708Cdp { .. } => "cea708_cdp",
            UserData::Afd { .. } => "afd",
            UserData::BarData { .. } => "bar_data",
            UserData::T35 { .. } => "t35",
        }
    }
}
