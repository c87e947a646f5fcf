// Video filter (spec.md §4.2): colorspace conversion, scaling, VBI/VANC
// user-data encapsulation, SAR derivation. Runs as its own stage thread,
// one raw video frame in, one raw video frame out, in the seven-step fixed
// order spec.md §4.2 lists, with one supplemented step (`Pad`, from
// `original_source/filters/video/video.c`'s letterbox/pillarbox path).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::error::{Counters, PipelineError};
use crate::frame::{Colorspace, FieldDominance, Payload, RawFrame, RawFrameKind, UserData, VideoPayload};
use crate::queue::Queue;

const NEUTRAL_LUMA_8: u8 = 16;
const NEUTRAL_CHROMA_8: u8 = 128;

#[derive(Debug, Clone, Copy)]
pub struct PadConfig {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

#[derive(Debug, Clone)]
pub struct VideoFilterConfig {
    pub recognized_colorspaces: Vec<Colorspace>,
    pub output_width: u32,
    pub output_height: u32,
    pub output_colorspace: Colorspace,
    /// PAL systems blank the VBI lines with neutral sample values.
    pub pal_blanking: bool,
    pub vbi_line_count: u32,
    pub pad: Option<PadConfig>,
    /// Default SAR applied when still unset after AFD/WSS and source is SD:
    /// `true` => 4:3, `false` => 16:9 (spec.md §4.2 step 7).
    pub default_sar_4_3: bool,
}

pub struct VideoFilterStage;

impl VideoFilterStage {
    pub fn spawn(
        name: impl Into<String>,
        cfg: VideoFilterConfig,
        input: Arc<Queue<RawFrame>>,
        output: Arc<Queue<RawFrame>>,
        counters: Arc<Counters>,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = name.into();
        thread::spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                let Some(mut frame) = input.pop() else { break };
                match apply(&mut frame, &cfg, &counters) {
                    Ok(()) => {
                        if matches!(output.push(frame), crate::queue::PushOutcome::DroppedOldest(_)) {
                            counters.note_filter_overflow_drop();
                        }
                    }
                    Err(e) => {
                        warn!("video filter '{name}': {e}");
                    }
                }
            }
            output.cancel();
            debug!("video filter '{name}' exiting");
        })
    }
}

/// Runs the fixed seven-step pipeline (plus the supplemented `Pad` step) on
/// one raw video frame in place.
pub fn apply(frame: &mut RawFrame, cfg: &VideoFilterConfig, counters: &Counters) -> Result<(), PipelineError> {
    let Some(video) = frame.as_video() else {
        return Ok(());
    };

    // Step 1: passthrough check.
    if matches!(video.payload, VideoPayload::CompressedPassthrough(_)) {
        return Ok(());
    }

    if !cfg.recognized_colorspaces.contains(&video.colorspace) {
        return Err(PipelineError::InvalidColorspace(video.colorspace));
    }

    // Step 2: PAL blank-lines.
    if cfg.pal_blanking {
        blank_lines(frame, cfg.vbi_line_count);
    }

    // Step 3: resize.
    let video = frame.as_video().unwrap();
    if video.width != cfg.output_width || video.height != cfg.output_height {
        resize(frame, cfg.output_width, cfg.output_height);
    }

    // Step 3.5 (supplemented): letterbox/pillarbox pad.
    if let Some(pad) = cfg.pad {
        apply_pad(frame, pad);
    }

    // Step 4: chroma downconvert, 4:2:2 -> 4:2:0.
    let video = frame.as_video().unwrap();
    if video.colorspace.is_422() && !cfg.output_colorspace.is_422() {
        chroma_downconvert_422_to_420(frame);
    }

    // Step 5: dither to 8 bit.
    let video = frame.as_video().unwrap();
    if video.colorspace.bit_depth() == 10 && cfg.output_colorspace.bit_depth() == 8 {
        dither_to_8bit(frame);
    }

    // Step 6: user-data encapsulation.
    encapsulate_user_data(frame, counters);

    // Step 7: SAR defaulting.
    default_sar(frame, cfg.default_sar_4_3);

    let video = frame.as_video_mut().unwrap();
    video.colorspace = cfg.output_colorspace;

    Ok(())
}

fn blank_lines(frame: &mut RawFrame, vbi_lines: u32) {
    let video = frame.as_video_mut().unwrap();
    let width = video.width as usize;
    let rows = vbi_lines as usize;
    if let VideoPayload::Planar { planes, .. } = &mut video.payload {
        for (plane_idx, plane) in planes.iter_mut().enumerate() {
            let neutral = if plane_idx == 0 { NEUTRAL_LUMA_8 } else { NEUTRAL_CHROMA_8 };
            if let Payload::Owned(bytes) = plane {
                let row_bytes = width.min(bytes.len());
                for row in bytes.chunks_mut(row_bytes.max(1)).take(rows) {
                    row.fill(neutral);
                }
            }
        }
    }
}

/// Nearest-neighbor resample of each plane, independently per row/column.
fn resize(frame: &mut RawFrame, out_width: u32, out_height: u32) {
    let video = frame.as_video_mut().unwrap();
    let (src_w, src_h) = (video.width as usize, video.height as usize);
    if let VideoPayload::Planar { planes, strides } = &mut video.payload {
        for plane in planes.iter_mut() {
            if let Payload::Owned(bytes) = plane {
                *bytes = resample_plane(bytes, src_w, src_h, out_width as usize, out_height as usize);
            }
        }
        if let Some(first) = strides.first_mut() {
            *first = out_width as usize;
        }
    }
    video.width = out_width;
    video.height = out_height;
}

fn resample_plane(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Vec::new();
    }
    let mut out = vec![0u8; dst_w * dst_h];
    for y in 0..dst_h {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        for x in 0..dst_w {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let src_idx = sy * src_w + sx;
            out[y * dst_w + x] = src.get(src_idx).copied().unwrap_or(0);
        }
    }
    out
}

fn apply_pad(frame: &mut RawFrame, pad: PadConfig) {
    let video = frame.as_video_mut().unwrap();
    let (src_w, src_h) = (video.width as usize, video.height as usize);
    let dst_w = src_w + pad.left as usize + pad.right as usize;
    let dst_h = src_h + pad.top as usize + pad.bottom as usize;
    if let VideoPayload::Planar { planes, strides } = &mut video.payload {
        for (idx, plane) in planes.iter_mut().enumerate() {
            let neutral = if idx == 0 { NEUTRAL_LUMA_8 } else { NEUTRAL_CHROMA_8 };
            if let Payload::Owned(bytes) = plane {
                let mut out = vec![neutral; dst_w * dst_h];
                for y in 0..src_h {
                    let dst_row_start = (y + pad.top as usize) * dst_w + pad.left as usize;
                    let src_row_start = y * src_w;
                    if src_row_start + src_w <= bytes.len() && dst_row_start + src_w <= out.len() {
                        out[dst_row_start..dst_row_start + src_w]
                            .copy_from_slice(&bytes[src_row_start..src_row_start + src_w]);
                    }
                }
                *bytes = out;
            }
        }
        if let Some(first) = strides.first_mut() {
            *first = dst_w;
        }
    }
    video.width = dst_w as u32;
    video.height = dst_h as u32;
}

/// Averages vertically adjacent chroma rows, keeping same-field rows paired
/// when the frame is interlaced so field parity survives the downconvert
/// (spec.md §4.2 step 4: "top-field and bottom-field filter kernels that
/// preserve field parity").
fn chroma_downconvert_422_to_420(frame: &mut RawFrame) {
    let interlaced = frame.as_video().unwrap().interlaced;
    let video = frame.as_video_mut().unwrap();
    let width = video.width as usize;
    let row_step = if interlaced { 4 } else { 2 };
    if let VideoPayload::Planar { planes, .. } = &mut video.payload {
        for plane in planes.iter_mut().skip(1) {
            if let Payload::Owned(bytes) = plane {
                let rows = if width == 0 { 0 } else { bytes.len() / width };
                let mut out = Vec::with_capacity(bytes.len() / 2);
                let mut row = 0;
                while row < rows {
                    let partner = (row + row_step / 2).min(rows.saturating_sub(1));
                    let a = &bytes[row * width..(row * width + width).min(bytes.len())];
                    let b = &bytes[partner * width..(partner * width + width).min(bytes.len())];
                    for (x, &av) in a.iter().enumerate() {
                        let bv = b.get(x).copied().unwrap_or(av);
                        out.push((((av as u16) + (bv as u16)) / 2) as u8);
                    }
                    row += row_step.max(1);
                }
                *bytes = out;
            }
        }
    }
}

/// A per-row triangular-error-diffusion dither from 10-bit little-endian
/// samples to 8-bit. The error buffer has exactly one entry per output row
/// (spec.md §8: "the dither's error-buffer row-count equals source height").
fn dither_to_8bit(frame: &mut RawFrame) {
    let video = frame.as_video_mut().unwrap();
    let width = video.width as usize;
    if let VideoPayload::Planar { planes, strides } = &mut video.payload {
        for plane in planes.iter_mut() {
            if let Payload::Owned(bytes) = plane {
                let samples_10bit: Vec<u16> =
                    bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
                let row_width = width.max(1);
                let rows = samples_10bit.len().div_ceil(row_width).max(1);
                let mut error_buffer = vec![0i32; rows];
                let mut out = Vec::with_capacity(samples_10bit.len());
                for (row_idx, row) in samples_10bit.chunks(row_width).enumerate() {
                    let mut carried = error_buffer[row_idx];
                    for &sample in row {
                        let scaled = (sample as i32 >> 2) + carried;
                        let clamped = scaled.clamp(0, 255);
                        carried = scaled - clamped;
                        out.push(clamped as u8);
                    }
                    if row_idx < rows {
                        error_buffer[row_idx] = carried;
                    }
                }
                *bytes = out;
            }
        }
        if let Some(first) = strides.first_mut() {
            *first = width;
        }
    }
}

/// ITU-T T.35 header fields every rewritten payload shares
/// (`original_source/filters/video/video.c`'s `write_afd`/`write_bar_data`).
const T35_COUNTRY_CODE: u8 = 0xb5;
const T35_PROVIDER_CODE: u16 = 0x31;

/// ATSC A/53 `user_data_type_code` for `cc_data()` under the "GA94"
/// identifier, used for both CEA-608 and CEA-708 CDP payloads.
const GA94_TYPE_CC_DATA: u8 = 0x03;
/// ATSC A/53 `user_data_type_code` for `bar_data()` under "GA94"
/// (`original_source`'s `write_bar_data`).
const GA94_TYPE_BAR_DATA: u8 = 0x06;

fn t35(payload: Vec<u8>) -> UserData {
    UserData::T35 { country_code: T35_COUNTRY_CODE, provider_code: T35_PROVIDER_CODE, payload }
}

/// Wraps raw caption bytes verbatim behind a "GA94"/`cc_data()` header so
/// they survive byte-identical inside the T.35 payload (spec.md:222).
fn cc_data_t35_payload(raw_bytes: &[u8]) -> Vec<u8> {
    let mut out = b"GA94".to_vec();
    out.push(GA94_TYPE_CC_DATA);
    out.extend_from_slice(raw_bytes);
    out
}

/// Mirrors `write_afd`'s `afd_data()` bit layout: `'0'`, `active_format_flag`
/// (always 1 here), 6 reserved bits set to `1`, then 4 reserved bits of `1`
/// and the 4-bit active_format code.
fn afd_t35_payload(afd: u8) -> Vec<u8> {
    let mut out = b"DTG1".to_vec();
    out.push(0b0_1_000001);
    out.push(0xF0 | (afd & 0x0F));
    out
}

/// Mirrors `write_bar_data`'s layout under the "GA94"/`bar_data()` type code:
/// four presence flags (all set, since this crate's `BarData` always carries
/// all four line numbers) plus 4 reserved bits, then each line number as a
/// big-endian `u16`.
fn bar_data_t35_payload(top: u16, bottom: u16, left: u16, right: u16) -> Vec<u8> {
    let mut out = b"GA94".to_vec();
    out.push(GA94_TYPE_BAR_DATA);
    out.push(0xFF);
    for value in [top, bottom, left, right] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

/// Rewrites CEA-608, CEA-708 CDP, AFD, and bar-data entries attached to the
/// frame's user-data list into ITU-T T.35 "DTG1"/"GA94" SEI payloads
/// (spec.md §4.2 step 6), dropping malformed CEA-608 entries after logging,
/// and updates SAR from any AFD code present.
fn encapsulate_user_data(frame: &mut RawFrame, counters: &Counters) {
    let video = frame.as_video_mut().unwrap();
    let mut sar_from_afd = None;
    let mut rewritten = Vec::with_capacity(video.user_data.len());
    for item in std::mem::take(&mut video.user_data) {
        match item {
            UserData::Cea608 { bytes, .. } if bytes.len() % 2 != 0 => {
                warn!("dropping malformed CEA-608 user-data: odd byte count {}", bytes.len());
                counters.note_filter_overflow_drop();
            }
            UserData::Cea608 { bytes, .. } => rewritten.push(t35(cc_data_t35_payload(&bytes))),
            UserData::Cea708Cdp { bytes } => rewritten.push(t35(cc_data_t35_payload(&bytes))),
            UserData::Afd { afd } => {
                sar_from_afd = Some(afd_to_sar(afd));
                rewritten.push(t35(afd_t35_payload(afd)));
            }
            UserData::BarData { top, bottom, left, right } => {
                rewritten.push(t35(bar_data_t35_payload(top, bottom, left, right)));
            }
            already_t35 @ UserData::T35 { .. } => rewritten.push(already_t35),
        }
    }
    video.user_data = rewritten;
    if let Some(sar) = sar_from_afd {
        video.sar = Some(sar);
    }
}

fn afd_to_sar(afd: u8) -> (u32, u32) {
    match afd {
        // SMPTE 2016-3 codes describing a 16:9 active image.
        2 | 4 | 8 | 9 | 10 | 11 | 13 | 14 | 15 => (16, 9),
        _ => (4, 3),
    }
}

fn default_sar(frame: &mut RawFrame, default_4_3: bool) {
    let video = frame.as_video_mut().unwrap();
    if video.sar.is_some() {
        return;
    }
    let is_sd = video.width <= 720;
    if is_sd {
        video.sar = Some(if default_4_3 { (4, 3) } else { (16, 9) });
    }
}
