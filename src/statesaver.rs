//! Versioned, labeled binary snapshot codec.
//!
//! Layout: 2-byte format version, a preview block (3-byte big-endian byte
//! count, zero when absent), then one record per state field in ascending
//! label order. A record is a NUL-terminated label followed by a 3-byte
//! big-endian payload length and the payload bytes; scalar payloads are
//! big-endian at their natural width (the two high prefix bytes are zero,
//! so the prefix doubles as the scalar's width). Unknown labels are skipped
//! by their length prefix, which keeps old engines able to read newer
//! streams; labels absent from a stream leave the corresponding field at
//! its pre-load value.

use std::sync::OnceLock;

use crate::savestate::SaveState;
use crate::video::{SCREEN_HEIGHT, SCREEN_WIDTH};

pub const VERSION: [u8; 2] = [0x00, 0x02];
/// Byte length of a non-empty preview block: one 32-bit pixel per dot.
pub const PREVIEW_LEN: usize = SCREEN_WIDTH * SCREEN_HEIGHT * 4;

/// One codec entry: a label plus the save/load accessors for its field.
pub struct Saver {
    pub label: &'static str,
    save: fn(&SaveState, &mut Vec<u8>),
    load: fn(&mut SaveState, &[u8]),
}

fn put24(out: &mut Vec<u8>, n: u32) {
    out.extend([(n >> 16) as u8, (n >> 8) as u8, n as u8]);
}

fn get24(data: &[u8]) -> usize {
    (data[0] as usize) << 16 | (data[1] as usize) << 8 | data[2] as usize
}

fn put_scalar(out: &mut Vec<u8>, val: u64, width: usize) {
    put24(out, width as u32);
    for i in (0..width).rev() {
        out.push((val >> (i * 8)) as u8);
    }
}

/// Payloads longer than 4 bytes contribute only their trailing 4 bytes.
fn get_scalar(data: &[u8]) -> u64 {
    let data = if data.len() > 4 {
        &data[data.len() - 4..]
    } else {
        data
    };
    data.iter().fold(0u64, |acc, &b| acc << 8 | b as u64)
}

fn put_buffer(out: &mut Vec<u8>, data: &[u8]) {
    put24(out, data.len() as u32);
    out.extend_from_slice(data);
}

/// Copies what fits; a short payload fills only the leading bytes.
fn load_buffer(dest: &mut [u8], data: &[u8]) {
    let n = dest.len().min(data.len());
    dest[..n].copy_from_slice(&data[..n]);
}

macro_rules! scalar {
    ($label:literal, $field:ident) => {
        Saver {
            label: $label,
            save: |s, out| put_scalar(out, s.$field as u64, std::mem::size_of_val(&s.$field)),
            load: |s, data| s.$field = get_scalar(data) as _,
        }
    };
}

macro_rules! buffer {
    ($label:literal, $field:ident) => {
        Saver {
            label: $label,
            save: |s, out| put_buffer(out, &s.$field),
            load: |s, data| load_buffer(&mut s.$field, data),
        }
    };
}

/// The label registry, built lazily exactly once. Sorted and duplicate-free
/// by construction; both invariants are asserted the first time it is used.
pub fn saver_list() -> &'static [Saver] {
    static LIST: OnceLock<Vec<Saver>> = OnceLock::new();
    LIST.get_or_init(|| {
        let mut list = vec![
            scalar!("a", a),
            scalar!("b", b),
            scalar!("c", c),
            scalar!("c1actv", c1actv),
            scalar!("c1duty", c1duty),
            scalar!("c1dutyp", c1dutyp),
            scalar!("c1envt", c1envt),
            scalar!("c1envv", c1envv),
            scalar!("c1freq", c1freq),
            scalar!("c1freqt", c1freqt),
            scalar!("c1len", c1len),
            scalar!("c1lenon", c1lenon),
            scalar!("c1nr10", c1nr10),
            scalar!("c1nr12", c1nr12),
            scalar!("c1swpen", c1swpen),
            scalar!("c1swpsh", c1swpsh),
            scalar!("c1swpt", c1swpt),
            scalar!("c2actv", c2actv),
            scalar!("c2duty", c2duty),
            scalar!("c2dutyp", c2dutyp),
            scalar!("c2envt", c2envt),
            scalar!("c2envv", c2envv),
            scalar!("c2freq", c2freq),
            scalar!("c2freqt", c2freqt),
            scalar!("c2len", c2len),
            scalar!("c2lenon", c2lenon),
            scalar!("c2nr22", c2nr22),
            scalar!("c3actv", c3actv),
            scalar!("c3dacon", c3dacon),
            scalar!("c3freq", c3freq),
            scalar!("c3freqt", c3freqt),
            scalar!("c3len", c3len),
            scalar!("c3lenon", c3lenon),
            scalar!("c3lrt", c3lrt),
            scalar!("c3pos", c3pos),
            scalar!("c3smpl", c3smpl),
            scalar!("c3vol", c3vol),
            scalar!("c4actv", c4actv),
            scalar!("c4envt", c4envt),
            scalar!("c4envv", c4envv),
            scalar!("c4freqt", c4freqt),
            scalar!("c4len", c4len),
            scalar!("c4lenon", c4lenon),
            scalar!("c4lfsr", c4lfsr),
            scalar!("c4nr43", c4nr43),
            scalar!("cc", cc),
            scalar!("d", d),
            scalar!("dmadst", dmadst),
            scalar!("dmasrc", dmasrc),
            scalar!("e", e),
            scalar!("f", f),
            scalar!("h", h),
            scalar!("halt", halt),
            scalar!("hdma", hdma),
            scalar!("hdma5", hdma5),
            scalar!("ime", ime),
            buffer!("ioamhram", ioamhram),
            scalar!("l", l),
            scalar!("ldivup", ldivup),
            scalar!("lodmaup", lodmaup),
            scalar!("ltimaup", ltimaup),
            scalar!("nr50", nr50),
            scalar!("nr51", nr51),
            scalar!("odmapos", odmapos),
            scalar!("odmasrc", odmasrc),
            scalar!("pc", pc),
            scalar!("rambank", rambank),
            scalar!("rambmod", rambmod),
            scalar!("rombank", rombank),
            scalar!("rtcbase", rtcbase),
            scalar!("rtcdh", rtcdh),
            scalar!("rtcdl", rtcdl),
            scalar!("rtch", rtch),
            scalar!("rtchalt", rtchalt),
            scalar!("rtclld", rtclld),
            scalar!("rtcm", rtcm),
            scalar!("rtcs", rtcs),
            scalar!("serialt", serialt),
            scalar!("skip", skip),
            scalar!("sndon", sndon),
            scalar!("sp", sp),
            scalar!("spucntr", spucntr),
            buffer!("sram", sram),
            scalar!("sramon", sramon),
            scalar!("vcycles", vcycles),
            buffer!("vram", vram),
            buffer!("waveram", waveram),
            scalar!("winypos", winypos),
            buffer!("wram", wram),
        ];
        list.sort_by(|x, y| x.label.cmp(y.label));
        for pair in list.windows(2) {
            assert!(pair[0].label < pair[1].label, "duplicate label {:?}", pair[1].label);
        }
        list
    })
}

/// Encode `state` into the snapshot byte format.
pub fn save_state_to_vec(state: &SaveState, preview: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(VERSION);
    match preview {
        Some(pixels) => {
            debug_assert_eq!(pixels.len(), PREVIEW_LEN);
            put24(&mut out, pixels.len() as u32);
            out.extend_from_slice(pixels);
        }
        None => put24(&mut out, 0),
    }
    for saver in saver_list() {
        out.extend(saver.label.as_bytes());
        out.push(0);
        (saver.save)(state, &mut out);
    }
    out
}

/// Decode a snapshot stream into `state`. Returns false on a malformed or
/// wrong-version stream; `state` may then be partially written, so callers
/// decode into a scratch copy.
pub fn load_state_from_slice(state: &mut SaveState, data: &[u8]) -> bool {
    // Only the major version byte gates the load; minor revisions stay
    // readable through the unknown-label tolerance.
    if data.len() < 5 || data[0] != VERSION[0] {
        return false;
    }
    let preview_len = get24(&data[2..5]);
    let mut pos = 5 + preview_len;
    if preview_len != 0 && preview_len != PREVIEW_LEN || pos > data.len() {
        return false;
    }

    let list = saver_list();
    let max_label = list.iter().map(|s| s.label.len()).max().unwrap_or(0);
    let mut next = 0;
    while pos < data.len() {
        let window = &data[pos..data.len().min(pos + max_label + 1)];
        let Some(nul) = window.iter().position(|&b| b == 0) else {
            return false;
        };
        let Ok(label) = std::str::from_utf8(&window[..nul]) else {
            return false;
        };
        pos += nul + 1;
        if pos + 3 > data.len() {
            return false;
        }
        let len = get24(&data[pos..pos + 3]);
        pos += 3;
        if pos + len > data.len() {
            return false;
        }
        let payload = &data[pos..pos + len];
        pos += len;

        // Fast path: records usually arrive in exactly the registry order.
        if next < list.len() && list[next].label == label {
            (list[next].load)(state, payload);
            next += 1;
        } else if let Ok(i) = list[next..].binary_search_by(|s| s.label.cmp(&label)) {
            (list[next + i].load)(state, payload);
            next += i + 1;
        }
        // No match: an unknown (newer) label, skipped via its prefix.
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> SaveState {
        let mut s = SaveState {
            cc: 0x0123_4567,
            pc: 0x8001,
            sp: 0xFFFE,
            a: 0x11,
            f: 0xB0,
            rombank: 0x0105,
            serialt: 0xFFFF_FFFF,
            ..SaveState::default()
        };
        s.vram = vec![0x22; 0x2000];
        s.wram = vec![0x33; 0x2000];
        s.ioamhram = vec![0x44; 0x200];
        s.sram = vec![0x55; 0x800];
        s.waveram = (0..0x10).collect();
        s
    }

    fn sized_like(other: &SaveState) -> SaveState {
        let mut s = SaveState::default();
        s.vram = vec![0; other.vram.len()];
        s.wram = vec![0; other.wram.len()];
        s.ioamhram = vec![0; other.ioamhram.len()];
        s.sram = vec![0; other.sram.len()];
        s.waveram = vec![0; other.waveram.len()];
        s
    }

    #[test]
    fn label_table_is_sorted_and_unique() {
        let list = saver_list();
        for pair in list.windows(2) {
            assert!(pair[0].label < pair[1].label);
        }
    }

    #[test]
    fn encode_decode_encode_is_bit_identical() {
        let state = sample_state();
        let bytes = save_state_to_vec(&state, None);
        let mut restored = sized_like(&state);
        assert!(load_state_from_slice(&mut restored, &bytes));
        assert_eq!(restored.cc, state.cc);
        assert_eq!(restored.pc, state.pc);
        assert_eq!(restored.rombank, state.rombank);
        assert_eq!(restored.serialt, state.serialt);
        assert_eq!(restored.vram, state.vram);
        assert_eq!(restored.waveram, state.waveram);
        assert_eq!(save_state_to_vec(&restored, None), bytes);
    }

    #[test]
    fn preview_block_is_skipped_on_load() {
        let state = sample_state();
        let preview = vec![0xAAu8; PREVIEW_LEN];
        let bytes = save_state_to_vec(&state, Some(&preview));
        let mut restored = sized_like(&state);
        assert!(load_state_from_slice(&mut restored, &bytes));
        assert_eq!(restored.pc, state.pc);
    }

    #[test]
    fn unknown_labels_are_skipped() {
        let state = sample_state();
        let mut bytes = save_state_to_vec(&state, None);
        // Append a record from a hypothetical newer format.
        bytes.extend(b"zz\0");
        bytes.extend([0x00, 0x00, 0x02, 0xDE, 0xAD]);
        // And splice one in front of all known records.
        let mut spliced = bytes[..5].to_vec();
        spliced.extend(b"aa\0");
        spliced.extend([0x00, 0x00, 0x01, 0x99]);
        spliced.extend(&bytes[5..]);
        let mut restored = sized_like(&state);
        assert!(load_state_from_slice(&mut restored, &spliced));
        assert_eq!(restored.pc, state.pc);
        assert_eq!(restored.vram, state.vram);
    }

    #[test]
    fn absent_labels_leave_the_previous_value() {
        let mut state = sized_like(&sample_state());
        state.pc = 0x1234;
        state.a = 0x56;
        // A stream containing only the "sp" record.
        let mut bytes = VERSION.to_vec();
        bytes.extend([0, 0, 0]);
        bytes.extend(b"sp\0");
        bytes.extend([0x00, 0x00, 0x02, 0xC0, 0x00]);
        assert!(load_state_from_slice(&mut state, &bytes));
        assert_eq!(state.sp, 0xC000);
        assert_eq!(state.pc, 0x1234);
        assert_eq!(state.a, 0x56);
    }

    #[test]
    fn oversized_scalars_keep_their_trailing_bytes() {
        let mut state = sized_like(&sample_state());
        let mut bytes = VERSION.to_vec();
        bytes.extend([0, 0, 0]);
        bytes.extend(b"cc\0");
        bytes.extend([0x00, 0x00, 0x06, 0xEE, 0xFF, 0x01, 0x02, 0x03, 0x04]);
        assert!(load_state_from_slice(&mut state, &bytes));
        assert_eq!(state.cc, 0x0102_0304);
    }

    #[test]
    fn wrong_major_version_is_rejected() {
        let state = sample_state();
        let mut bytes = save_state_to_vec(&state, None);
        bytes[0] = 0x01;
        let mut restored = sized_like(&state);
        assert!(!load_state_from_slice(&mut restored, &bytes));
        assert_eq!(restored.pc, 0);
        assert!(!load_state_from_slice(&mut restored, &bytes[..3]));
    }

    #[test]
    fn newer_minor_versions_still_load() {
        let state = sample_state();
        let mut bytes = save_state_to_vec(&state, None);
        bytes[1] = 0x03;
        let mut restored = sized_like(&state);
        assert!(load_state_from_slice(&mut restored, &bytes));
        assert_eq!(restored.pc, state.pc);
        assert_eq!(restored.vram, state.vram);
    }

    #[test]
    fn truncated_streams_are_rejected() {
        let state = sample_state();
        let bytes = save_state_to_vec(&state, None);
        let mut restored = sized_like(&state);
        assert!(!load_state_from_slice(&mut restored, &bytes[..bytes.len() - 1]));
    }
}
