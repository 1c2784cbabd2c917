//! Link Control coding for voice headers, terminators and embedded LC.
//!
//! A full LC is 72 bits (options, destination, source) protected by an
//! RS(12,9) checksum, then BPTC(196,96) encoded and interleaved into the
//! two 98-bit halves of a data-sync burst. The embedded LC carried in voice
//! bursts B-E is the same 72 bits with a 5-bit checksum, Hamming(16,11)
//! rows and column parity, split into four 32-bit fragments.

use crate::frame::PAYLOAD_LEN;
use crate::types::{id24, id24_bytes, DmrId};

/// Bits per burst payload.
pub const BURST_BITS: usize = PAYLOAD_LEN * 8;
/// BPTC(196,96) block size.
pub const FULL_LC_BITS: usize = 196;
/// One embedded LC fragment.
pub const EMB_FRAGMENT_BITS: usize = 32;

/// Group voice LC options.
pub const LC_OPT_GROUP: [u8; 3] = [0x00, 0x00, 0x00];
/// Unit-to-unit voice LC options.
pub const LC_OPT_UNIT: [u8; 3] = [0x03, 0x00, 0x00];

const HEADER_MASK: [u8; 3] = [0x96, 0x96, 0x96];
const TERMINATOR_MASK: [u8; 3] = [0x99, 0x99, 0x99];
const RS_POLY: [u8; 3] = [0x40, 0x38, 0x0E];

/// Captured unit-call voice header burst; its sync and slot-type centre
/// is reused when building synthetic headers.
pub const HEADER_TEMPLATE: [u8; PAYLOAD_LEN] = [
    0x4F, 0x2E, 0x00, 0xB5, 0x01, 0xAE, 0x3A, 0x00, 0x1C, 0x40, 0xA0, 0xC1, 0xCC, 0x7D, 0xFF,
    0x57, 0xD7, 0x5D, 0xF5, 0xD5, 0x06, 0x50, 0x26, 0xF8, 0x28, 0x80, 0xBD, 0x61, 0x6F, 0x13,
    0xF1, 0x85, 0x89,
];

/// Captured unit-call voice terminator burst.
pub const TERMINATOR_TEMPLATE: [u8; PAYLOAD_LEN] = [
    0x4F, 0x41, 0x00, 0x61, 0x01, 0x1E, 0x3A, 0x78, 0x1C, 0x30, 0xA0, 0x61, 0xCC, 0xBD, 0xFF,
    0x57, 0xD7, 0x5D, 0xF5, 0xD2, 0x53, 0x44, 0x25, 0xC0, 0x2F, 0xE0, 0xB1, 0x21, 0x67, 0x13,
    0xE8, 0x85, 0xBA,
];

/// A 72-bit Link Control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lc {
    /// FLCO and feature-set bytes.
    pub options: [u8; 3],
    /// Destination talkgroup or radio.
    pub dst: DmrId,
    /// Source radio.
    pub src: DmrId,
}

impl Lc {
    /// Group voice LC.
    #[must_use]
    pub const fn group(dst: DmrId, src: DmrId) -> Self {
        Self {
            options: LC_OPT_GROUP,
            dst,
            src,
        }
    }

    /// Wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[..3].copy_from_slice(&self.options);
        out[3..6].copy_from_slice(&id24_bytes(self.dst));
        out[6..].copy_from_slice(&id24_bytes(self.src));
        out
    }

    /// Reads wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 9]) -> Self {
        Self {
            options: [bytes[0], bytes[1], bytes[2]],
            dst: id24(&bytes[3..6]),
            src: id24(&bytes[6..9]),
        }
    }
}

/// Interleaved BPTC block for a header or terminator.
pub type FullLcBits = [bool; FULL_LC_BITS];
/// Embedded LC fragments for bursts B, C, D and E.
pub type EmbeddedLcBits = [[bool; EMB_FRAGMENT_BITS]; 4];

/// Encoder and decoder for the LC bit fields the router rewrites.
pub trait LcCodec {
    /// Voice header block.
    fn encode_header_lc(&self, lc: &Lc) -> FullLcBits;
    /// Voice terminator block.
    fn encode_terminator_lc(&self, lc: &Lc) -> FullLcBits;
    /// Embedded fragments for bursts B-E.
    fn encode_embedded_lc(&self, lc: &Lc) -> EmbeddedLcBits;
    /// Reads the LC of a voice header or terminator burst.
    fn decode_voice_header_or_terminator(&self, payload: &[u8; PAYLOAD_LEN]) -> Lc;
}

/// Standard BPTC(196,96) / RS(12,9) codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BptcLcCodec;

impl LcCodec for BptcLcCodec {
    fn encode_header_lc(&self, lc: &Lc) -> FullLcBits {
        bptc_encode(&with_rs(lc, HEADER_MASK))
    }

    fn encode_terminator_lc(&self, lc: &Lc) -> FullLcBits {
        bptc_encode(&with_rs(lc, TERMINATOR_MASK))
    }

    fn encode_embedded_lc(&self, lc: &Lc) -> EmbeddedLcBits {
        embedded_encode(&lc.to_bytes())
    }

    fn decode_voice_header_or_terminator(&self, payload: &[u8; PAYLOAD_LEN]) -> Lc {
        let bits = to_bits(payload);
        let mut raw = [false; FULL_LC_BITS];
        raw[..98].copy_from_slice(&bits[..98]);
        raw[98..].copy_from_slice(&bits[166..]);
        let data = bptc_extract(&raw);
        let bytes = from_bits(&data[..72]);
        let mut lc = [0u8; 9];
        lc.copy_from_slice(&bytes);
        Lc::from_bytes(&lc)
    }
}

/// Unpacks bytes MSB first.
#[must_use]
pub fn to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| b & (1 << i) != 0))
        .collect()
}

/// Packs bits MSB first; a trailing partial byte is zero filled.
#[must_use]
pub fn from_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | (u8::from(bit) << (7 - i)))
        })
        .collect()
}

fn write_bits(payload: &mut [u8; PAYLOAD_LEN], start: usize, bits: &[bool]) {
    for (i, &bit) in bits.iter().enumerate() {
        let pos = start + i;
        let mask = 0x80 >> (pos % 8);
        if bit {
            payload[pos / 8] |= mask;
        } else {
            payload[pos / 8] &= !mask;
        }
    }
}

/// Replaces the LC halves of a data-sync burst, keeping its sync and
/// slot type.
pub fn apply_full_lc(payload: &mut [u8; PAYLOAD_LEN], lc: &FullLcBits) {
    write_bits(payload, 0, &lc[..98]);
    write_bits(payload, 166, &lc[98..]);
}

/// Replaces the 32 embedded LC bits of a voice burst, keeping the EMB.
pub fn apply_embedded_lc(payload: &mut [u8; PAYLOAD_LEN], fragment: &[bool; EMB_FRAGMENT_BITS]) {
    write_bits(payload, 116, fragment);
}

/// Copies the 68-bit centre (sync and slot type) of `template` into
/// `payload`.
pub fn apply_sync(payload: &mut [u8; PAYLOAD_LEN], template: &[u8; PAYLOAD_LEN]) {
    let bits = to_bits(template);
    write_bits(payload, 98, &bits[98..166]);
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= 0x1D;
        }
        b >>= 1;
    }
    product
}

/// RS(12,9) parity over GF(2^8) with polynomial 0x11D.
fn rs129_parity(msg: &[u8; 9]) -> [u8; 3] {
    let mut parity = [0u8; 3];
    for &byte in msg {
        let feedback = byte ^ parity[2];
        parity[2] = parity[1] ^ gf_mul(RS_POLY[2], feedback);
        parity[1] = parity[0] ^ gf_mul(RS_POLY[1], feedback);
        parity[0] = gf_mul(RS_POLY[0], feedback);
    }
    [parity[2], parity[1], parity[0]]
}

fn with_rs(lc: &Lc, mask: [u8; 3]) -> [u8; 12] {
    let bytes = lc.to_bytes();
    let parity = rs129_parity(&bytes);
    let mut out = [0u8; 12];
    out[..9].copy_from_slice(&bytes);
    for i in 0..3 {
        out[9 + i] = parity[i] ^ mask[i];
    }
    out
}

const DATA_RANGES: [(usize, usize); 9] = [
    (4, 11),
    (16, 26),
    (31, 41),
    (46, 56),
    (61, 71),
    (76, 86),
    (91, 101),
    (106, 116),
    (121, 131),
];

fn hamming_15_11(d: &mut [bool]) {
    d[11] = d[0] ^ d[1] ^ d[2] ^ d[3] ^ d[5] ^ d[7] ^ d[8];
    d[12] = d[1] ^ d[2] ^ d[3] ^ d[4] ^ d[6] ^ d[8] ^ d[9];
    d[13] = d[2] ^ d[3] ^ d[4] ^ d[5] ^ d[7] ^ d[9] ^ d[10];
    d[14] = d[0] ^ d[1] ^ d[2] ^ d[4] ^ d[6] ^ d[7] ^ d[10];
}

fn hamming_13_9(d: &mut [bool; 13]) {
    d[9] = d[0] ^ d[1] ^ d[3] ^ d[5] ^ d[6];
    d[10] = d[0] ^ d[1] ^ d[2] ^ d[4] ^ d[6] ^ d[7];
    d[11] = d[0] ^ d[1] ^ d[2] ^ d[3] ^ d[5] ^ d[7] ^ d[8];
    d[12] = d[0] ^ d[2] ^ d[4] ^ d[5] ^ d[8];
}

fn hamming_16_11(d: &mut [bool]) {
    hamming_15_11(d);
    d[15] = d[0] ^ d[2] ^ d[5] ^ d[6] ^ d[8] ^ d[9] ^ d[10];
}

fn interleave_index(a: usize) -> usize {
    (a * 181) % FULL_LC_BITS
}

fn bptc_encode(data: &[u8; 12]) -> FullLcBits {
    let bits = to_bits(data);
    let mut block = [false; FULL_LC_BITS];
    let mut pos = 0;
    for &(lo, hi) in &DATA_RANGES {
        for slot in block.iter_mut().take(hi + 1).skip(lo) {
            *slot = bits[pos];
            pos += 1;
        }
    }
    for row in 0..9 {
        let start = row * 15 + 1;
        hamming_15_11(&mut block[start..start + 15]);
    }
    for c in 0..15 {
        let mut col = [false; 13];
        for (r, bit) in col.iter_mut().enumerate() {
            *bit = block[c + 1 + r * 15];
        }
        hamming_13_9(&mut col);
        for (r, bit) in col.iter().enumerate() {
            block[c + 1 + r * 15] = *bit;
        }
    }
    let mut out = [false; FULL_LC_BITS];
    for (a, bit) in block.iter().enumerate() {
        out[interleave_index(a)] = *bit;
    }
    out
}

fn bptc_extract(raw: &FullLcBits) -> Vec<bool> {
    let mut block = [false; FULL_LC_BITS];
    for (a, bit) in block.iter_mut().enumerate() {
        *bit = raw[interleave_index(a)];
    }
    DATA_RANGES
        .iter()
        .flat_map(|&(lo, hi)| block[lo..=hi].iter().copied())
        .collect()
}

fn five_bit_checksum(lc: &[u8; 9]) -> u8 {
    let sum: u32 = lc.iter().map(|&b| u32::from(b)).sum();
    (sum % 31) as u8
}

fn embedded_encode(lc: &[u8; 9]) -> EmbeddedLcBits {
    let lc_bits = to_bits(lc);
    let crc = five_bit_checksum(lc);
    let mut data = [false; 128];
    data[106] = crc & 0x01 != 0;
    data[90] = crc & 0x02 != 0;
    data[74] = crc & 0x04 != 0;
    data[58] = crc & 0x08 != 0;
    data[42] = crc & 0x10 != 0;

    let spans = [
        (0, 11),
        (16, 27),
        (32, 42),
        (48, 58),
        (64, 74),
        (80, 90),
        (96, 106),
    ];
    let mut b = 0;
    for (lo, hi) in spans {
        for slot in data.iter_mut().take(hi).skip(lo) {
            *slot = lc_bits[b];
            b += 1;
        }
    }
    for row in (0..112).step_by(16) {
        hamming_16_11(&mut data[row..row + 16]);
    }
    for a in 0..16 {
        data[a + 112] = (0..7).fold(false, |acc, r| acc ^ data[a + r * 16]);
    }

    let mut raw = [false; 128];
    let mut b = 0;
    for bit in &mut raw {
        *bit = data[b];
        b += 16;
        if b > 127 {
            b -= 127;
        }
    }
    let mut out = [[false; EMB_FRAGMENT_BITS]; 4];
    for (i, fragment) in out.iter_mut().enumerate() {
        fragment.copy_from_slice(&raw[i * 32..(i + 1) * 32]);
    }
    out
}
