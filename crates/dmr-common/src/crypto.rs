//! Keyed digests for the HBP login challenge and OpenBridge links.
//!
//! HBP authenticates a repeater once, at login, with `SHA-256(salt ‖
//! passphrase)`. OpenBridge authenticates every datagram: HMAC-SHA1 for
//! protocol versions 1-3 and a 16-byte keyed BLAKE2b MAC for 4 and later.
//! Verification always goes through [`Mac::verify_slice`], which compares
//! in constant time.

use blake2::digest::consts::U16;
use blake2::Blake2bMac;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// HMAC-SHA1 output length.
pub const HMAC_LEN: usize = 20;
/// Keyed BLAKE2b output length.
pub const BLAKE_LEN: usize = 16;
/// OpenBridge passphrases are NUL-padded to this many bytes.
pub const OBP_KEY_LEN: usize = 20;

type HmacSha1 = Hmac<Sha1>;
type Blake2bMac128 = Blake2bMac<U16>;

/// Computes the `RPTK` challenge response: `SHA-256(salt_be ‖ passphrase)`.
///
/// # Examples
///
/// ```
/// use dmr_common::crypto;
/// let a = crypto::challenge_response(0x0102_0304, b"passw0rd");
/// let b = crypto::challenge_response(0x0102_0304, b"passw0rd");
/// assert_eq!(a, b);
/// assert_ne!(a, crypto::challenge_response(0x0102_0305, b"passw0rd"));
/// ```
#[must_use]
pub fn challenge_response(salt: u32, passphrase: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.to_be_bytes());
    hasher.update(passphrase);
    hasher.finalize().into()
}

/// Compares a received challenge response with the expected one in
/// constant time.
#[must_use]
pub fn verify_challenge(salt: u32, passphrase: &[u8], received: &[u8; 32]) -> bool {
    let expected = challenge_response(salt, passphrase);
    expected
        .iter()
        .zip(received.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// NUL-pads (or truncates) an OpenBridge passphrase to the link key length.
#[must_use]
pub fn obp_key(passphrase: &[u8]) -> Vec<u8> {
    let mut key = passphrase.to_vec();
    key.resize(OBP_KEY_LEN, 0);
    key
}

fn hmac(key: &[u8]) -> Option<HmacSha1> {
    HmacSha1::new_from_slice(key).ok()
}

fn blake(key: &[u8]) -> Option<Blake2bMac128> {
    Blake2bMac128::new_with_salt_and_personal(key, &[], &[]).ok()
}

/// HMAC-SHA1 over `data`.
#[must_use]
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; HMAC_LEN] {
    match hmac(key) {
        Some(mut mac) => {
            mac.update(data);
            mac.finalize().into_bytes().into()
        }
        None => [0; HMAC_LEN],
    }
}

/// Constant-time HMAC-SHA1 check.
#[must_use]
pub fn verify_hmac_sha1(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match hmac(key) {
        Some(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        None => false,
    }
}

/// Keyed BLAKE2b-128 over `data`. Keys longer than 64 bytes yield an
/// all-zero tag, which [`verify_blake2b`] never accepts.
#[must_use]
pub fn blake2b_mac(key: &[u8], data: &[u8]) -> [u8; BLAKE_LEN] {
    match blake(key) {
        Some(mut mac) => {
            mac.update(data);
            mac.finalize().into_bytes().into()
        }
        None => [0; BLAKE_LEN],
    }
}

/// Constant-time keyed BLAKE2b-128 check.
#[must_use]
pub fn verify_blake2b(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match blake(key) {
        Some(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        None => false,
    }
}

/// Unkeyed 16-byte BLAKE2b digest of an encoded frame, used to spot
/// frames already seen earlier in a stream.
#[must_use]
pub fn payload_digest(data: &[u8]) -> [u8; BLAKE_LEN] {
    use blake2::digest::{Update, VariableOutput};
    let mut out = [0u8; BLAKE_LEN];
    if let Ok(mut hasher) = blake2::Blake2bVar::new(BLAKE_LEN) {
        hasher.update(data);
        if hasher.finalize_variable(&mut out).is_err() {
            out = [0; BLAKE_LEN];
        }
    }
    out
}

/// Returns the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```
/// let now = dmr_common::crypto::unix_now();
/// assert!(now > 1_700_000_000);
/// ```
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Returns the current Unix timestamp in nanoseconds, saturating at
/// `u64::MAX`.
#[must_use]
pub fn unix_now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
