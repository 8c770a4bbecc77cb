//! A fixed-size bloom filter carried by the client as an opaque token.
//!
//! Token layout, URL-safe base64 without padding:
//!
//! | bytes | field |
//! |-------|-------|
//! | 1     | version, currently `1` |
//! | 4     | `m`, bit count, u32 LE |
//! | 4     | `k`, hash rounds, u32 LE |
//! | 8 × ⌈m/64⌉ | bit words, u64 LE |

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use twox_hash::XxHash64;

use crate::error::{NearbyError, Result};

/// Sized for about 300 IDs at a 0.1% false-positive rate.
pub const DEFAULT_BITS: u32 = 4314;
pub const DEFAULT_HASHES: u32 = 10;

const TOKEN_VERSION: u8 = 1;
const HEADER_LEN: usize = 9;
const MAX_BITS: u32 = 1 << 20;
const MAX_HASHES: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    m: u32,
    k: u32,
    words: Vec<u64>,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self {
            m: DEFAULT_BITS,
            k: DEFAULT_HASHES,
            words: vec![0; word_count(DEFAULT_BITS)],
        }
    }
}

impl BloomFilter {
    pub fn new(m: u32, k: u32) -> Result<Self> {
        check_params(m, k)?;
        Ok(Self {
            m,
            k,
            words: vec![0; word_count(m)],
        })
    }

    pub fn insert(&mut self, item: &str) {
        for bit in positions(self.m, self.k, item) {
            self.words[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    /// False positives are possible, false negatives are not.
    pub fn contains(&self, item: &str) -> bool {
        positions(self.m, self.k, item).all(|bit| self.words[bit / 64] & (1u64 << (bit % 64)) != 0)
    }

    pub fn to_token(&self) -> String {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.words.len() * 8);
        bytes.push(TOKEN_VERSION);
        bytes.extend_from_slice(&self.m.to_le_bytes());
        bytes.extend_from_slice(&self.k.to_le_bytes());
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| invalid(format!("not base64: {e}")))?;

        let (header, body) = bytes
            .split_first_chunk::<HEADER_LEN>()
            .ok_or_else(|| invalid("truncated header".into()))?;
        if header[0] != TOKEN_VERSION {
            return Err(invalid(format!("unsupported version {}", header[0])));
        }

        let m = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let k = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
        check_params(m, k)?;

        if body.len() != word_count(m) * 8 {
            return Err(invalid(format!(
                "expected {} bytes of bits for m={m}, got {}",
                word_count(m) * 8,
                body.len()
            )));
        }

        let words = body
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();

        Ok(Self { m, k, words })
    }
}

/// Double hashing: bit `i` is `h1 + i * h2 mod m`.
fn positions(m: u32, k: u32, item: &str) -> impl Iterator<Item = usize> {
    let h1 = XxHash64::oneshot(0, item.as_bytes());
    let h2 = XxHash64::oneshot(1, item.as_bytes());
    (0..u64::from(k)).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % u64::from(m)) as usize)
}

fn word_count(m: u32) -> usize {
    (m as usize).div_ceil(64)
}

fn check_params(m: u32, k: u32) -> Result<()> {
    if m == 0 || m > MAX_BITS || k == 0 || k > MAX_HASHES {
        return Err(invalid(format!("unsupported filter size m={m} k={k}")));
    }
    Ok(())
}

fn invalid(reason: String) -> NearbyError {
    NearbyError::InvalidInput(format!("filter token: {reason}"))
}
