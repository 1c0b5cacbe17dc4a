//! Deterministic Fisher-Yates permutations driven by a combined seed string.
//!
//! Two algorithm versions exist. `Legacy` folds the seed string into 32
//! bits and drives mulberry32; it is kept only so historical games can be
//! replayed. `Current` draws big-endian words from HMAC-SHA256 keyed by the
//! combined seed and range-reduces them with rejection sampling.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag stored with every game and session
///
/// Missing or unrecognised tags decode as `Legacy`: records written before
/// versioning existed were produced by the legacy algorithm.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum FairnessVersion {
    #[default]
    Legacy,
    Current,
}

impl FairnessVersion {
    /// The only version new commitments are created with
    pub const FOR_NEW_COMMITMENTS: FairnessVersion = FairnessVersion::Current;

    pub fn tag(&self) -> &'static str {
        match self {
            FairnessVersion::Legacy => "v1",
            FairnessVersion::Current => "v2",
        }
    }

    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some("v2") | Some("current") => FairnessVersion::Current,
            _ => FairnessVersion::Legacy,
        }
    }
}

impl fmt::Display for FairnessVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl From<String> for FairnessVersion {
    fn from(tag: String) -> Self {
        Self::from_tag(Some(&tag))
    }
}

impl From<FairnessVersion> for String {
    fn from(version: FairnessVersion) -> Self {
        version.tag().to_string()
    }
}

/// Pure permutation generator
pub struct ShuffleEngine;

impl ShuffleEngine {
    /// Permute `0..item_count` from the combined seed string
    pub fn shuffle(combined_seed: &str, item_count: usize, version: FairnessVersion) -> Vec<usize> {
        let mut items: Vec<usize> = (0..item_count).collect();
        if item_count < 2 {
            return items;
        }

        match version {
            FairnessVersion::Legacy => {
                let mut rng = Mulberry32::new(fold_seed(combined_seed) as u32);
                for i in (1..item_count).rev() {
                    let j = (rng.next_f64() * (i + 1) as f64).floor() as usize;
                    items.swap(i, j);
                }
            }
            FairnessVersion::Current => {
                let mut stream = HmacWordStream::new(combined_seed.as_bytes());
                for i in (1..item_count).rev() {
                    let j = stream.uniform_below((i + 1) as u32) as usize;
                    items.swap(i, j);
                }
            }
        }

        items
    }
}

/// 31x rolling hash over UTF-16 code units, wrapping at 32 bits
fn fold_seed(seed: &str) -> i32 {
    seed.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32)
    })
}

struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Uniform float in [0, 1)
    fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        (t ^ (t >> 14)) as f64 / 4_294_967_296.0
    }
}

/// HMAC-SHA256(key, decimal counter) blocks consumed as 32-bit big-endian words
struct HmacWordStream {
    mac: HmacSha256,
    counter: u64,
    block: [u8; 32],
    offset: usize,
}

impl HmacWordStream {
    fn new(key: &[u8]) -> Self {
        let mac = <HmacSha256 as Mac>::new_from_slice(key)
            .expect("HMAC accepts keys of any length");
        Self {
            mac,
            counter: 0,
            block: [0u8; 32],
            offset: 32,
        }
    }

    fn next_u32(&mut self) -> u32 {
        if self.offset + 4 > self.block.len() {
            let mut mac = self.mac.clone();
            mac.update(self.counter.to_string().as_bytes());
            self.block.copy_from_slice(&mac.finalize().into_bytes());
            self.counter += 1;
            self.offset = 0;
        }
        let word = u32::from_be_bytes([
            self.block[self.offset],
            self.block[self.offset + 1],
            self.block[self.offset + 2],
            self.block[self.offset + 3],
        ]);
        self.offset += 4;
        word
    }

    /// Uniform integer in `0..range`, rejecting words at or above
    /// `floor(2^32 / range) * range`
    fn uniform_below(&mut self, range: u32) -> u32 {
        let range = range as u64;
        let limit = ((1u64 << 32) / range) * range;
        loop {
            let word = self.next_u32() as u64;
            if word < limit {
                return (word % range) as u32;
            }
        }
    }
}
