//! Fixed-size, double-hashed bloom filter over 64-bit fingerprints.
//!
//! Loaders keep one of these over the short names of everything they
//! contain, so a lookup can be rejected without touching the filesystem or
//! the archive. The filter never reports a false negative; false positives
//! stay near the probability it was sized for.
//!
//! The serialized form is exact (hash function count, bit count, raw words,
//! big-endian) so a filter restored from a persisted index answers every
//! query the same way as the one that was written.

use std::f64::consts::LN_2;
use std::io::{self, Read, Write};

/// False-positive target used for loader name filters.
pub const DEFAULT_PROBABILITY: f64 = 0.005;

/// Lowest target honored; smaller ones are raised to it.
pub const MIN_PROBABILITY: f64 = 1e-9;

/// Upper bound on filter size (32 MiB of words), also enforced on read.
pub const MAX_BIT_COUNT: u32 = 1 << 28;

const MAX_HASH_FUNCTIONS: i32 = 64;

/// A usable false-positive target lies strictly between 0 and 1.
pub fn is_valid_probability(p: f64) -> bool {
    p > 0.0 && p < 1.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    hash_function_count: u32,
    bit_count: u32,
    bits: Box<[u64]>,
}

impl BloomFilter {
    /// Sizes a filter for `max_elements`. Targets outside (0, 1) fall back
    /// to [`DEFAULT_PROBABILITY`].
    pub fn new(max_elements: usize, false_probability: f64) -> Self {
        let false_probability = if is_valid_probability(false_probability) {
            false_probability.max(MIN_PROBABILITY)
        } else {
            DEFAULT_PROBABILITY
        };
        let bits_per_element = (-false_probability.ln() / (LN_2 * LN_2)).ceil().max(1.0);
        let hash_function_count = (bits_per_element * LN_2).ceil().max(1.0) as u32;
        let wanted = (max_elements.max(1) as u64).saturating_mul(bits_per_element as u64);
        // prime gaps this low are far below the 1024 of headroom
        let bit_count = next_prime(wanted.min(u64::from(MAX_BIT_COUNT) - 1024) as u32);
        Self {
            hash_function_count,
            bit_count,
            bits: vec![0u64; words_for(bit_count)].into_boxed_slice(),
        }
    }

    pub fn hash_function_count(&self) -> u32 {
        self.hash_function_count
    }

    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    pub fn add(&mut self, h1: i32, h2: i32) {
        for i in 0..self.hash_function_count as i32 {
            let index = self.bit_index(i, h1, h2);
            self.bits[(index / 64) as usize] |= 1u64 << (index % 64);
        }
    }

    pub fn might_contain(&self, h1: i32, h2: i32) -> bool {
        (0..self.hash_function_count as i32).all(|i| {
            let index = self.bit_index(i, h1, h2);
            self.bits[(index / 64) as usize] & (1u64 << (index % 64)) != 0
        })
    }

    pub fn add_hash(&mut self, hash: u64) {
        let (h1, h2) = split(hash);
        self.add(h1, h2);
    }

    pub fn might_contain_hash(&self, hash: u64) -> bool {
        let (h1, h2) = split(hash);
        self.might_contain(h1, h2)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.hash_function_count as i32).to_be_bytes())?;
        out.write_all(&(self.bit_count as i32).to_be_bytes())?;
        for word in self.bits.iter() {
            out.write_all(&word.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let hash_function_count = read_i32(input)?;
        let bit_count = read_i32(input)?;
        if !(1..=MAX_HASH_FUNCTIONS).contains(&hash_function_count)
            || bit_count <= 0
            || bit_count as u32 > MAX_BIT_COUNT
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid bloom filter header: k={hash_function_count}, bits={bit_count}"),
            ));
        }

        let bit_count = bit_count as u32;
        let mut bits = vec![0u64; words_for(bit_count)];
        let mut word = [0u8; 8];
        for slot in bits.iter_mut() {
            input.read_exact(&mut word)?;
            *slot = u64::from_be_bytes(word);
        }

        Ok(Self {
            hash_function_count: hash_function_count as u32,
            bit_count,
            bits: bits.into_boxed_slice(),
        })
    }

    fn bit_index(&self, i: i32, h1: i32, h2: i32) -> u32 {
        let k = self.hash_function_count as i32;
        let combined = i.wrapping_mul(h1).wrapping_add(h2.wrapping_mul(k - i));
        combined.unsigned_abs() % self.bit_count
    }
}

pub(crate) fn read_i32<R: Read>(input: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn split(hash: u64) -> (i32, i32) {
    (hash as u32 as i32, (hash >> 32) as u32 as i32)
}

fn words_for(bit_count: u32) -> usize {
    (bit_count as usize).div_ceil(64)
}

fn next_prime(n: u32) -> u32 {
    let mut candidate = if n % 2 == 0 { n + 1 } else { n };
    while !is_prime(candidate) {
        candidate += 2;
    }
    candidate
}

fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let n = u64::from(n);
    let mut i = 5u64;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}
