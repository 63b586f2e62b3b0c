use std::collections::HashSet;
use std::hash::Hash;

#[inline(always)]
pub fn square(n: f64) -> f64 {
    n * n
}

#[inline(always)]
pub fn sigmoid(n: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-n))
}

/// Index of the largest value, first one wins on ties. Empty slices map to 0.
pub fn max_index(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

const SEED_XOR: u128 = 0b10101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010101010;
pub fn stable_hash_seed(s: &str) -> [u8; 16] {
    let mut val = 17u128;
    for byte in s.as_bytes() {
        val = 31u128.wrapping_mul(val).wrapping_add(*byte as u128);
        val ^= SEED_XOR;
    }
    val.to_le_bytes()
}

pub fn into_string_vec<T, I>(val: T) -> Vec<String> where T: AsRef<[I]>, I: ToString {
    val.as_ref()
        .iter()
        .map(ToString::to_string)
        .collect()
}

pub fn first_duplicate<'a, T, I>(iter: T) -> Option<&'a I> where T: Iterator<Item=&'a I>, I: Eq + Hash + 'a {
    let mut set = HashSet::<&'a I>::new();
    for item in iter {
        if !set.insert(item) {
            return Some(item);
        }
    }
    None
}
