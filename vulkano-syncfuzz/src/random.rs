// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Deterministic randomness.
//!
//! A test is fully described by its configuration and one 64-bit seed. The generator derives one
//! seed per generated operation from a [`SeedSequence`], and data written by commands is derived
//! from 32-bit seeds with [`data_rng`], so that the verification phase can regenerate exactly the
//! bytes the execution phase wrote.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Produces a stream of independent seeds from a base seed.
#[derive(Clone, Debug)]
pub struct SeedSequence {
    base: u64,
    counter: u64,
}

impl SeedSequence {
    #[inline]
    pub fn new(base: u64) -> Self {
        SeedSequence { base, counter: 0 }
    }

    /// Returns the next seed in the sequence.
    pub fn next_seed(&mut self) -> u64 {
        let seed = splitmix64(
            self.base
                .wrapping_add(self.counter.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
        );
        self.counter += 1;

        seed
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);

    x ^ (x >> 31)
}

/// Returns the generator for data seeded with `seed`.
#[inline]
pub fn data_rng(seed: u32) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(u64::from(seed))
}

/// Returns `len` bytes generated from `seed`.
pub fn random_bytes(seed: u32, len: usize) -> Vec<u8> {
    let mut bytes = vec![0; len];
    data_rng(seed).fill_bytes(&mut bytes);

    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn sequences_replay() {
        let mut a = SeedSequence::new(2830980989);
        let mut b = SeedSequence::new(2830980989);

        for _ in 0..32 {
            assert_eq!(a.next_seed(), b.next_seed());
        }

        let mut c = SeedSequence::new(2830980990);
        assert_ne!(a.next_seed(), c.next_seed());
    }

    #[test]
    fn seeds_within_a_sequence_differ() {
        let mut sequence = SeedSequence::new(0);
        let seeds: Vec<_> = (0..64).map(|_| sequence.next_seed()).collect();

        for (i, seed) in seeds.iter().enumerate() {
            assert!(!seeds[i + 1..].contains(seed));
        }
    }

    #[test]
    fn data_prefix_is_stable() {
        let long = random_bytes(5, 100);
        let short = random_bytes(5, 10);

        assert_eq!(&long[..10], &short[..]);
        assert_ne!(random_bytes(6, 10), short);

        let mut rng = data_rng(5);
        let first: u8 = rng.r#gen();
        assert_eq!(data_rng(5).r#gen::<u8>(), first);
    }
}
