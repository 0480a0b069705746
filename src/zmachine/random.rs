use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// The opcode-visible random source. Seeded operation exists both for the
// reseed form of the random opcode and so a driver can make whole runs
// reproducible.
pub struct ZRandom {
    rng: StdRng,
}

impl ZRandom {
    pub fn new() -> ZRandom {
        ZRandom {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> ZRandom {
        ZRandom {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        debug!("rng reseeded with {}", seed);
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn reseed_entropy(&mut self) {
        debug!("rng reseeded from entropy");
        self.rng = StdRng::from_entropy();
    }

    // Uniform in [1, n]. n must be positive; the opcode layer handles the
    // zero and negative reseed forms.
    pub fn range(&mut self, n: u16) -> u16 {
        debug_assert!(n > 0);
        self.rng.gen_range(1..=n)
    }
}
