//! Small shared helpers

/// Integer ceiling division.
pub const fn div_round_up(value: usize, divisor: usize) -> usize {
    (value + divisor - 1) / divisor
}

/// Deterministic xorshift PRNG for decisions that only need to be
/// uniform-ish, such as TLB victim selection.
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e37_79b9 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, bound)`.
    pub fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up() {
        assert_eq!(div_round_up(0, 128), 0);
        assert_eq!(div_round_up(1, 128), 1);
        assert_eq!(div_round_up(128, 128), 1);
        assert_eq!(div_round_up(129, 128), 2);
    }

    #[test]
    fn round_up_is_exact_on_multiples() {
        assert_eq!(div_round_up(2048, 128), 16);
        assert_eq!(div_round_up(2049, 128), 17);
    }

    #[test]
    fn rng_stays_in_bound() {
        let mut rng = XorShift64::new(42);
        for _ in 0..1000 {
            assert!(rng.below(4) < 4);
        }
    }

    #[test]
    fn rng_zero_seed_still_advances() {
        let mut rng = XorShift64::new(0);
        let a = rng.next_u64();
        let b = rng.next_u64();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
