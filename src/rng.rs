/// Thomas Wang's 32-bit integer hash.
pub fn wang_hash(mut v: u32) -> u32 {
    v = (v ^ 61) ^ (v >> 16);
    v = v.wrapping_mul(9);
    v ^= v >> 4;
    v = v.wrapping_mul(0x27d4_eb2d);
    v ^= v >> 15;
    v
}

/// Deterministic generator that feeds its state back through `wang_hash`.
/// Cheap and reproducible; not suitable for anything statistical.
#[derive(Clone, Debug)]
pub struct WangRng {
    state: u32,
}

impl WangRng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: seed ^ 0x9e37_79b9,
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = wang_hash(self.state);
        self.state
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        const SCALE: f32 = 1.0 / 4_294_967_296.0;
        // Top 24 bits only, so the result can't round up to 1.0.
        ((self.next_u32() >> 8) << 8) as f32 * SCALE
    }

    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = WangRng::new(42);
        let mut b = WangRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = WangRng::new(1);
        let mut b = WangRng::new(2);
        let same = (0..32).filter(|_| a.next_u32() == b.next_u32()).count();
        assert!(same < 32);
    }

    #[test]
    fn test_unit_interval() {
        let mut rng = WangRng::new(7);
        for _ in 0..10_000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn test_wang_hash_known_values() {
        assert_eq!(wang_hash(0), 3_232_319_850);
        assert_eq!(wang_hash(1), 663_891_101);
    }

    #[test]
    fn test_seed_is_mixed_before_first_draw() {
        let mut rng = WangRng::new(42);
        assert_eq!(rng.next_u32(), 2_899_945_578);
    }
}
