pub mod rand {
    use std::cell::RefCell;

    /// Xorshift64 generator. Every randomised step in the crate draws from one
    /// of these, either the thread-local instance or a locally seeded one.
    #[derive(Clone, Debug)]
    pub struct XorShift64 {
        state: u64,
    }

    impl XorShift64 {
        pub fn new(seed: u64) -> Self {
            Self {
                state: if seed == 0 { 88172645463325252 } else { seed },
            }
        }

        pub fn from_entropy() -> Self {
            let mut seed_buf = [0u8; 8];
            if getrandom::getrandom(&mut seed_buf).is_err() {
                // no OS entropy: fall back to the fixed default state
                return Self::new(0);
            }
            Self::new(u64::from_le_bytes(seed_buf))
        }

        pub fn next_u64(&mut self) -> u64 {
            let mut x = self.state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.state = x;
            x
        }

        pub fn next_u32(&mut self) -> u32 {
            (self.next_u64() >> 32) as u32
        }

        /// Float in [0, 1) with 24 bits of randomness.
        pub fn gen_f32(&mut self) -> f32 {
            let v = self.next_u32() >> 8;
            (v as f32) * (1.0 / 16777216.0)
        }

        pub fn gen_range(&mut self, start: usize, end: usize) -> usize {
            if start >= end {
                return start;
            }
            let range = (end - start) as u64;
            start + (self.next_u64() % range) as usize
        }

        pub fn gen_bool(&mut self, p: f32) -> bool {
            self.gen_f32() < p
        }

        // Fisher-Yates
        pub fn shuffle<T>(&mut self, slice: &mut [T]) {
            for i in (1..slice.len()).rev() {
                let j = self.gen_range(0, i + 1);
                slice.swap(i, j);
            }
        }

        pub fn normal(&mut self, size: usize, mu: f32, sigma: f32) -> Vec<f32> {
            let mut ans = Vec::with_capacity(size);

            // Box-Muller
            while ans.len() < size {
                let u1 = self.gen_f32().max(1e-7);
                let u2 = self.gen_f32();

                let r = (-2.0 * u1.ln()).sqrt();
                let theta = 2.0 * std::f32::consts::PI * u2;

                ans.push(mu + sigma * r * theta.cos());
                if ans.len() < size {
                    ans.push(mu + sigma * r * theta.sin());
                }
            }
            ans
        }
    }

    thread_local! {
        static RNG: RefCell<XorShift64> = RefCell::new(XorShift64::from_entropy());
    }

    /// Reseeds the thread-local generator. Call once at the start of an
    /// experiment to make initialisation and shuffling reproducible.
    pub fn seed(seed: u64) {
        RNG.with(|rng| *rng.borrow_mut() = XorShift64::new(seed));
    }

    /// Runs `f` with the thread-local generator.
    pub fn with_rng<T>(f: impl FnOnce(&mut XorShift64) -> T) -> T {
        RNG.with(|rng| f(&mut rng.borrow_mut()))
    }

    pub fn get_random_normal(size: usize, mu: f32, sigma: f32) -> Vec<f32> {
        with_rng(|r| r.normal(size, mu, sigma))
    }

    pub fn get_random_uniform(size: usize, low: f32, high: f32) -> Vec<f32> {
        with_rng(|r| (0..size).map(|_| low + (high - low) * r.gen_f32()).collect())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn seeded_streams_repeat() {
            let mut a = XorShift64::new(42);
            let mut b = XorShift64::new(42);
            let xs: Vec<u64> = (0..5).map(|_| a.next_u64()).collect();
            let ys: Vec<u64> = (0..5).map(|_| b.next_u64()).collect();
            assert_eq!(xs, ys);

            seed(7);
            let first = get_random_normal(4, 0.0, 1.0);
            seed(7);
            assert_eq!(first, get_random_normal(4, 0.0, 1.0));
        }

        #[test]
        fn ranges_are_respected() {
            let mut rng = XorShift64::new(3);
            for _ in 0..1000 {
                let v = rng.gen_f32();
                assert!((0.0..1.0).contains(&v));
                assert!((5..9).contains(&rng.gen_range(5, 9)));
            }
            assert_eq!(rng.gen_range(4, 4), 4);

            let u = get_random_uniform(200, -2.0, 3.0);
            assert!(u.iter().all(|v| (-2.0..3.0).contains(v)));
        }

        #[test]
        fn shuffle_is_a_permutation() {
            let mut v: Vec<usize> = (0..50).collect();
            XorShift64::new(9).shuffle(&mut v);
            assert_ne!(v, (0..50).collect::<Vec<_>>());
            v.sort_unstable();
            assert_eq!(v, (0..50).collect::<Vec<_>>());
        }

        #[test]
        fn normal_moments() {
            let xs = XorShift64::new(1).normal(20000, 2.0, 0.5);
            let mean = xs.iter().sum::<f32>() / xs.len() as f32;
            let var = xs.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / xs.len() as f32;
            assert!((mean - 2.0).abs() < 0.02);
            assert!((var.sqrt() - 0.5).abs() < 0.02);
        }
    }
}
