/// Fixed-capacity ring of recent samples with a running total.
///
/// Once `N` samples have been pushed, each new sample evicts the oldest one.
/// The windows used by the decompression stage are created with
/// [`AverageWindow::seeded`] so the total is never zero.
#[derive(Debug, Clone)]
pub struct AverageWindow<const N: usize> {
    samples: [u64; N],
    next: usize,
    len: usize,
    // Wide enough that N u64 samples never overflow it.
    total: u128,
}

impl<const N: usize> Default for AverageWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AverageWindow<N> {
    pub const fn new() -> Self {
        assert!(N > 0, "window must hold at least one sample");
        Self {
            samples: [0; N],
            next: 0,
            len: 0,
            total: 0,
        }
    }

    /// Creates a window holding a single `seed` sample.
    pub fn seeded(seed: u64) -> Self {
        let mut window = Self::new();
        window.push(seed);
        window
    }

    pub fn push(&mut self, sample: u64) {
        if self.len == N {
            self.total = self.total.saturating_sub(u128::from(self.samples[self.next]));
        } else {
            self.len += 1;
        }
        self.samples[self.next] = sample;
        self.total += u128::from(sample);
        self.next = (self.next + 1) % N;
    }

    /// Sum of the samples currently in the window, clamped to `u64::MAX`.
    pub fn total(&self) -> u64 {
        u64::try_from(self.total).unwrap_or(u64::MAX)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Integer mean of the window, zero when empty.
    pub fn average(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            u64::try_from(self.total / self.len as u128).unwrap_or(u64::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AverageWindow;

    #[test]
    fn evicts_oldest_sample_once_full() {
        let mut window = AverageWindow::<3>::new();
        window.push(10);
        window.push(20);
        window.push(30);
        assert_eq!(window.total(), 60);
        assert_eq!(window.average(), 20);

        window.push(40);
        assert_eq!(window.len(), 3);
        assert_eq!(window.total(), 90);
        assert_eq!(window.average(), 30);
    }

    #[test]
    fn seeded_window_is_never_zero() {
        let window = AverageWindow::<8>::seeded(1);
        assert_eq!(window.total(), 1);
        assert_eq!(window.average(), 1);
        assert!(AverageWindow::<8>::new().is_empty());
    }

    #[test]
    fn huge_samples_clamp_and_age_out_exactly() {
        let mut window = AverageWindow::<2>::new();
        window.push(u64::MAX);
        window.push(u64::MAX);
        assert_eq!(window.total(), u64::MAX);
        assert_eq!(window.average(), u64::MAX);

        window.push(5);
        assert_eq!(window.total(), u64::MAX);
        window.push(7);
        assert_eq!(window.total(), 12);
        assert_eq!(window.average(), 6);
    }

    #[test]
    fn seed_ages_out_after_a_full_window() {
        let mut window = AverageWindow::<2>::seeded(1);
        window.push(100);
        window.push(100);
        assert_eq!(window.total(), 200);
    }
}
