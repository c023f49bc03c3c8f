use num_complex::Complex32;

/// Exponential-average weight for the moment estimates.
const ALPHA: f64 = 0.001;

/// Streaming M2M4 SNR estimator (Pauluzzi & Beaulieu).
///
/// Tracks exponentially-averaged second and fourth moments of the recovered
/// symbols. For a constant-modulus signal in AWGN:
///
/// ```text
/// S = sqrt(2*M2^2 - M4)      N = M2 - S
/// ```
///
/// Reported SNR is clamped to >= 0 dB; the radicand can go negative on
/// junk input and is treated as zero signal.
pub struct SnrEstimator {
    y1: f64,
    y2: f64,
    current: f64,
    average: f64,
    peak: f64,
}

impl SnrEstimator {
    pub fn new() -> Self {
        Self {
            y1: 0.0,
            y2: 0.0,
            current: 0.0,
            average: 0.0,
            peak: 0.0,
        }
    }

    /// Update the moment estimates from one block of recovered symbols and
    /// recompute the SNR.
    pub fn update(&mut self, symbols: &[Complex32]) -> f64 {
        for &z in symbols {
            let m2 = z.norm_sqr() as f64;
            let m4 = m2 * m2;
            self.y1 = ALPHA * m2 + (1.0 - ALPHA) * self.y1;
            self.y2 = ALPHA * m4 + (1.0 - ALPHA) * self.y2;
        }
        if !self.y1.is_finite() {
            self.y1 = 0.0;
        }
        if !self.y2.is_finite() {
            self.y2 = 0.0;
        }

        let radicand = 2.0 * self.y1 * self.y1 - self.y2;
        let signal = if radicand > 0.0 { radicand.sqrt() } else { 0.0 };
        let noise = self.y1 - signal;

        let mut snr = if signal > 0.0 && noise > 0.0 {
            10.0 * (signal / noise).log10()
        } else {
            0.0
        };
        if !snr.is_finite() || snr < 0.0 {
            snr = 0.0;
        }

        self.current = snr;
        if snr > self.peak {
            self.peak = snr;
        }
        if snr > 0.0 {
            self.average = (self.average + snr) / 2.0;
        }
        snr
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }
}

impl Default for SnrEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic Gaussian-ish noise via an LCG + Box-Muller.
    fn noisy_bpsk(snr_db: f64, n: usize) -> Vec<Complex32> {
        let noise_power = 10f64.powf(-snr_db / 10.0);
        let sigma = (noise_power / 2.0).sqrt();
        let mut state = 0x2545F4914F6CDD1Du64;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        (0..n)
            .map(|i| {
                let sym = if i % 3 == 0 { 1.0 } else { -1.0 };
                let u1 = next().max(1e-12);
                let u2 = next();
                let r = (-2.0 * u1.ln()).sqrt();
                let theta = 2.0 * std::f64::consts::PI * u2;
                Complex32::new(
                    (sym + sigma * r * theta.cos()) as f32,
                    (sigma * r * theta.sin()) as f32,
                )
            })
            .collect()
    }

    #[test]
    fn test_high_snr_estimate() {
        let mut est = SnrEstimator::new();
        let samples = noisy_bpsk(20.0, 20000);
        let snr = est.update(&samples);
        assert!(snr > 12.0, "20 dB input should estimate high SNR, got {:.1}", snr);
    }

    #[test]
    fn test_low_snr_estimate_below_high() {
        let mut hi = SnrEstimator::new();
        let mut lo = SnrEstimator::new();
        let snr_hi = hi.update(&noisy_bpsk(20.0, 20000));
        let snr_lo = lo.update(&noisy_bpsk(3.0, 20000));
        assert!(
            snr_hi > snr_lo,
            "estimator not monotone: 20dB -> {:.1}, 3dB -> {:.1}",
            snr_hi,
            snr_lo
        );
    }

    #[test]
    fn test_snr_never_negative_and_peak_monotone() {
        let mut est = SnrEstimator::new();
        // Garbage input: zeros then spikes
        est.update(&vec![Complex32::new(0.0, 0.0); 1000]);
        assert!(est.current() >= 0.0);
        let p1 = est.peak();
        est.update(&noisy_bpsk(10.0, 10000));
        assert!(est.peak() >= p1);
        assert!(est.peak() >= est.current());
    }

    #[test]
    fn test_average_tracks_only_positive() {
        let mut est = SnrEstimator::new();
        est.update(&vec![Complex32::new(0.0, 0.0); 100]);
        assert_eq!(est.average(), 0.0);
        est.update(&noisy_bpsk(15.0, 20000));
        assert!(est.average() > 0.0);
    }
}
