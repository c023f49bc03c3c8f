use num_complex::Complex32;
use rustfft::FftPlanner;

/// Spectrum snapshot helper for the telemetry FFT branch.
///
/// Plans are cached by rustfft's planner, so varying input lengths (the
/// subsampled tail block changes size with the source block size) stay
/// cheap. Output is fftshifted power in dB.
pub struct SpectrumFft {
    planner: FftPlanner<f32>,
}

impl SpectrumFft {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Compute the centered power spectrum of `input` in dB.
    pub fn power_db(&mut self, input: &[Complex32]) -> Vec<f64> {
        if input.is_empty() {
            return Vec::new();
        }
        let fft = self.planner.plan_fft_forward(input.len());
        let mut buffer = input.to_vec();
        fft.process(&mut buffer);

        let n = buffer.len();
        let mut bins = vec![0.0f64; n];
        // fftshift: zero frequency lands in the middle of the plot
        for (k, value) in buffer.iter().enumerate() {
            let shifted = (k + n / 2) % n;
            bins[shifted] = 10.0 * ((value.norm_sqr() as f64 / n as f64) + 1e-20).log10();
        }
        bins
    }
}

impl Default for SpectrumFft {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_lands_in_center_bin() {
        let mut fft = SpectrumFft::new();
        let input = vec![Complex32::new(1.0, 0.0); 64];
        let bins = fft.power_db(&input);
        assert_eq!(bins.len(), 64);

        let (max_bin, _) = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(max_bin, 32, "DC should be centered after fftshift");
    }

    #[test]
    fn test_tone_offset_from_center() {
        let mut fft = SpectrumFft::new();
        let n = 128;
        let bin = 16usize;
        let input: Vec<Complex32> = (0..n)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();
        let bins = fft.power_db(&input);
        let (max_bin, _) = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(max_bin, n / 2 + bin);
    }

    #[test]
    fn test_odd_length_does_not_panic() {
        let mut fft = SpectrumFft::new();
        let input = vec![Complex32::new(0.5, -0.5); 219];
        let bins = fft.power_db(&input);
        assert_eq!(bins.len(), 219);
        assert!(bins.iter().all(|b| b.is_finite()));
    }
}
