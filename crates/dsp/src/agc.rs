use num_complex::Complex32;

/// AGC: single-pole leaky gain controller.
///
/// `out = in * gain; gain += rate * (reference - |out|)`, with the gain
/// clamped to [0, max_gain]. The gain is the only state and persists across
/// blocks so a long fade does not reset the level estimate.
pub struct Agc {
    rate: f32,
    reference: f32,
    gain: f32,
    max_gain: f32,
}

impl Agc {
    pub fn new(rate: f32, reference: f32, gain: f32, max_gain: f32) -> Self {
        Self {
            rate,
            reference,
            gain,
            max_gain,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Process a block. Output length equals input length.
    pub fn work(&mut self, input: &[Complex32], output: &mut [Complex32]) {
        for (out, &sample) in output.iter_mut().zip(input.iter()) {
            let y = sample * self.gain;
            *out = y;
            self.gain += self.rate * (self.reference - y.norm());
            if self.gain > self.max_gain {
                self.gain = self.max_gain;
            } else if self.gain < 0.0 {
                self.gain = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agc_converges_to_reference() {
        let mut agc = Agc::new(0.01, 0.5, 1.0, 4000.0);

        let input = vec![Complex32::new(0.01, 0.0); 8192];
        let mut output = vec![Complex32::new(0.0, 0.0); 8192];
        agc.work(&input, &mut output);

        // After convergence the output envelope should sit near the reference
        let tail = &output[8000..];
        let avg: f32 = tail.iter().map(|s| s.norm()).sum::<f32>() / tail.len() as f32;
        assert!(
            (avg - 0.5).abs() < 0.05,
            "AGC output envelope = {}, expected ~0.5",
            avg
        );
    }

    #[test]
    fn test_agc_max_gain_clamp() {
        let mut agc = Agc::new(0.1, 0.5, 1.0, 10.0);

        // Silence drives the gain up; it must stop at max_gain
        let input = vec![Complex32::new(0.0, 0.0); 4096];
        let mut output = vec![Complex32::new(0.0, 0.0); 4096];
        agc.work(&input, &mut output);
        assert!(agc.gain() <= 10.0, "gain {} exceeded max", agc.gain());
    }

    #[test]
    fn test_agc_recovers_from_strong_signal() {
        let mut agc = Agc::new(0.01, 0.5, 1.0, 4000.0);
        let mut output = vec![Complex32::new(0.0, 0.0); 4096];

        // Strong signal pushes gain down
        agc.work(&vec![Complex32::new(5.0, 0.0); 4096], &mut output);
        let g_strong = agc.gain();

        // Weak signal pulls it back up
        agc.work(&vec![Complex32::new(0.01, 0.0); 4096], &mut output);
        assert!(agc.gain() > g_strong, "gain should rise after fade");
        assert!(agc.gain() >= 0.0);
    }
}
