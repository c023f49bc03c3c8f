use num_complex::Complex32;
use std::f32::consts::PI;

/// Order-2 Costas loop for BPSK carrier recovery.
///
/// De-rotates the stream by the tracked phase; the decision-directed error
/// for BPSK is `re(y) * im(y)`, pushing the constellation onto the real
/// axis. `alpha` is the proportional gain from config (`xrit.pll_alpha`),
/// the integral gain is `alpha^2 / 4`. Phase and frequency persist across
/// blocks.
pub struct CostasLoop {
    alpha: f32,
    beta: f32,
    phase: f32,
    freq: f32,
    max_freq: f32,
}

impl CostasLoop {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            beta: alpha * alpha / 4.0,
            phase: 0.0,
            freq: 0.0,
            max_freq: 1.0,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.freq
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Process a block in place-compatible fashion. Output length equals
    /// input length.
    pub fn work(&mut self, input: &[Complex32], output: &mut [Complex32]) {
        for (out, &sample) in output.iter_mut().zip(input.iter()) {
            let correction = Complex32::new((-self.phase).cos(), (-self.phase).sin());
            let y = sample * correction;
            *out = y;

            let error = (y.re * y.im).clamp(-1.0, 1.0);

            self.freq += self.beta * error;
            self.freq = self.freq.clamp(-self.max_freq, self.max_freq);
            self.phase += self.freq + self.alpha * error;

            while self.phase > PI {
                self.phase -= 2.0 * PI;
            }
            while self.phase < -PI {
                self.phase += 2.0 * PI;
            }
        }
    }
}
