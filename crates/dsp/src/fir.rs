use num_complex::Complex32;
use std::f64::consts::PI;

/// Streaming FIR filter with history carried across blocks.
///
/// Output length equals input length; the first taps-1 samples of the very
/// first block see the zeroed history, which is why the demodulator refuses
/// blocks that are too short to amortize the warm-up.
pub struct FirFilter {
    taps: Vec<f32>,
    /// Last taps-1 input samples from the previous block.
    history: Vec<Complex32>,
    /// Scratch: history + current block, so the inner loop never branches.
    work: Vec<Complex32>,
}

impl FirFilter {
    pub fn new(taps: Vec<f32>) -> Self {
        assert!(!taps.is_empty(), "FIR filter needs at least one tap");
        let hist_len = taps.len() - 1;
        Self {
            taps,
            history: vec![Complex32::new(0.0, 0.0); hist_len],
            work: Vec::new(),
        }
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    /// Filter a block in streaming fashion. `output` must be at least as
    /// long as `input`; the first input.len() entries are written.
    pub fn work(&mut self, input: &[Complex32], output: &mut [Complex32]) {
        let hist_len = self.history.len();

        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);

        for (i, out) in output.iter_mut().take(input.len()).enumerate() {
            let mut acc = Complex32::new(0.0, 0.0);
            // window ends at the newest sample for output i
            for (k, &tap) in self.taps.iter().enumerate() {
                acc += self.work[i + hist_len - k] * tap;
            }
            *out = acc;
        }

        // Preserve the trailing samples for the next block.
        if input.len() >= hist_len {
            self.history.copy_from_slice(&input[input.len() - hist_len..]);
        } else {
            self.history.rotate_left(input.len());
            let start = hist_len - input.len();
            self.history[start..].copy_from_slice(input);
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(Complex32::new(0.0, 0.0));
    }
}

/// FIR filter fused with integer decimation: only the kept output phases are
/// computed. Keeps its own history plus the decimation phase across blocks.
pub struct DecimatingFirFilter {
    taps: Vec<f32>,
    decimation: usize,
    history: Vec<Complex32>,
    work: Vec<Complex32>,
    phase: usize,
}

impl DecimatingFirFilter {
    pub fn new(taps: Vec<f32>, decimation: usize) -> Self {
        assert!(!taps.is_empty(), "FIR filter needs at least one tap");
        let hist_len = taps.len() - 1;
        Self {
            taps,
            decimation: decimation.max(1),
            history: vec![Complex32::new(0.0, 0.0); hist_len],
            work: Vec::new(),
            phase: 0,
        }
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Filter + decimate. Appends to `output` and returns the number of
    /// samples produced (~ input.len() / decimation).
    pub fn work(&mut self, input: &[Complex32], output: &mut Vec<Complex32>) -> usize {
        let hist_len = self.history.len();

        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);

        let mut produced = 0usize;
        for i in 0..input.len() {
            self.phase += 1;
            if self.phase < self.decimation {
                continue;
            }
            self.phase = 0;

            let mut acc = Complex32::new(0.0, 0.0);
            for (k, &tap) in self.taps.iter().enumerate() {
                acc += self.work[i + hist_len - k] * tap;
            }
            output.push(acc);
            produced += 1;
        }

        if input.len() >= hist_len {
            self.history.copy_from_slice(&input[input.len() - hist_len..]);
        } else {
            self.history.rotate_left(input.len());
            let start = hist_len - input.len();
            self.history[start..].copy_from_slice(input);
        }

        produced
    }
}

/// Windowed-sinc lowpass design (Hamming window). Tap count is derived from
/// the transition width with the 53 dB attenuation rule and forced odd.
pub fn low_pass(gain: f64, sampling_freq: f64, cutoff_freq: f64, transition_width: f64) -> Vec<f32> {
    assert!(sampling_freq > 0.0 && cutoff_freq > 0.0 && transition_width > 0.0);
    assert!(cutoff_freq <= sampling_freq / 2.0, "cutoff beyond Nyquist");

    let attenuation_db = 53.0;
    let mut ntaps = (attenuation_db / (22.0 * transition_width / sampling_freq)) as usize;
    if ntaps % 2 == 0 {
        ntaps += 1;
    }
    ntaps = ntaps.max(3);

    let m = (ntaps - 1) / 2;
    let fw_t0 = 2.0 * PI * cutoff_freq / sampling_freq;
    let mut taps = vec![0.0f64; ntaps];

    for n in 0..ntaps {
        let w = 0.54 - 0.46 * (2.0 * PI * n as f64 / (ntaps - 1) as f64).cos();
        let k = n as f64 - m as f64;
        taps[n] = if n == m {
            fw_t0 / PI * w
        } else {
            (k * fw_t0).sin() / (k * PI) * w
        };
    }

    // Normalize for unity gain at DC.
    let mut fmax = taps[m];
    for n in 1..=m {
        fmax += 2.0 * taps[m + n];
    }
    let scale = gain / fmax;

    taps.iter().map(|&t| (t * scale) as f32).collect()
}

/// Root-raised-cosine matched filter taps (GNU Radio firdes convention).
pub fn root_raised_cosine(
    gain: f64,
    sampling_freq: f64,
    symbol_rate: f64,
    alpha: f64,
    ntaps: usize,
) -> Vec<f32> {
    assert!(sampling_freq > 0.0 && symbol_rate > 0.0);
    assert!(alpha > 0.0 && alpha <= 1.0, "rrc alpha must be in (0, 1]");

    let ntaps = if ntaps % 2 == 0 { ntaps + 1 } else { ntaps };
    let spb = sampling_freq / symbol_rate; // samples per bit/symbol
    let mut taps = vec![0.0f64; ntaps];
    let mut scale = 0.0f64;

    for i in 0..ntaps {
        let xindx = i as f64 - (ntaps / 2) as f64;
        let x1 = PI * xindx / spb;
        let x2 = 4.0 * alpha * xindx / spb;
        let x3 = x2 * x2 - 1.0;

        let (num, den);
        if x3.abs() >= 0.000001 {
            num = if i != ntaps / 2 {
                ((1.0 + alpha) * x1).cos() + ((1.0 - alpha) * x1).sin() / (4.0 * alpha * xindx / spb)
            } else {
                ((1.0 + alpha) * x1).cos() + (1.0 - alpha) * PI / (4.0 * alpha)
            };
            den = x3 * PI;
        } else {
            if alpha == 1.0 {
                taps[i] = -1.0;
                scale += taps[i];
                continue;
            }
            let x3s = (1.0 - alpha) * x1;
            let x2s = (1.0 + alpha) * x1;
            num = x2s.sin() * (1.0 + alpha) * PI
                - x3s.cos() * ((1.0 - alpha) * PI * spb) / (4.0 * alpha * xindx)
                + x3s.sin() * spb * spb / (4.0 * alpha * xindx * xindx);
            den = -32.0 * PI * alpha * alpha * xindx / spb;
        }

        taps[i] = 4.0 * alpha * num / den;
        scale += taps[i];
    }

    taps.iter().map(|&t| (t * gain / scale) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_pass_design() {
        let taps = low_pass(1.0, 1_000_000.0, 100_000.0, 50_000.0);
        assert!(taps.len() % 2 == 1, "tap count should be odd");
        // Symmetric (linear phase)
        for i in 0..taps.len() / 2 {
            assert!(
                (taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-6,
                "asymmetry at {}",
                i
            );
        }
        // Unity DC gain
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 0.01, "DC gain = {}", sum);
    }

    #[test]
    fn test_rrc_design() {
        let taps = root_raised_cosine(1.0, 3_000_000.0, 1_000_000.0, 0.5, 31);
        assert_eq!(taps.len(), 31);
        // Peak at center
        let center = taps.len() / 2;
        let peak = taps.iter().map(|t| t.abs()).fold(0.0f32, f32::max);
        assert!((taps[center].abs() - peak).abs() < 1e-6, "peak not at center");
        for i in 0..taps.len() / 2 {
            assert!(
                (taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-5,
                "asymmetry at {}",
                i
            );
        }
    }

    #[test]
    fn test_fir_passthrough() {
        let mut f = FirFilter::new(vec![1.0]);
        let input: Vec<Complex32> = (0..16).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let mut output = vec![Complex32::new(0.0, 0.0); 16];
        f.work(&input, &mut output);
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn test_fir_streaming_matches_oneshot() {
        let taps = low_pass(1.0, 8.0, 1.0, 1.0);
        let input: Vec<Complex32> = (0..200)
            .map(|i| Complex32::new((i as f32 * 0.3).sin(), (i as f32 * 0.17).cos()))
            .collect();

        let mut oneshot = FirFilter::new(taps.clone());
        let mut full = vec![Complex32::new(0.0, 0.0); 200];
        oneshot.work(&input, &mut full);

        let mut streaming = FirFilter::new(taps);
        let mut chunked = vec![Complex32::new(0.0, 0.0); 200];
        let mut pos = 0;
        for chunk in input.chunks(37) {
            streaming.work(chunk, &mut chunked[pos..pos + chunk.len()]);
            pos += chunk.len();
        }

        for (i, (a, b)) in full.iter().zip(chunked.iter()).enumerate() {
            assert!((a - b).norm() < 1e-4, "mismatch at {}: {:?} vs {:?}", i, a, b);
        }
    }

    #[test]
    fn test_decimating_fir_length() {
        let taps = vec![0.25f32; 4];
        let mut f = DecimatingFirFilter::new(taps, 4);
        let input = vec![Complex32::new(1.0, 0.0); 100];
        let mut out = Vec::new();
        let n = f.work(&input, &mut out);
        assert_eq!(n, 25);
        assert_eq!(out.len(), 25);
        // After settling, boxcar of DC is ~1.0
        for s in &out[2..] {
            assert!((s.re - 1.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_decimating_fir_attenuates_high_freq() {
        let taps = low_pass(1.0, 1.0, 0.1, 0.05);
        let mut f = DecimatingFirFilter::new(taps.clone(), 4);

        let low: Vec<Complex32> = (0..2048)
            .map(|i| Complex32::new((2.0 * std::f32::consts::PI * 0.01 * i as f32).sin(), 0.0))
            .collect();
        let mut out_low = Vec::new();
        f.work(&low, &mut out_low);

        let mut f2 = DecimatingFirFilter::new(taps, 4);
        let high: Vec<Complex32> = (0..2048)
            .map(|i| Complex32::new((2.0 * std::f32::consts::PI * 0.45 * i as f32).sin(), 0.0))
            .collect();
        let mut out_high = Vec::new();
        f2.work(&high, &mut out_high);

        let p_low: f32 =
            out_low[64..].iter().map(|s| s.norm_sqr()).sum::<f32>() / (out_low.len() - 64) as f32;
        let p_high: f32 =
            out_high[64..].iter().map(|s| s.norm_sqr()).sum::<f32>() / (out_high.len() - 64) as f32;
        assert!(
            p_low > p_high * 10.0,
            "lowpass not attenuating: low {} high {}",
            p_low,
            p_high
        );
    }
}
