use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use num_complex::Complex32;

use crate::agc::Agc;
use crate::clock::ClockRecovery;
use crate::costas::CostasLoop;
use crate::fft::SpectrumFft;
use crate::fir::{self, DecimatingFirFilter, FirFilter};
use crate::snr::SnrEstimator;

/// Blocks below this many samples are dropped: the matched-filter warm-up
/// would dominate and the symbol stream would glitch.
const MIN_BLOCK_SAMPLES: usize = 64 * 1024;

/// Subsampling stride for the telemetry FFT input.
const FFT_STRIDE: usize = 300;

/// Minimum spacing between telemetry FFT computations.
const FFT_COOLDOWN: Duration = Duration::from_millis(500);

/// Idle sleep when no sample block is waiting.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Signal-health snapshot written by the demodulator, read by the observer.
#[derive(Debug, Default, Clone)]
pub struct SignalStats {
    pub current_snr: f64,
    pub avg_snr: f64,
    pub peak_snr: f64,
    pub current_fft: Vec<f64>,
}

impl SignalStats {
    pub fn reset(&mut self) {
        *self = SignalStats::default();
    }
}

/// Demodulator construction parameters (already resolved from config).
#[derive(Debug, Clone)]
pub struct DemodConfig {
    pub device_sample_rate: f64,
    pub symbol_rate: f64,
    pub rrc_alpha: f64,
    pub rrc_taps: usize,
    pub lowpass_transition_width: f64,
    pub decimation_factor: usize,
    pub pll_alpha: f32,
    pub agc_rate: f32,
    pub agc_reference: f32,
    pub agc_gain: f32,
    pub agc_max_gain: f32,
    pub clock_mu: f32,
    pub clock_alpha: f32,
    pub clock_omega_limit: f32,
    pub do_fft: bool,
}

/// BPSK demodulator: decimation, AGC, RRC matched filter, Costas carrier
/// recovery, Mueller & Müller timing recovery, soft-symbol slicing, and
/// online SNR estimation. All loop state persists across blocks.
pub struct Demodulator {
    decimator: Option<DecimatingFirFilter>,
    agc: Agc,
    rrc: FirFilter,
    costas: CostasLoop,
    clock: ClockRecovery,
    snr: SnrEstimator,
    sps: f32,
    do_fft: bool,
    fft_busy: Arc<AtomicBool>,
    last_fft: Instant,
    stats: Arc<RwLock<SignalStats>>,
    // Work buffers, grown once to the block size and reused.
    decimated: Vec<Complex32>,
    filtered: Vec<Complex32>,
    derotated: Vec<Complex32>,
    synced: Vec<Complex32>,
}

impl Demodulator {
    pub fn new(config: &DemodConfig, stats: Arc<RwLock<SignalStats>>) -> Self {
        let decim = config.decimation_factor.max(1);
        let circuit_sample_rate = config.device_sample_rate / decim as f64;
        let sps = (circuit_sample_rate / config.symbol_rate) as f32;

        log::info!(
            "demodulator: device {:.0} Hz, circuit {:.0} Hz, {:.3} samples/symbol",
            config.device_sample_rate,
            circuit_sample_rate,
            sps
        );

        let decimator = if decim > 1 {
            let cutoff = circuit_sample_rate / 2.0 - config.lowpass_transition_width / 2.0;
            let taps = fir::low_pass(
                1.0,
                config.device_sample_rate,
                cutoff,
                config.lowpass_transition_width,
            );
            log::debug!("decimator: {} taps, factor {}", taps.len(), decim);
            Some(DecimatingFirFilter::new(taps, decim))
        } else {
            None
        };

        let rrc_taps = fir::root_raised_cosine(
            1.0,
            config.device_sample_rate,
            config.symbol_rate,
            config.rrc_alpha,
            config.rrc_taps,
        );

        let gain_omega = config.clock_alpha * config.clock_alpha / 4.0;

        Self {
            decimator,
            agc: Agc::new(
                config.agc_rate,
                config.agc_reference,
                config.agc_gain,
                config.agc_max_gain,
            ),
            rrc: FirFilter::new(rrc_taps),
            costas: CostasLoop::new(config.pll_alpha),
            clock: ClockRecovery::new(
                sps,
                gain_omega,
                config.clock_mu,
                config.clock_alpha,
                config.clock_omega_limit,
            ),
            snr: SnrEstimator::new(),
            sps,
            do_fft: config.do_fft,
            fft_busy: Arc::new(AtomicBool::new(false)),
            last_fft: Instant::now()
                .checked_sub(FFT_COOLDOWN)
                .unwrap_or_else(Instant::now),
            stats,
            decimated: Vec::new(),
            filtered: Vec::new(),
            derotated: Vec::new(),
            synced: Vec::new(),
        }
    }

    pub fn samples_per_symbol(&self) -> f32 {
        self.sps
    }

    /// Demodulate one block of baseband samples into soft symbols.
    /// Returns an empty vec for undersized blocks.
    pub fn process_block(&mut self, samples: &[Complex32]) -> Vec<i8> {
        if samples.len() < MIN_BLOCK_SAMPLES {
            log::error!(
                "sample block of {} < {} samples, dropping",
                samples.len(),
                MIN_BLOCK_SAMPLES
            );
            return Vec::new();
        }

        let input: &[Complex32] = match self.decimator.as_mut() {
            Some(decimator) => {
                self.decimated.clear();
                decimator.work(samples, &mut self.decimated);
                &self.decimated
            }
            None => samples,
        };

        let len = input.len();
        if self.filtered.len() < len {
            self.filtered.resize(len, Complex32::new(0.0, 0.0));
            self.derotated.resize(len, Complex32::new(0.0, 0.0));
            self.synced.resize(len, Complex32::new(0.0, 0.0));
        }

        // `derotated` doubles as the AGC scratch before the Costas loop
        // overwrites it; names follow the final contents.
        self.agc.work(input, &mut self.derotated[..len]);
        self.rrc.work(&self.derotated[..len], &mut self.filtered[..len]);

        self.maybe_spawn_fft(len);

        self.costas
            .work(&self.filtered[..len], &mut self.derotated[..len]);

        let num_symbols = self
            .clock
            .work(&self.derotated[..len], &mut self.synced[..len]);
        let symbols = &self.synced[..num_symbols];

        self.snr.update(symbols);
        if let Ok(mut stats) = self.stats.write() {
            stats.current_snr = self.snr.current();
            stats.avg_snr = self.snr.average();
            stats.peak_snr = self.snr.peak();
        }

        symbols
            .iter()
            .map(|z| (z.re * 127.0).round().clamp(-128.0, 127.0) as i8)
            .collect()
    }

    /// Fire-and-forget spectrum snapshot. One in flight at a time; requests
    /// inside the cooldown window are skipped.
    fn maybe_spawn_fft(&mut self, len: usize) {
        if !self.do_fft
            || self.fft_busy.load(Ordering::SeqCst)
            || self.last_fft.elapsed() < FFT_COOLDOWN
        {
            return;
        }
        self.last_fft = Instant::now();
        self.fft_busy.store(true, Ordering::SeqCst);

        let subset: Vec<Complex32> = self.filtered[..len]
            .iter()
            .step_by(FFT_STRIDE)
            .copied()
            .collect();
        let stats = self.stats.clone();
        let busy = self.fft_busy.clone();
        std::thread::spawn(move || {
            let mut fft = SpectrumFft::new();
            let bins = fft.power_db(&subset);
            if let Ok(mut s) = stats.write() {
                s.current_fft = bins;
            }
            busy.store(false, Ordering::SeqCst);
        });
    }

    /// Task loop: pull sample blocks, push soft-symbol blocks. Exits when
    /// the stop flag is set or the sample channel closes, and closes the
    /// symbol channel on the way out (tx is dropped).
    pub fn run(
        &mut self,
        samples: Receiver<Vec<Complex32>>,
        symbols: Sender<Vec<i8>>,
        stopping: Arc<AtomicBool>,
    ) {
        loop {
            if stopping.load(Ordering::SeqCst) {
                log::debug!("demodulator stopping");
                return;
            }
            match samples.try_recv() {
                Ok(block) => {
                    let out = self.process_block(&block);
                    if out.is_empty() {
                        continue;
                    }
                    if symbols.send(out).is_err() {
                        log::debug!("symbol consumer gone, demodulator exiting");
                        return;
                    }
                }
                Err(TryRecvError::Empty) => std::thread::sleep(IDLE_SLEEP),
                Err(TryRecvError::Disconnected) => {
                    log::debug!("sample source closed, demodulator exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(sps: usize) -> DemodConfig {
        DemodConfig {
            device_sample_rate: 1_000_000.0 * sps as f64,
            symbol_rate: 1_000_000.0,
            rrc_alpha: 0.5,
            rrc_taps: 31,
            lowpass_transition_width: 200_000.0,
            decimation_factor: 1,
            pll_alpha: 0.01,
            agc_rate: 0.01,
            agc_reference: 1.0,
            agc_gain: 1.0,
            agc_max_gain: 4000.0,
            clock_mu: 0.5,
            clock_alpha: 0.02,
            clock_omega_limit: 0.01,
            do_fft: false,
        }
    }

    fn bpsk_block(sps: usize, num_symbols: usize, amplitude: f32) -> Vec<Complex32> {
        let mut state = 0xB5AD4ECEDA1CE2A9u64;
        let mut block = Vec::with_capacity(sps * num_symbols);
        for _ in 0..num_symbols {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let sym = if state >> 63 == 0 { amplitude } else { -amplitude };
            for _ in 0..sps {
                block.push(Complex32::new(sym, 0.0));
            }
        }
        block
    }

    #[test]
    fn test_short_block_dropped() {
        let stats = Arc::new(RwLock::new(SignalStats::default()));
        let mut demod = Demodulator::new(&test_config(4), stats);
        let out = demod.process_block(&bpsk_block(4, 100, 1.0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_symbol_rate_and_range() {
        let sps = 4;
        let stats = Arc::new(RwLock::new(SignalStats::default()));
        let mut demod = Demodulator::new(&test_config(sps), stats.clone());

        let num_symbols = 20_000; // 80K samples, above the block floor
        let block = bpsk_block(sps, num_symbols, 0.5);
        let out = demod.process_block(&block);

        let expected = num_symbols as f64;
        assert!(
            (out.len() as f64) > expected * 0.9 && (out.len() as f64) < expected * 1.1,
            "recovered {} symbols, expected ~{}",
            out.len(),
            expected
        );

        // Once the loops settle, recovered symbols should be confidently
        // away from the decision boundary.
        let tail = &out[out.len() - 1000..];
        let strong = tail.iter().filter(|&&s| s.unsigned_abs() > 32).count();
        assert!(
            strong > 800,
            "only {} of {} settled symbols are strong",
            strong,
            tail.len()
        );

        let s = stats.read().unwrap();
        assert!(s.peak_snr >= s.current_snr);
    }

    #[test]
    fn test_run_closes_output_on_source_close() {
        let stats = Arc::new(RwLock::new(SignalStats::default()));
        let mut demod = Demodulator::new(&test_config(4), stats);

        let (sample_tx, sample_rx) = crossbeam::channel::bounded(4);
        let (symbol_tx, symbol_rx) = crossbeam::channel::bounded(4);
        let stopping = Arc::new(AtomicBool::new(false));

        sample_tx.send(bpsk_block(4, 20_000, 0.5)).unwrap();
        drop(sample_tx);

        demod.run(sample_rx, symbol_tx, stopping);

        // One symbol block, then end-of-stream.
        let first = symbol_rx.recv();
        assert!(first.is_ok());
        assert!(symbol_rx.recv().is_err());
    }
}
