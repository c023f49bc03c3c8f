use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::channel;
use num_complex::Complex32;

use xrit_dsp::{DemodConfig, Demodulator, SignalStats};
use xrit_frame::{vcid, Decoder, DecoderConfig, DecoderStats};
use xrit_sdr::file::FileSource;
use xrit_sdr::{SdrSource, StreamFormat};

use crate::config::Config;

/// Build and run the full pipeline: source -> demodulator -> decoder, with
/// a telemetry observer on the main thread. Returns when the source runs
/// dry or the process is interrupted.
pub fn run_tune(config: &Config, file: Option<&Path>) -> Result<(), String> {
    let chunk_size = config.xrit.chunk_size.max(1024);

    let mut source = make_source(config, file, chunk_size)?;

    let demod_config = DemodConfig {
        device_sample_rate: config.radio.sample_rate,
        symbol_rate: config.xrit.symbol_rate,
        rrc_alpha: config.xrit.rrc_alpha,
        rrc_taps: config.xrit.rrc_taps,
        lowpass_transition_width: config.xrit.lowpass_transition_width,
        decimation_factor: config.xrit.decimation_factor,
        pll_alpha: config.xrit.pll_alpha,
        agc_rate: config.agc.rate,
        agc_reference: config.agc.reference,
        agc_gain: config.agc.gain,
        agc_max_gain: config.agc.max_gain,
        clock_mu: config.clockrecovery.mu,
        clock_alpha: config.clockrecovery.alpha,
        clock_omega_limit: config.clockrecovery.omega_limit,
        do_fft: config.xrit.do_fft,
    };
    let decoder_config = DecoderConfig {
        frame_size: config.xritframe.frame_size,
        last_frame_size: config.xritframe.last_frame_size,
        viterbi_max_errors: config.viterbi.max_errors,
    };

    let signal_stats = Arc::new(RwLock::new(SignalStats::default()));
    let decoder_stats = Arc::new(RwLock::new(DecoderStats::default()));
    let stopping = Arc::new(AtomicBool::new(false));

    {
        let stopping = stopping.clone();
        ctrlc::set_handler(move || {
            eprintln!("\ninterrupted, stopping...");
            stopping.store(true, Ordering::SeqCst);
        })
        .map_err(|e| format!("failed to set Ctrl-C handler: {}", e))?;
    }

    // Bounded stage queues: a stalled consumer blocks its producer instead
    // of dropping data.
    let (sample_tx, sample_rx) = channel::bounded::<Vec<Complex32>>(chunk_size);
    let (symbol_tx, symbol_rx) = channel::bounded::<Vec<i8>>(chunk_size);

    let source_thread = std::thread::spawn(move || {
        let (buf_tx, buf_rx) = channel::bounded::<xrit_sdr::SampleBuf>(1);
        // Adapt SampleBuf blocks to plain sample vectors for the demodulator.
        let forwarder = std::thread::spawn(move || {
            for buf in buf_rx.iter() {
                if sample_tx.send(buf.data).is_err() {
                    return;
                }
            }
        });
        if let Err(e) = source.start(buf_tx) {
            log::error!("sample source error: {}", e);
        }
        let _ = forwarder.join();
    });

    let demod_thread = {
        let stats = signal_stats.clone();
        let stopping = stopping.clone();
        let config = demod_config.clone();
        std::thread::spawn(move || {
            let mut demod = Demodulator::new(&config, stats);
            demod.run(sample_rx, symbol_tx, stopping);
        })
    };

    let decoder_thread = {
        let stats = decoder_stats.clone();
        let stopping = stopping.clone();
        let config = decoder_config.clone();
        std::thread::spawn(move || {
            let mut decoder = Decoder::new(&config, stats);
            decoder.run(symbol_rx, None, stopping);
        })
    };

    observe(&signal_stats, &decoder_stats, &stopping, &decoder_thread);

    let _ = source_thread.join();
    let _ = demod_thread.join();
    let _ = decoder_thread.join();
    log::info!("pipeline stopped");
    Ok(())
}

fn make_source(
    config: &Config,
    file: Option<&Path>,
    chunk_size: usize,
) -> Result<Box<dyn SdrSource>, String> {
    if let Some(path) = file {
        let mut source = FileSource::new(
            path.to_string_lossy().to_string(),
            config.radio.sample_rate,
            config.radio.frequency,
        );
        source.set_block_size(chunk_size);
        return Ok(Box::new(source));
    }

    let format = StreamFormat::from_config(&config.radio.sample_type)
        .map_err(|e| format!("radio.sample_type: {}", e))?;
    if format != StreamFormat::Cf32 {
        return Err(format!(
            "unsupported sample_type for {}: only complex64 is supported",
            config.radio.driver
        ));
    }

    #[cfg(feature = "soapysdr")]
    {
        let source = xrit_sdr::soapy::SoapySource::new(
            &config.radio.driver,
            &config.radio.address,
            config.radio.sample_rate,
            config.radio.frequency,
            config.radio.gain,
            format,
            chunk_size,
        )
        .map_err(|e| e.to_string())?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "soapysdr"))]
    {
        Err("built without SoapySDR support; use `tune --file` or rebuild with --features soapysdr"
            .to_string())
    }
}

/// Log a one-line health summary every second until the decoder exits.
fn observe(
    signal_stats: &Arc<RwLock<SignalStats>>,
    decoder_stats: &Arc<RwLock<DecoderStats>>,
    stopping: &Arc<AtomicBool>,
    decoder_thread: &std::thread::JoinHandle<()>,
) {
    while !decoder_thread.is_finished() && !stopping.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));

        let (lock, quality, ber, total, rs_sum, dropped) = match decoder_stats.read() {
            Ok(stats) => (
                stats.frame_lock,
                stats.sig_quality,
                stats.ber_percent,
                stats.total_frames_processed,
                stats.average_rs_corrections,
                stats
                    .dropped_packets_per_channel
                    .values()
                    .sum::<u64>(),
            ),
            Err(_) => continue,
        };
        let (snr, peak) = match signal_stats.read() {
            Ok(stats) => (stats.current_snr, stats.peak_snr),
            Err(_) => continue,
        };

        let rs_avg = if total > 0 { rs_sum / total as f32 } else { 0.0 };
        log::info!(
            "lock={} quality={:.0}% ber={:.2}% snr={:.1}dB (peak {:.1}) frames={} dropped={} rs_avg={:.2}",
            lock, quality, ber, snr, peak, total, dropped, rs_avg
        );

        if log::log_enabled!(log::Level::Debug) {
            if let Ok(stats) = decoder_stats.read() {
                for &channel in vcid::KNOWN.iter() {
                    let rx = stats.rx_packets_per_channel.get(&channel).copied().unwrap_or(0);
                    let drop = stats
                        .dropped_packets_per_channel
                        .get(&channel)
                        .copied()
                        .unwrap_or(0);
                    if rx > 0 || drop > 0 {
                        log::debug!(
                            "  vcid {:2} {:28} rx={} dropped={}",
                            channel,
                            vcid::name(channel),
                            rx,
                            drop
                        );
                    }
                }
            }
        }
    }
}
