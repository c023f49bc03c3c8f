use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TryRecvError};

use crate::correlator::Correlator;
use crate::rs::{self, ReedSolomon};
use crate::viterbi::Viterbi27;
use crate::{derandomizer, nrzm, vcid};

/// Encoded CADU sync marker as seen after a nominal Costas lock.
const SYNC_WORD_NOMINAL: u64 = 0xFC4EF4FD0CC2DF89;
/// The same marker under the ambiguous 180-degree lock.
const SYNC_WORD_INVERTED: u64 = 0x25010B02F33D2076;

pub const SYNC_WORD_SIZE: usize = 4;
const RS_BLOCKS: usize = 4;

/// Full re-correlation is forced after this many flywheel passes.
const MAX_RECHECK: usize = 100;
/// Candidates correlating below this many bits are dropped.
const MIN_CORRELATION_BITS: u32 = 46;

/// Back-off while fewer than a frame's worth of symbols is queued.
const UNDERFLOW_SLEEP: Duration = Duration::from_micros(5);

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub frame_size: usize,
    pub last_frame_size: usize,
    /// Normalization ceiling for the signal-quality gauge.
    pub viterbi_max_errors: u32,
}

/// Telemetry snapshot written by the decoder task, read by the observer.
#[derive(Debug, Default, Clone)]
pub struct DecoderStats {
    pub frame_lock: bool,
    pub sig_quality: f32,
    pub ber_percent: f32,
    /// Cumulative RS corrections; divide by total_frames_processed for the
    /// per-frame average.
    pub average_rs_corrections: f32,
    /// Cumulative Viterbi corrections, same convention.
    pub avg_vit_corrections: f32,
    pub total_frames_processed: u64,
    pub rx_packets_per_channel: HashMap<u8, u64>,
    pub dropped_packets_per_channel: HashMap<u8, u64>,
    pub sync_word: [u8; SYNC_WORD_SIZE],
}

impl DecoderStats {
    pub fn reset(&mut self) {
        *self = DecoderStats::default();
    }
}

/// One decoded, error-corrected transport frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub scid: u8,
    pub vcid: u8,
    pub counter: u32,
    /// RS-corrected data body after sync-word removal, parity included.
    pub payload: Vec<u8>,
    pub corrupt: bool,
}

/// Pull-side view of the soft-symbol queue. Symbols arrive as i8 blocks and
/// are converted to offset-binary (x ^ 0x80) on ingest, so 128 is the
/// neutral value downstream. Only pulls from the channel what the decoder
/// is about to consume, leaving back-pressure to the bounded queue.
struct SymbolStream {
    rx: Receiver<Vec<i8>>,
    queue: VecDeque<u8>,
    closed: bool,
}

impl SymbolStream {
    fn new(rx: Receiver<Vec<i8>>) -> Self {
        Self {
            rx,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    /// Drain the channel until `target` symbols are queued or the channel is
    /// empty. Returns the queue length.
    fn ensure(&mut self, target: usize) -> usize {
        while self.queue.len() < target && !self.closed {
            match self.rx.try_recv() {
                Ok(block) => self.queue.extend(block.iter().map(|&s| (s as u8) ^ 0x80)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.closed = true,
            }
        }
        self.queue.len()
    }

    fn closed(&self) -> bool {
        self.closed
    }

    /// Blocking read of exactly out.len() symbols, with the underflow sleep.
    /// Returns false if the stream ended first.
    fn read_exact(&mut self, out: &mut [u8]) -> bool {
        let mut filled = 0;
        while filled < out.len() {
            self.ensure(out.len() - filled);
            while filled < out.len() {
                match self.queue.pop_front() {
                    Some(symbol) => {
                        out[filled] = symbol;
                        filled += 1;
                    }
                    None => break,
                }
            }
            if filled < out.len() {
                if self.closed {
                    return false;
                }
                std::thread::sleep(UNDERFLOW_SLEEP);
            }
        }
        true
    }
}

enum Align {
    Ok,
    NoLock,
    StreamEnded,
}

/// Frame synchronizer and channel decoder: sync-word correlation with a
/// flywheel, Viterbi with cross-frame tail carry, NRZ-M and derandomization,
/// and 4-way interleaved RS(255,223).
pub struct Decoder {
    frame_size: usize,
    last_frame_size: usize,
    encoded_frame_size: usize,
    last_frame_bits: usize,
    max_vit_errors: u32,

    viterbi: Viterbi27,
    correlator: Correlator,
    reed_solomon: ReedSolomon,

    /// Previous tail + current encoded frame, the Viterbi problem space.
    viterbi_buf: Vec<u8>,
    /// Viterbi output, frame_size + last_frame_size bytes.
    decoded: Vec<u8>,
    /// Trailing encoded symbols preserved for the next Viterbi call.
    last_frame_end: Vec<u8>,
    /// One frame's worth of encoded soft symbols.
    encoded: Vec<u8>,
    rs_work: [u8; rs::BLOCK_SIZE],
    /// Reassembled RS-corrected frame.
    rs_corrected: Vec<u8>,
    sync_word: [u8; SYNC_WORD_SIZE],

    last_frame_ok: bool,
    recheck_counter: usize,
    current_frame_corrupt: bool,

    stats: Arc<RwLock<DecoderStats>>,
}

impl Decoder {
    pub fn new(config: &DecoderConfig, stats: Arc<RwLock<DecoderStats>>) -> Self {
        let frame_bits = config.frame_size * 8;
        let encoded_frame_size = frame_bits * 2;
        let last_frame_bits = config.last_frame_size * 8;

        let mut correlator = Correlator::new();
        correlator.add_word(SYNC_WORD_NOMINAL);
        correlator.add_word(SYNC_WORD_INVERTED);

        Self {
            frame_size: config.frame_size,
            last_frame_size: config.last_frame_size,
            encoded_frame_size,
            last_frame_bits,
            max_vit_errors: config.viterbi_max_errors.max(1),
            viterbi: Viterbi27::new((encoded_frame_size + last_frame_bits) / 2),
            correlator,
            reed_solomon: ReedSolomon::new(),
            viterbi_buf: vec![0; encoded_frame_size + last_frame_bits],
            decoded: vec![0; config.frame_size + config.last_frame_size],
            // 128: maximally uncertain, so the first frame's trellis head is
            // unbiased.
            last_frame_end: vec![128; last_frame_bits],
            encoded: vec![0; encoded_frame_size],
            rs_work: [0; rs::BLOCK_SIZE],
            rs_corrected: vec![0; config.frame_size],
            sync_word: [0; SYNC_WORD_SIZE],
            last_frame_ok: false,
            recheck_counter: 0,
            current_frame_corrupt: false,
            stats,
        }
    }

    /// Task loop: consume soft symbols, emit decoded frames to the optional
    /// sink, update telemetry. Returns when the stop flag is set or the
    /// symbol stream closes.
    pub fn run(
        &mut self,
        symbols: Receiver<Vec<i8>>,
        frames: Option<Sender<DecodedFrame>>,
        stopping: Arc<AtomicBool>,
    ) {
        let mut stream = SymbolStream::new(symbols);

        loop {
            if stopping.load(Ordering::SeqCst) {
                log::debug!("decoder stopping");
                return;
            }

            if stream.ensure(self.encoded_frame_size) < self.encoded_frame_size {
                if stream.closed() {
                    log::debug!("symbol stream closed, decoder exiting");
                    return;
                }
                std::thread::sleep(UNDERFLOW_SLEEP);
                continue;
            }
            if !stream.read_exact(&mut self.encoded) {
                return;
            }

            self.check_frame_lock();

            match self.align(&mut stream) {
                Align::Ok => {}
                Align::NoLock => continue,
                Align::StreamEnded => return,
            }

            self.convolutional_decode();
            nrzm::decode(&mut self.decoded);

            let ber = self.bit_error_rate();
            let sig_quality = (100.0
                * (self.max_vit_errors as f32 - ber as f32)
                / self.max_vit_errors as f32)
                .clamp(0.0, 100.0);

            self.clean_frame();
            derandomizer::derandomize(&mut self.decoded[..self.frame_size - SYNC_WORD_SIZE]);

            let total_bytes_fixed = self.error_correct();
            self.emit(ber, sig_quality, total_bytes_fixed, frames.as_ref());
        }
    }

    /// Flywheel: correlate the full frame when unlocked or due for a
    /// recheck, otherwise only a short head window, falling back to a full
    /// pass when the head check misses.
    fn check_frame_lock(&mut self) {
        if !self.last_frame_ok || self.recheck_counter >= MAX_RECHECK {
            self.correlator
                .correlate(&self.encoded, self.encoded_frame_size);
            self.recheck_counter = 0;
            self.last_frame_ok = false;
        } else {
            self.correlator
                .correlate(&self.encoded, self.encoded_frame_size / 64);
            if self.correlator.highest_position() != 0 {
                self.correlator
                    .correlate(&self.encoded, self.encoded_frame_size);
                self.recheck_counter = 0;
            }
        }
        self.recheck_counter += 1;
    }

    /// Accept or drop the candidate, and realign the buffer to the reported
    /// frame start, refilling the tail from the symbol stream.
    fn align(&mut self, stream: &mut SymbolStream) -> Align {
        let correlation = self.correlator.highest_correlation();
        if correlation < MIN_CORRELATION_BITS {
            log::debug!(
                "correlation {} below threshold {}, dropping candidate",
                correlation,
                MIN_CORRELATION_BITS
            );
            self.last_frame_ok = false;
            return Align::NoLock;
        }

        let pos = self.correlator.highest_position();
        if pos != 0 {
            self.encoded.copy_within(pos.., 0);
            let refill_from = self.encoded_frame_size - pos;
            if !stream.read_exact(&mut self.encoded[refill_from..]) {
                return Align::StreamEnded;
            }
        }
        Align::Ok
    }

    /// Prepend the preserved tail so the trellis spans the frame boundary,
    /// then decode.
    fn convolutional_decode(&mut self) {
        self.viterbi_buf[..self.last_frame_bits].copy_from_slice(&self.last_frame_end);
        self.viterbi_buf[self.last_frame_bits..].copy_from_slice(&self.encoded);
        self.viterbi.decode(&self.viterbi_buf, &mut self.decoded);
    }

    /// Viterbi BER with the tail's contribution stripped.
    fn bit_error_rate(&mut self) -> u32 {
        let ber = self.viterbi.ber() as i64 - (self.last_frame_bits / 2) as i64;
        ber.max(0) as u32
    }

    /// Frame shaping: drop the half-overlap head, preserve the encoded tail
    /// for the next call, extract the sync word and shift it off.
    fn clean_frame(&mut self) {
        let half = self.last_frame_size / 2;
        self.decoded.copy_within(half..half + self.frame_size, 0);

        self.last_frame_end
            .copy_from_slice(&self.viterbi_buf[self.encoded_frame_size..]);

        self.sync_word.copy_from_slice(&self.decoded[..SYNC_WORD_SIZE]);
        self.decoded.copy_within(SYNC_WORD_SIZE..self.frame_size, 0);
    }

    /// Deinterleave, RS-decode and reassemble all four blocks. Every block
    /// is always decoded so the correction counters stay comparable frame to
    /// frame. Returns total bytes fixed across correctable blocks.
    fn error_correct(&mut self) -> i32 {
        let payload = self.frame_size - SYNC_WORD_SIZE;
        let mut derrors = [0i32; RS_BLOCKS];
        let mut total_fixed = 0i32;
        let mut corrections = 0.0f32;

        for i in 0..RS_BLOCKS {
            rs::deinterleave(&self.decoded[..payload], &mut self.rs_work, i, RS_BLOCKS);
            derrors[i] = self.reed_solomon.decode_ccsds(&mut self.rs_work);
            rs::interleave(&self.rs_work, &mut self.rs_corrected, i, RS_BLOCKS);

            if derrors[i] != -1 {
                corrections += derrors[i] as f32;
            }
            if derrors[i] > -1 {
                total_fixed += derrors[i];
            }
        }

        if derrors.iter().all(|&e| e == -1) {
            self.current_frame_corrupt = true;
            self.last_frame_ok = false;
        } else {
            self.current_frame_corrupt = false;
            self.last_frame_ok = true;
        }

        if let Ok(mut stats) = self.stats.write() {
            stats.average_rs_corrections += corrections;
        }
        total_fixed
    }

    /// Extract the frame identity, update counters and lock state, and hand
    /// the frame to the sink if one is attached.
    fn emit(
        &mut self,
        ber: u32,
        sig_quality: f32,
        total_bytes_fixed: i32,
        frames: Option<&Sender<DecodedFrame>>,
    ) {
        let scid = extract_scid(&self.rs_corrected);
        let vcid_value = extract_vcid(&self.rs_corrected);
        let counter = extract_counter(&self.rs_corrected);
        let corrupt = self.current_frame_corrupt;

        if let Ok(mut stats) = self.stats.write() {
            stats.total_frames_processed += 1;
            stats.sig_quality = sig_quality;
            stats.avg_vit_corrections += ber as f32;
            stats.ber_percent = self
                .viterbi
                .percent_ber(self.encoded_frame_size + self.last_frame_bits);
            stats.sync_word = self.sync_word;

            if !corrupt {
                stats.frame_lock = true;
                *stats.rx_packets_per_channel.entry(vcid_value).or_insert(0) += 1;
            } else {
                stats.frame_lock = false;
                *stats
                    .dropped_packets_per_channel
                    .entry(vcid_value)
                    .or_insert(0) += 1;
            }
        }

        if !corrupt {
            log::info!(
                "frame: vcid {} ({}) scid {} counter {}",
                vcid_value,
                vcid::name(vcid_value),
                scid,
                counter
            );
            if total_bytes_fixed > 0 {
                log::debug!("parity corrected {} bytes", total_bytes_fixed);
            }
            if let Some(tx) = frames {
                let frame = DecodedFrame {
                    scid,
                    vcid: vcid_value,
                    counter,
                    payload: self.rs_corrected[..self.frame_size - SYNC_WORD_SIZE].to_vec(),
                    corrupt,
                };
                let _ = tx.send(frame);
            }
        } else {
            log::debug!("corrupt frame dropped (vcid field {})", vcid_value);
        }
    }
}

/// Spacecraft ID from the first VCDU header bytes.
fn extract_scid(data: &[u8]) -> u8 {
    ((data[0] & 0x3F) << 2) | ((data[1] & 0xC0) >> 6)
}

/// 6-bit virtual channel ID.
fn extract_vcid(data: &[u8]) -> u8 {
    data[1] & 0x3F
}

/// 24-bit per-channel frame counter: byte-swap the 32-bit word at offset 2,
/// mask to the top 24 bits, shift down.
fn extract_counter(data: &[u8]) -> u32 {
    let word = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
    (word & 0xFFFFFF00) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_extraction() {
        // Bytes 2..6 = 00 12 34 56: counter is the high 24 bits of the
        // endian-swapped word.
        let mut data = vec![0u8; 8];
        data[2] = 0x00;
        data[3] = 0x12;
        data[4] = 0x34;
        data[5] = 0x56;
        assert_eq!(extract_counter(&data), 0x001234);
    }

    #[test]
    fn test_scid_vcid_extraction() {
        // scid 0xAB = 10101011b: top 6 bits in byte 0, low 2 in byte 1's top.
        let mut data = vec![0u8; 8];
        data[0] = 0xAB >> 2;
        data[1] = ((0xABu8 & 0x3) << 6) | 63;
        assert_eq!(extract_scid(&data), 0xAB);
        assert_eq!(extract_vcid(&data), 63);
    }

    #[test]
    fn test_symbol_stream_conversion_and_eos() {
        let (tx, rx) = crossbeam::channel::unbounded();
        tx.send(vec![0i8, 127, -128, -1]).unwrap();
        drop(tx);

        let mut stream = SymbolStream::new(rx);
        let mut out = [0u8; 4];
        assert!(stream.read_exact(&mut out));
        // i8 -> offset binary: 0 -> 128, 127 -> 255, -128 -> 0, -1 -> 127
        assert_eq!(out, [128, 255, 0, 127]);

        let mut more = [0u8; 1];
        assert!(!stream.read_exact(&mut more), "stream should be exhausted");
    }

    #[test]
    fn test_decoder_stats_reset() {
        let mut stats = DecoderStats::default();
        stats.total_frames_processed = 7;
        stats.frame_lock = true;
        stats.rx_packets_per_channel.insert(13, 5);
        stats.reset();
        assert_eq!(stats.total_frames_processed, 0);
        assert!(!stats.frame_lock);
        assert!(stats.rx_packets_per_channel.is_empty());
    }
}
