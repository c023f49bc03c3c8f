use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use num_complex::Complex32;

use crate::{SampleBuf, SdrSource, SourceError, StreamFormat};

type SoapyDevice = c_void;
type SoapyStream = c_void;

const SOAPY_SDR_RX: c_int = 0;
const SOAPY_SDR_TIMEOUT: c_int = -1;
const SOAPY_SDR_OVERFLOW: c_int = -4;

/// Read timeout handed to readStream, in microseconds.
const READ_TIMEOUT_US: i64 = 100;

#[repr(C)]
struct SoapyKwargs {
    size: usize,
    keys: *mut *mut c_char,
    vals: *mut *mut c_char,
}

extern "C" {
    fn SoapySDRDevice_enumerate(args: *const SoapyKwargs, length: *mut usize) -> *mut SoapyKwargs;
    fn SoapySDRDevice_makeStrArgs(args: *const c_char) -> *mut SoapyDevice;
    fn SoapySDRDevice_unmake(device: *mut SoapyDevice) -> c_int;
    fn SoapySDRDevice_setSampleRate(
        dev: *mut SoapyDevice,
        direction: c_int,
        channel: usize,
        rate: c_double,
    ) -> c_int;
    fn SoapySDRDevice_setFrequency(
        dev: *mut SoapyDevice,
        direction: c_int,
        channel: usize,
        frequency: c_double,
        args: *const SoapyKwargs,
    ) -> c_int;
    fn SoapySDRDevice_setGain(
        dev: *mut SoapyDevice,
        direction: c_int,
        channel: usize,
        value: c_double,
    ) -> c_int;
    fn SoapySDRDevice_setupStream(
        dev: *mut SoapyDevice,
        direction: c_int,
        format: *const c_char,
        channels: *const usize,
        num_chans: usize,
        args: *const SoapyKwargs,
    ) -> *mut SoapyStream;
    fn SoapySDRDevice_activateStream(
        dev: *mut SoapyDevice,
        stream: *mut SoapyStream,
        flags: c_int,
        time_ns: i64,
        num_elems: usize,
    ) -> c_int;
    fn SoapySDRDevice_deactivateStream(
        dev: *mut SoapyDevice,
        stream: *mut SoapyStream,
        flags: c_int,
        time_ns: i64,
    ) -> c_int;
    fn SoapySDRDevice_closeStream(dev: *mut SoapyDevice, stream: *mut SoapyStream) -> c_int;
    fn SoapySDRDevice_readStream(
        dev: *mut SoapyDevice,
        stream: *mut SoapyStream,
        buffs: *const *mut c_void,
        num_elems: usize,
        flags: *mut c_int,
        time_ns: *mut i64,
        timeout_us: i64,
    ) -> c_int;
    fn SoapySDRDevice_getStreamFormats(
        dev: *mut SoapyDevice,
        direction: c_int,
        channel: usize,
        length: *mut usize,
    ) -> *mut *mut c_char;
    fn SoapySDRDevice_lastError() -> *const c_char;
    fn SoapySDRKwargsList_clear(info: *mut SoapyKwargs, length: usize);
    fn SoapySDRStrings_clear(strings: *mut *mut c_char, length: usize);
}

fn last_error() -> String {
    unsafe {
        let p = SoapySDRDevice_lastError();
        if p.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoapyInfo {
    pub index: usize,
    pub driver: String,
    pub label: String,
}

/// Enumerate all SoapySDR devices visible on this system.
pub fn list_devices() -> Result<Vec<SoapyInfo>, String> {
    let mut length: usize = 0;
    let results = unsafe { SoapySDRDevice_enumerate(ptr::null(), &mut length) };

    if results.is_null() || length == 0 {
        return Ok(Vec::new());
    }

    let mut devices = Vec::new();
    for i in 0..length {
        let kw = unsafe { &*results.add(i) };
        let mut driver = String::new();
        let mut label = String::new();

        for j in 0..kw.size {
            let key = unsafe { CStr::from_ptr(*kw.keys.add(j)).to_string_lossy().to_string() };
            let val = unsafe { CStr::from_ptr(*kw.vals.add(j)).to_string_lossy().to_string() };
            match key.as_str() {
                "driver" => driver = val,
                "label" => label = val,
                _ => {}
            }
        }

        devices.push(SoapyInfo {
            index: i,
            driver,
            label,
        });
    }

    unsafe { SoapySDRKwargsList_clear(results, length) };
    Ok(devices)
}

/// List the stream format strings a device advertises (for probe output).
fn stream_formats(dev: *mut SoapyDevice) -> Vec<String> {
    let mut length: usize = 0;
    let formats = unsafe { SoapySDRDevice_getStreamFormats(dev, SOAPY_SDR_RX, 0, &mut length) };
    if formats.is_null() || length == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(length);
    for i in 0..length {
        out.push(unsafe { CStr::from_ptr(*formats.add(i)).to_string_lossy().to_string() });
    }
    unsafe { SoapySDRStrings_clear(formats, length) };
    out
}

/// Streaming handle around one SoapySDR device.
///
/// Lifecycle: `connect()` makes the device, configures it, sets up and
/// activates the CF32 stream. `pause()`/`resume()` deactivate/reactivate for
/// a front-end resync without tearing the device down.
pub struct SoapySource {
    driver: String,
    address: String,
    sample_rate: f64,
    center_freq: f64,
    gain: f64,
    format: StreamFormat,
    block_size: usize,
    dev: *mut SoapyDevice,
    stream: *mut SoapyStream,
    running: Arc<AtomicBool>,
    overflow_count: u64,
}

// The raw pointers are only touched from the source thread.
unsafe impl Send for SoapySource {}

impl SoapySource {
    pub fn new(
        driver: &str,
        address: &str,
        sample_rate: f64,
        center_freq: f64,
        gain: f64,
        format: StreamFormat,
        block_size: usize,
    ) -> Result<Self, SourceError> {
        // Everything but CF32 would need a conversion stage the demodulator
        // does not carry.
        if format != StreamFormat::Cf32 {
            return Err(SourceError::UnsupportedSampleType(format));
        }
        Ok(Self {
            driver: driver.to_string(),
            address: address.to_string(),
            sample_rate,
            center_freq,
            gain,
            format,
            block_size: block_size.max(1024),
            dev: ptr::null_mut(),
            stream: ptr::null_mut(),
            running: Arc::new(AtomicBool::new(false)),
            overflow_count: 0,
        })
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn make_args(&self) -> String {
        if self.driver == "rtltcp" {
            format!("driver={},rtltcp={}", self.driver, self.address)
        } else {
            format!("driver={}", self.driver)
        }
    }

    /// Make the device, configure rate/frequency/gain, set up and activate
    /// the IQ stream.
    pub fn connect(&mut self) -> Result<(), String> {
        let args = CString::new(self.make_args()).map_err(|e| e.to_string())?;
        let dev = unsafe { SoapySDRDevice_makeStrArgs(args.as_ptr()) };
        if dev.is_null() {
            return Err(format!("SoapySDR make failed: {}", last_error()));
        }

        unsafe {
            if SoapySDRDevice_setSampleRate(dev, SOAPY_SDR_RX, 0, self.sample_rate) != 0 {
                SoapySDRDevice_unmake(dev);
                return Err(format!("could not set sample rate: {}", last_error()));
            }
            if SoapySDRDevice_setFrequency(dev, SOAPY_SDR_RX, 0, self.center_freq, ptr::null())
                != 0
            {
                SoapySDRDevice_unmake(dev);
                return Err(format!("could not set frequency: {}", last_error()));
            }
            let _ = SoapySDRDevice_setGain(dev, SOAPY_SDR_RX, 0, self.gain);
        }

        log::debug!("stream formats: {:?}", stream_formats(dev));

        let fmt = CString::new(self.format.soapy_name()).map_err(|e| e.to_string())?;
        let channel: usize = 0;
        let stream = unsafe {
            SoapySDRDevice_setupStream(dev, SOAPY_SDR_RX, fmt.as_ptr(), &channel, 1, ptr::null())
        };
        if stream.is_null() {
            unsafe { SoapySDRDevice_unmake(dev) };
            return Err(format!("setupStream failed: {}", last_error()));
        }

        self.dev = dev;
        self.stream = stream;
        self.resume()?;

        log::info!(
            "SoapySDR streaming (driver={}, {:.3} MHz, {:.3} MS/s, gain={})",
            self.driver,
            self.center_freq / 1e6,
            self.sample_rate / 1e6,
            self.gain,
        );
        Ok(())
    }

    /// Deactivate the stream without closing the device.
    pub fn pause(&mut self) -> Result<(), String> {
        if self.stream.is_null() {
            return Ok(());
        }
        log::info!("deactivating IQ stream");
        let r = unsafe { SoapySDRDevice_deactivateStream(self.dev, self.stream, 0, 0) };
        if r != 0 {
            return Err(format!("deactivateStream failed: {}", last_error()));
        }
        Ok(())
    }

    /// (Re)activate the stream and discard the first block so the pipeline
    /// starts on clean data.
    pub fn resume(&mut self) -> Result<(), String> {
        let r = unsafe { SoapySDRDevice_activateStream(self.dev, self.stream, 0, 0, 0) };
        if r != 0 {
            return Err(format!("activateStream failed: {}", last_error()));
        }
        let mut scratch = vec![Complex32::new(0.0, 0.0); 1024];
        let _ = self.read_into(&mut scratch);
        Ok(())
    }

    /// Read up to buf.len() samples. Returns 0 on timeout or overflow.
    fn read_into(&mut self, buf: &mut [Complex32]) -> usize {
        let mut flags: c_int = 0;
        let mut time_ns: i64 = 0;
        let mut buf_ptr = buf.as_mut_ptr() as *mut c_void;

        let ret = unsafe {
            SoapySDRDevice_readStream(
                self.dev,
                self.stream,
                &mut buf_ptr,
                buf.len(),
                &mut flags,
                &mut time_ns,
                READ_TIMEOUT_US,
            )
        };

        match ret {
            SOAPY_SDR_TIMEOUT => 0,
            SOAPY_SDR_OVERFLOW => {
                self.overflow_count += 1;
                if self.overflow_count % 1000 == 1 {
                    log::warn!("SoapySDR overflow (total {})", self.overflow_count);
                }
                0
            }
            n if n < 0 => {
                log::error!("SoapySDR read error: {}", n);
                0
            }
            n => n as usize,
        }
    }

    fn teardown(&mut self) {
        unsafe {
            if !self.stream.is_null() {
                SoapySDRDevice_deactivateStream(self.dev, self.stream, 0, 0);
                SoapySDRDevice_closeStream(self.dev, self.stream);
                self.stream = ptr::null_mut();
            }
            if !self.dev.is_null() {
                SoapySDRDevice_unmake(self.dev);
                self.dev = ptr::null_mut();
            }
        }
    }
}

impl SdrSource for SoapySource {
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<(), String> {
        if self.dev.is_null() {
            self.connect()?;
        }
        self.running.store(true, Ordering::SeqCst);

        let block_size = self.block_size;
        while self.running.load(Ordering::SeqCst) {
            let mut block = vec![Complex32::new(0.0, 0.0); block_size];
            let mut filled = 0usize;

            // Accumulate a full block; short reads just mean the timeout hit.
            while filled < block_size && self.running.load(Ordering::SeqCst) {
                let n = self.read_into(&mut block[filled..]);
                if n == 0 {
                    std::thread::yield_now();
                    continue;
                }
                filled += n;
            }

            if filled == 0 {
                continue;
            }
            block.truncate(filled);
            let num_samples = block.len();
            if tx
                .send(SampleBuf {
                    data: block,
                    num_samples,
                })
                .is_err()
            {
                break; // receiver dropped
            }
        }

        self.teardown();
        log::info!("SoapySDR streaming stopped");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}

impl Drop for SoapySource {
    fn drop(&mut self) {
        self.teardown();
    }
}
