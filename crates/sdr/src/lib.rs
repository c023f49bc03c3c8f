pub mod file;

#[cfg(feature = "soapysdr")]
pub mod soapy;

use crossbeam::channel::Sender;
use num_complex::Complex32;
use thiserror::Error;

/// Sample buffer: one block of complex baseband samples.
pub struct SampleBuf {
    pub data: Vec<Complex32>,
    /// Number of complex samples (same as data.len()).
    pub num_samples: usize,
}

/// IQ stream sample formats a radio can deliver.
///
/// Only `Cf32` feeds the demodulator; the rest exist so `probe` can report
/// what a device offers and so an unsupported `sample_type` fails with a
/// useful message instead of silently mangling samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Cu8,
    Cs8,
    Cu16,
    Cs16,
    Cf32,
    Cf64,
}

impl StreamFormat {
    /// Parse the config `radio.sample_type` value.
    pub fn from_config(name: &str) -> Result<Self, SourceError> {
        match name {
            "complex_u8" => Ok(StreamFormat::Cu8),
            "complex_s8" => Ok(StreamFormat::Cs8),
            "complex_u16" => Ok(StreamFormat::Cu16),
            "complex_s16" => Ok(StreamFormat::Cs16),
            "complex64" => Ok(StreamFormat::Cf32),
            "complex128" => Ok(StreamFormat::Cf64),
            other => Err(SourceError::UnknownSampleType(other.to_string())),
        }
    }

    /// SoapySDR stream format string.
    pub fn soapy_name(&self) -> &'static str {
        match self {
            StreamFormat::Cu8 => "CU8",
            StreamFormat::Cs8 => "CS8",
            StreamFormat::Cu16 => "CU16",
            StreamFormat::Cs16 => "CS16",
            StreamFormat::Cf32 => "CF32",
            StreamFormat::Cf64 => "CF64",
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unknown sample_type \"{0}\"")]
    UnknownSampleType(String),
    #[error("sample_type {0:?} is not supported by the demodulator (only complex64)")]
    UnsupportedSampleType(StreamFormat),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Device(String),
}

/// Common trait for all IQ sample sources.
pub trait SdrSource: Send {
    /// Stream sample blocks into the channel until stop() is called, the
    /// receiver is dropped, or the source runs dry. Dropping the sender on
    /// return is the end-of-stream signal for the pipeline.
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<(), String>;

    /// Signal the source to stop streaming.
    fn stop(&mut self);

    fn sample_rate(&self) -> f64;

    fn center_frequency(&self) -> f64;
}
