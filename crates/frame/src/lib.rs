pub mod correlator;
pub mod decoder;
pub mod derandomizer;
pub mod nrzm;
pub mod rs;
pub mod vcid;
pub mod viterbi;

pub use decoder::{DecodedFrame, Decoder, DecoderConfig, DecoderStats};
