/// Sync-word correlator over soft symbols.
///
/// Words are 64-bit encoded sync patterns. Soft symbols are offset-binary
/// bytes (0 = strong low, 255 = strong high); correlation counts hard-bit
/// agreements at every candidate offset and keeps the best (word, offset)
/// pair. The decoder primes two words: the encoded CADU sync marker and the
/// pattern produced by an ambiguous 180-degree Costas lock.
pub struct Correlator {
    words: Vec<[u8; 64]>,
    highest_correlation: u32,
    highest_position: usize,
    matched_word: usize,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            highest_correlation: 0,
            highest_position: 0,
            matched_word: 0,
        }
    }

    /// Prime a 64-bit sync word, MSB transmitted first.
    pub fn add_word(&mut self, word: u64) {
        let mut bits = [0u8; 64];
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = ((word >> (63 - i)) & 1) as u8;
        }
        self.words.push(bits);
    }

    /// Correlate every primed word against the first `search_size` soft
    /// symbols of `soft`. Results are read back via the accessors.
    pub fn correlate(&mut self, soft: &[u8], search_size: usize) {
        let search_size = search_size.min(soft.len());
        self.highest_correlation = 0;
        self.highest_position = 0;
        self.matched_word = 0;

        if search_size < 64 {
            return;
        }

        for (w, word) in self.words.iter().enumerate() {
            for pos in 0..=(search_size - 64) {
                let mut matches = 0u32;
                for (i, &expected) in word.iter().enumerate() {
                    let hard = soft[pos + i] >> 7;
                    if hard == expected {
                        matches += 1;
                    }
                }
                if matches > self.highest_correlation {
                    self.highest_correlation = matches;
                    self.highest_position = pos;
                    self.matched_word = w;
                }
            }
        }
    }

    /// Best bit-agreement count from the last correlate() call.
    pub fn highest_correlation(&self) -> u32 {
        self.highest_correlation
    }

    /// Offset of the best match from the last correlate() call.
    pub fn highest_position(&self) -> usize {
        self.highest_position
    }

    /// Index of the word that produced the best match.
    pub fn matched_word(&self) -> usize {
        self.matched_word
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
