use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crossbeam::channel::Sender;
use num_complex::Complex32;

use crate::{SampleBuf, SdrSource};

/// Text IQ file reader: parses "re im" float pairs, one complex sample per
/// line, and sends them as fixed-size blocks. Stands in for a radio during
/// offline decoding and testing (`tune --file`).
pub struct FileSource {
    path: String,
    sample_rate: f64,
    center_freq: f64,
    /// Number of complex samples per block.
    block_size: usize,
    running: bool,
}

impl FileSource {
    pub fn new(path: impl Into<String>, sample_rate: f64, center_freq: f64) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            center_freq,
            block_size: 65536,
            running: false,
        }
    }

    pub fn set_block_size(&mut self, size: usize) {
        self.block_size = size.max(1);
    }

    fn parse_line(line: &str) -> Option<Complex32> {
        let mut parts = line.split_whitespace();
        let re: f32 = parts.next()?.parse().ok()?;
        let im: f32 = parts.next()?.parse().ok()?;
        Some(Complex32::new(re, im))
    }
}

impl SdrSource for FileSource {
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<(), String> {
        let path = Path::new(&self.path);
        let file =
            File::open(path).map_err(|e| format!("failed to open {}: {}", self.path, e))?;
        let reader = BufReader::with_capacity(1024 * 1024, file);

        self.running = true;
        log::info!(
            "reading IQ text from {} ({} samples/block)",
            self.path,
            self.block_size
        );

        let mut block: Vec<Complex32> = Vec::with_capacity(self.block_size);
        let mut skipped: u64 = 0;

        for line in reader.lines() {
            if !self.running {
                break;
            }
            let line = line.map_err(|e| format!("read error: {}", e))?;
            match Self::parse_line(&line) {
                Some(sample) => block.push(sample),
                None => {
                    if !line.trim().is_empty() {
                        skipped += 1;
                    }
                    continue;
                }
            }

            if block.len() == self.block_size {
                let data = std::mem::replace(&mut block, Vec::with_capacity(self.block_size));
                let num_samples = data.len();
                if tx.send(SampleBuf { data, num_samples }).is_err() {
                    return Ok(()); // receiver dropped
                }
            }
        }

        if !block.is_empty() {
            let num_samples = block.len();
            let _ = tx.send(SampleBuf {
                data: block,
                num_samples,
            });
        }

        if skipped > 0 {
            log::warn!("skipped {} unparseable lines in {}", skipped, self.path);
        }
        log::info!("end of file: {}", self.path);
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let s = FileSource::parse_line("0.5 -0.25").unwrap();
        assert!((s.re - 0.5).abs() < 1e-6);
        assert!((s.im + 0.25).abs() < 1e-6);
        assert!(FileSource::parse_line("garbage").is_none());
        assert!(FileSource::parse_line("1.0").is_none());
    }

    #[test]
    fn test_file_source_blocks() {
        use std::io::Write;

        let dir = std::env::temp_dir();
        let path = dir.join("xritrx_filesource_test.iq");
        {
            let mut f = File::create(&path).unwrap();
            for i in 0..10 {
                writeln!(f, "{} {}", i as f32 * 0.1, -(i as f32) * 0.1).unwrap();
            }
        }

        let mut src = FileSource::new(path.to_string_lossy().to_string(), 1.0, 0.0);
        src.set_block_size(4);

        let (tx, rx) = crossbeam::channel::unbounded();
        src.start(tx).unwrap();

        let blocks: Vec<SampleBuf> = rx.iter().collect();
        assert_eq!(blocks.len(), 3); // 4 + 4 + 2
        assert_eq!(blocks[0].num_samples, 4);
        assert_eq!(blocks[2].num_samples, 2);
        assert!((blocks[0].data[1].re - 0.1).abs() < 1e-6);

        let _ = std::fs::remove_file(&path);
    }
}
