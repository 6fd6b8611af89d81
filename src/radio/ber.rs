//! Bit-error-rate tables for the additive reception model.
//!
//! A table maps SNR (linear ratio) to bit error rate. Text format: one
//! `snr ber` pair per line, whitespace separated, SNR strictly ascending.
//! Blank lines and lines starting with `#` are ignored.

use std::fs;
use std::path::Path;

use rand::{Rng, RngCore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BerTableError {
    #[error("failed to read BER table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("a BER table needs at least two rows, found {0}")]
    TooShort(usize),

    #[error("SNR values must be strictly ascending (row {row})")]
    NotAscending { row: usize },

    #[error("BER {ber} at row {row} is outside [0, 1]")]
    OutOfRange { row: usize, ber: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BerTable {
    snr: Vec<f64>,
    ber: Vec<f64>,
}

impl BerTable {
    pub fn new(rows: Vec<(f64, f64)>) -> Result<Self, BerTableError> {
        if rows.len() < 2 {
            return Err(BerTableError::TooShort(rows.len()));
        }
        for (row, pair) in rows.windows(2).enumerate() {
            if !(pair[1].0 > pair[0].0) {
                return Err(BerTableError::NotAscending { row: row + 1 });
            }
        }
        if let Some((row, &(_, ber))) = rows.iter().enumerate().find(|(_, (_, b))| !(0.0..=1.0).contains(b)) {
            return Err(BerTableError::OutOfRange { row, ber });
        }
        let (snr, ber) = rows.into_iter().unzip();
        Ok(BerTable { snr, ber })
    }

    pub fn parse(text: &str) -> Result<Self, BerTableError> {
        let mut rows = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let mut number = |what: &str| -> Result<f64, BerTableError> {
                let token = fields.next().ok_or_else(|| BerTableError::Parse {
                    line: idx + 1,
                    message: format!("missing {what} column"),
                })?;
                token.parse::<f64>().map_err(|e| BerTableError::Parse {
                    line: idx + 1,
                    message: format!("bad {what} value {token:?}: {e}"),
                })
            };
            let snr = number("snr")?;
            let ber = number("ber")?;
            rows.push((snr, ber));
        }
        Self::new(rows)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BerTableError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| BerTableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Bit error rate at `snr`, interpolated linearly between the bracketing
    /// rows. Zero beyond the last row, extrapolated from the first two rows
    /// below the first one and clamped into [0, 1].
    pub fn calc(&self, snr: f64) -> f64 {
        let last = self.snr.len() - 1;
        if snr > self.snr[last] {
            return 0.0;
        }
        // first row strictly above snr, bracketing interval is [hi - 1, hi]
        let hi = self.snr.partition_point(|&s| s < snr).clamp(1, last);
        let lo = hi - 1;
        let ber = self.ber[lo] + (self.ber[hi] - self.ber[lo]) * (snr - self.snr[lo]) / (self.snr[hi] - self.snr[lo]);
        ber.clamp(0.0, 1.0)
    }

    /// Decide whether a frame of `bits` bits received at `snr` is corrupted.
    pub fn should_drop(&self, snr: f64, bits: usize, rng: &mut dyn RngCore) -> bool {
        let ber = self.calc(snr);
        if ber <= 0.0 {
            return false;
        }
        let error = 1.0 - (1.0 - ber).powi(bits.min(i32::MAX as usize) as i32);
        error > rng.gen_range(0.0..1.0)
    }
}
