// Frame survival probabilities under a bit error rate.
//
// P_OK(BER, N) = (1 - BER) ^ (N * 8), tabulated for every BER we accept and every
// frame length up to BER_PLEN_MAX. Values are 64-bit fixed point with the binary
// point between bits 47 and 48, so ONE = 2^48.

use super::random::UniformSource;
use rayon::prelude::*;
use std::time::Instant;
use tracing::debug;

pub const ONE: u64 = 1 << 48;

/// Exponents 0..BER_E_MAX, i.e. BER down to m * 10^-12.
pub const BER_E_MAX: usize = 12;
pub const BER_M_MAX: usize = 9;
pub const BER_PLEN_MAX: usize = 4095;

const ROW_LEN: usize = BER_PLEN_MAX + 1;
const ROWS: usize = BER_E_MAX * (BER_M_MAX + 1);

#[derive(Debug)]
pub struct ProbabilityTable {
    rows: Vec<u64>,
}

impl ProbabilityTable {
    pub fn build() -> Self {
        let start = Instant::now();
        let mut rows = vec![0u64; ROWS * ROW_LEN];

        rows.par_chunks_mut(ROW_LEN)
            .enumerate()
            .for_each(|(row, out)| {
                let exponent = row / (BER_M_MAX + 1);
                let mantissa = row % (BER_M_MAX + 1);
                fill_row(exponent as u32, mantissa as u64, out);
            });

        debug!(
            "BER table built: {} rows x {} lengths in {:?}",
            ROWS,
            ROW_LEN,
            start.elapsed()
        );
        Self { rows }
    }

    /// Fixed-point probability that a `len` byte frame crosses a link with
    /// BER `mantissa * 10^-(exponent + 1)` uncorrupted. Mantissa 0 is lossless.
    /// Lengths past the table are looked up at the last entry.
    pub fn survival_probability(&self, exponent: u8, mantissa: u8, len: usize) -> u64 {
        let exponent = (exponent as usize).min(BER_E_MAX - 1);
        let mantissa = (mantissa as usize).min(BER_M_MAX);
        let len = len.min(BER_PLEN_MAX);
        self.rows[(exponent * (BER_M_MAX + 1) + mantissa) * ROW_LEN + len]
    }

    /// Draws against the table and reports whether the frame made it.
    ///
    /// A single 32-bit draw can't resolve probabilities this close to one, so
    /// two successive draws are stitched into a 48-bit value.
    pub fn survives(
        &self,
        exponent: u8,
        mantissa: u8,
        len: usize,
        source: &mut dyn UniformSource,
    ) -> bool {
        if mantissa == 0 {
            return true;
        }
        let high = source.next_u32() as u64;
        let low = source.next_u32() as u64;
        let draw = (high << 16) | (low >> 16);
        draw < self.survival_probability(exponent, mantissa, len)
    }
}

pub fn to_f64(p: u64) -> f64 {
    p as f64 / ONE as f64
}

fn fill_row(exponent: u32, mantissa: u64, out: &mut [u64]) {
    if mantissa == 0 {
        out.fill(ONE);
        return;
    }

    let mut ber = ONE * mantissa / 10;
    for _ in 0..exponent {
        ber /= 10;
    }
    let bit_ok = ONE - ber;

    let mut p = ONE;
    for slot in out.iter_mut() {
        *slot = p;
        for _ in 0..8 {
            p = mul_fixed(p, bit_ok);
        }
    }
}

// p * q / 2^48 without overflowing u64. q is split into three 16-bit limbs and
// the partial products are shifted back into place separately. p <= ONE and each
// limb < 2^16 keeps every product below 2^64.
fn mul_fixed(p: u64, q: u64) -> u64 {
    (p * (q & 0xffff) >> 48) + (p * ((q >> 16) & 0xffff) >> 32) + (p * (q >> 32) >> 16)
}
