//! Channel-count conversion.
//!
//! A mixing matrix converts `from` channels into `to` channels. It is stored
//! row-major with one row per output channel, so output `o` receives
//! `sum(m[o * from + i] * input[i])`. When no matrix is registered for a
//! pair, [`remix_into`] falls back to adding the first `min(from, to)`
//! channels one-to-one and leaving any further destination channels alone.

use std::collections::HashMap;

use crate::buffer;
use crate::error::GraphError;

/// Something that can supply a mixing matrix for a channel-count pair.
pub trait MixingMatrixSource {
    /// Row-major `to x from` coefficients, or `None` if the pair is unknown.
    fn lookup(&self, from: usize, to: usize) -> Option<&[f32]>;
}

const SIXTH: f32 = 1.0 / 6.0;
const EIGHTH: f32 = 1.0 / 8.0;

// Speaker order for 6 channels: fl fr fc lfe bl br. For 8: fl fr fc lfe bl br sl sr.
#[rustfmt::skip]
const DEFAULTS: &[(usize, usize, &[f32])] = &[
    (1, 2, &[1.0, 1.0]),
    (1, 6, &[1.0, 1.0, 1.0, 0.0, 1.0, 1.0]),
    (1, 8, &[1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0]),
    (2, 1, &[0.5, 0.5]),
    (2, 6, &[
        1.0, 0.0,
        0.0, 1.0,
        0.0, 0.0,
        0.0, 0.0,
        1.0, 0.0,
        0.0, 1.0,
    ]),
    (2, 8, &[
        1.0, 0.0,
        0.0, 1.0,
        0.0, 0.0,
        0.0, 0.0,
        1.0, 0.0,
        0.0, 1.0,
        1.0, 0.0,
        0.0, 1.0,
    ]),
    (6, 1, &[SIXTH, SIXTH, SIXTH, SIXTH, SIXTH, SIXTH]),
    (6, 2, &[
        0.3, 0.0, 0.3, 0.1, 0.3, 0.0,
        0.0, 0.3, 0.3, 0.1, 0.0, 0.3,
    ]),
    (6, 8, &[
        1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0, 0.5, 0.0,
        0.0, 0.0, 0.0, 0.0, 0.0, 0.5,
        0.0, 0.0, 0.0, 0.0, 0.5, 0.0,
        0.0, 0.0, 0.0, 0.0, 0.0, 0.5,
    ]),
    (8, 1, &[EIGHTH, EIGHTH, EIGHTH, EIGHTH, EIGHTH, EIGHTH, EIGHTH, EIGHTH]),
    (8, 2, &[
        0.2, 0.0, 0.2, 0.2, 0.2, 0.0, 0.2, 0.0,
        0.0, 0.2, 0.2, 0.2, 0.0, 0.2, 0.0, 0.2,
    ]),
    (8, 6, &[
        1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5,
    ]),
];

fn default_matrix(from: usize, to: usize) -> Option<&'static [f32]> {
    DEFAULTS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, m)| *m)
}

/// Registry of mixing matrices keyed by `(from, to)`.
#[derive(Debug, Clone)]
pub struct MixingMatrices {
    table: HashMap<(usize, usize), Vec<f32>>,
}

impl Default for MixingMatrices {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MixingMatrices {
    /// A registry with no matrices; every conversion uses the fallback.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in mono, stereo, 5.1 and 7.1 layouts.
    pub fn with_defaults() -> Self {
        let table = DEFAULTS
            .iter()
            .map(|(from, to, m)| ((*from, *to), m.to_vec()))
            .collect();
        Self { table }
    }

    /// Installs or replaces the matrix for `from -> to`.
    pub fn register(&mut self, from: usize, to: usize, coefficients: Vec<f32>) -> Result<(), GraphError> {
        let expected = from * to;
        if expected == 0 || coefficients.len() != expected {
            return Err(GraphError::InvalidMatrix {
                from,
                to,
                expected,
                got: coefficients.len(),
            });
        }
        self.table.insert((from, to), coefficients);
        Ok(())
    }

    /// Removes any matrix for the pair, built-in or not.
    pub fn remove(&mut self, from: usize, to: usize) -> Option<Vec<f32>> {
        self.table.remove(&(from, to))
    }

    /// Restores the built-in matrix for the pair, or removes the pair if there
    /// is no built-in.
    pub fn reset(&mut self, from: usize, to: usize) {
        match default_matrix(from, to) {
            Some(m) => {
                self.table.insert((from, to), m.to_vec());
            }
            None => {
                self.table.remove(&(from, to));
            }
        }
    }

    /// Restores the built-in table, discarding custom matrices.
    pub fn reset_all(&mut self) {
        *self = Self::with_defaults();
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no pair is registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl MixingMatrixSource for MixingMatrices {
    fn lookup(&self, from: usize, to: usize) -> Option<&[f32]> {
        self.table.get(&(from, to)).map(Vec::as_slice)
    }
}

/// Adds `src` into `dst`, converting channel count.
///
/// With `matrix` present it must be `dst.len() x src.len()`; otherwise the
/// first `min` channels are added one-to-one.
pub fn remix_into(src: &[Vec<f32>], dst: &mut [Vec<f32>], matrix: Option<&[f32]>) {
    let from = src.len();
    match matrix {
        Some(m) if m.len() == from * dst.len() => {
            for (o, out) in dst.iter_mut().enumerate() {
                let row = &m[o * from..(o + 1) * from];
                for (gain, input) in row.iter().zip(src) {
                    buffer::mul_add_into(*gain, input, out);
                }
            }
        }
        _ => {
            for (input, out) in src.iter().zip(dst.iter_mut()) {
                buffer::add_into(input, out);
            }
        }
    }
}
