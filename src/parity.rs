//! Agreement checks between two predictions of the same model.
//!
//! Labels must always match exactly. Scores are compared either within a
//! tolerance (numpy `allclose` semantics, `|a - b| <= atol + rtol * |b|`) or
//! bit for bit.

use std::fmt;

use thiserror::Error;

use crate::model::Prediction;
use crate::tensor::{DataType, Tensor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parity {
    Tolerance { atol: f64, rtol: f64 },
    Exact,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::Tolerance {
            atol: 1e-5,
            rtol: 0.0,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Tolerance { atol, rtol } => write!(f, "atol={atol:e}, rtol={rtol:e}"),
            Parity::Exact => f.write_str("exact"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParityMismatch {
    #[error("{output} shapes differ: {left:?} vs {right:?}")]
    Shape {
        output: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },
    #[error("{output} data types differ: {left:?} vs {right:?}")]
    DataType {
        output: &'static str,
        left: DataType,
        right: DataType,
    },
    #[error("{count} labels differ, first at index {first}")]
    Labels { count: usize, first: usize },
    #[error("{count} scores differ beyond {parity}, first at index {first}, max abs diff {max_abs_diff:e}")]
    Scores {
        parity: Parity,
        count: usize,
        first: usize,
        max_abs_diff: f64,
    },
}

/// Maximum absolute and relative (sum of differences over sum of magnitudes)
/// difference between two equally long slices.
pub fn diff(result: &[f64], ans: &[f64]) -> (f64, f64) {
    let mut max_abs_diff = 0.0f64;
    let mut up = 0.0;
    let mut down = 0.0;
    for (r, a) in result.iter().zip(ans) {
        let diff = (r - a).abs();
        max_abs_diff = max_abs_diff.max(diff);
        up += diff;
        down += a.abs();
    }
    let relative = if down > 0.0 { up / down } else { up };
    (max_abs_diff, relative)
}

fn same_shape(output: &'static str, left: &Tensor, right: &Tensor) -> Result<(), ParityMismatch> {
    if left.shape() == right.shape() {
        Ok(())
    } else {
        Err(ParityMismatch::Shape {
            output,
            left: left.shape().to_vec(),
            right: right.shape().to_vec(),
        })
    }
}

fn mismatches(flags: impl Iterator<Item = bool>) -> (usize, usize) {
    let mut count = 0;
    let mut first = usize::MAX;
    for (idx, differs) in flags.enumerate() {
        if differs {
            first = first.min(idx);
            count += 1;
        }
    }
    (count, first)
}

/// Check that `left` and `right` agree under `parity`.
pub fn compare_predictions(
    left: &Prediction,
    right: &Prediction,
    parity: Parity,
) -> Result<(), ParityMismatch> {
    same_shape("label", &left.label, &right.label)?;
    let (count, first) = mismatches(left.labels().iter().zip(right.labels()).map(|(a, b)| *a != b));
    if count > 0 {
        return Err(ParityMismatch::Labels { count, first });
    }

    same_shape("score", &left.score, &right.score)?;
    let a = left.score.to_f64_vec();
    let b = right.score.to_f64_vec();
    let (count, first) = match parity {
        Parity::Tolerance { atol, rtol } => mismatches(
            a.iter()
                .zip(&b)
                .map(|(x, y)| !((x - y).abs() <= atol + rtol * y.abs())),
        ),
        Parity::Exact => {
            if left.score.data_type() != right.score.data_type() {
                return Err(ParityMismatch::DataType {
                    output: "score",
                    left: left.score.data_type(),
                    right: right.score.data_type(),
                });
            }
            mismatches(a.iter().zip(&b).map(|(x, y)| x.to_bits() != y.to_bits()))
        }
    };
    if count > 0 {
        let (max_abs_diff, _) = diff(&a, &b);
        return Err(ParityMismatch::Scores {
            parity,
            count,
            first,
            max_abs_diff,
        });
    }
    Ok(())
}
