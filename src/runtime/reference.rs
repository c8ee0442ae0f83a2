//! Loop-based kernels over row-major buffers.
//!
//! Deliberately independent of ndarray's linear algebra so that agreement
//! with [`super::NdarrayRuntime`] is a meaningful cross-check.

use ndarray::{ArrayD, IxDyn};
use tracing::trace;

use super::{BackendKind, Kernels, TensorRuntime, last_axis, run_step};
use crate::error::GraphError;
use crate::plan::PlanStep;
use crate::tensor::{FloatElement, Tensor};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceRuntime;

impl TensorRuntime for ReferenceRuntime {
    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn execute(&self, step: &PlanStep, inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
        trace!(step = %step.describe(), backend = "reference", "executing step");
        run_step::<Self>(step, inputs)
    }
}

fn flat<T: Copy>(array: &ArrayD<T>) -> Vec<T> {
    array.iter().copied().collect()
}

fn rebuild<T>(shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>, String> {
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|err| err.to_string())
}

fn dims2<T>(array: &ArrayD<T>) -> Result<(usize, usize), String> {
    match array.shape() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(format!("expected a matrix, got shape {other:?}")),
    }
}

/// Row width of the last axis, rejecting empty class axes.
fn row_width<T>(array: &ArrayD<T>) -> Result<usize, String> {
    let width = array.len_of(last_axis(array)?);
    if width == 0 {
        return Err("empty class axis".to_string());
    }
    Ok(width)
}

impl Kernels for ReferenceRuntime {
    fn affine<T: FloatElement>(x: &ArrayD<T>, weights: &ArrayD<T>, bias: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let (n, k) = dims2(x)?;
        let (r, wk) = dims2(weights)?;
        if wk != k || bias.len() != r || bias.ndim() != 1 {
            return Err(format!(
                "weights {:?} and bias {:?} do not fit input {:?}",
                weights.shape(),
                bias.shape(),
                x.shape()
            ));
        }
        let xs = flat(x);
        let ws = flat(weights);
        let bs = flat(bias);
        let mut out = Vec::with_capacity(n * r);
        for row in xs.chunks(k.max(1)).take(n) {
            for (class, w_row) in ws.chunks(k.max(1)).take(r).enumerate() {
                let mut acc = T::zero();
                for (a, w) in row.iter().zip(w_row) {
                    acc = acc + *a * *w;
                }
                out.push(acc + bs[class]);
            }
        }
        rebuild(&[n, r], out)
    }

    fn matmul<T: FloatElement>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let (n, k) = dims2(a)?;
        let (bk, m) = dims2(b)?;
        if bk != k {
            return Err(format!("cannot multiply {:?} by {:?}", a.shape(), b.shape()));
        }
        let xs = flat(a);
        let ys = flat(b);
        let mut out = vec![T::zero(); n * m];
        for i in 0..n {
            for j in 0..m {
                let mut acc = T::zero();
                for p in 0..k {
                    acc = acc + xs[i * k + p] * ys[p * m + j];
                }
                out[i * m + j] = acc;
            }
        }
        rebuild(&[n, m], out)
    }

    fn add<T: FloatElement>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let rhs = b
            .broadcast(a.raw_dim())
            .ok_or_else(|| format!("cannot broadcast {:?} to {:?}", b.shape(), a.shape()))?;
        let values = a.iter().zip(rhs.iter()).map(|(x, y)| *x + *y).collect();
        rebuild(a.shape(), values)
    }

    fn sigmoid<T: FloatElement>(x: &ArrayD<T>) -> ArrayD<T> {
        x.mapv(|value| T::one() / (T::one() + (-value).exp()))
    }

    fn softmax<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let width = row_width(x)?;
        let mut values = flat(x);
        for row in values.chunks_mut(width) {
            let mut max = row[0];
            for value in row.iter() {
                if *value > max {
                    max = *value;
                }
            }
            let mut total = T::zero();
            for value in row.iter_mut() {
                *value = (*value - max).exp();
                total = total + *value;
            }
            for value in row.iter_mut() {
                *value = *value / total;
            }
        }
        rebuild(x.shape(), values)
    }

    fn normalize_l1<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let width = row_width(x)?;
        let mut values = flat(x);
        for row in values.chunks_mut(width) {
            let mut norm = T::zero();
            for value in row.iter() {
                norm = norm + value.abs();
            }
            if norm > T::zero() {
                for value in row.iter_mut() {
                    *value = *value / norm;
                }
            }
        }
        rebuild(x.shape(), values)
    }

    fn argmax<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<i64>, String> {
        let width = row_width(x)?;
        let values = flat(x);
        let mut indices = Vec::with_capacity(values.len() / width);
        for row in values.chunks(width) {
            let mut best = 0usize;
            for idx in 1..row.len() {
                if row[idx] > row[best] {
                    best = idx;
                }
            }
            indices.push(best as i64);
        }
        let shape = &x.shape()[..x.ndim() - 1];
        rebuild(shape, indices)
    }
}
