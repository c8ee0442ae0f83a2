use ndarray::ArrayD;
use num_traits::Float;
use tracing::trace;

use super::{BackendKind, Kernels, TensorRuntime, last_axis, matrix, run_step, vector};
use crate::error::GraphError;
use crate::plan::PlanStep;
use crate::tensor::{FloatElement, Tensor};

/// Runtime built on ndarray's `dot` and broadcasting arithmetic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NdarrayRuntime;

impl TensorRuntime for NdarrayRuntime {
    fn kind(&self) -> BackendKind {
        BackendKind::Ndarray
    }

    fn execute(&self, step: &PlanStep, inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
        trace!(step = %step.describe(), backend = "ndarray", "executing step");
        run_step::<Self>(step, inputs)
    }
}

fn stable_sigmoid<T: Float>(value: T) -> T {
    if value >= T::zero() {
        T::one() / (T::one() + (-value).exp())
    } else {
        let e = value.exp();
        e / (T::one() + e)
    }
}

impl Kernels for NdarrayRuntime {
    fn affine<T: FloatElement>(x: &ArrayD<T>, weights: &ArrayD<T>, bias: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let x = matrix(x)?;
        let w = matrix(weights)?;
        let b = vector(bias)?;
        if x.ncols() != w.ncols() || w.nrows() != b.len() {
            return Err(format!(
                "weights {:?} and bias {:?} do not fit input {:?}",
                w.shape(),
                b.shape(),
                x.shape()
            ));
        }
        Ok((x.dot(&w.t()) + &b).into_dyn())
    }

    fn matmul<T: FloatElement>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let a = matrix(a)?;
        let b = matrix(b)?;
        if a.ncols() != b.nrows() {
            return Err(format!("cannot multiply {:?} by {:?}", a.shape(), b.shape()));
        }
        Ok(a.dot(&b).into_dyn())
    }

    fn add<T: FloatElement>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let rhs = b
            .broadcast(a.raw_dim())
            .ok_or_else(|| format!("cannot broadcast {:?} to {:?}", b.shape(), a.shape()))?;
        Ok(a + &rhs)
    }

    fn sigmoid<T: FloatElement>(x: &ArrayD<T>) -> ArrayD<T> {
        x.mapv(stable_sigmoid)
    }

    fn softmax<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let axis = last_axis(x)?;
        let mut out = x.to_owned();
        for mut lane in out.lanes_mut(axis) {
            let max = lane.fold(T::neg_infinity(), |acc, &value| acc.max(value));
            lane.mapv_inplace(|value| (value - max).exp());
            let total = lane.sum();
            lane.mapv_inplace(|value| value / total);
        }
        Ok(out)
    }

    fn normalize_l1<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<T>, String> {
        let axis = last_axis(x)?;
        let mut out = x.to_owned();
        for mut lane in out.lanes_mut(axis) {
            let norm = lane.fold(T::zero(), |acc, &value| acc + value.abs());
            // all-zero rows stay zero
            if norm > T::zero() {
                lane.mapv_inplace(|value| value / norm);
            }
        }
        Ok(out)
    }

    fn argmax<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<i64>, String> {
        let axis = last_axis(x)?;
        if x.len_of(axis) == 0 {
            return Err("argmax over an empty class axis".to_string());
        }
        Ok(x.map_axis(axis, |lane| {
            let mut best = 0;
            for (idx, &value) in lane.iter().enumerate().skip(1) {
                if value > lane[best] {
                    best = idx;
                }
            }
            best as i64
        }))
    }
}
