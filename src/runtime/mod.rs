//! Tensor runtimes that execute [`PlanStep`]s.
//!
//! A runtime only supplies the float kernels. Dispatch on the element type,
//! operand checks and the structural ops (squeeze, thresholding, label
//! gathering) are shared so both runtimes agree on everything except the
//! arithmetic itself.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayD, Axis, Ix1, Ix2, IxDyn};
use num_traits::NumCast;

use crate::error::GraphError;
use crate::plan::{PlanStep, PrimitiveOp};
use crate::tensor::{DataType, FloatElement, Tensor};

mod ndarray_runtime;
mod reference;

pub use ndarray_runtime::NdarrayRuntime;
pub use reference::ReferenceRuntime;

/// Executes single plan steps. Implementations hold no per-call state, so one
/// runtime can serve any number of concurrent predictions.
pub trait TensorRuntime: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn execute(&self, step: &PlanStep, inputs: &[&Tensor]) -> Result<Tensor, GraphError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    Ndarray,
    Reference,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Ndarray, BackendKind::Reference];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Ndarray => "ndarray",
            BackendKind::Reference => "reference",
        }
    }

    pub fn parse(name: &str) -> Result<Self, GraphError> {
        let key = name.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == key)
            .ok_or_else(|| GraphError::UnknownBackend {
                requested: name.to_string(),
                available: Self::ALL.iter().map(|kind| kind.name()).collect(),
            })
    }

    pub fn runtime(self) -> Arc<dyn TensorRuntime> {
        match self {
            BackendKind::Ndarray => Arc::new(NdarrayRuntime),
            BackendKind::Reference => Arc::new(ReferenceRuntime),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arithmetic kernels a runtime provides. Arrays arrive with the rank the
/// plan promises; kernels report violations as a reason string.
pub(crate) trait Kernels {
    /// `x @ weightsᵀ + bias` for `x: [n, k]`, `weights: [r, k]`, `bias: [r]`
    fn affine<T: FloatElement>(x: &ArrayD<T>, weights: &ArrayD<T>, bias: &ArrayD<T>) -> Result<ArrayD<T>, String>;

    fn matmul<T: FloatElement>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>, String>;

    /// `a + b` with `b` broadcast to the shape of `a`
    fn add<T: FloatElement>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>, String>;

    fn sigmoid<T: FloatElement>(x: &ArrayD<T>) -> ArrayD<T>;

    fn softmax<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<T>, String>;

    fn normalize_l1<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<T>, String>;

    /// First index of the maximum along the last axis, which is removed.
    fn argmax<T: FloatElement>(x: &ArrayD<T>) -> Result<ArrayD<i64>, String>;
}

/// Run `step` with the kernels of `K`.
pub(crate) fn run_step<K: Kernels>(step: &PlanStep, inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
    let result = match inputs.first().map(|tensor| tensor.data_type()) {
        Some(DataType::Float32) => run_float::<K, f32>(&step.op, inputs),
        Some(DataType::Float64) => run_float::<K, f64>(&step.op, inputs),
        Some(DataType::Int64) => run_int(&step.op, inputs),
        None => Err("step has no operands".to_string()),
    };
    result.map_err(|reason| GraphError::execution(&step.describe(), reason))
}

fn operands<'t, A, const N: usize>(args: &[&'t A]) -> Result<[&'t A; N], String> {
    <[&A; N]>::try_from(args).map_err(|_| format!("expected {N} operands, got {}", args.len()))
}

pub(crate) fn matrix<T>(array: &ArrayD<T>) -> Result<ndarray::ArrayView2<'_, T>, String> {
    array
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| format!("expected a matrix, got shape {:?}", array.shape()))
}

pub(crate) fn vector<T>(array: &ArrayD<T>) -> Result<ndarray::ArrayView1<'_, T>, String> {
    array
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| format!("expected a vector, got shape {:?}", array.shape()))
}

pub(crate) fn last_axis<T>(array: &ArrayD<T>) -> Result<Axis, String> {
    match array.ndim() {
        0 => Err("scalar has no class axis".to_string()),
        ndim => Ok(Axis(ndim - 1)),
    }
}

fn run_float<K: Kernels, T: FloatElement>(op: &PrimitiveOp, inputs: &[&Tensor]) -> Result<Tensor, String> {
    let args = inputs
        .iter()
        .map(|tensor| {
            T::view(tensor).ok_or_else(|| {
                format!(
                    "expected {:?} operand, got {:?}",
                    T::DATA_TYPE,
                    tensor.data_type()
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tensor = match op {
        PrimitiveOp::Affine => {
            let [x, weights, bias] = operands::<_, 3>(&args)?;
            T::wrap(K::affine(x, weights, bias)?)
        }
        PrimitiveOp::MatMul => {
            let [a, b] = operands::<_, 2>(&args)?;
            T::wrap(K::matmul(a, b)?)
        }
        PrimitiveOp::Add => {
            let [a, b] = operands::<_, 2>(&args)?;
            T::wrap(K::add(a, b)?)
        }
        PrimitiveOp::Sigmoid => {
            let [x] = operands::<_, 1>(&args)?;
            T::wrap(K::sigmoid(x))
        }
        PrimitiveOp::Softmax => {
            let [x] = operands::<_, 1>(&args)?;
            T::wrap(K::softmax(x)?)
        }
        PrimitiveOp::NormalizeL1 => {
            let [x] = operands::<_, 1>(&args)?;
            T::wrap(K::normalize_l1(x)?)
        }
        PrimitiveOp::ArgMax { keepdims } => {
            let [x] = operands::<_, 1>(&args)?;
            let indices = K::argmax(x)?;
            if *keepdims {
                let axis = Axis(indices.ndim());
                Tensor::I64(indices.insert_axis(axis))
            } else {
                Tensor::I64(indices)
            }
        }
        PrimitiveOp::BinaryColumns { negate } => {
            let [p] = operands::<_, 1>(&args)?;
            T::wrap(binary_columns(p, *negate)?)
        }
        PrimitiveOp::Squeeze => {
            let [x] = operands::<_, 1>(&args)?;
            let axis = last_axis(x)?;
            if x.len_of(axis) != 1 {
                return Err(format!("cannot squeeze axis of extent {}", x.len_of(axis)));
            }
            T::wrap(x.index_axis(axis, 0).to_owned())
        }
        PrimitiveOp::Threshold { threshold, labels } => {
            let [x] = operands::<_, 1>(&args)?;
            let cut: T = NumCast::from(*threshold)
                .ok_or_else(|| format!("threshold {threshold} is not representable"))?;
            Tensor::I64(x.mapv(|value| if value >= cut { labels[1] } else { labels[0] }))
        }
        PrimitiveOp::SelectColumn { index } => {
            let [x] = operands::<_, 1>(&args)?;
            let axis = last_axis(x)?;
            if *index >= x.len_of(axis) {
                return Err(format!("column {index} is out of range for {} columns", x.len_of(axis)));
            }
            T::wrap(x.index_axis(axis, *index).to_owned())
        }
        PrimitiveOp::Identity => {
            let [x] = operands::<_, 1>(&args)?;
            T::wrap(x.clone())
        }
        PrimitiveOp::GatherLabels { .. } => {
            return Err("label lookup needs int64 indices".to_string());
        }
    };
    Ok(tensor)
}

fn run_int(op: &PrimitiveOp, inputs: &[&Tensor]) -> Result<Tensor, String> {
    let args = inputs
        .iter()
        .map(|tensor| {
            tensor
                .as_i64()
                .ok_or_else(|| format!("expected Int64 operand, got {:?}", tensor.data_type()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match op {
        PrimitiveOp::GatherLabels { labels } => {
            let [indices] = operands::<_, 1>(&args)?;
            let mut mapped = Vec::with_capacity(indices.len());
            for &index in indices {
                let label = usize::try_from(index)
                    .ok()
                    .and_then(|idx| labels.get(idx))
                    .ok_or_else(|| format!("class index {index} is outside {} labels", labels.len()))?;
                mapped.push(*label);
            }
            ArrayD::from_shape_vec(IxDyn(indices.shape()), mapped)
                .map(Tensor::I64)
                .map_err(|err| err.to_string())
        }
        PrimitiveOp::Identity => {
            let [x] = operands::<_, 1>(&args)?;
            Ok(Tensor::I64(x.clone()))
        }
        other => Err(format!("`{}` does not accept int64 operands", other.name())),
    }
}

fn binary_columns<T: FloatElement>(p: &ArrayD<T>, negate: bool) -> Result<ArrayD<T>, String> {
    let p = vector(p)?;
    let complement: Array1<T> = if negate {
        p.mapv(|value| -value)
    } else {
        p.mapv(|value| T::one() - value)
    };
    ndarray::stack(Axis(1), &[complement.view(), p])
        .map(|stacked| stacked.into_dyn())
        .map_err(|err| err.to_string())
}
