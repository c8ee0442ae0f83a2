//! Host tensors exchanged between the converted model and its runtime
//!
//! Values are stored as dynamically shaped `ndarray` arrays. Floating point
//! tensors keep the precision they were created with: kernels are generic over
//! [`FloatElement`] so a plan built for `float32` never computes in `float64`
//! and vice versa.

use std::fmt::Debug;

use ndarray::{ArrayD, IxDyn, LinalgScalar, ScalarOperand};
use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Element type of a tensor or a declared graph value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "double")]
    Float64,
    Int64,
}

impl DataType {
    pub fn bytes_per_element(self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float64 => 8,
            DataType::Int64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Map an ONNX `TensorProto.DataType` code to a supported type.
    pub fn from_onnx_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DataType::Float32),
            7 => Some(DataType::Int64),
            11 => Some(DataType::Float64),
            _ => None,
        }
    }
}

/// A host-resident tensor
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I64(ArrayD<i64>),
}

impl Tensor {
    /// Build a float32 tensor from a shape and row-major data
    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Self, GraphError> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Tensor::F32)
            .map_err(|err| shape_error(shape, err))
    }

    /// Build a float64 tensor from a shape and row-major data
    pub fn from_f64(shape: &[usize], data: Vec<f64>) -> Result<Self, GraphError> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Tensor::F64)
            .map_err(|err| shape_error(shape, err))
    }

    /// Stack equally sized rows into a `[rows, columns]` float32 tensor.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, GraphError> {
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * columns);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns {
                return Err(GraphError::ShapeMismatch {
                    input: format!("row {idx}"),
                    expected: format!("{columns} columns"),
                    actual: vec![row.len()],
                });
            }
            data.extend_from_slice(row);
        }
        Tensor::from_f32(&[rows.len(), columns], data)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Tensor::F32(_) => DataType::Float32,
            Tensor::F64(_) => DataType::Float64,
            Tensor::I64(_) => DataType::Int64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::F32(array) => array.shape(),
            Tensor::F64(array) => array.shape(),
            Tensor::I64(array) => array.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::F32(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            Tensor::F64(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::I64(array) => Some(array),
            _ => None,
        }
    }

    /// Convert element type. Used when folding constants into a plan.
    pub fn cast(&self, data_type: DataType) -> Tensor {
        match (self, data_type) {
            (Tensor::F32(a), DataType::Float32) => Tensor::F32(a.clone()),
            (Tensor::F32(a), DataType::Float64) => Tensor::F64(a.mapv(f64::from)),
            (Tensor::F32(a), DataType::Int64) => Tensor::I64(a.mapv(|v| v as i64)),
            (Tensor::F64(a), DataType::Float32) => Tensor::F32(a.mapv(|v| v as f32)),
            (Tensor::F64(a), DataType::Float64) => Tensor::F64(a.clone()),
            (Tensor::F64(a), DataType::Int64) => Tensor::I64(a.mapv(|v| v as i64)),
            (Tensor::I64(a), DataType::Float32) => Tensor::F32(a.mapv(|v| v as f32)),
            (Tensor::I64(a), DataType::Float64) => Tensor::F64(a.mapv(|v| v as f64)),
            (Tensor::I64(a), DataType::Int64) => Tensor::I64(a.clone()),
        }
    }

    /// Row-major values widened to f64, for comparisons only
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Tensor::F32(a) => a.iter().map(|&v| f64::from(v)).collect(),
            Tensor::F64(a) => a.iter().copied().collect(),
            Tensor::I64(a) => a.iter().map(|&v| v as f64).collect(),
        }
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Tensor::F32(array)
    }
}

impl From<ArrayD<f64>> for Tensor {
    fn from(array: ArrayD<f64>) -> Self {
        Tensor::F64(array)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Tensor::I64(array)
    }
}

/// Floating point element types a plan can be computed in
pub trait FloatElement:
    Float + LinalgScalar + ScalarOperand + Debug + Send + Sync + 'static
{
    const DATA_TYPE: DataType;

    fn wrap(array: ArrayD<Self>) -> Tensor;

    fn view(tensor: &Tensor) -> Option<&ArrayD<Self>>;
}

impl FloatElement for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    fn wrap(array: ArrayD<Self>) -> Tensor {
        Tensor::F32(array)
    }

    fn view(tensor: &Tensor) -> Option<&ArrayD<Self>> {
        tensor.as_f32()
    }
}

impl FloatElement for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    fn wrap(array: ArrayD<Self>) -> Tensor {
        Tensor::F64(array)
    }

    fn view(tensor: &Tensor) -> Option<&ArrayD<Self>> {
        tensor.as_f64()
    }
}

fn shape_error(shape: &[usize], err: ndarray::ShapeError) -> GraphError {
    GraphError::ShapeMismatch {
        input: "tensor".to_string(),
        expected: format!("{} elements ({err})", shape.iter().product::<usize>()),
        actual: shape.to_vec(),
    }
}
