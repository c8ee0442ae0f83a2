use std::collections::BTreeMap;
use std::fmt;

use crate::tensor::{DataType, Tensor};

/// Index of a value slot in an [`ExecutionPlan`]
pub type SlotId = usize;

/// Primitive tensor operation executed by a runtime. Every op reads its
/// inputs from slots and writes exactly one output slot.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveOp {
    /// `x @ weightsᵀ + bias`; inputs `[x, weights, bias]`, weights `[rows, features]`
    Affine,
    /// 2-D matrix product; inputs `[a, b]`
    MatMul,
    /// Elementwise sum with `b` broadcast against `a`
    Add,
    Sigmoid,
    /// Softmax along the last axis
    Softmax,
    /// Divide each row by its L1 norm
    NormalizeL1,
    /// `[batch]` to `[batch, 2]` rows of `[1 - p, p]`, or `[-p, p]` when negating
    BinaryColumns { negate: bool },
    /// Drop a trailing axis of extent one
    Squeeze,
    /// Pick `labels[1]` where the value is `>= threshold`, else `labels[0]`
    Threshold { threshold: f64, labels: [i64; 2] },
    /// Index of the maximum along the last axis; the lowest index wins ties
    ArgMax { keepdims: bool },
    /// Map class indices through a class-label list
    GatherLabels { labels: Vec<i64> },
    /// Take one entry of the last axis, removing that axis
    SelectColumn { index: usize },
    Identity,
}

impl PrimitiveOp {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveOp::Affine => "affine",
            PrimitiveOp::MatMul => "matmul",
            PrimitiveOp::Add => "add",
            PrimitiveOp::Sigmoid => "sigmoid",
            PrimitiveOp::Softmax => "softmax",
            PrimitiveOp::NormalizeL1 => "normalize_l1",
            PrimitiveOp::BinaryColumns { .. } => "binary_columns",
            PrimitiveOp::Squeeze => "squeeze",
            PrimitiveOp::Threshold { .. } => "threshold",
            PrimitiveOp::ArgMax { .. } => "argmax",
            PrimitiveOp::GatherLabels { .. } => "gather_labels",
            PrimitiveOp::SelectColumn { .. } => "select_column",
            PrimitiveOp::Identity => "identity",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub op: PrimitiveOp,
    pub inputs: Vec<SlotId>,
    pub output: SlotId,
    /// Display name of the graph node this step was lowered from
    pub origin: String,
}

impl PlanStep {
    pub fn describe(&self) -> String {
        format!("{}@{}", self.op.name(), self.origin)
    }
}

/// Static description of a slot. `None` dims are only known at execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub name: String,
    pub data_type: DataType,
    pub shape: Vec<Option<usize>>,
}

/// Ordered primitive operations plus folded constants, ready to execute.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub(crate) steps: Vec<PlanStep>,
    pub(crate) slots: Vec<SlotInfo>,
    pub(crate) constants: BTreeMap<SlotId, Tensor>,
    pub(crate) input: SlotId,
    pub(crate) features: usize,
    pub(crate) precision: DataType,
    pub(crate) label: SlotId,
    pub(crate) score: SlotId,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&SlotInfo> {
        self.slots.get(id)
    }

    pub fn constants(&self) -> &BTreeMap<SlotId, Tensor> {
        &self.constants
    }

    pub fn input_slot(&self) -> SlotId {
        self.input
    }

    pub fn input_name(&self) -> &str {
        &self.slots[self.input].name
    }

    pub fn feature_count(&self) -> usize {
        self.features
    }

    pub fn precision(&self) -> DataType {
        self.precision
    }

    pub fn label_slot(&self) -> SlotId {
        self.label
    }

    pub fn score_slot(&self) -> SlotId {
        self.score
    }

    pub fn score_info(&self) -> &SlotInfo {
        &self.slots[self.score]
    }
}

fn format_shape(shape: &[Option<usize>]) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|dim| match dim {
            Some(extent) => extent.to_string(),
            None => "?".to_string(),
        })
        .collect();
    format!("[{}]", dims.join(", "))
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let input = &self.slots[self.input];
        writeln!(
            f,
            "input %{} `{}`: {:?} {}",
            self.input,
            input.name,
            input.data_type,
            format_shape(&input.shape)
        )?;
        for (id, tensor) in &self.constants {
            writeln!(
                f,
                "const %{} `{}`: {:?} {:?}",
                id,
                self.slots[*id].name,
                tensor.data_type(),
                tensor.shape()
            )?;
        }
        for step in &self.steps {
            let args: Vec<String> = step.inputs.iter().map(|id| format!("%{id}")).collect();
            let out = &self.slots[step.output];
            writeln!(
                f,
                "%{} = {}({}) : {:?} {}  # {}",
                step.output,
                step.op.name(),
                args.join(", "),
                out.data_type,
                format_shape(&out.shape),
                step.origin
            )?;
        }
        write!(f, "label %{}, score %{}", self.label, self.score)
    }
}
