//! Operator registry
//!
//! Every operator tag the converter understands maps to one [`OperatorKind`].
//! Lowering is an exhaustive match, so supporting a new operator means adding
//! a variant here and a builder in [`crate::builders`].

use crate::assembler::PlanBuilder;
use crate::builders::{linear, primitive};
use crate::error::GraphError;
use crate::graph::OperatorNode;

/// Lowers one node into plan steps, binding the node's outputs.
pub type BuildFn = fn(&OperatorNode, &mut PlanBuilder<'_>) -> Result<(), GraphError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    LinearClassifier,
    Normalizer,
    MatMul,
    Gemm,
    Add,
    Sigmoid,
    Softmax,
    ArgMax,
    Gather,
    GreaterOrEqual,
    Cast,
    Identity,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 12] = [
        OperatorKind::LinearClassifier,
        OperatorKind::Normalizer,
        OperatorKind::MatMul,
        OperatorKind::Gemm,
        OperatorKind::Add,
        OperatorKind::Sigmoid,
        OperatorKind::Softmax,
        OperatorKind::ArgMax,
        OperatorKind::Gather,
        OperatorKind::GreaterOrEqual,
        OperatorKind::Cast,
        OperatorKind::Identity,
    ];

    /// Canonical ONNX tag
    pub fn tag(self) -> &'static str {
        match self {
            OperatorKind::LinearClassifier => "LinearClassifier",
            OperatorKind::Normalizer => "Normalizer",
            OperatorKind::MatMul => "MatMul",
            OperatorKind::Gemm => "Gemm",
            OperatorKind::Add => "Add",
            OperatorKind::Sigmoid => "Sigmoid",
            OperatorKind::Softmax => "Softmax",
            OperatorKind::ArgMax => "ArgMax",
            OperatorKind::Gather => "Gather",
            OperatorKind::GreaterOrEqual => "GreaterOrEqual",
            OperatorKind::Cast => "Cast",
            OperatorKind::Identity => "Identity",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        if matches!(tag, "linear-classifier" | "linear_classifier") {
            return Some(OperatorKind::LinearClassifier);
        }
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Look up the node's tag, failing with `UnsupportedOperator` when unknown.
    pub fn for_node(node: &OperatorNode) -> Result<Self, GraphError> {
        Self::parse(&node.op_type).ok_or_else(|| GraphError::UnsupportedOperator {
            op_type: node.op_type.clone(),
            node: node.display_name(),
        })
    }

    pub fn builder(self) -> BuildFn {
        match self {
            OperatorKind::LinearClassifier => linear::build_linear_classifier,
            OperatorKind::Normalizer => primitive::build_normalizer,
            OperatorKind::MatMul => primitive::build_matmul,
            OperatorKind::Gemm => primitive::build_gemm,
            OperatorKind::Add => primitive::build_add,
            OperatorKind::Sigmoid => primitive::build_sigmoid,
            OperatorKind::Softmax => primitive::build_softmax,
            OperatorKind::ArgMax => primitive::build_argmax,
            OperatorKind::Gather => primitive::build_gather,
            OperatorKind::GreaterOrEqual => primitive::build_greater_or_equal,
            OperatorKind::Cast => primitive::build_cast,
            OperatorKind::Identity => primitive::build_identity,
        }
    }
}
