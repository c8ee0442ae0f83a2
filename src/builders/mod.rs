//! Node builders: each lowers one operator node into primitive plan steps.

pub(crate) mod linear;
pub(crate) mod primitive;

use std::ops::RangeInclusive;

use crate::error::GraphError;
use crate::graph::OperatorNode;

pub(crate) fn expect_arity(
    node: &OperatorNode,
    inputs: RangeInclusive<usize>,
    outputs: usize,
) -> Result<(), GraphError> {
    if inputs.contains(&node.inputs.len()) && node.outputs.len() == outputs {
        return Ok(());
    }
    let expected_inputs = if inputs.start() == inputs.end() {
        inputs.start().to_string()
    } else {
        format!("{}..={}", inputs.start(), inputs.end())
    };
    Err(GraphError::Arity {
        node: node.display_name(),
        op_type: node.op_type.clone(),
        expected: format!("{expected_inputs} inputs and {outputs} outputs"),
        inputs: node.inputs.len(),
        outputs: node.outputs.len(),
    })
}

/// Normalize an axis attribute against `rank`, accepting negative values.
pub(crate) fn normalize_axis(node: &OperatorNode, axis: i64, rank: usize) -> Result<usize, GraphError> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if (0..rank_i).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(GraphError::invalid_attribute(
            &node.display_name(),
            "axis",
            format!("{axis} is out of range for rank {rank}"),
        ))
    }
}
