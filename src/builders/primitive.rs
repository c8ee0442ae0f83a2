//! Builders for the plain ONNX operators a decomposed classifier is made of.

use crate::assembler::PlanBuilder;
use crate::builders::{expect_arity, normalize_axis};
use crate::error::GraphError;
use crate::graph::OperatorNode;
use crate::plan::{PrimitiveOp, SlotId};
use crate::tensor::{DataType, Tensor};

fn incompatible(plan: &PlanBuilder<'_>, reason: impl Into<String>) -> GraphError {
    GraphError::IncompatibleShapes {
        node: plan.node_name().to_string(),
        reason: reason.into(),
    }
}

/// Emit a float op that keeps its input's shape.
fn float_unary(
    node: &OperatorNode,
    plan: &mut PlanBuilder<'_>,
    op: PrimitiveOp,
) -> Result<SlotId, GraphError> {
    let x = plan.resolve(&node.inputs[0])?;
    plan.expect_float(x)?;
    let shape = plan.slot(x).shape.clone();
    Ok(plan.emit(op, vec![x], plan.precision(), shape))
}

/// Axis attribute that must name the last axis of `slot`.
fn last_axis(
    node: &OperatorNode,
    plan: &PlanBuilder<'_>,
    slot: SlotId,
    default: i64,
) -> Result<(), GraphError> {
    let rank = plan.slot(slot).shape.len();
    let axis = node.int_attr("axis")?.unwrap_or(default);
    let resolved = normalize_axis(node, axis, rank)?;
    if resolved + 1 != rank {
        return Err(GraphError::invalid_attribute(
            &node.display_name(),
            "axis",
            format!("only the last axis is supported, got {axis} for rank {rank}"),
        ));
    }
    Ok(())
}

fn constant_values(plan: &PlanBuilder<'_>, slot: SlotId) -> Option<(Vec<usize>, Vec<f64>)> {
    plan.constant(slot)
        .map(|tensor| (tensor.shape().to_vec(), tensor.to_f64_vec()))
}

pub(crate) fn build_matmul(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 2..=2, 1)?;
    let a = plan.resolve(&node.inputs[0])?;
    let b = plan.resolve(&node.inputs[1])?;
    plan.expect_float(a)?;
    plan.expect_float(b)?;

    let b_shape = plan.slot(b).shape.clone();
    if b_shape.len() != 2 {
        return Err(incompatible(
            plan,
            format!("right operand must be a matrix, has rank {}", b_shape.len()),
        ));
    }
    if let Some(inner) = b_shape[0] {
        plan.require_features(a, inner)?;
    } else if plan.slot(a).shape.len() != 2 {
        return Err(incompatible(plan, "left operand must be [batch, features]"));
    }

    let batch = plan.slot(a).shape[0];
    let y = plan.emit(PrimitiveOp::MatMul, vec![a, b], plan.precision(), vec![batch, b_shape[1]]);
    plan.bind(&node.outputs[0], y);
    Ok(())
}

/// `Gemm` with unit `alpha`/`beta` and constant `B`/`C` becomes one affine
/// step. `B` is stored as `[rows, features]`, transposed here if needed.
pub(crate) fn build_gemm(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 2..=3, 1)?;
    let name = node.display_name();
    for key in ["alpha", "beta"] {
        if let Some(value) = node.float_attr(key)?
            && value != 1.0
        {
            return Err(GraphError::invalid_attribute(
                &name,
                key,
                format!("only 1.0 is supported, got {value}"),
            ));
        }
    }
    if node.int_attr("transA")?.unwrap_or(0) != 0 {
        return Err(GraphError::invalid_attribute(&name, "transA", "transposed inputs are not supported"));
    }
    let trans_b = match node.int_attr("transB")?.unwrap_or(0) {
        0 => false,
        1 => true,
        other => {
            return Err(GraphError::invalid_attribute(
                &name,
                "transB",
                format!("expected 0 or 1, got {other}"),
            ));
        }
    };

    let x = plan.resolve(&node.inputs[0])?;
    plan.expect_float(x)?;
    let b = plan.resolve(&node.inputs[1])?;
    let Some((b_shape, b_values)) = constant_values(plan, b) else {
        return Err(GraphError::invalid_attribute(&name, "B", "weights must be an initializer"));
    };
    let [d0, d1] = b_shape[..] else {
        return Err(incompatible(plan, format!("weights must be a matrix, got shape {b_shape:?}")));
    };
    let (rows, features) = if trans_b { (d0, d1) } else { (d1, d0) };
    if rows == 0 || features == 0 {
        return Err(incompatible(plan, format!("weights of shape {b_shape:?} are empty")));
    }
    plan.require_features(x, features)?;

    let weights = if trans_b {
        b
    } else {
        let mut transposed = vec![0.0; b_values.len()];
        for (i, row) in b_values.chunks(d1).enumerate() {
            for (j, value) in row.iter().enumerate() {
                transposed[j * d0 + i] = *value;
            }
        }
        plan.add_constant(
            format!("{name}/weights"),
            Tensor::from_f64(&[rows, features], transposed)?,
        )
    };

    let bias_values = match node.inputs.get(2).filter(|input| !input.is_empty()) {
        None => vec![0.0; rows],
        Some(input) => {
            let c = plan.resolve(input)?;
            let Some((c_shape, values)) = constant_values(plan, c) else {
                return Err(GraphError::invalid_attribute(&name, "C", "bias must be an initializer"));
            };
            match values.len() {
                1 => vec![values[0]; rows],
                len if len == rows => values,
                _ => {
                    return Err(incompatible(
                        plan,
                        format!("bias shape {c_shape:?} does not broadcast to {rows} outputs"),
                    ));
                }
            }
        }
    };
    let bias = plan.add_constant(format!("{name}/bias"), Tensor::from_f64(&[rows], bias_values)?);

    let batch = plan.slot(x).shape[0];
    let y = plan.emit(
        PrimitiveOp::Affine,
        vec![x, weights, bias],
        plan.precision(),
        vec![batch, Some(rows)],
    );
    plan.bind(&node.outputs[0], y);
    Ok(())
}

/// `Add` with one-directional broadcasting of the second operand. The
/// operands are swapped when only the first one is a constant.
pub(crate) fn build_add(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 2..=2, 1)?;
    let mut a = plan.resolve(&node.inputs[0])?;
    let mut b = plan.resolve(&node.inputs[1])?;
    plan.expect_float(a)?;
    plan.expect_float(b)?;
    if plan.constant(a).is_some() && plan.constant(b).is_none() {
        std::mem::swap(&mut a, &mut b);
    }

    let a_shape = plan.slot(a).shape.clone();
    let b_shape = plan.slot(b).shape.clone();
    if b_shape.len() > a_shape.len() {
        return Err(incompatible(
            plan,
            format!("cannot broadcast rank {} onto rank {}", b_shape.len(), a_shape.len()),
        ));
    }
    for (lhs, rhs) in a_shape.iter().rev().zip(b_shape.iter().rev()) {
        if let (Some(lhs), Some(rhs)) = (lhs, rhs)
            && rhs != lhs
            && *rhs != 1
        {
            return Err(incompatible(
                plan,
                format!("shape {b_shape:?} does not broadcast to {a_shape:?}"),
            ));
        }
    }

    let y = plan.emit(PrimitiveOp::Add, vec![a, b], plan.precision(), a_shape);
    plan.bind(&node.outputs[0], y);
    Ok(())
}

pub(crate) fn build_sigmoid(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 1)?;
    let y = float_unary(node, plan, PrimitiveOp::Sigmoid)?;
    plan.bind(&node.outputs[0], y);
    Ok(())
}

pub(crate) fn build_softmax(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 1)?;
    let x = plan.resolve(&node.inputs[0])?;
    last_axis(node, plan, x, -1)?;
    let y = float_unary(node, plan, PrimitiveOp::Softmax)?;
    plan.bind(&node.outputs[0], y);
    Ok(())
}

pub(crate) fn build_argmax(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 1)?;
    let x = plan.resolve(&node.inputs[0])?;
    plan.expect_float(x)?;
    last_axis(node, plan, x, 0)?;
    if node.int_attr("select_last_index")?.unwrap_or(0) != 0 {
        return Err(GraphError::invalid_attribute(
            &node.display_name(),
            "select_last_index",
            "ties always resolve to the first index",
        ));
    }
    let keepdims = node.int_attr("keepdims")?.unwrap_or(1) != 0;

    let mut shape = plan.slot(x).shape.clone();
    if keepdims {
        if let Some(last) = shape.last_mut() {
            *last = Some(1);
        }
    } else {
        shape.pop();
    }
    let y = plan.emit(PrimitiveOp::ArgMax { keepdims }, vec![x], DataType::Int64, shape);
    plan.bind(&node.outputs[0], y);
    Ok(())
}

/// Two forms of `Gather` are lowered: a constant int64 label table indexed
/// by computed class indices, and a constant scalar index picking one
/// column of a float tensor.
pub(crate) fn build_gather(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 2..=2, 1)?;
    let name = node.display_name();
    let data = plan.resolve(&node.inputs[0])?;
    let indices = plan.resolve(&node.inputs[1])?;
    let axis = node.int_attr("axis")?.unwrap_or(0);

    let table = plan.constant(data).and_then(Tensor::as_i64).cloned();
    if let Some(table) = table {
        if table.ndim() != 1 || normalize_axis(node, axis, 1)? != 0 {
            return Err(incompatible(plan, "label table must be a 1-D int64 initializer gathered on axis 0"));
        }
        if plan.slot(indices).data_type != DataType::Int64 {
            return Err(incompatible(plan, "label indices must be int64"));
        }
        let shape = plan.slot(indices).shape.clone();
        let y = plan.emit(
            PrimitiveOp::GatherLabels {
                labels: table.iter().copied().collect(),
            },
            vec![indices],
            DataType::Int64,
            shape,
        );
        plan.bind(&node.outputs[0], y);
        return Ok(());
    }

    plan.expect_float(data)?;
    last_axis(node, plan, data, 0)?;
    let index = match plan.constant(indices).and_then(Tensor::as_i64) {
        Some(index) if index.ndim() == 0 => index.iter().copied().next(),
        _ => None,
    };
    let Some(index) = index else {
        return Err(GraphError::invalid_attribute(
            &name,
            "indices",
            "column selection needs a scalar int64 initializer",
        ));
    };

    let mut shape = plan.slot(data).shape.clone();
    let extent = shape.pop().flatten();
    let resolved = match extent {
        Some(extent) => {
            let signed = if index < 0 { index + extent as i64 } else { index };
            if !(0..extent as i64).contains(&signed) {
                return Err(incompatible(plan, format!("index {index} is out of range for {extent} columns")));
            }
            signed as usize
        }
        None if index >= 0 => index as usize,
        None => return Err(incompatible(plan, "negative index on a column count known only at run time")),
    };
    let y = plan.emit(
        PrimitiveOp::SelectColumn { index: resolved },
        vec![data],
        plan.precision(),
        shape,
    );
    plan.bind(&node.outputs[0], y);
    Ok(())
}

/// `GreaterOrEqual` against a constant scalar. Booleans are carried as
/// int64 `0`/`1` so they can index a label table directly.
pub(crate) fn build_greater_or_equal(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 2..=2, 1)?;
    let x = plan.resolve(&node.inputs[0])?;
    plan.expect_float(x)?;
    let b = plan.resolve(&node.inputs[1])?;
    let threshold = match constant_values(plan, b) {
        Some((_, values)) if values.len() == 1 => values[0],
        _ => {
            return Err(GraphError::invalid_attribute(
                &node.display_name(),
                "B",
                "comparison needs a single-element initializer",
            ));
        }
    };

    let shape = plan.slot(x).shape.clone();
    let y = plan.emit(
        PrimitiveOp::Threshold {
            threshold,
            labels: [0, 1],
        },
        vec![x],
        DataType::Int64,
        shape,
    );
    plan.bind(&node.outputs[0], y);
    Ok(())
}

/// `Cast` that leaves the stored element type unchanged: to int64 or bool
/// from a comparison, or to the float type already in use.
pub(crate) fn build_cast(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 1)?;
    let to = node.required("to", node.int_attr("to")?)?;
    let x = plan.resolve(&node.inputs[0])?;
    let info = plan.slot(x).clone();
    let target = match to {
        1 => Some(DataType::Float32),
        11 => Some(DataType::Float64),
        7 | 9 => Some(DataType::Int64),
        _ => None,
    };
    if target != Some(info.data_type) {
        return Err(GraphError::invalid_attribute(
            &node.display_name(),
            "to",
            format!("cannot cast {:?} to element type {to}", info.data_type),
        ));
    }
    let y = plan.emit(PrimitiveOp::Identity, vec![x], info.data_type, info.shape);
    plan.bind(&node.outputs[0], y);
    Ok(())
}

pub(crate) fn build_normalizer(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 1)?;
    match node.string_attr("norm")?.unwrap_or("MAX") {
        "L1" => {}
        other => {
            return Err(GraphError::invalid_attribute(
                &node.display_name(),
                "norm",
                format!("`{other}` is not supported (expected L1)"),
            ));
        }
    }
    let y = float_unary(node, plan, PrimitiveOp::NormalizeL1)?;
    plan.bind(&node.outputs[0], y);
    Ok(())
}

pub(crate) fn build_identity(node: &OperatorNode, plan: &mut PlanBuilder<'_>) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 1)?;
    let x = plan.resolve(&node.inputs[0])?;
    let info = plan.slot(x).clone();
    let y = plan.emit(PrimitiveOp::Identity, vec![x], info.data_type, info.shape);
    plan.bind(&node.outputs[0], y);
    Ok(())
}
