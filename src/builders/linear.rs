//! Lowering of the ONNX-ML `LinearClassifier` operator.
//!
//! The node computes `logits = X @ Wᵀ + b` with one fused affine step, then
//! applies its post transform and decision rule:
//!
//! * one coefficient row (binary): the positive-class logit goes through the
//!   logistic link and the label is chosen by `p >= 0.5`;
//! * several rows: softmax, per-class logistic (optionally normalized to sum
//!   to one for one-vs-rest models) or raw logits, with the label taken by
//!   `argmax` over the scores.

use tracing::debug;

use crate::assembler::PlanBuilder;
use crate::builders::expect_arity;
use crate::error::GraphError;
use crate::graph::OperatorNode;
use crate::options::BinaryScore;
use crate::plan::{PrimitiveOp, SlotId};
use crate::tensor::{DataType, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTransform {
    None,
    Logistic,
    Softmax,
}

impl PostTransform {
    fn parse(node: &str, value: Option<&str>) -> Result<Self, GraphError> {
        match value.unwrap_or("NONE") {
            "NONE" => Ok(PostTransform::None),
            "LOGISTIC" => Ok(PostTransform::Logistic),
            "SOFTMAX" => Ok(PostTransform::Softmax),
            other => Err(GraphError::invalid_attribute(
                node,
                "post_transform",
                format!("`{other}` is not supported (expected NONE, LOGISTIC or SOFTMAX)"),
            )),
        }
    }
}

/// Validated attributes of a `LinearClassifier` node
#[derive(Debug, Clone, PartialEq)]
pub struct LinearClassifierParams {
    pub rows: usize,
    pub features: usize,
    pub coefficients: Vec<f32>,
    pub intercepts: Vec<f32>,
    pub labels: Vec<i64>,
    pub post_transform: PostTransform,
    pub one_vs_rest: bool,
}

impl LinearClassifierParams {
    /// Read the node's attributes. `declared_features` is the input's known
    /// column count, used to split coefficients when intercepts are absent.
    pub fn from_node(
        node: &OperatorNode,
        declared_features: Option<usize>,
    ) -> Result<Self, GraphError> {
        let name = node.display_name();
        let coefficients = node
            .required("coefficients", node.floats_attr("coefficients")?)?
            .to_vec();
        if node.strings_attr("classlabels_strings")?.is_some() {
            return Err(GraphError::invalid_attribute(
                &name,
                "classlabels_strings",
                "string class labels are not supported; the label output is int64",
            ));
        }

        let intercepts = node
            .floats_attr("intercepts")?
            .filter(|values| !values.is_empty())
            .map(<[f32]>::to_vec);
        let rows = match (&intercepts, declared_features) {
            (Some(values), _) => values.len(),
            (None, Some(features)) if features > 0 => coefficients.len() / features,
            (None, _) => {
                return Err(GraphError::MissingAttribute {
                    node: name,
                    attribute: "intercepts".to_string(),
                });
            }
        };
        if rows == 0 || coefficients.is_empty() || coefficients.len() % rows != 0 {
            return Err(GraphError::invalid_attribute(
                &name,
                "coefficients",
                format!("{} values cannot form {rows} rows", coefficients.len()),
            ));
        }
        let features = coefficients.len() / rows;
        let intercepts = intercepts.unwrap_or_else(|| vec![0.0; rows]);

        let labels = match node.ints_attr("classlabels_ints")? {
            Some(labels) => labels.to_vec(),
            None => (0..rows.max(2) as i64).collect(),
        };
        let expected_labels = if rows == 1 { 2 } else { rows };
        if labels.len() != expected_labels {
            return Err(GraphError::invalid_attribute(
                &name,
                "classlabels_ints",
                format!(
                    "{rows} coefficient rows need {expected_labels} labels, found {}",
                    labels.len()
                ),
            ));
        }

        let post_transform = PostTransform::parse(&name, node.string_attr("post_transform")?)?;
        let one_vs_rest = match node.int_attr("multi_class")?.unwrap_or(0) {
            0 => false,
            1 => true,
            other => {
                return Err(GraphError::invalid_attribute(
                    &name,
                    "multi_class",
                    format!("expected 0 or 1, found {other}"),
                ));
            }
        };

        Ok(Self {
            rows,
            features,
            coefficients,
            intercepts,
            labels,
            post_transform,
            one_vs_rest,
        })
    }

    pub fn is_binary(&self) -> bool {
        self.rows == 1
    }
}

pub(crate) fn build_linear_classifier(
    node: &OperatorNode,
    plan: &mut PlanBuilder<'_>,
) -> Result<(), GraphError> {
    expect_arity(node, 1..=1, 2)?;
    let x = plan.resolve(&node.inputs[0])?;
    plan.expect_float(x)?;
    let declared = plan.slot(x).shape.get(1).copied().flatten();
    let params = LinearClassifierParams::from_node(node, declared)?;
    plan.require_features(x, params.features)?;

    let name = plan.node_name().to_string();
    let batch = plan.slot(x).shape[0];
    let weights = plan.add_constant(
        format!("{name}/coefficients"),
        Tensor::from_f32(&[params.rows, params.features], params.coefficients.clone())?,
    );
    let bias = plan.add_constant(
        format!("{name}/intercepts"),
        Tensor::from_f32(&[params.rows], params.intercepts.clone())?,
    );
    let logits = plan.emit(
        PrimitiveOp::Affine,
        vec![x, weights, bias],
        plan.precision(),
        vec![batch, Some(params.rows)],
    );

    let (label, score) = if params.is_binary() {
        lower_binary(plan, &params, logits, batch)
    } else {
        lower_multiclass(plan, &params, logits, batch)
    };
    plan.bind(&node.outputs[0], label);
    plan.bind(&node.outputs[1], score);

    debug!(
        node = %name,
        rows = params.rows,
        features = params.features,
        post_transform = ?params.post_transform,
        "lowered linear classifier"
    );
    Ok(())
}

fn lower_binary(
    plan: &mut PlanBuilder<'_>,
    params: &LinearClassifierParams,
    logits: SlotId,
    batch: Option<usize>,
) -> (SlotId, SlotId) {
    let precision = plan.precision();
    let positive = plan.emit(PrimitiveOp::Squeeze, vec![logits], precision, vec![batch]);
    let (score, threshold) = match params.post_transform {
        PostTransform::None => (positive, 0.0),
        // softmax over [0, z] is the logistic function of z
        PostTransform::Logistic | PostTransform::Softmax => (
            plan.emit(PrimitiveOp::Sigmoid, vec![positive], precision, vec![batch]),
            0.5,
        ),
    };
    let label = plan.emit(
        PrimitiveOp::Threshold {
            threshold,
            labels: [params.labels[0], params.labels[1]],
        },
        vec![score],
        DataType::Int64,
        vec![batch],
    );

    let layout = plan.options().binary_score;
    let score = match layout {
        BinaryScore::Positive => score,
        BinaryScore::TwoColumn => plan.emit(
            PrimitiveOp::BinaryColumns {
                negate: params.post_transform == PostTransform::None,
            },
            vec![score],
            precision,
            vec![batch, Some(2)],
        ),
    };
    (label, score)
}

fn lower_multiclass(
    plan: &mut PlanBuilder<'_>,
    params: &LinearClassifierParams,
    logits: SlotId,
    batch: Option<usize>,
) -> (SlotId, SlotId) {
    let precision = plan.precision();
    let shape = vec![batch, Some(params.rows)];
    let score = match params.post_transform {
        PostTransform::None => logits,
        PostTransform::Logistic => {
            let probabilities = plan.emit(PrimitiveOp::Sigmoid, vec![logits], precision, shape.clone());
            if params.one_vs_rest {
                plan.emit(PrimitiveOp::NormalizeL1, vec![probabilities], precision, shape)
            } else {
                probabilities
            }
        }
        PostTransform::Softmax => plan.emit(PrimitiveOp::Softmax, vec![logits], precision, shape),
    };

    let index = plan.emit(
        PrimitiveOp::ArgMax { keepdims: false },
        vec![score],
        DataType::Int64,
        vec![batch],
    );
    let identity_labels = params.labels.iter().copied().eq(0..params.rows as i64);
    let label = if identity_labels {
        index
    } else {
        plan.emit(
            PrimitiveOp::GatherLabels {
                labels: params.labels.clone(),
            },
            vec![index],
            DataType::Int64,
            vec![batch],
        )
    };
    (label, score)
}
