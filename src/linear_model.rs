//! A fitted linear classifier and the graphs exporters produce for it.
//!
//! `LinearModel` evaluates the decision function and probabilities the way
//! scikit-learn's `LogisticRegression` does, which makes it the oracle for
//! converted models. [`LinearModel::to_graph`] emits one of two independent
//! encodings of the same model:
//!
//! * [`Producer::ClassifierNode`]: a single ONNX-ML `LinearClassifier` node;
//! * [`Producer::Decomposed`]: plain ONNX operators (`MatMul`/`Add` or
//!   `Gemm`, `Softmax` or `Sigmoid` + `Normalizer`, `ArgMax`, `Gather`).

use std::collections::BTreeMap;

use crate::error::GraphError;
use crate::graph::{AttributeValue, ConstantTensor, OperatorGraph, OperatorNode, ValueInfo};
use crate::tensor::DataType;

pub const INPUT_NAME: &str = "float_input";
pub const LABEL_OUTPUT: &str = "label";
pub const SCORE_OUTPUT: &str = "probabilities";

/// How a multiclass model turns per-class logits into probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiClass {
    /// Per-class sigmoid, normalized to sum to one
    #[default]
    OneVsRest,
    /// Softmax over the logits
    Multinomial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    ClassifierNode,
    Decomposed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    coefficients: Vec<Vec<f32>>,
    intercepts: Vec<f32>,
    classes: Vec<i64>,
    multi_class: MultiClass,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn invalid(attribute: &str, reason: impl Into<String>) -> GraphError {
    GraphError::invalid_attribute("linear_model", attribute, reason)
}

fn int_tensor(dims: Vec<usize>, values: Vec<i64>) -> ConstantTensor {
    ConstantTensor {
        data_type: DataType::Int64,
        dims,
        float_data: Vec::new(),
        double_data: Vec::new(),
        int64_data: values,
        raw_data: None,
    }
}

impl LinearModel {
    /// `coefficients` has one row per class, or a single row for a binary
    /// model whose `classes` then holds the negative and positive label.
    pub fn new(
        coefficients: Vec<Vec<f32>>,
        intercepts: Vec<f32>,
        classes: Vec<i64>,
        multi_class: MultiClass,
    ) -> Result<Self, GraphError> {
        let Some(width) = coefficients.first().map(Vec::len) else {
            return Err(invalid("coefficients", "model has no coefficient rows"));
        };
        if width == 0 || coefficients.iter().any(|row| row.len() != width) {
            return Err(invalid("coefficients", "rows must be non-empty and equally long"));
        }
        if intercepts.len() != coefficients.len() {
            return Err(invalid(
                "intercepts",
                format!("{} intercepts for {} rows", intercepts.len(), coefficients.len()),
            ));
        }
        let expected = coefficients.len().max(2);
        if classes.len() != expected {
            return Err(invalid(
                "classes",
                format!("{} rows need {expected} classes, got {}", coefficients.len(), classes.len()),
            ));
        }
        Ok(Self {
            coefficients,
            intercepts,
            classes,
            multi_class,
        })
    }

    pub fn n_features(&self) -> usize {
        self.coefficients[0].len()
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn is_binary(&self) -> bool {
        self.coefficients.len() == 1
    }

    /// Per-row logits `x · wᵀ + b` for a row-major `[batch, n_features]` slice.
    pub fn decision_function(&self, x: &[f32]) -> Vec<Vec<f64>> {
        x.chunks(self.n_features())
            .map(|row| {
                self.coefficients
                    .iter()
                    .zip(&self.intercepts)
                    .map(|(w, b)| {
                        row.iter().zip(w).map(|(x, w)| f64::from(*x) * f64::from(*w)).sum::<f64>()
                            + f64::from(*b)
                    })
                    .collect()
            })
            .collect()
    }

    /// Class probabilities; binary models give `[1 - p, p]`.
    pub fn predict_proba(&self, x: &[f32]) -> Vec<Vec<f64>> {
        self.decision_function(x)
            .into_iter()
            .map(|logits| {
                if self.is_binary() {
                    let p = sigmoid(logits[0]);
                    return vec![1.0 - p, p];
                }
                match self.multi_class {
                    MultiClass::OneVsRest => {
                        let raw: Vec<f64> = logits.iter().map(|z| sigmoid(*z)).collect();
                        let total: f64 = raw.iter().sum();
                        raw.iter().map(|p| p / total).collect()
                    }
                    MultiClass::Multinomial => {
                        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
                        let total: f64 = exps.iter().sum();
                        exps.iter().map(|e| e / total).collect()
                    }
                }
            })
            .collect()
    }

    /// Predicted labels. Binary models pick the positive class when the
    /// logit is `>= 0`; multiclass models take the first maximal logit.
    pub fn predict(&self, x: &[f32]) -> Vec<i64> {
        self.decision_function(x)
            .into_iter()
            .map(|logits| {
                if self.is_binary() {
                    return self.classes[usize::from(logits[0] >= 0.0)];
                }
                let mut best = 0;
                for (idx, z) in logits.iter().enumerate() {
                    if *z > logits[best] {
                        best = idx;
                    }
                }
                self.classes[best]
            })
            .collect()
    }

    fn input(&self) -> Vec<ValueInfo> {
        vec![ValueInfo::new(
            INPUT_NAME,
            DataType::Float32,
            Some(vec![None, Some(self.n_features())]),
        )]
    }

    fn outputs() -> Vec<String> {
        vec![LABEL_OUTPUT.to_string(), SCORE_OUTPUT.to_string()]
    }

    /// Export the model as an operator graph with `(label, probabilities)`
    /// outputs.
    pub fn to_graph(&self, producer: Producer) -> Result<OperatorGraph, GraphError> {
        match producer {
            Producer::ClassifierNode => self.classifier_graph(),
            Producer::Decomposed if self.is_binary() => self.decomposed_binary_graph(),
            Producer::Decomposed => self.decomposed_multiclass_graph(),
        }
    }

    fn classifier_graph(&self) -> Result<OperatorGraph, GraphError> {
        let post_transform = match (self.is_binary(), self.multi_class) {
            (false, MultiClass::Multinomial) => "SOFTMAX",
            _ => "LOGISTIC",
        };
        let one_vs_rest = !self.is_binary() && self.multi_class == MultiClass::OneVsRest;
        let mut node = OperatorNode::new("LinearClassifier", [INPUT_NAME], [LABEL_OUTPUT, SCORE_OUTPUT])
            .with_name("linear_classifier")
            .with_attribute(
                "coefficients",
                AttributeValue::Floats(self.coefficients.concat()),
            )
            .with_attribute("intercepts", AttributeValue::Floats(self.intercepts.clone()))
            .with_attribute("classlabels_ints", AttributeValue::Ints(self.classes.clone()))
            .with_attribute("post_transform", AttributeValue::String(post_transform.into()))
            .with_attribute("multi_class", AttributeValue::Int(i64::from(one_vs_rest)));
        node.domain = Some("ai.onnx.ml".to_string());
        OperatorGraph::new(vec![node], BTreeMap::new(), self.input(), Self::outputs())
    }

    /// Binary model as `Gemm -> Sigmoid`, labelled positive where the
    /// probability is `>= 0.5`.
    fn decomposed_binary_graph(&self) -> Result<OperatorGraph, GraphError> {
        let mut initializers = BTreeMap::new();
        initializers.insert(
            "coefficients".to_string(),
            ConstantTensor::from_f32(vec![1, self.n_features()], self.coefficients[0].clone()),
        );
        initializers.insert(
            "intercepts".to_string(),
            ConstantTensor::from_f32(vec![1], self.intercepts.clone()),
        );
        initializers.insert("classes".to_string(), int_tensor(vec![2], self.classes.clone()));
        initializers.insert("first_column".to_string(), int_tensor(Vec::new(), vec![0]));
        initializers.insert("half".to_string(), ConstantTensor::from_f32(Vec::new(), vec![0.5]));

        let nodes = vec![
            OperatorNode::new("Gemm", [INPUT_NAME, "coefficients", "intercepts"], ["logit"])
                .with_name("gemm")
                .with_attribute("transB", AttributeValue::Int(1)),
            OperatorNode::new("Sigmoid", ["logit"], ["probability"]).with_name("sigmoid"),
            OperatorNode::new("Gather", ["probability", "first_column"], [SCORE_OUTPUT])
                .with_name("positive_probability")
                .with_attribute("axis", AttributeValue::Int(-1)),
            OperatorNode::new("GreaterOrEqual", [SCORE_OUTPUT, "half"], ["is_positive"]).with_name("threshold"),
            OperatorNode::new("Cast", ["is_positive"], ["class_index"])
                .with_name("cast")
                .with_attribute("to", AttributeValue::Int(7)),
            OperatorNode::new("Gather", ["classes", "class_index"], [LABEL_OUTPUT]).with_name("label_lookup"),
        ];
        OperatorGraph::new(nodes, initializers, self.input(), Self::outputs())
    }

    fn decomposed_multiclass_graph(&self) -> Result<OperatorGraph, GraphError> {
        let rows = self.coefficients.len();
        let mut initializers = BTreeMap::new();
        initializers.insert(
            "coefficients".to_string(),
            ConstantTensor::from_f32(vec![rows, self.n_features()], self.coefficients.concat()),
        );
        initializers.insert(
            "intercepts".to_string(),
            ConstantTensor::from_f32(vec![rows], self.intercepts.clone()),
        );
        initializers.insert("classes".to_string(), int_tensor(vec![rows], self.classes.clone()));

        let mut nodes = vec![
            OperatorNode::new("Gemm", [INPUT_NAME, "coefficients", "intercepts"], ["logits"])
                .with_name("gemm")
                .with_attribute("transB", AttributeValue::Int(1)),
        ];
        match self.multi_class {
            MultiClass::Multinomial => nodes.push(
                OperatorNode::new("Softmax", ["logits"], [SCORE_OUTPUT])
                    .with_name("softmax")
                    .with_attribute("axis", AttributeValue::Int(-1)),
            ),
            MultiClass::OneVsRest => {
                nodes.push(OperatorNode::new("Sigmoid", ["logits"], ["raw_probabilities"]).with_name("sigmoid"));
                nodes.push(
                    OperatorNode::new("Normalizer", ["raw_probabilities"], [SCORE_OUTPUT])
                        .with_name("normalizer")
                        .with_attribute("norm", AttributeValue::String("L1".into())),
                );
            }
        }
        nodes.push(
            OperatorNode::new("ArgMax", [SCORE_OUTPUT], ["class_index"])
                .with_name("argmax")
                .with_attribute("axis", AttributeValue::Int(-1))
                .with_attribute("keepdims", AttributeValue::Int(0)),
        );
        nodes.push(OperatorNode::new("Gather", ["classes", "class_index"], [LABEL_OUTPUT]).with_name("label_lookup"));
        OperatorGraph::new(nodes, initializers, self.input(), Self::outputs())
    }
}
