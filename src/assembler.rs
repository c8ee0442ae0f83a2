use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use tracing::debug;

use crate::error::GraphError;
use crate::graph::{OperatorGraph, ValueInfo};
use crate::operators::OperatorKind;
use crate::options::ConversionOptions;
use crate::plan::{ExecutionPlan, PlanStep, PrimitiveOp, SlotId, SlotInfo};
use crate::tensor::{DataType, Tensor};

/// Mutable state handed to node builders while a plan is assembled.
pub struct PlanBuilder<'a> {
    graph: &'a OperatorGraph,
    options: &'a ConversionOptions,
    precision: DataType,
    slots: Vec<SlotInfo>,
    values: HashMap<String, SlotId>,
    constants: BTreeMap<SlotId, Tensor>,
    steps: Vec<PlanStep>,
    input: SlotId,
    features: Option<usize>,
    origin: String,
}

impl<'a> PlanBuilder<'a> {
    fn new(
        graph: &'a OperatorGraph,
        options: &'a ConversionOptions,
        input: &ValueInfo,
        precision: DataType,
    ) -> Self {
        let shape = input.shape.clone().unwrap_or_else(|| vec![None, None]);
        let features = shape.get(1).copied().flatten();
        let mut values = HashMap::new();
        values.insert(input.name.clone(), 0);
        Self {
            graph,
            options,
            precision,
            slots: vec![SlotInfo {
                name: input.name.clone(),
                data_type: precision,
                shape,
            }],
            values,
            constants: BTreeMap::new(),
            steps: Vec::new(),
            input: 0,
            features,
            origin: String::new(),
        }
    }

    /// Floating point type every float value of the plan is computed in.
    pub fn precision(&self) -> DataType {
        self.precision
    }

    pub fn options(&self) -> &ConversionOptions {
        self.options
    }

    /// Display name of the node currently being lowered.
    pub fn node_name(&self) -> &str {
        &self.origin
    }

    pub fn slot(&self, id: SlotId) -> &SlotInfo {
        &self.slots[id]
    }

    pub fn constant(&self, id: SlotId) -> Option<&Tensor> {
        self.constants.get(&id)
    }

    /// Look up a value by name. Initializers are folded into the plan's
    /// constant table on first use.
    pub fn resolve(&mut self, name: &str) -> Result<SlotId, GraphError> {
        if let Some(&id) = self.values.get(name) {
            return Ok(id);
        }
        let Some(constant) = self.graph.initializer(name) else {
            return Err(GraphError::UnresolvedInput {
                node: self.origin.clone(),
                input: name.to_string(),
            });
        };
        let limit = self.options.constant_element_limit;
        match constant.element_count() {
            Some(count) if count <= limit => {}
            _ => {
                return Err(GraphError::InvalidConstant {
                    name: name.to_string(),
                    reason: format!("dims {:?} exceed the {limit} element limit", constant.dims),
                });
            }
        }
        let tensor = constant.to_tensor(name)?;
        let id = self.add_constant(name, tensor);
        self.values.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add a constant slot. Float tensors are cast to the plan precision.
    pub fn add_constant(&mut self, name: impl Into<String>, tensor: Tensor) -> SlotId {
        let tensor = if tensor.data_type().is_float() {
            tensor.cast(self.precision)
        } else {
            tensor
        };
        let id = self.slots.len();
        let name = name.into();
        debug!(slot = id, constant = %name, shape = ?tensor.shape(), "folded constant");
        self.slots.push(SlotInfo {
            name,
            data_type: tensor.data_type(),
            shape: tensor.shape().iter().map(|dim| Some(*dim)).collect(),
        });
        self.constants.insert(id, tensor);
        id
    }

    /// Append a step and return the slot holding its result.
    pub fn emit(
        &mut self,
        op: PrimitiveOp,
        inputs: Vec<SlotId>,
        data_type: DataType,
        shape: Vec<Option<usize>>,
    ) -> SlotId {
        let id = self.slots.len();
        self.slots.push(SlotInfo {
            name: format!("{}/{}", self.origin, op.name()),
            data_type,
            shape,
        });
        self.steps.push(PlanStep {
            op,
            inputs,
            output: id,
            origin: self.origin.clone(),
        });
        id
    }

    /// Make `slot` visible to later nodes under the graph value `name`.
    pub fn bind(&mut self, name: &str, slot: SlotId) {
        if name.is_empty() {
            return;
        }
        if self.steps.iter().any(|step| step.output == slot) {
            self.slots[slot].name = name.to_string();
        }
        self.values.insert(name.to_string(), slot);
    }

    /// Record that `slot` is contracted against `features` columns.
    pub fn require_features(&mut self, slot: SlotId, features: usize) -> Result<(), GraphError> {
        let info = &self.slots[slot];
        if info.shape.len() != 2 {
            return Err(GraphError::IncompatibleShapes {
                node: self.origin.clone(),
                reason: format!("`{}` must be [batch, features], has rank {}", info.name, info.shape.len()),
            });
        }
        if let Some(declared) = info.shape[1]
            && declared != features
        {
            return Err(GraphError::IncompatibleShapes {
                node: self.origin.clone(),
                reason: format!(
                    "`{}` has {declared} features but {features} are required",
                    info.name
                ),
            });
        }
        self.slots[slot].shape[1] = Some(features);
        if slot == self.input {
            self.features = Some(features);
        }
        Ok(())
    }

    /// Fail unless `slot` holds floating point values.
    pub fn expect_float(&self, slot: SlotId) -> Result<(), GraphError> {
        let info = &self.slots[slot];
        if info.data_type.is_float() {
            Ok(())
        } else {
            Err(GraphError::IncompatibleShapes {
                node: self.origin.clone(),
                reason: format!("`{}` must be floating point, is {:?}", info.name, info.data_type),
            })
        }
    }

    fn is_step_output(&self, slot: SlotId) -> bool {
        self.steps.iter().any(|step| step.output == slot)
    }
}

/// Orders the graph's nodes and lowers them into an [`ExecutionPlan`].
pub struct GraphAssembler<'a> {
    graph: &'a OperatorGraph,
    options: &'a ConversionOptions,
}

impl<'a> GraphAssembler<'a> {
    pub fn new(graph: &'a OperatorGraph, options: &'a ConversionOptions) -> Self {
        Self { graph, options }
    }

    /// Topological order of node indices. Among ready nodes the one declared
    /// first is taken, so the order is stable for a given graph.
    pub fn execution_order(&self) -> Result<Vec<usize>, GraphError> {
        let nodes = self.graph.nodes();
        let producers = self.graph.producers();
        let mut pending = vec![0usize; nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (idx, node) in nodes.iter().enumerate() {
            let deps: BTreeSet<usize> = node
                .inputs
                .iter()
                .filter_map(|input| producers.get(input.as_str()).copied())
                .collect();
            pending[idx] = deps.len();
            for dep in deps {
                dependents[dep].push(idx);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &dependents[idx] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != nodes.len() {
            let stuck = pending
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(idx, _)| nodes[idx].display_name())
                .collect();
            return Err(GraphError::CyclicGraph { nodes: stuck });
        }
        Ok(order)
    }

    pub fn assemble(&self, example: Option<&Tensor>) -> Result<ExecutionPlan, GraphError> {
        let nodes = self.graph.nodes();
        let kinds = nodes
            .iter()
            .map(OperatorKind::for_node)
            .collect::<Result<Vec<_>, _>>()?;
        let order = self.execution_order()?;

        let [input] = self.graph.inputs() else {
            return Err(GraphError::UnsupportedInputCount {
                count: self.graph.inputs().len(),
            });
        };
        if let Some(shape) = &input.shape
            && shape.len() != 2
        {
            return Err(GraphError::IncompatibleShapes {
                node: input.name.clone(),
                reason: format!("feature input must be [batch, features], declared rank {}", shape.len()),
            });
        }
        let precision = self.precision(input, example)?;

        let mut builder = PlanBuilder::new(self.graph, self.options, input, precision);
        for idx in order {
            let node = &nodes[idx];
            builder.origin = node.display_name();
            debug!(node = %builder.origin, op = kinds[idx].tag(), "lowering node");
            (kinds[idx].builder())(node, &mut builder)?;
        }

        let features = builder
            .features
            .or_else(|| example.and_then(|tensor| tensor.shape().get(1).copied()))
            .ok_or_else(|| GraphError::UnknownFeatureCount {
                input: input.name.clone(),
            })?;
        if let Some(example) = example
            && (example.shape().len() != 2 || example.shape()[1] != features)
        {
            return Err(GraphError::ShapeMismatch {
                input: input.name.clone(),
                expected: format!("[batch, {features}]"),
                actual: example.shape().to_vec(),
            });
        }

        let (label, score) = self.output_slots(&builder)?;
        debug!(
            steps = builder.steps.len(),
            constants = builder.constants.len(),
            features,
            precision = ?precision,
            "assembled execution plan"
        );

        Ok(ExecutionPlan {
            steps: builder.steps,
            slots: builder.slots,
            constants: builder.constants,
            input: builder.input,
            features,
            precision,
            label,
            score,
        })
    }

    fn precision(&self, input: &ValueInfo, example: Option<&Tensor>) -> Result<DataType, GraphError> {
        // Plans compute in the input's type, so only float types can be accepted.
        let mut allowed: Vec<DataType> = self
            .options
            .allowed_input_types
            .iter()
            .copied()
            .filter(|data_type| data_type.is_float())
            .collect();
        allowed.sort_by_key(|data_type| data_type.bytes_per_element());
        if !allowed.contains(&input.data_type) {
            return Err(GraphError::InputTypeNotAllowed {
                input: input.name.clone(),
                allowed,
                actual: input.data_type,
            });
        }
        match example {
            Some(tensor) if tensor.data_type() != input.data_type => {
                Err(GraphError::DataTypeMismatch {
                    input: input.name.clone(),
                    expected: input.data_type,
                    actual: tensor.data_type(),
                })
            }
            _ => Ok(input.data_type),
        }
    }

    fn output_slots(&self, builder: &PlanBuilder<'_>) -> Result<(SlotId, SlotId), GraphError> {
        let [label_name, score_name] = self.graph.outputs() else {
            return Err(GraphError::OutputContract {
                reason: format!(
                    "expected two outputs (label, score), graph declares {}",
                    self.graph.outputs().len()
                ),
            });
        };
        let lookup = |name: &String| {
            builder
                .values
                .get(name)
                .copied()
                .filter(|slot| builder.is_step_output(*slot))
                .ok_or_else(|| GraphError::OutputContract {
                    reason: format!("output `{name}` is not computed by any operator"),
                })
        };
        let label = lookup(label_name)?;
        let score = lookup(score_name)?;

        if builder.slots[label].data_type != DataType::Int64 {
            return Err(GraphError::OutputContract {
                reason: format!(
                    "label output `{label_name}` must be int64, is {:?}",
                    builder.slots[label].data_type
                ),
            });
        }
        if !builder.slots[score].data_type.is_float() {
            return Err(GraphError::OutputContract {
                reason: format!(
                    "score output `{score_name}` must be floating point, is {:?}",
                    builder.slots[score].data_type
                ),
            });
        }
        Ok((label, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttributeValue, ConstantTensor, OperatorNode};

    fn input(features: Option<usize>) -> ValueInfo {
        ValueInfo::new("X", DataType::Float32, Some(vec![None, features]))
    }

    fn classifier(name: &str, output_label: &str, output_score: &str) -> OperatorNode {
        OperatorNode::new("LinearClassifier", ["X"], [output_label, output_score])
            .with_name(name)
            .with_attribute("coefficients", AttributeValue::Floats(vec![1.0, -1.0, 0.5, 0.25]))
            .with_attribute("intercepts", AttributeValue::Floats(vec![0.0, 0.1]))
            .with_attribute("post_transform", AttributeValue::String("SOFTMAX".into()))
    }

    fn graph(nodes: Vec<OperatorNode>, outputs: &[&str]) -> OperatorGraph {
        OperatorGraph::new(
            nodes,
            BTreeMap::new(),
            vec![input(Some(2))],
            outputs.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn orders_dependencies_before_consumers() {
        let nodes = vec![
            OperatorNode::new("Identity", ["scores"], ["probabilities"]).with_name("copy"),
            classifier("linear", "label", "scores"),
        ];
        let graph = graph(nodes, &["label", "probabilities"]);
        let options = ConversionOptions::default();
        let order = GraphAssembler::new(&graph, &options).execution_order().unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let nodes = vec![
            classifier("linear", "label", "scores"),
            OperatorNode::new("Identity", ["scores"], ["b"]).with_name("b"),
            OperatorNode::new("Identity", ["scores"], ["a"]).with_name("a"),
            OperatorNode::new("Identity", ["a"], ["c"]).with_name("c"),
        ];
        let graph = graph(nodes, &["label", "c"]);
        let options = ConversionOptions::default();
        let order = GraphAssembler::new(&graph, &options).execution_order().unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn cycle_is_detected() {
        let nodes = vec![
            classifier("linear", "label", "scores"),
            OperatorNode::new("Add", ["scores", "loop_b"], ["loop_a"]).with_name("first"),
            OperatorNode::new("Identity", ["loop_a"], ["loop_b"]).with_name("second"),
        ];
        let graph = graph(nodes, &["label", "loop_a"]);
        let options = ConversionOptions::default();
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        match err {
            GraphError::CyclicGraph { nodes } => {
                assert_eq!(nodes, vec!["first".to_string(), "second".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let nodes = vec![
            classifier("linear", "label", "scores"),
            OperatorNode::new("Add", ["scores", "acc"], ["acc"]).with_name("acc"),
        ];
        let graph = graph(nodes, &["label", "acc"]);
        let options = ConversionOptions::default();
        let err = GraphAssembler::new(&graph, &options).execution_order().unwrap_err();
        assert!(matches!(err, GraphError::CyclicGraph { .. }));
    }

    #[test]
    fn unsupported_operator_fails_before_lowering() {
        let nodes = vec![
            classifier("linear", "label", "scores"),
            OperatorNode::new("ZipMap", ["scores"], ["zipped"]).with_name("zipmap"),
        ];
        let graph = graph(nodes, &["label", "scores"]);
        let options = ConversionOptions::default();
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedOperator { ref op_type, .. } if op_type == "ZipMap"));
    }

    #[test]
    fn requires_label_and_score_outputs() {
        let graph = graph(vec![classifier("linear", "label", "scores")], &["scores"]);
        let options = ConversionOptions::default();
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        assert!(matches!(err, GraphError::OutputContract { .. }));
    }

    #[test]
    fn label_output_must_be_integer() {
        let graph = graph(vec![classifier("linear", "label", "scores")], &["scores", "label"]);
        let options = ConversionOptions::default();
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        assert!(matches!(err, GraphError::OutputContract { .. }));
    }

    #[test]
    fn example_with_wrong_feature_count_is_rejected() {
        let graph = graph(vec![classifier("linear", "label", "scores")], &["label", "scores"]);
        let options = ConversionOptions::default();
        let example = Tensor::from_f32(&[1, 3], vec![0.0; 3]).unwrap();
        let err = GraphAssembler::new(&graph, &options)
            .assemble(Some(&example))
            .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn input_type_outside_allow_list_reports_allowed_types() {
        let graph = graph(vec![classifier("linear", "label", "scores")], &["label", "scores"]);
        let mut options = ConversionOptions::default();
        options.allowed_input_types = [DataType::Float64].into_iter().collect();
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        match err {
            GraphError::InputTypeNotAllowed { allowed, actual, .. } => {
                assert_eq!(allowed, vec![DataType::Float64]);
                assert_eq!(actual, DataType::Float32);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn integer_inputs_are_never_accepted() {
        let graph = OperatorGraph::new(
            vec![classifier("linear", "label", "scores")],
            BTreeMap::new(),
            vec![ValueInfo::new("X", DataType::Int64, Some(vec![None, Some(2)]))],
            vec!["label".into(), "scores".into()],
        )
        .unwrap();
        let mut options = ConversionOptions::default();
        options.allowed_input_types.insert(DataType::Int64);
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        match err {
            GraphError::InputTypeNotAllowed { allowed, actual, .. } => {
                assert_eq!(allowed, vec![DataType::Float32, DataType::Float64]);
                assert_eq!(actual, DataType::Int64);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn declared_shape_conflicting_with_coefficients_fails() {
        let graph = OperatorGraph::new(
            vec![classifier("linear", "label", "scores")],
            BTreeMap::new(),
            vec![input(Some(3))],
            vec!["label".into(), "scores".into()],
        )
        .unwrap();
        let options = ConversionOptions::default();
        let err = GraphAssembler::new(&graph, &options).assemble(None).unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleShapes { .. }));
    }

    #[test]
    fn initializers_fold_into_plan_precision() {
        let mut initializers = BTreeMap::new();
        initializers.insert(
            "W".to_string(),
            ConstantTensor::from_f32(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]),
        );
        let nodes = vec![
            OperatorNode::new("MatMul", ["X", "W"], ["logits"]).with_name("mm"),
            OperatorNode::new("Softmax", ["logits"], ["probabilities"]).with_name("softmax"),
            OperatorNode::new("ArgMax", ["probabilities"], ["label"])
                .with_name("argmax")
                .with_attribute("axis", AttributeValue::Int(1))
                .with_attribute("keepdims", AttributeValue::Int(0)),
        ];
        let graph = OperatorGraph::new(
            nodes,
            initializers,
            vec![ValueInfo::new("X", DataType::Float64, None)],
            vec!["label".into(), "probabilities".into()],
        )
        .unwrap();
        let options = ConversionOptions::default();
        let plan = GraphAssembler::new(&graph, &options).assemble(None).unwrap();
        assert_eq!(plan.precision(), DataType::Float64);
        assert_eq!(plan.feature_count(), 2);
        assert_eq!(plan.constants().len(), 1);
        let folded = plan.constants().values().next().unwrap();
        assert_eq!(folded.data_type(), DataType::Float64);
        let ops: Vec<&str> = plan.steps().iter().map(|step| step.op.name()).collect();
        assert_eq!(ops, vec!["matmul", "softmax", "argmax"]);
    }

    #[test]
    fn unknown_feature_count_without_hints_fails() {
        let nodes = vec![
            OperatorNode::new("Softmax", ["X"], ["probabilities"]),
            OperatorNode::new("ArgMax", ["probabilities"], ["label"])
                .with_attribute("axis", AttributeValue::Int(-1))
                .with_attribute("keepdims", AttributeValue::Int(0)),
        ];
        let graph = OperatorGraph::new(
            nodes,
            BTreeMap::new(),
            vec![ValueInfo::new("X", DataType::Float32, None)],
            vec!["label".into(), "probabilities".into()],
        )
        .unwrap();
        let options = ConversionOptions::default();
        let assembler = GraphAssembler::new(&graph, &options);
        assert!(matches!(
            assembler.assemble(None).unwrap_err(),
            GraphError::UnknownFeatureCount { .. }
        ));
        let example = Tensor::from_f32(&[2, 4], vec![0.0; 8]).unwrap();
        let plan = assembler.assemble(Some(&example)).unwrap();
        assert_eq!(plan.feature_count(), 4);
    }

    #[test]
    fn assembling_twice_yields_identical_plans() {
        let graph = graph(vec![classifier("linear", "label", "scores")], &["label", "scores"]);
        let options = ConversionOptions::default();
        let assembler = GraphAssembler::new(&graph, &options);
        let first = assembler.assemble(None).unwrap();
        let second = assembler.assemble(None).unwrap();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.steps(), second.steps());
    }
}
