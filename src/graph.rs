use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::error::GraphError;
use crate::tensor::{DataType, Tensor};

/// Typed node attribute, encoded in JSON as `{"ints": [1, 2]}` and friends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
    Tensor(ConstantTensor),
}

impl AttributeValue {
    fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Ints(_) => "ints",
            AttributeValue::Floats(_) => "floats",
            AttributeValue::Strings(_) => "strings",
            AttributeValue::Tensor(_) => "tensor",
        }
    }
}

/// Constant tensor payload laid out like an ONNX `TensorProto`.
///
/// Values come either from one of the typed fields or from little-endian
/// `raw_data`, which JSON carries base64 encoded.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantTensor {
    pub data_type: DataType,
    #[serde(default)]
    pub dims: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub float_data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub double_data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int64_data: Vec<i64>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Vec<u8>>,
}

impl ConstantTensor {
    pub fn from_f32(dims: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            data_type: DataType::Float32,
            dims,
            float_data: data,
            double_data: Vec::new(),
            int64_data: Vec::new(),
            raw_data: None,
        }
    }

    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in &self.dims {
            count = count.checked_mul(*dim)?;
        }
        Some(count)
    }

    /// Decode the payload into a host tensor of the declared type.
    pub fn to_tensor(&self, name: &str) -> Result<Tensor, GraphError> {
        let invalid = |reason: String| GraphError::InvalidConstant {
            name: name.to_string(),
            reason,
        };
        let expected = self
            .element_count()
            .ok_or_else(|| invalid(format!("dims {:?} overflow element count", self.dims)))?;

        let tensor = match (&self.raw_data, self.data_type) {
            (Some(raw), data_type) => {
                let width = data_type.bytes_per_element();
                if raw.len() != expected * width {
                    return Err(invalid(format!(
                        "raw_data holds {} bytes, dims {:?} need {}",
                        raw.len(),
                        self.dims,
                        expected * width
                    )));
                }
                match data_type {
                    DataType::Float32 => Tensor::from_f32(
                        &self.dims,
                        raw.chunks_exact(4)
                            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                            .collect(),
                    ),
                    DataType::Float64 => Tensor::from_f64(
                        &self.dims,
                        raw.chunks_exact(8)
                            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                            .collect(),
                    ),
                    DataType::Int64 => {
                        let values: Vec<i64> = raw
                            .chunks_exact(8)
                            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                            .collect();
                        ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&self.dims), values)
                            .map(Tensor::I64)
                            .map_err(|err| invalid(err.to_string()))
                    }
                }
            }
            (None, DataType::Float32) => {
                check_len(self.float_data.len(), expected).map_err(invalid)?;
                Tensor::from_f32(&self.dims, self.float_data.clone())
            }
            (None, DataType::Float64) => {
                check_len(self.double_data.len(), expected).map_err(invalid)?;
                Tensor::from_f64(&self.dims, self.double_data.clone())
            }
            (None, DataType::Int64) => {
                check_len(self.int64_data.len(), expected).map_err(invalid)?;
                ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&self.dims), self.int64_data.clone())
                    .map(Tensor::I64)
                    .map_err(|err| invalid(err.to_string()))
            }
        }?;
        Ok(tensor)
    }
}

fn check_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("holds {actual} values, dims need {expected}"))
    }
}

/// Declared graph input: name, element type and optional shape (`null` dims are dynamic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub shape: Option<Vec<Option<usize>>>,
}

fn default_data_type() -> DataType {
    DataType::Float32
}

impl ValueInfo {
    pub fn new(name: impl Into<String>, data_type: DataType, shape: Option<Vec<Option<usize>>>) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorNode {
    pub op_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl OperatorNode {
    pub fn new(
        op_type: impl Into<String>,
        inputs: impl IntoIterator<Item = impl Into<String>>,
        outputs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            name: None,
            domain: None,
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| match self.outputs.first() {
                Some(output) => format!("{}({})", self.op_type, output),
                None => self.op_type.clone(),
            })
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    fn wrong_type(&self, key: &str, expected: &str, found: &AttributeValue) -> GraphError {
        GraphError::invalid_attribute(
            &self.display_name(),
            key,
            format!("expected {expected}, found {}", found.type_name()),
        )
    }

    pub fn int_attr(&self, key: &str) -> Result<Option<i64>, GraphError> {
        match self.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::Int(value)) => Ok(Some(*value)),
            Some(other) => Err(self.wrong_type(key, "int", other)),
        }
    }

    pub fn float_attr(&self, key: &str) -> Result<Option<f32>, GraphError> {
        match self.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::Float(value)) => Ok(Some(*value)),
            Some(AttributeValue::Int(value)) => Ok(Some(*value as f32)),
            Some(other) => Err(self.wrong_type(key, "float", other)),
        }
    }

    pub fn string_attr(&self, key: &str) -> Result<Option<&str>, GraphError> {
        match self.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(self.wrong_type(key, "string", other)),
        }
    }

    pub fn ints_attr(&self, key: &str) -> Result<Option<&[i64]>, GraphError> {
        match self.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::Ints(values)) => Ok(Some(values.as_slice())),
            Some(other) => Err(self.wrong_type(key, "ints", other)),
        }
    }

    pub fn floats_attr(&self, key: &str) -> Result<Option<&[f32]>, GraphError> {
        match self.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::Floats(values)) => Ok(Some(values.as_slice())),
            Some(other) => Err(self.wrong_type(key, "floats", other)),
        }
    }

    pub fn strings_attr(&self, key: &str) -> Result<Option<&[String]>, GraphError> {
        match self.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::Strings(values)) => Ok(Some(values.as_slice())),
            Some(other) => Err(self.wrong_type(key, "strings", other)),
        }
    }

    pub fn required<T>(&self, key: &str, value: Option<T>) -> Result<T, GraphError> {
        value.ok_or_else(|| GraphError::MissingAttribute {
            node: self.display_name(),
            attribute: key.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    nodes: Vec<OperatorNode>,
    #[serde(default)]
    initializers: BTreeMap<String, ConstantTensor>,
    #[serde(default)]
    inputs: Vec<ValueInfo>,
    #[serde(default)]
    outputs: Vec<String>,
}

/// A parsed operator graph. Construction validates name references, after
/// which the graph is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument")]
pub struct OperatorGraph {
    nodes: Vec<OperatorNode>,
    initializers: BTreeMap<String, ConstantTensor>,
    inputs: Vec<ValueInfo>,
    outputs: Vec<String>,
}

impl TryFrom<GraphDocument> for OperatorGraph {
    type Error = GraphError;

    fn try_from(doc: GraphDocument) -> Result<Self, Self::Error> {
        OperatorGraph::new(doc.nodes, doc.initializers, doc.inputs, doc.outputs)
    }
}

impl OperatorGraph {
    pub fn new(
        nodes: Vec<OperatorNode>,
        initializers: BTreeMap<String, ConstantTensor>,
        inputs: Vec<ValueInfo>,
        outputs: Vec<String>,
    ) -> Result<Self, GraphError> {
        // Older exporters also list initializers as graph inputs; the initializer wins.
        let inputs: Vec<ValueInfo> = inputs
            .into_iter()
            .filter(|input| !initializers.contains_key(&input.name))
            .collect();
        if nodes.is_empty() || inputs.is_empty() || outputs.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut defined: HashSet<&str> = initializers.keys().map(String::as_str).collect();
        for input in &inputs {
            if !defined.insert(input.name.as_str()) {
                return Err(GraphError::DuplicateInputName {
                    name: input.name.clone(),
                });
            }
        }

        for node in &nodes {
            for output in &node.outputs {
                if output.is_empty() {
                    continue;
                }
                if !defined.insert(output.as_str()) {
                    return Err(GraphError::DuplicateOutputName {
                        node: node.display_name(),
                        name: output.clone(),
                    });
                }
            }
        }

        for node in &nodes {
            // Empty names mark omitted optional inputs.
            if let Some(missing) = node
                .inputs
                .iter()
                .find(|input| !input.is_empty() && !defined.contains(input.as_str()))
            {
                return Err(GraphError::UnresolvedInput {
                    node: node.display_name(),
                    input: missing.clone(),
                });
            }
        }

        for output in &outputs {
            if !defined.contains(output.as_str()) {
                return Err(GraphError::UnknownGraphOutput {
                    name: output.clone(),
                });
            }
        }

        Ok(Self {
            nodes,
            initializers,
            inputs,
            outputs,
        })
    }

    pub fn nodes(&self) -> &[OperatorNode] {
        &self.nodes
    }

    pub fn initializers(&self) -> &BTreeMap<String, ConstantTensor> {
        &self.initializers
    }

    pub fn initializer(&self, name: &str) -> Option<&ConstantTensor> {
        self.initializers.get(name)
    }

    pub fn inputs(&self) -> &[ValueInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Index of the node producing each value name
    pub fn producers(&self) -> HashMap<&str, usize> {
        let mut producers = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                producers.insert(output.as_str(), idx);
            }
        }
        producers
    }
}
