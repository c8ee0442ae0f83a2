use std::path::PathBuf;

use serde_json::Error as JsonError;
use thiserror::Error;

use crate::tensor::DataType;

/// Coarse classification of [`GraphError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The graph structure or its attributes are broken.
    MalformedGraph,
    /// An operator tag has no builder.
    UnsupportedOperator,
    /// The node dependency relation has a cycle.
    CyclicGraph,
    /// The caller's input tensor does not fit the model.
    ShapeMismatch,
    /// Reading or writing files failed.
    Io,
    /// Backend selection or runtime execution failed.
    Backend,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} cannot be loaded: {reason}")]
    UnsupportedFileFormat { path: PathBuf, reason: String },
    #[error("graph JSON could not be parsed: {source}")]
    Parse {
        #[from]
        source: JsonError,
    },
    #[error("graph must declare inputs, nodes, and outputs")]
    EmptyGraph,
    #[error("graph input name `{name}` is duplicated")]
    DuplicateInputName { name: String },
    #[error("value `{name}` produced by node `{node}` is already defined")]
    DuplicateOutputName { node: String, name: String },
    #[error("node `{node}` references unknown value `{input}`")]
    UnresolvedInput { node: String, input: String },
    #[error("graph output `{name}` is never produced")]
    UnknownGraphOutput { name: String },
    #[error("graph declares {count} inputs; exactly one feature input is supported")]
    UnsupportedInputCount { count: usize },
    #[error("node `{node}` is missing required attribute `{attribute}`")]
    MissingAttribute { node: String, attribute: String },
    #[error("node `{node}` attribute `{attribute}` is invalid: {reason}")]
    InvalidAttribute {
        node: String,
        attribute: String,
        reason: String,
    },
    #[error("node `{node}` ({op_type}) expects {expected}, got {inputs} inputs and {outputs} outputs")]
    Arity {
        node: String,
        op_type: String,
        expected: String,
        inputs: usize,
        outputs: usize,
    },
    #[error("node `{node}` has incompatible shapes: {reason}")]
    IncompatibleShapes { node: String, reason: String },
    #[error("feature count of input `{input}` cannot be inferred")]
    UnknownFeatureCount { input: String },
    #[error("constant `{name}` is invalid: {reason}")]
    InvalidConstant { name: String, reason: String },
    #[error("graph outputs violate the (label, score) contract: {reason}")]
    OutputContract { reason: String },
    #[error("operator `{op_type}` used by node `{node}` is not supported")]
    UnsupportedOperator { op_type: String, node: String },
    #[error("graph contains a dependency cycle through nodes {nodes:?}")]
    CyclicGraph { nodes: Vec<String> },
    #[error("input `{input}` has shape {actual:?} but the model expects {expected}")]
    ShapeMismatch {
        input: String,
        expected: String,
        actual: Vec<usize>,
    },
    #[error("input `{input}` has data type {actual:?} but the model expects {expected:?}")]
    DataTypeMismatch {
        input: String,
        expected: DataType,
        actual: DataType,
    },
    #[error("input `{input}` has data type {actual:?}; accepted input types are {allowed:?}")]
    InputTypeNotAllowed {
        input: String,
        allowed: Vec<DataType>,
        actual: DataType,
    },
    #[error("backend `{requested}` is not available. Supported: {available:?}")]
    UnknownBackend {
        requested: String,
        available: Vec<&'static str>,
    },
    #[error("step `{step}` failed during execution: {reason}")]
    ExecutionFailed { step: String, reason: String },
    #[error("graph could not be exported to {path}: {source}")]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GraphError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::ExportIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_attribute(
        node: &str,
        attribute: &str,
        reason: impl Into<String>,
    ) -> Self {
        GraphError::InvalidAttribute {
            node: node.to_string(),
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(step: &str, reason: impl Into<String>) -> Self {
        GraphError::ExecutionFailed {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::EmptyGraph
            | GraphError::DuplicateInputName { .. }
            | GraphError::DuplicateOutputName { .. }
            | GraphError::UnresolvedInput { .. }
            | GraphError::UnknownGraphOutput { .. }
            | GraphError::UnsupportedInputCount { .. }
            | GraphError::MissingAttribute { .. }
            | GraphError::InvalidAttribute { .. }
            | GraphError::Arity { .. }
            | GraphError::IncompatibleShapes { .. }
            | GraphError::UnknownFeatureCount { .. }
            | GraphError::InvalidConstant { .. }
            | GraphError::OutputContract { .. } => ErrorKind::MalformedGraph,
            GraphError::UnsupportedOperator { .. } => ErrorKind::UnsupportedOperator,
            GraphError::CyclicGraph { .. } => ErrorKind::CyclicGraph,
            GraphError::ShapeMismatch { .. }
            | GraphError::DataTypeMismatch { .. }
            | GraphError::InputTypeNotAllowed { .. } => ErrorKind::ShapeMismatch,
            GraphError::Io { .. }
            | GraphError::UnsupportedFileFormat { .. }
            | GraphError::Parse { .. }
            | GraphError::ExportIo { .. } => ErrorKind::Io,
            GraphError::UnknownBackend { .. } | GraphError::ExecutionFailed { .. } => {
                ErrorKind::Backend
            }
        }
    }
}
