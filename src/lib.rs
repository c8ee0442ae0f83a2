pub mod assembler;
pub(crate) mod builders;
pub mod capability;
pub mod converter;
pub mod debug;
pub mod error;
pub mod graph;
pub mod graphviz;
pub mod linear_model;
pub mod loader;
pub mod model;
pub mod operators;
pub mod options;
pub mod parity;
pub mod plan;
pub mod runtime;
pub mod tensor;

pub use assembler::{GraphAssembler, PlanBuilder};
pub use builders::linear::{LinearClassifierParams, PostTransform};
pub use capability::{Capabilities, CapabilityUnavailable};
pub use converter::{Conversion, ConverterRegistry, convert};
pub use error::{ErrorKind, GraphError};
pub use graph::{AttributeValue, ConstantTensor, OperatorGraph, OperatorNode, ValueInfo};
pub use graphviz::graph_to_dot;
pub use linear_model::{LinearModel, MultiClass, Producer};
pub use loader::{graph_from_json, load_graph_from_path, load_rows_from_path, save_graph_to_path};
pub use model::{ConvertedModel, Prediction};
pub use operators::OperatorKind;
pub use options::{BinaryScore, ConversionOptions};
pub use parity::{Parity, ParityMismatch, compare_predictions};
pub use plan::{ExecutionPlan, PlanStep, PrimitiveOp, SlotId, SlotInfo};
pub use runtime::{BackendKind, NdarrayRuntime, ReferenceRuntime, TensorRuntime};
pub use tensor::{DataType, Tensor};
