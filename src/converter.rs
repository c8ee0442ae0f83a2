use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::assembler::GraphAssembler;
use crate::capability::{Capabilities, CapabilityUnavailable};
use crate::error::GraphError;
use crate::graph::OperatorGraph;
use crate::model::ConvertedModel;
use crate::options::ConversionOptions;
use crate::runtime::{BackendKind, TensorRuntime};
use crate::tensor::Tensor;

/// Outcome of [`convert`]: a model, or the capability that was missing.
#[derive(Debug, Clone)]
pub enum Conversion {
    Converted(ConvertedModel),
    Unavailable(CapabilityUnavailable),
}

impl Conversion {
    pub fn model(self) -> Option<ConvertedModel> {
        match self {
            Conversion::Converted(model) => Some(model),
            Conversion::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Conversion::Converted(_))
    }
}

/// Convert `graph` into a model executed by `backend`.
///
/// `example` pins the feature count when neither the graph input nor any
/// operator declares it. A backend missing from `capabilities` yields
/// [`Conversion::Unavailable`] without touching the graph.
pub fn convert(
    graph: &OperatorGraph,
    backend: BackendKind,
    example: Option<&Tensor>,
    capabilities: &Capabilities,
    options: &ConversionOptions,
) -> Result<Conversion, GraphError> {
    if let Err(missing) = capabilities.require(backend) {
        info!(backend = %backend, "skipping conversion: {missing}");
        return Ok(Conversion::Unavailable(missing));
    }
    let plan = GraphAssembler::new(graph, options).assemble(example)?;
    debug!(backend = %backend, steps = plan.steps().len(), "converted graph");
    Ok(Conversion::Converted(ConvertedModel::new(plan, backend.runtime())))
}

/// Runtimes addressable by backend name.
pub struct ConverterRegistry {
    runtimes: HashMap<&'static str, Arc<dyn TensorRuntime>>,
}

impl ConverterRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            runtimes: HashMap::new(),
        };
        for kind in BackendKind::ALL {
            registry.register(kind.runtime());
        }
        registry
    }

    /// Add `runtime`, replacing any runtime registered for the same backend.
    pub fn register(&mut self, runtime: Arc<dyn TensorRuntime>) {
        self.runtimes.insert(runtime.kind().name(), runtime);
    }

    pub fn available_backends(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.runtimes.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn capabilities(&self) -> Capabilities {
        self.runtimes.values().map(|runtime| runtime.kind()).collect()
    }

    pub fn convert(
        &self,
        backend: &str,
        graph: &OperatorGraph,
        example: Option<&Tensor>,
        options: &ConversionOptions,
    ) -> Result<ConvertedModel, GraphError> {
        let key = backend.to_ascii_lowercase();
        let Some(runtime) = self.runtimes.get(key.as_str()) else {
            return Err(GraphError::UnknownBackend {
                requested: backend.to_string(),
                available: self.available_backends(),
            });
        };
        let plan = GraphAssembler::new(graph, options).assemble(example)?;
        debug!(backend = %key, steps = plan.steps().len(), "converted graph");
        Ok(ConvertedModel::new(plan, Arc::clone(runtime)))
    }
}
