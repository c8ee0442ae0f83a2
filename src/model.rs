use std::borrow::Cow;
use std::sync::Arc;

use tracing::trace;

use crate::error::GraphError;
use crate::plan::ExecutionPlan;
use crate::runtime::{BackendKind, TensorRuntime};
use crate::tensor::Tensor;

/// The two outputs every converted classifier produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// int64 class labels, `[batch]`
    pub label: Tensor,
    /// `[batch]` for binary models, `[batch, n_classes]` otherwise
    pub score: Tensor,
}

impl Prediction {
    /// Positional `(label, score)` form.
    pub fn into_pair(self) -> (Tensor, Tensor) {
        (self.label, self.score)
    }

    pub fn labels(&self) -> Vec<i64> {
        self.label
            .as_i64()
            .map(|labels| labels.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// An execution plan bound to a runtime. Cloning shares both, and any
/// number of threads may call [`ConvertedModel::predict`] at once.
#[derive(Debug, Clone)]
pub struct ConvertedModel {
    plan: Arc<ExecutionPlan>,
    runtime: Arc<dyn TensorRuntime>,
}

impl ConvertedModel {
    pub fn new(plan: ExecutionPlan, runtime: Arc<dyn TensorRuntime>) -> Self {
        Self {
            plan: Arc::new(plan),
            runtime,
        }
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn backend(&self) -> BackendKind {
        self.runtime.kind()
    }

    pub fn feature_count(&self) -> usize {
        self.plan.feature_count()
    }

    /// Run the plan on a `[batch, features]` tensor. The input is checked
    /// against the plan before any step executes.
    pub fn predict(&self, input: &Tensor) -> Result<Prediction, GraphError> {
        self.check_input(input)?;

        let plan = &*self.plan;
        let mut values: Vec<Option<Cow<'_, Tensor>>> = vec![None; plan.slots().len()];
        for (id, tensor) in plan.constants() {
            values[*id] = Some(Cow::Borrowed(tensor));
        }
        values[plan.input_slot()] = Some(Cow::Borrowed(input));

        for step in plan.steps() {
            let output = {
                let inputs = step
                    .inputs
                    .iter()
                    .map(|id| {
                        values[*id].as_deref().ok_or_else(|| {
                            GraphError::execution(&step.describe(), format!("slot %{id} is read before it is written"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.runtime.execute(step, &inputs)?
            };
            let expected = plan.slots()[step.output].data_type;
            if output.data_type() != expected {
                return Err(GraphError::execution(
                    &step.describe(),
                    format!("produced {:?}, plan expects {expected:?}", output.data_type()),
                ));
            }
            values[step.output] = Some(Cow::Owned(output));
        }

        let mut take = |id: usize| {
            values[id]
                .take()
                .map(Cow::into_owned)
                .ok_or_else(|| GraphError::execution("outputs", format!("slot %{id} was never computed")))
        };
        let label = take(plan.label_slot())?;
        let score = take(plan.score_slot())?;
        trace!(batch = input.shape()[0], backend = %self.backend(), "prediction finished");
        Ok(Prediction { label, score })
    }

    fn check_input(&self, input: &Tensor) -> Result<(), GraphError> {
        let plan = &*self.plan;
        let features = plan.feature_count();
        if input.shape().len() != 2 || input.shape()[1] != features {
            return Err(GraphError::ShapeMismatch {
                input: plan.input_name().to_string(),
                expected: format!("[batch, {features}]"),
                actual: input.shape().to_vec(),
            });
        }
        if input.data_type() != plan.precision() {
            return Err(GraphError::DataTypeMismatch {
                input: plan.input_name().to_string(),
                expected: plan.precision(),
                actual: input.data_type(),
            });
        }
        Ok(())
    }
}
