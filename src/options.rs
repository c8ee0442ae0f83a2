use std::collections::HashSet;

use crate::tensor::DataType;

/// Layout of the score output for binary classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryScore {
    /// `[batch]` probability of the positive class
    #[default]
    Positive,
    /// `[batch, 2]` rows of `[1 - p, p]`
    TwoColumn,
}

#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Upper bound on the element count of any folded initializer.
    pub constant_element_limit: usize,
    /// Element types accepted for the feature input. Non-float entries are ignored.
    pub allowed_input_types: HashSet<DataType>,
    pub binary_score: BinaryScore,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            constant_element_limit: 64 * 1024 * 1024,
            allowed_input_types: [DataType::Float32, DataType::Float64]
                .into_iter()
                .collect(),
            binary_score: BinaryScore::Positive,
        }
    }
}

impl ConversionOptions {
    pub fn with_binary_score(mut self, binary_score: BinaryScore) -> Self {
        self.binary_score = binary_score;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_accept_float_inputs_only() {
        let options = ConversionOptions::default();
        assert!(options.allowed_input_types.contains(&DataType::Float32));
        assert!(options.allowed_input_types.contains(&DataType::Float64));
        assert!(!options.allowed_input_types.contains(&DataType::Int64));
        assert_eq!(options.binary_score, BinaryScore::Positive);
        assert_eq!(options.constant_element_limit, 64 * 1024 * 1024);
    }
}
