//! Model abstraction as seen by callbacks.

/// A trainable model.
pub trait Model {
    /// Type name recorded with the run.
    fn class_name(&self) -> String;

    /// Human-readable structure of the model, if it has one.
    fn summary(&self) -> Option<String>;

    /// Serialized weights written to checkpoints.
    fn state_bytes(&self) -> Vec<u8>;
}

/// A layer of a [`SequentialModel`].
#[derive(Debug, Clone)]
pub struct Layer {
    pub kind: String,
    pub in_features: usize,
    pub out_features: usize,
}

impl Layer {
    pub fn linear(in_features: usize, out_features: usize) -> Self {
        Self {
            kind: "Linear".to_string(),
            in_features,
            out_features,
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.in_features * self.out_features + self.out_features
    }
}

/// A feed-forward stack of layers.
#[derive(Debug, Clone)]
pub struct SequentialModel {
    pub layers: Vec<Layer>,
    pub weights: Vec<f32>,
}

impl SequentialModel {
    pub fn new(layers: Vec<Layer>) -> Self {
        let n: usize = layers.iter().map(Layer::parameter_count).sum();
        Self {
            layers,
            weights: vec![0.0; n],
        }
    }

    /// A two-layer perceptron `in -> hidden -> out`.
    pub fn mlp(in_features: usize, hidden: usize, out_features: usize) -> Self {
        Self::new(vec![
            Layer::linear(in_features, hidden),
            Layer::linear(hidden, out_features),
        ])
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len()
    }
}

impl Model for SequentialModel {
    fn class_name(&self) -> String {
        "SequentialModel".to_string()
    }

    fn summary(&self) -> Option<String> {
        let mut out = String::from("SequentialModel(\n");
        for (i, layer) in self.layers.iter().enumerate() {
            out.push_str(&format!(
                "  ({i}): {}(in_features={}, out_features={})\n",
                layer.kind, layer.in_features, layer.out_features
            ));
        }
        out.push(')');
        Some(out)
    }

    fn state_bytes(&self) -> Vec<u8> {
        self.weights.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlp_summary() {
        let model = SequentialModel::mlp(4, 8, 2);
        assert_eq!(model.parameter_count(), 4 * 8 + 8 + 8 * 2 + 2);
        let summary = model.summary().unwrap();
        assert!(summary.starts_with("SequentialModel(\n"));
        assert!(summary.contains("(1): Linear(in_features=8, out_features=2)"));
    }

    #[test]
    fn test_state_bytes_length() {
        let model = SequentialModel::mlp(2, 2, 1);
        assert_eq!(model.state_bytes().len(), model.parameter_count() * 4);
    }
}
