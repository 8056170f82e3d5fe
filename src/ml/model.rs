use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, PredictionError};

/// Serialized classifier, as written by the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    /// Logistic regression over the (scaled) feature vector
    Logistic {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    /// Boosted binary trees; probability = sigmoid(base_score + sum of leaves)
    TreeEnsemble {
        n_features: usize,
        #[serde(default)]
        base_score: f64,
        trees: Vec<DecisionTree>,
    },
}

impl Classifier {
    /// Number of inputs the classifier was fitted on.
    pub fn n_features(&self) -> usize {
        match self {
            Classifier::Logistic { coefficients, .. } => coefficients.len(),
            Classifier::TreeEnsemble { n_features, .. } => *n_features,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::Logistic { .. } => "logistic",
            Classifier::TreeEnsemble { .. } => "tree_ensemble",
        }
    }

    /// Structural checks run once at load time so inference can't loop or index out of range.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        match self {
            Classifier::Logistic { coefficients, intercept } => {
                if coefficients.is_empty() {
                    return Err(corrupt("logistic model has no coefficients"));
                }
                if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
                    return Err(corrupt("logistic model has non-finite weights"));
                }
                Ok(())
            }
            Classifier::TreeEnsemble { n_features, base_score, trees } => {
                if trees.is_empty() {
                    return Err(corrupt("tree ensemble contains no trees"));
                }
                if !base_score.is_finite() {
                    return Err(corrupt("tree ensemble base_score is not finite"));
                }
                for (idx, tree) in trees.iter().enumerate() {
                    tree.validate(*n_features)
                        .map_err(|reason| corrupt(&format!("tree {}: {}", idx, reason)))?;
                }
                Ok(())
            }
        }
    }

    /// Probability of the positive class for an already-scaled input.
    pub fn predict_probability(&self, input: ArrayView1<f64>) -> Result<f64, PredictionError> {
        if input.len() != self.n_features() {
            return Err(PredictionError::ShapeMismatch {
                expected: self.n_features(),
                actual: input.len(),
            });
        }

        let logit = match self {
            Classifier::Logistic { coefficients, intercept } => {
                let weights = ArrayView1::from(coefficients.as_slice());
                weights.dot(&input) + intercept
            }
            Classifier::TreeEnsemble { base_score, trees, .. } => {
                let features = input.to_vec();
                base_score + trees.iter().map(|t| t.predict(&features)).sum::<f64>()
            }
        };

        let probability = sigmoid(logit);
        if probability.is_finite() {
            Ok(probability)
        } else {
            Err(PredictionError::NonFinite)
        }
    }
}

/// One regression tree in LightGBM's flat layout.
///
/// Internal node `i` splits on `split_features[i]` at `thresholds[i]`; a child
/// index `>= 0` points to another internal node, a negative child `c` points to
/// leaf `-(c + 1)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub split_features: Vec<usize>,
    pub thresholds: Vec<f64>,
    pub left_child: Vec<i32>,
    pub right_child: Vec<i32>,
    pub leaf_values: Vec<f64>,
    #[serde(default = "default_shrinkage")]
    pub shrinkage: f64,
}

fn default_shrinkage() -> f64 {
    1.0
}

impl DecisionTree {
    fn validate(&self, n_features: usize) -> Result<(), String> {
        let internal = self.split_features.len();
        if self.thresholds.len() != internal
            || self.left_child.len() != internal
            || self.right_child.len() != internal
        {
            return Err("split/child/threshold length mismatch".to_string());
        }
        if self.leaf_values.is_empty() {
            return Err("no leaves".to_string());
        }
        if let Some(f) = self.split_features.iter().find(|f| **f >= n_features) {
            return Err(format!("split on feature {} outside input width {}", f, n_features));
        }
        let leaves = self.leaf_values.len();
        for child in self.left_child.iter().chain(self.right_child.iter()) {
            let in_range = if *child >= 0 {
                (*child as usize) < internal
            } else {
                leaf_index(*child) < leaves
            };
            if !in_range {
                return Err(format!("child index {} out of range", child));
            }
        }
        // Children must point forward, which rules out cycles.
        for (node, (l, r)) in self.left_child.iter().zip(self.right_child.iter()).enumerate() {
            if (*l >= 0 && (*l as usize) <= node) || (*r >= 0 && (*r as usize) <= node) {
                return Err(format!("node {} links backwards", node));
            }
        }
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values[0] * self.shrinkage;
        }

        let mut node = 0usize;
        loop {
            let value = features[self.split_features[node]];
            let child = if value <= self.thresholds[node] {
                self.left_child[node]
            } else {
                self.right_child[node]
            };

            if child < 0 {
                return self.leaf_values[leaf_index(child)] * self.shrinkage;
            }
            node = child as usize;
        }
    }
}

/// Leaf slot for a negative child link; widened so `i32::MIN` cannot overflow.
fn leaf_index(child: i32) -> usize {
    (-(child as i64) - 1) as usize
}

/// Per-column standardization fitted alongside the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.mean.len() != self.scale.len() {
            return Err(corrupt("scaler mean/scale length mismatch"));
        }
        if self.mean.iter().chain(self.scale.iter()).any(|v| !v.is_finite()) {
            return Err(corrupt("scaler contains non-finite values"));
        }
        Ok(())
    }

    pub fn transform(&self, input: &Array1<f64>) -> Result<Array1<f64>, PredictionError> {
        if input.len() != self.n_features() {
            return Err(PredictionError::ShapeMismatch {
                expected: self.n_features(),
                actual: input.len(),
            });
        }

        let mean = ArrayView1::from(self.mean.as_slice());
        // Zero-variance columns were constant in training; leave them centered.
        let scale = Array1::from_iter(
            self.scale.iter().map(|s| if s.abs() > 1e-12 { *s } else { 1.0 }),
        );
        Ok((input - &mean) / &scale)
    }
}

fn corrupt(reason: &str) -> ArtifactError {
    ArtifactError::Corrupt { reason: reason.to_string() }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> DecisionTree {
        DecisionTree {
            split_features: vec![feature],
            thresholds: vec![threshold],
            left_child: vec![-1],
            right_child: vec![-2],
            leaf_values: vec![left, right],
            shrinkage: 1.0,
        }
    }

    #[test]
    fn test_logistic_probability() {
        let model = Classifier::Logistic {
            coefficients: vec![1.0, -1.0],
            intercept: 0.0,
        };
        let p = model.predict_probability(array![2.0, 2.0].view()).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
        let p = model.predict_probability(array![3.0, 0.0].view()).unwrap();
        assert!(p > 0.9);
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let model = Classifier::Logistic {
            coefficients: vec![1.0; 3],
            intercept: 0.0,
        };
        let err = model.predict_probability(array![1.0, 2.0].view()).unwrap_err();
        assert!(matches!(err, PredictionError::ShapeMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn test_tree_ensemble_sums_leaves() {
        let model = Classifier::TreeEnsemble {
            n_features: 2,
            base_score: 0.0,
            trees: vec![stump(0, 0.5, -1.0, 1.0), stump(1, 0.5, -0.5, 0.5)],
        };
        model.validate().unwrap();
        let high = model.predict_probability(array![1.0, 1.0].view()).unwrap();
        let low = model.predict_probability(array![0.0, 0.0].view()).unwrap();
        assert!(high > 0.8);
        assert!(low < 0.2);
    }

    #[test]
    fn test_tree_validation_rejects_cycles_and_bad_indices() {
        let mut looping = stump(0, 0.5, 0.0, 0.0);
        looping.left_child = vec![0];
        let model = Classifier::TreeEnsemble { n_features: 1, base_score: 0.0, trees: vec![looping] };
        assert!(model.validate().is_err());

        let wide = stump(5, 0.5, 0.0, 0.0);
        let model = Classifier::TreeEnsemble { n_features: 2, base_score: 0.0, trees: vec![wide] };
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_extreme_leaf_links_are_rejected() {
        let mut extreme = stump(0, 0.5, 0.0, 0.0);
        extreme.left_child = vec![i32::MIN];
        let model = Classifier::TreeEnsemble { n_features: 1, base_score: 0.0, trees: vec![extreme] };
        let err = model.validate().unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);

        let mut past_end = stump(0, 0.5, 0.0, 0.0);
        past_end.right_child = vec![-3];
        let model = Classifier::TreeEnsemble { n_features: 1, base_score: 0.0, trees: vec![past_end] };
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_scaler_transform_handles_zero_scale() {
        let scaler = StandardScaler {
            mean: vec![1.0, 2.0],
            scale: vec![2.0, 0.0],
        };
        let out = scaler.transform(&array![3.0, 5.0]).unwrap();
        assert_eq!(out, array![1.0, 3.0]);
    }

    #[test]
    fn test_classifier_json_format() {
        let json = r#"{"kind":"logistic","coefficients":[0.5,0.25],"intercept":-0.1}"#;
        let model: Classifier = serde_json::from_str(json).unwrap();
        assert_eq!(model.n_features(), 2);
        assert_eq!(model.kind(), "logistic");
    }
}
