//! Classifier and scaler artifacts
//!
//! Models are exported by the offline training pipeline as bincode blobs.
//! The predictor only sees the capability surface: `predict` (with optional
//! posterior probabilities) and the scaler's `transform`. Two encodings are
//! supported: array-encoded decision forests (with class distributions at
//! the leaves) and linear scorers (argmax only, no probabilities).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("feature index {index} out of bounds for row of width {width}")]
    FeatureIndex { index: usize, width: usize },
    #[error("expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("tree node reference {0} out of bounds")]
    BadNodeRef(usize),
    #[error("classifier has no trees")]
    EmptyForest,
    #[error("empty class distribution")]
    EmptyDistribution,
}

/// Class label as trained: either a numeric class id or a text label.
///
/// Decoded into a normalized attack/benign verdict at the predictor
/// boundary; nothing downstream branches on the encoding again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassLabel {
    Id(i64),
    Text(String),
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassLabel::Id(id) => write!(f, "{}", id),
            ClassLabel::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One node of an array-encoded decision tree (root at index 0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Per-class sample counts or probabilities; normalized on use
        distribution: Vec<f64>,
    },
}

/// A single decision tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walk the tree for one row, returning the leaf distribution
    fn leaf_distribution(&self, row: &[f64]) -> Result<&[f64], ModelError> {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx).ok_or(ModelError::BadNodeRef(idx))? {
                TreeNode::Split { feature, threshold, left, right } => {
                    let value = *row.get(*feature).ok_or(ModelError::FeatureIndex {
                        index: *feature,
                        width: row.len(),
                    })?;
                    idx = if value <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { distribution } => return Ok(distribution),
            }
        }
    }
}

/// Forest of decision trees with posterior probabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<DecisionTree>,
    pub classes: Vec<ClassLabel>,
}

impl RandomForest {
    /// Average of per-tree normalized leaf distributions
    fn proba_row(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::EmptyForest);
        }
        let mut acc = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let dist = tree.leaf_distribution(row)?;
            if dist.is_empty() || dist.len() != acc.len() {
                return Err(ModelError::EmptyDistribution);
            }
            let total: f64 = dist.iter().sum();
            let norm = if total > 0.0 { total } else { 1.0 };
            for (a, d) in acc.iter_mut().zip(dist) {
                *a += d / norm;
            }
        }
        let n = self.trees.len() as f64;
        for a in &mut acc {
            *a /= n;
        }
        Ok(acc)
    }
}

/// Linear one-vs-rest scorer; argmax decision, no calibrated probabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearClassifier {
    /// One weight vector per class
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub classes: Vec<ClassLabel>,
}

impl LinearClassifier {
    fn scores_row(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        let mut scores = Vec::with_capacity(self.weights.len());
        for (w, b) in self.weights.iter().zip(&self.bias) {
            if w.len() != row.len() {
                return Err(ModelError::DimensionMismatch {
                    expected: w.len(),
                    got: row.len(),
                });
            }
            scores.push(w.iter().zip(row).map(|(wi, xi)| wi * xi).sum::<f64>() + b);
        }
        Ok(scores)
    }
}

/// Opaque trained classifier as loaded from a model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Classifier {
    Forest(RandomForest),
    Linear(LinearClassifier),
}

impl Classifier {
    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::Forest(_) => "forest",
            Classifier::Linear(_) => "linear",
        }
    }

    pub fn classes(&self) -> &[ClassLabel] {
        match self {
            Classifier::Forest(f) => &f.classes,
            Classifier::Linear(l) => &l.classes,
        }
    }

    /// Predicted class label per row (argmax)
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<ClassLabel>, ModelError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let scores = match self {
                Classifier::Forest(f) => f.proba_row(row)?,
                Classifier::Linear(l) => l.scores_row(row)?,
            };
            let best = argmax(&scores).ok_or(ModelError::EmptyDistribution)?;
            let label = self
                .classes()
                .get(best)
                .ok_or(ModelError::EmptyDistribution)?;
            out.push(label.clone());
        }
        Ok(out)
    }

    /// Posterior probabilities per row, `None` when the classifier does
    /// not expose them (linear scorers)
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
        match self {
            Classifier::Forest(f) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.push(f.proba_row(row)?);
                }
                Ok(Some(out))
            }
            Classifier::Linear(_) => Ok(None),
        }
    }
}

fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, bv)) if v <= bv => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Standard (z-score) feature scaler fit by the training pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Identity scaler of the given width
    pub fn identity(width: usize) -> Self {
        Self {
            mean: vec![0.0; width],
            scale: vec![1.0; width],
        }
    }

    /// Transform rows in place. Zero scale entries behave as 1 so that
    /// constant (placeholder) columns pass through untouched.
    pub fn transform(&self, rows: &mut [Vec<f64>]) -> Result<(), ModelError> {
        for row in rows.iter_mut() {
            if row.len() != self.mean.len() {
                return Err(ModelError::DimensionMismatch {
                    expected: self.mean.len(),
                    got: row.len(),
                });
            }
            for ((x, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                let divisor = if *s != 0.0 { *s } else { 1.0 };
                *x = (*x - m) / divisor;
            }
        }
        Ok(())
    }
}
