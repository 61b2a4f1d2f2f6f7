//! ML-based traffic classification
//!
//! Finished flows are turned into fixed-width feature vectors and scored
//! by an ensemble of independently trained model agents. Artifacts are
//! produced offline and discovered from a directory tree at startup.

pub mod features;
pub mod model;
pub mod predictor;
pub mod registry;

pub use features::{FlowFeatures, FEATURE_COLUMNS, LABEL_COLUMN, NUM_FEATURES};
pub use model::{ClassLabel, Classifier, StandardScaler};
pub use predictor::{EnsemblePredictor, Prediction};
pub use registry::{AgentRegistry, ModelAgent};

use serde::{Deserialize, Serialize};

/// Configuration for the prediction layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    /// Directory holding one subdirectory of artifacts per agent
    #[serde(default = "default_models_root")]
    pub models_root: String,
}

fn default_models_root() -> String {
    "/var/lib/flowsense/models".to_string()
}

impl Default for MlConfig {
    fn default() -> Self {
        Self { models_root: default_models_root() }
    }
}
