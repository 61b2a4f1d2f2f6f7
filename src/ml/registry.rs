//! Model agent discovery and loading
//!
//! The artifact convention is one subdirectory per dataset/agent under a
//! configured root. Each directory must hold exactly one classifier blob
//! (`*_BEST_*.bin`), one scaler (`*_scaler.bin`) and one feature list
//! (`*_features.json`). Incomplete or unreadable directories are skipped;
//! loading never fails the process.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::model::{Classifier, StandardScaler};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("missing {0} artifact")]
    MissingArtifact(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode artifact: {0}")]
    Decode(String),
}

/// One independently trained (classifier, scaler, feature-list) triple
#[derive(Debug, Clone)]
pub struct ModelAgent {
    /// Directory name; doubles as the attack-family label for numeric
    /// class encodings
    pub key: String,
    /// Classifier file stem, reported as the contributing agent
    pub display_name: String,
    pub classifier: Classifier,
    pub scaler: StandardScaler,
    /// Feature names in the order the classifier was trained on
    pub expected_features: Vec<String>,
}

/// Registry of loaded model agents, keyed by directory name.
///
/// Immutable after load and iterated in deterministic (sorted) order.
pub struct AgentRegistry {
    root: PathBuf,
    agents: BTreeMap<String, ModelAgent>,
}

impl AgentRegistry {
    /// Scan the root directory and load every complete agent.
    ///
    /// A missing root yields an empty registry; per-directory failures
    /// are logged and skipped.
    pub fn load<P: AsRef<Path>>(root: P) -> Self {
        let mut registry = Self {
            root: root.as_ref().to_path_buf(),
            agents: BTreeMap::new(),
        };
        registry.reload();
        registry
    }

    /// Re-scan the root, replacing the current agent set
    pub fn reload(&mut self) {
        self.agents.clear();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("model root {:?} unavailable: {}", self.root, e);
                return;
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().to_string();
            match load_agent(&dir, &key) {
                Ok(agent) => {
                    info!(
                        "loaded agent '{}' ({}, {} features)",
                        key,
                        agent.classifier.kind(),
                        agent.expected_features.len()
                    );
                    self.agents.insert(key, agent);
                }
                Err(e) => {
                    warn!("skipping agent '{}': {}", key, e);
                }
            }
        }

        info!("agent registry ready: {} agent(s) active", self.agents.len());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ModelAgent> {
        self.agents.get(key)
    }

    /// Agents in deterministic iteration order
    pub fn iter(&self) -> impl Iterator<Item = &ModelAgent> {
        self.agents.values()
    }
}

fn load_agent(dir: &Path, key: &str) -> Result<ModelAgent, AgentError> {
    let model_path = find_artifact(dir, |name| name.contains("_BEST_") && name.ends_with(".bin"))?
        .ok_or(AgentError::MissingArtifact("classifier"))?;
    let scaler_path = find_artifact(dir, |name| name.ends_with("_scaler.bin"))?
        .ok_or(AgentError::MissingArtifact("scaler"))?;
    let features_path = find_artifact(dir, |name| name.ends_with("_features.json"))?
        .ok_or(AgentError::MissingArtifact("feature list"))?;

    let classifier: Classifier = read_bincode(&model_path)?;
    let scaler: StandardScaler = read_bincode(&scaler_path)?;
    let expected_features: Vec<String> = read_json(&features_path)?;

    let display_name = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| key.to_string());

    Ok(ModelAgent {
        key: key.to_string(),
        display_name,
        classifier,
        scaler,
        expected_features,
    })
}

/// First file (sorted by name) in `dir` whose name matches the predicate
fn find_artifact(
    dir: &Path,
    matches: impl Fn(&str) -> bool,
) -> Result<Option<PathBuf>, AgentError> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| matches(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T, AgentError> {
    let mut reader = BufReader::new(File::open(path)?);
    bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
        .map_err(|e| AgentError::Decode(e.to_string()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AgentError> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| AgentError::Decode(e.to_string()))
}

/// Write a complete artifact triple into the discovery convention.
///
/// This is the consumer side of the retraining boundary: an external
/// trainer produces the triple, this helper lays it out so the next
/// registry load picks it up.
pub fn write_artifacts(
    root: &Path,
    key: &str,
    classifier: &Classifier,
    scaler: &StandardScaler,
    features: &[String],
) -> Result<PathBuf, AgentError> {
    let dir = root.join(key);
    std::fs::create_dir_all(&dir)?;

    write_bincode(&dir.join(format!("{key}_BEST_RF.bin")), classifier)?;
    write_bincode(&dir.join(format!("{key}_scaler.bin")), scaler)?;

    let features_file = File::create(dir.join(format!("{key}_features.json")))?;
    serde_json::to_writer(BufWriter::new(features_file), features)
        .map_err(|e| AgentError::Decode(e.to_string()))?;

    Ok(dir)
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<(), AgentError> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serde::encode_into_std_write(value, &mut writer, bincode::config::standard())
        .map_err(|e| AgentError::Decode(e.to_string()))?;
    Ok(())
}
