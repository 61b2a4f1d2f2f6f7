//! Multi-agent ensemble predictor
//!
//! Every loaded agent scores every row; disagreements are resolved with a
//! priority rule: one attack verdict from any agent outranks all benign
//! verdicts for that row, and among attack verdicts the highest confidence
//! wins. Agents that fail to score a batch are skipped without affecting
//! the others.

use tracing::{debug, warn};

use super::features::FlowFeatures;
use super::model::ClassLabel;
use super::registry::{AgentRegistry, ModelAgent};

/// Default label/confidence/agent before any agent has spoken
pub const BENIGN_LABEL: &str = "BENIGN";
const NO_AGENT: &str = "none";

/// Final verdict for one row
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Maximum posterior probability, or 1.0 for classifiers without one
    pub confidence: f64,
    /// Display name of the contributing agent, `"none"` if no agent ran
    pub agent: String,
}

impl Prediction {
    fn benign_default() -> Self {
        Self {
            label: BENIGN_LABEL.to_string(),
            confidence: 1.0,
            agent: NO_AGENT.to_string(),
        }
    }

    pub fn is_malicious(&self) -> bool {
        self.label != BENIGN_LABEL
    }
}

/// Normalized single-agent verdict, decoded from the raw class label
struct Verdict {
    is_attack: bool,
    label: String,
}

/// Decode one raw prediction into an attack/benign verdict.
///
/// Numeric encodings are binary per dataset: non-zero means attack and the
/// agent's key names the attack family. Text labels are attacks unless
/// they contain "BENIGN" (case-insensitive).
fn normalize_label(raw: &ClassLabel, agent_key: &str) -> Verdict {
    match raw {
        ClassLabel::Id(id) => {
            if *id != 0 {
                Verdict { is_attack: true, label: agent_key.to_string() }
            } else {
                Verdict { is_attack: false, label: BENIGN_LABEL.to_string() }
            }
        }
        ClassLabel::Text(s) => {
            let trimmed = s.trim();
            if trimmed.to_uppercase().contains(BENIGN_LABEL) {
                Verdict { is_attack: false, label: BENIGN_LABEL.to_string() }
            } else {
                Verdict { is_attack: true, label: trimmed.to_string() }
            }
        }
    }
}

/// Ensemble over all loaded model agents
pub struct EnsemblePredictor {
    registry: AgentRegistry,
}

impl EnsemblePredictor {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Score a batch of feature vectors, one independent result per row.
    ///
    /// With no agents loaded (after a lazy reload attempt) every row is
    /// benign with confidence 1.0 — detection degrades, the service stays
    /// up.
    pub fn predict(&mut self, rows: &[FlowFeatures]) -> Vec<Prediction> {
        if self.registry.is_empty() {
            self.registry.reload();
        }

        let mut results = vec![Prediction::benign_default(); rows.len()];
        let mut attack_flag = vec![false; rows.len()];

        for agent in self.registry.iter() {
            match score_agent(agent, rows) {
                Ok(scored) => {
                    for (i, (raw, confidence)) in scored.into_iter().enumerate() {
                        let verdict = normalize_label(&raw, &agent.key);
                        if verdict.is_attack {
                            if !attack_flag[i] || confidence > results[i].confidence {
                                results[i] = Prediction {
                                    label: verdict.label,
                                    confidence,
                                    agent: agent.display_name.clone(),
                                };
                                attack_flag[i] = true;
                            }
                        } else if !attack_flag[i]
                            && (confidence > results[i].confidence || results[i].agent == NO_AGENT)
                        {
                            results[i] = Prediction {
                                label: verdict.label,
                                confidence,
                                agent: agent.display_name.clone(),
                            };
                        }
                    }
                }
                Err(e) => {
                    warn!("agent '{}' failed on this batch, skipping: {}", agent.key, e);
                }
            }
        }

        debug!(
            "scored {} row(s) with {} agent(s)",
            rows.len(),
            self.registry.len()
        );
        results
    }
}

/// Run one agent over the batch: reindex, sanitize, scale, classify.
/// Returns the raw label and confidence per row.
fn score_agent(
    agent: &ModelAgent,
    rows: &[FlowFeatures],
) -> anyhow::Result<Vec<(ClassLabel, f64)>> {
    let mut matrix = preprocess(rows, agent);
    agent.scaler.transform(&mut matrix)?;

    let labels = agent.classifier.predict(&matrix)?;
    let confidences: Vec<f64> = match agent.classifier.predict_proba(&matrix)? {
        Some(probs) => probs
            .iter()
            .map(|p| p.iter().copied().fold(0.0, f64::max))
            .collect(),
        None => vec![1.0; rows.len()],
    };

    Ok(labels.into_iter().zip(confidences).collect())
}

/// Reindex each row to the agent's expected feature order, synthesizing 0
/// for columns the row does not carry and coercing NaN/inf to 0.
fn preprocess(rows: &[FlowFeatures], agent: &ModelAgent) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| {
            agent
                .expected_features
                .iter()
                .map(|name| {
                    let v = row.get(name).unwrap_or(0.0);
                    if v.is_finite() { v } else { 0.0 }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flow::Flow;
    use crate::core::packet::{IpProtocol, PacketRecord};
    use crate::ml::model::{
        ClassLabel, Classifier, DecisionTree, LinearClassifier, RandomForest, StandardScaler,
        TreeNode,
    };
    use crate::ml::registry::{write_artifacts, AgentRegistry};
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::Path;

    fn sample_rows(n: usize) -> Vec<FlowFeatures> {
        (0..n)
            .map(|i| {
                let pkt = PacketRecord {
                    src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                    dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                    src_port: 40000 + i as u16,
                    dst_port: 80,
                    protocol: IpProtocol::Tcp,
                    length: 100,
                    flags: None,
                    header_len: 0,
                    window: 0,
                    payload_len: 0,
                    ts: 0.0,
                };
                let mut flow = Flow::new(&pkt);
                flow.add_packet(&pkt);
                FlowFeatures::from_flow(&flow, None)
            })
            .collect()
    }

    /// Constant forest: always predicts `classes[1]` with the given
    /// confidence (single leaf, two classes)
    fn constant_attack_forest(confidence: f64, classes: Vec<ClassLabel>) -> Classifier {
        Classifier::Forest(RandomForest {
            trees: vec![DecisionTree {
                nodes: vec![TreeNode::Leaf {
                    distribution: vec![1.0 - confidence, confidence],
                }],
            }],
            classes,
        })
    }

    /// Constant forest predicting `classes[0]` with the given confidence
    fn constant_benign_forest(confidence: f64, classes: Vec<ClassLabel>) -> Classifier {
        Classifier::Forest(RandomForest {
            trees: vec![DecisionTree {
                nodes: vec![TreeNode::Leaf {
                    distribution: vec![confidence, 1.0 - confidence],
                }],
            }],
            classes,
        })
    }

    fn install(root: &Path, key: &str, classifier: Classifier) {
        write_artifacts(
            root,
            key,
            &classifier,
            &StandardScaler::identity(2),
            &["Flow Duration".to_string(), "Total Fwd Packets".to_string()],
        )
        .unwrap();
    }

    #[test]
    fn test_empty_registry_defaults_benign() {
        let mut predictor = EnsemblePredictor::new(AgentRegistry::load("/nonexistent"));
        let rows = sample_rows(3);
        let results = predictor.predict(&rows);

        assert_eq!(results.len(), 3);
        for r in results {
            assert_eq!(r.label, "BENIGN");
            assert_eq!(r.confidence, 1.0);
            assert_eq!(r.agent, "none");
            assert!(!r.is_malicious());
        }
    }

    #[test]
    fn test_attack_outranks_benign_regardless_of_confidence() {
        let tmp = tempfile::tempdir().unwrap();
        // DDoS flags an attack at 0.9; PortScan says benign at 0.99
        install(
            tmp.path(),
            "DDoS",
            constant_attack_forest(0.9, vec![ClassLabel::Id(0), ClassLabel::Id(1)]),
        );
        install(
            tmp.path(),
            "PortScan",
            constant_benign_forest(0.99, vec![ClassLabel::Id(0), ClassLabel::Id(1)]),
        );

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(2));

        for r in results {
            assert_eq!(r.label, "DDoS");
            assert!((r.confidence - 0.9).abs() < 1e-9);
            assert_eq!(r.agent, "DDoS_BEST_RF");
            assert!(r.is_malicious());
        }
    }

    #[test]
    fn test_higher_confidence_attack_wins() {
        let tmp = tempfile::tempdir().unwrap();
        install(
            tmp.path(),
            "Botnet",
            constant_attack_forest(0.7, vec![ClassLabel::Id(0), ClassLabel::Id(1)]),
        );
        install(
            tmp.path(),
            "WebAttack",
            constant_attack_forest(0.95, vec![ClassLabel::Id(0), ClassLabel::Id(1)]),
        );

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(1));

        assert_eq!(results[0].label, "WebAttack");
        assert!((results[0].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_text_labels_kept_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        install(
            tmp.path(),
            "Mixed",
            constant_attack_forest(
                0.8,
                vec![
                    ClassLabel::Text("BENIGN".into()),
                    ClassLabel::Text("DoS Hulk".into()),
                ],
            ),
        );

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(1));
        // Text attack labels pass through, not the agent key
        assert_eq!(results[0].label, "DoS Hulk");
    }

    #[test]
    fn test_benign_text_label_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        install(
            tmp.path(),
            "Calm",
            constant_benign_forest(
                0.6,
                vec![
                    ClassLabel::Text("benign traffic".into()),
                    ClassLabel::Text("DoS".into()),
                ],
            ),
        );

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(1));
        assert_eq!(results[0].label, "BENIGN");
        // Default confidence 1.0 is replaced because the record was untouched
        assert!((results[0].confidence - 0.6).abs() < 1e-9);
        assert_eq!(results[0].agent, "Calm_BEST_RF");
    }

    #[test]
    fn test_linear_agent_confidence_is_one() {
        let tmp = tempfile::tempdir().unwrap();
        let linear = Classifier::Linear(LinearClassifier {
            weights: vec![vec![0.0, 0.0], vec![1.0, 1.0]],
            bias: vec![0.0, 1.0],
            classes: vec![ClassLabel::Id(0), ClassLabel::Id(1)],
        });
        write_artifacts(
            tmp.path(),
            "Linear",
            &linear,
            &StandardScaler::identity(2),
            &["Flow Duration".to_string(), "Total Fwd Packets".to_string()],
        )
        .unwrap();

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(1));
        assert_eq!(results[0].label, "Linear");
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn test_failing_agent_does_not_poison_batch() {
        let tmp = tempfile::tempdir().unwrap();
        // Broken agent: scaler width disagrees with its feature list
        write_artifacts(
            tmp.path(),
            "Broken",
            &constant_attack_forest(0.99, vec![ClassLabel::Id(0), ClassLabel::Id(1)]),
            &StandardScaler::identity(5),
            &["Flow Duration".to_string(), "Total Fwd Packets".to_string()],
        )
        .unwrap();
        install(
            tmp.path(),
            "Working",
            constant_attack_forest(0.8, vec![ClassLabel::Id(0), ClassLabel::Id(1)]),
        );

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(1));
        assert_eq!(results[0].label, "Working");
        assert!((results[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_values_coerced_to_zero() {
        let tmp = tempfile::tempdir().unwrap();
        // Splits on Flow Duration: <= 0.5 benign, above attack. NaN would
        // fail the comparison and fall on the attack side if it leaked
        // through preprocessing.
        let classifier = Classifier::Forest(RandomForest {
            trees: vec![DecisionTree {
                nodes: vec![
                    TreeNode::Split { feature: 0, threshold: 0.5, left: 1, right: 2 },
                    TreeNode::Leaf { distribution: vec![1.0, 0.0] },
                    TreeNode::Leaf { distribution: vec![0.0, 1.0] },
                ],
            }],
            classes: vec![ClassLabel::Id(0), ClassLabel::Id(1)],
        });
        write_artifacts(
            tmp.path(),
            "Gauge",
            &classifier,
            &StandardScaler::identity(1),
            &["Flow Duration".to_string()],
        )
        .unwrap();

        let duration_idx = crate::ml::features::FEATURE_COLUMNS
            .iter()
            .position(|&c| c == "Flow Duration")
            .unwrap();
        let row = |v: f64| {
            let mut values = vec![0.0; crate::ml::features::NUM_FEATURES];
            values[duration_idx] = v;
            FlowFeatures::from_raw(values)
        };

        let rows = vec![
            row(f64::NAN),
            row(f64::INFINITY),
            row(f64::NEG_INFINITY),
            row(1.0),
        ];
        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&rows);

        // Non-finite inputs behave as 0 and land on the benign side
        assert_eq!(results[0].label, "BENIGN");
        assert_eq!(results[1].label, "BENIGN");
        assert_eq!(results[2].label, "BENIGN");
        // A genuine value still routes through the split
        assert_eq!(results[3].label, "Gauge");
    }

    #[test]
    fn test_unknown_features_synthesized_zero() {
        let tmp = tempfile::tempdir().unwrap();
        // Splits on a column no flow carries: value 0 routes left => benign
        let classifier = Classifier::Forest(RandomForest {
            trees: vec![DecisionTree {
                nodes: vec![
                    TreeNode::Split { feature: 0, threshold: 0.5, left: 1, right: 2 },
                    TreeNode::Leaf { distribution: vec![1.0, 0.0] },
                    TreeNode::Leaf { distribution: vec![0.0, 1.0] },
                ],
            }],
            classes: vec![ClassLabel::Id(0), ClassLabel::Id(1)],
        });
        write_artifacts(
            tmp.path(),
            "Exotic",
            &classifier,
            &StandardScaler::identity(1),
            &["Totally Unknown Column".to_string()],
        )
        .unwrap();

        let mut predictor = EnsemblePredictor::new(AgentRegistry::load(tmp.path()));
        let results = predictor.predict(&sample_rows(1));
        assert_eq!(results[0].label, "BENIGN");
    }
}
