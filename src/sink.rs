//! Detection output
//!
//! Scored flows become `Detection` records pushed through a sink. The
//! default sink writes structured log lines; tests swap in a collecting
//! sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::ml::{FlowFeatures, Prediction};

/// One scored flow, ready for downstream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub source_ip: String,
    pub destination_ip: String,
    /// `"<proto>/<dst_port>"`, e.g. `"6/443"`
    pub protocol: String,
    pub label: String,
    pub confidence: f64,
    /// Display name of the agent that produced the verdict
    pub agent: String,
    pub is_malicious: bool,
    pub detected_at: DateTime<Utc>,
}

impl Detection {
    pub fn from_prediction(features: &FlowFeatures, prediction: &Prediction) -> Self {
        Self {
            source_ip: features.src_ip.to_string(),
            destination_ip: features.dst_ip.to_string(),
            protocol: format!("{}/{}", features.protocol, features.dst_port),
            label: prediction.label.clone(),
            confidence: prediction.confidence,
            agent: prediction.agent.clone(),
            is_malicious: prediction.is_malicious(),
            detected_at: Utc::now(),
        }
    }
}

/// Consumer of detection records
pub trait DetectionSink: Send {
    fn emit(&mut self, detection: &Detection);
}

/// Sink that writes detections to the log stream.
///
/// Malicious verdicts above the severity threshold are errors, the rest
/// are warnings; benign flows are plain info lines.
pub struct LogSink {
    severity_threshold: f64,
}

impl LogSink {
    pub fn new() -> Self {
        Self { severity_threshold: 0.8 }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionSink for LogSink {
    fn emit(&mut self, d: &Detection) {
        if d.is_malicious {
            if d.confidence > self.severity_threshold {
                error!(
                    "ATTACK {} ({:.2}) {} -> {} [{}] agent={}",
                    d.label, d.confidence, d.source_ip, d.destination_ip, d.protocol, d.agent
                );
            } else {
                warn!(
                    "suspect {} ({:.2}) {} -> {} [{}] agent={}",
                    d.label, d.confidence, d.source_ip, d.destination_ip, d.protocol, d.agent
                );
            }
        } else {
            info!(
                "benign flow {} -> {} [{}] ({:.2})",
                d.source_ip, d.destination_ip, d.protocol, d.confidence
            );
        }
    }
}
