//! Flow reconstruction engine
//!
//! Groups decoded packets into bidirectional flows keyed by the sorted
//! endpoint pair plus protocol, and evicts flows after an idle timeout so
//! they can be handed to feature derivation.

pub mod table;

pub use table::{FlowTable, TableStats};

use serde::{Deserialize, Serialize};

// Re-export core flow types
pub use crate::core::{Flow, FlowKey};

/// Configuration for flow reconstruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Seconds of silence before a flow is considered finished
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: f64,

    /// Seconds between periodic timeout sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: f64,

    /// Also sweep opportunistically on every ingested packet,
    /// using the packet's own timestamp as the clock
    #[serde(default = "default_inline_sweep")]
    pub inline_sweep: bool,
}

fn default_idle_timeout() -> f64 {
    10.0
}

fn default_sweep_interval() -> f64 {
    2.0
}

fn default_inline_sweep() -> bool {
    true
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
            inline_sweep: default_inline_sweep(),
        }
    }
}
