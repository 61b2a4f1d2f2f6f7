//! Flow-based network intrusion detection
//!
//! Packets become bidirectional flows, idle flows become fixed-width
//! feature vectors, and an ensemble of trained model agents scores each
//! vector. Attack verdicts outrank benign ones; the highest-confidence
//! attack wins.

pub mod capture;
pub mod config;
pub mod core;
pub mod engine;
pub mod export;
pub mod flow;
pub mod ml;
pub mod sink;

pub use config::Config;
pub use engine::{Engine, EngineHandle, EngineReport};
pub use sink::{Detection, DetectionSink, LogSink};
