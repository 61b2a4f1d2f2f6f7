//! Flow hash table with idle-timeout eviction
//!
//! Active flows live in a HashMap keyed by the canonical endpoint pair.
//! A sweep moves flows idle longer than the timeout into a finished queue;
//! callers drain that queue and run analysis outside the table.

use std::collections::HashMap;

use tracing::trace;

use super::FlowConfig;
use crate::core::flow::{Flow, FlowKey};
use crate::core::packet::PacketRecord;

/// Table counters, monotonically increasing over the table's lifetime
#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub packets: u64,
    pub packets_dropped: u64,
    pub flows_created: u64,
    pub flows_expired: u64,
}

/// Hash table of active flows plus the queue of expired ones
pub struct FlowTable {
    flows: HashMap<FlowKey, Flow>,
    finished: Vec<Flow>,
    config: FlowConfig,
    pub stats: TableStats,
}

impl FlowTable {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            flows: HashMap::new(),
            finished: Vec::new(),
            config,
            stats: TableStats::default(),
        }
    }

    /// Route one packet into its flow, creating the flow on first sight.
    ///
    /// Packets without a TCP/UDP flow identity are dropped silently (only
    /// counted). When inline sweeping is enabled the packet's own timestamp
    /// drives expiry, which keeps replayed captures on capture time.
    pub fn ingest(&mut self, pkt: &PacketRecord) {
        if !pkt.has_flow_identity() {
            self.stats.packets_dropped += 1;
            return;
        }
        self.stats.packets += 1;

        let key = FlowKey::from_packet(pkt);
        let flow = self.flows.entry(key).or_insert_with(|| {
            self.stats.flows_created += 1;
            Flow::new(pkt)
        });
        flow.add_packet(pkt);

        if self.config.inline_sweep {
            self.sweep(pkt.ts);
        }
    }

    /// Move flows idle longer than the timeout to the finished queue.
    ///
    /// Idempotent for a fixed `now`: a second call expires nothing new.
    pub fn sweep(&mut self, now: f64) {
        let timeout = self.config.idle_timeout;
        let expired: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, flow)| now - flow.last_seen > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(flow) = self.flows.remove(&key) {
                trace!(
                    "flow expired: {}:{} -> {}:{} ({} pkts)",
                    flow.src_ip,
                    flow.src_port,
                    flow.dst_ip,
                    flow.dst_port,
                    flow.total_packets()
                );
                self.stats.flows_expired += 1;
                self.finished.push(flow);
            }
        }
    }

    /// Take every queued finished flow, leaving the queue empty
    pub fn drain_finished(&mut self) -> Vec<Flow> {
        std::mem::take(&mut self.finished)
    }

    /// Force every active flow into the finished queue (shutdown path)
    pub fn flush_all(&mut self) {
        for (_, flow) in self.flows.drain() {
            self.stats.flows_expired += 1;
            self.finished.push(flow);
        }
    }

    /// Current number of active flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
