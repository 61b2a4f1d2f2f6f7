//! Detection engine
//!
//! Wires the pipeline together: packets arrive over a channel, land in the
//! shared flow table, and a periodic sweep evicts idle flows. Evicted flows
//! are featurized and scored in batches, and every verdict is pushed
//! through the detection sink. Shutdown flushes and analyzes whatever is
//! still active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::packet::{unix_now, PacketRecord};
use crate::core::Flow;
use crate::flow::{FlowConfig, FlowTable};
use crate::ml::{EnsemblePredictor, FlowFeatures};
use crate::sink::{Detection, DetectionSink};

/// Bound of the packet channel between capture and the engine
const PACKET_CHANNEL_SIZE: usize = 4096;

/// Final counters returned when the engine loop exits
#[derive(Debug, Clone, Default)]
pub struct EngineReport {
    pub packets: u64,
    pub packets_dropped: u64,
    pub flows_created: u64,
    pub flows_analyzed: u64,
    pub detections_malicious: u64,
}

/// Handle for feeding and stopping a running engine
#[derive(Clone)]
pub struct EngineHandle {
    packet_tx: mpsc::Sender<PacketRecord>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    table: Arc<Mutex<FlowTable>>,
    running: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Queue one decoded packet. Errors only after shutdown.
    pub async fn submit(&self, pkt: PacketRecord) -> anyhow::Result<()> {
        self.packet_tx
            .send(pkt)
            .await
            .map_err(|_| anyhow::anyhow!("engine has shut down"))
    }

    /// Signal the engine to flush and stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of currently active flows
    pub fn active_flows(&self) -> usize {
        self.table.lock().len()
    }
}

/// The engine loop plus its classification stage
pub struct Engine {
    config: FlowConfig,
    table: Arc<Mutex<FlowTable>>,
    predictor: EnsemblePredictor,
    sink: Box<dyn DetectionSink>,
    report: EngineReport,
}

impl Engine {
    pub fn new(
        config: FlowConfig,
        predictor: EnsemblePredictor,
        sink: Box<dyn DetectionSink>,
    ) -> Self {
        let table = FlowTable::new(config.clone());
        Self {
            config,
            table: Arc::new(Mutex::new(table)),
            predictor,
            sink,
            report: EngineReport::default(),
        }
    }

    /// Spawn the engine loop, returning the feed handle and the join
    /// handle that yields the final report
    pub fn spawn(mut self) -> (EngineHandle, JoinHandle<EngineReport>) {
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));

        let handle = EngineHandle {
            packet_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            table: self.table.clone(),
            running: running.clone(),
        };

        let join = tokio::spawn(async move {
            let report = self.run(packet_rx, shutdown_rx).await;
            running.store(false, Ordering::SeqCst);
            report
        });

        (handle, join)
    }

    async fn run(
        &mut self,
        mut packet_rx: mpsc::Receiver<PacketRecord>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> EngineReport {
        let sweep_every = Duration::from_secs_f64(self.config.sweep_interval.max(0.1));
        let mut sweeper = tokio::time::interval(sweep_every);
        sweeper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "engine started (idle timeout {}s, sweep every {}s)",
            self.config.idle_timeout, self.config.sweep_interval
        );

        // Packet clock: newest packet timestamp plus the wall time elapsed
        // since it arrived. Flows carry capture-time stamps, so sweeping on
        // raw wall clock would expire every flow of a replayed capture on
        // each tick. Wall clock applies only before the first packet.
        let mut pkt_clock: Option<(f64, Instant)> = None;

        loop {
            tokio::select! {
                maybe_pkt = packet_rx.recv() => {
                    match maybe_pkt {
                        Some(pkt) => {
                            let newest = match pkt_clock {
                                Some((ts, _)) if ts > pkt.ts => ts,
                                _ => pkt.ts,
                            };
                            pkt_clock = Some((newest, Instant::now()));

                            let finished = {
                                let mut table = self.table.lock();
                                table.ingest(&pkt);
                                table.drain_finished()
                            };
                            self.analyze(finished);
                        }
                        // All senders dropped: treat as shutdown
                        None => break,
                    }
                }
                _ = sweeper.tick() => {
                    let now = match pkt_clock {
                        Some((ts, at)) => ts + at.elapsed().as_secs_f64(),
                        None => unix_now(),
                    };
                    let finished = {
                        let mut table = self.table.lock();
                        table.sweep(now);
                        table.drain_finished()
                    };
                    self.analyze(finished);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain anything capture managed to queue before the signal
        while let Ok(pkt) = packet_rx.try_recv() {
            let mut table = self.table.lock();
            table.ingest(&pkt);
        }

        let remaining = {
            let mut table = self.table.lock();
            table.flush_all();
            table.drain_finished()
        };
        self.analyze(remaining);

        {
            let table = self.table.lock();
            self.report.packets = table.stats.packets;
            self.report.packets_dropped = table.stats.packets_dropped;
            self.report.flows_created = table.stats.flows_created;
        }

        info!(
            "engine stopped: {} packets, {} flows, {} analyzed, {} malicious",
            self.report.packets,
            self.report.flows_created,
            self.report.flows_analyzed,
            self.report.detections_malicious
        );
        self.report.clone()
    }

    /// Featurize and score a batch of finished flows, emitting one
    /// detection per flow. Runs outside the table lock.
    fn analyze(&mut self, flows: Vec<Flow>) {
        if flows.is_empty() {
            return;
        }
        debug!("analyzing {} finished flow(s)", flows.len());

        let rows: Vec<FlowFeatures> = flows
            .iter()
            .map(|flow| FlowFeatures::from_flow(flow, None))
            .collect();
        let predictions = self.predictor.predict(&rows);

        for (features, prediction) in rows.iter().zip(&predictions) {
            let detection = Detection::from_prediction(features, prediction);
            if detection.is_malicious {
                self.report.detections_malicious += 1;
            }
            self.sink.emit(&detection);
        }
        self.report.flows_analyzed += rows.len() as u64;
    }
}
