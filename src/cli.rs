use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

use flowsense::capture::{decode_frame, PcapReader};
use flowsense::config::Config;
use flowsense::engine::Engine;
use flowsense::export::CsvExporter;
use flowsense::flow::FlowTable;
use flowsense::ml::{AgentRegistry, EnsemblePredictor, FlowFeatures};
use flowsense::sink::LogSink;

#[derive(Parser)]
#[command(name = "flowsense")]
#[command(author, version, about = "Flow-based network intrusion detection engine")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a pcap file through the detection pipeline
    Watch {
        /// Capture file to replay
        pcap: PathBuf,
    },

    /// Export flows from a pcap file as a labeled training CSV
    Export {
        /// Capture file to read
        pcap: PathBuf,

        /// Label written to every exported row
        #[arg(short, long, default_value = "BENIGN")]
        label: String,

        /// Output CSV path
        #[arg(short, long, default_value = "flows.csv")]
        output: PathBuf,
    },

    /// List the model agents discovered under the configured root
    Agents,

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn log_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber; `--debug` overrides `RUST_LOG`
pub fn init_tracing(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(debug))
        .with_target(false)
        .try_init();
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Watch { pcap } => cmd_watch(config, pcap).await,
        Commands::Export { pcap, label, output } => cmd_export(config, pcap, label, output),
        Commands::Agents => cmd_agents(config),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

async fn cmd_watch(config: Config, pcap: PathBuf) -> Result<()> {
    let registry = AgentRegistry::load(&config.ml.models_root);
    if registry.is_empty() {
        eprintln!(
            "{} no model agents under {}; all flows will score benign",
            "warning:".yellow(),
            config.ml.models_root
        );
    }
    let predictor = EnsemblePredictor::new(registry);
    let engine = Engine::new(config.flow, predictor, Box::new(LogSink::new()));
    let (handle, join) = engine.spawn();

    let mut reader = PcapReader::open(&pcap)
        .with_context(|| format!("failed to open {}", pcap.display()))?;
    while let Some(frame) = reader.next_frame()? {
        if let Some(pkt) = decode_frame(&frame) {
            handle.submit(pkt).await?;
        }
    }

    handle.shutdown();
    let report = join.await?;

    println!(
        "{} {} packets, {} flows, {} analyzed, {} malicious",
        "done:".green(),
        report.packets,
        report.flows_created,
        report.flows_analyzed,
        report.detections_malicious
    );
    Ok(())
}

fn cmd_export(config: Config, pcap: PathBuf, label: String, output: PathBuf) -> Result<()> {
    let mut reader = PcapReader::open(&pcap)
        .with_context(|| format!("failed to open {}", pcap.display()))?;
    let mut table = FlowTable::new(config.flow);
    let mut exporter = CsvExporter::create(&output)?;

    let mut write_finished = |table: &mut FlowTable, exporter: &mut CsvExporter<_>| -> Result<()> {
        for flow in table.drain_finished() {
            let features = FlowFeatures::from_flow(&flow, Some(&label));
            exporter.write_row(&features)?;
        }
        Ok(())
    };

    while let Some(frame) = reader.next_frame()? {
        if let Some(pkt) = decode_frame(&frame) {
            table.ingest(&pkt);
            write_finished(&mut table, &mut exporter)?;
        }
    }
    table.flush_all();
    write_finished(&mut table, &mut exporter)?;

    let rows = exporter.finish()?;
    println!("{} {} rows -> {}", "exported:".green(), rows, output.display());
    Ok(())
}

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "Agent")]
    key: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Classes")]
    classes: usize,
    #[tabled(rename = "Features")]
    features: usize,
}

fn cmd_agents(config: Config) -> Result<()> {
    let registry = AgentRegistry::load(&config.ml.models_root);
    if registry.is_empty() {
        println!("No agents found under {}", config.ml.models_root);
        return Ok(());
    }

    let rows: Vec<AgentRow> = registry
        .iter()
        .map(|agent| AgentRow {
            key: agent.key.clone(),
            model: agent.display_name.clone(),
            kind: agent.classifier.kind().to_string(),
            classes: agent.classifier.classes().len(),
            features: agent.expected_features.len(),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let content = toml::to_string_pretty(&config)?;
    match output {
        Some(path) => {
            std::fs::write(&path, content)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
