//! Labeled CSV export for offline training
//!
//! Writes finished flows as dataset rows: the full feature schema plus a
//! trailing `Label` column. The output is the training-side input of the
//! model artifact convention.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::ml::features::{FlowFeatures, FEATURE_COLUMNS, LABEL_COLUMN};
use crate::ml::predictor::BENIGN_LABEL;

/// Streaming CSV writer over the dataset schema
pub struct CsvExporter<W: Write> {
    writer: W,
    rows: u64,
}

impl CsvExporter<BufWriter<File>> {
    /// Create the file and write the header row
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.as_ref().display()))?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvExporter<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        let mut header = FEATURE_COLUMNS.join(",");
        header.push(',');
        header.push_str(LABEL_COLUMN);
        writeln!(writer, "{}", header)?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append one flow row. Missing labels export as `BENIGN`.
    pub fn write_row(&mut self, features: &FlowFeatures) -> Result<()> {
        let mut line = String::with_capacity(FEATURE_COLUMNS.len() * 8);
        for value in features.values() {
            line.push_str(&format_value(*value));
            line.push(',');
        }
        line.push_str(features.label.as_deref().unwrap_or(BENIGN_LABEL));
        writeln!(self.writer, "{}", line)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Integral values print without a fractional part so exported files match
/// the reference datasets
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flow::Flow;
    use crate::core::packet::{IpProtocol, PacketRecord, TcpFlags};
    use crate::ml::features::NUM_FEATURES;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_features(label: Option<&str>) -> FlowFeatures {
        let pkt = PacketRecord {
            src_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
            src_port: 50000,
            dst_port: 80,
            protocol: IpProtocol::Tcp,
            length: 60,
            flags: Some(TcpFlags { syn: true, ..Default::default() }),
            header_len: 20,
            window: 4096,
            payload_len: 0,
            ts: 1.0,
        };
        let mut flow = Flow::new(&pkt);
        flow.add_packet(&pkt);
        FlowFeatures::from_flow(&flow, label)
    }

    #[test]
    fn test_header_and_row_width() {
        let mut exporter = CsvExporter::new(Vec::new()).unwrap();
        exporter.write_row(&sample_features(Some("DDoS"))).unwrap();

        let out = String::from_utf8(exporter.writer).unwrap();
        let mut lines = out.lines();

        let header = lines.next().unwrap();
        assert_eq!(header.split(',').count(), NUM_FEATURES + 1);
        assert!(header.starts_with("Destination Port,Flow Duration,"));
        assert!(header.ends_with(",Label"));

        let row = lines.next().unwrap();
        assert_eq!(row.split(',').count(), NUM_FEATURES + 1);
        assert!(row.ends_with(",DDoS"));
    }

    #[test]
    fn test_unlabeled_rows_default_benign() {
        let mut exporter = CsvExporter::new(Vec::new()).unwrap();
        exporter.write_row(&sample_features(None)).unwrap();

        let out = String::from_utf8(exporter.writer).unwrap();
        assert!(out.lines().nth(1).unwrap().ends_with(",BENIGN"));
    }

    #[test]
    fn test_integral_values_have_no_fraction() {
        assert_eq!(format_value(80.0), "80");
        assert_eq!(format_value(0.5), "0.5");
        assert_eq!(format_value(0.0), "0");
    }
}
