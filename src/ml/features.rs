//! Feature derivation from finished flows
//!
//! Produces the fixed 78-column CICIDS-2017 style feature schema consumed
//! by the trained per-dataset models. Column names and order are a wire
//! contract with the scalers and feature lists shipped in model artifact
//! directories; they must not be reordered or renamed.

use std::net::IpAddr;

use crate::core::flow::Flow;
use crate::core::packet::IpProtocol;

/// Ordered numeric feature columns. This exact order is shared with the
/// training pipeline; `Label` is appended as a 79th column only by the
/// offline capture export.
pub const FEATURE_COLUMNS: &[&str] = &[
    "Destination Port",
    "Flow Duration",
    "Total Fwd Packets",
    "Total Backward Packets",
    "Total Length of Fwd Packets",
    "Total Length of Bwd Packets",
    "Fwd Packet Length Max",
    "Fwd Packet Length Min",
    "Fwd Packet Length Mean",
    "Fwd Packet Length Std",
    "Bwd Packet Length Max",
    "Bwd Packet Length Min",
    "Bwd Packet Length Mean",
    "Bwd Packet Length Std",
    "Flow Bytes/s",
    "Flow Packets/s",
    "Flow IAT Mean",
    "Flow IAT Std",
    "Flow IAT Max",
    "Flow IAT Min",
    "Fwd IAT Total",
    "Fwd IAT Mean",
    "Fwd IAT Std",
    "Fwd IAT Max",
    "Fwd IAT Min",
    "Bwd IAT Total",
    "Bwd IAT Mean",
    "Bwd IAT Std",
    "Bwd IAT Max",
    "Bwd IAT Min",
    "Fwd PSH Flags",
    "Bwd PSH Flags",
    "Fwd URG Flags",
    "Bwd URG Flags",
    "Fwd Header Length",
    "Bwd Header Length",
    "Fwd Packets/s",
    "Bwd Packets/s",
    "Min Packet Length",
    "Max Packet Length",
    "Packet Length Mean",
    "Packet Length Std",
    "Packet Length Variance",
    "FIN Flag Count",
    "SYN Flag Count",
    "RST Flag Count",
    "PSH Flag Count",
    "ACK Flag Count",
    "URG Flag Count",
    "CWE Flag Count",
    "ECE Flag Count",
    "Down/Up Ratio",
    "Average Packet Size",
    "Avg Fwd Segment Size",
    "Avg Bwd Segment Size",
    "Fwd Header Length.1",
    "Fwd Avg Bytes/Bulk",
    "Fwd Avg Packets/Bulk",
    "Fwd Avg Bulk Rate",
    "Bwd Avg Bytes/Bulk",
    "Bwd Avg Packets/Bulk",
    "Bwd Avg Bulk Rate",
    "Subflow Fwd Packets",
    "Subflow Fwd Bytes",
    "Subflow Bwd Packets",
    "Subflow Bwd Bytes",
    "Init_Win_bytes_forward",
    "Init_Win_bytes_backward",
    "act_data_pkt_fwd",
    "min_seg_size_forward",
    "Active Mean",
    "Active Std",
    "Active Max",
    "Active Min",
    "Idle Mean",
    "Idle Std",
    "Idle Max",
    "Idle Min",
];

/// Number of numeric feature columns
pub const NUM_FEATURES: usize = 78;

/// Label column name used by the offline capture export
pub const LABEL_COLUMN: &str = "Label";

/// Derived feature vector for one finished flow.
///
/// The numeric values are aligned with `FEATURE_COLUMNS`; protocol and the
/// endpoint addresses are carried alongside for the output sink and for
/// agents whose feature lists include `Protocol`.
#[derive(Debug, Clone)]
pub struct FlowFeatures {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: IpProtocol,
    /// Offline-capture label; `None` in the live path
    pub label: Option<String>,
    values: Vec<f64>,
}

/// max/min/mean/population-std over a sample, all zero when empty
#[derive(Debug, Clone, Copy, Default)]
struct SampleStats {
    max: f64,
    min: f64,
    mean: f64,
    std: f64,
}

fn sample_stats(values: &[f64]) -> SampleStats {
    if values.is_empty() {
        return SampleStats::default();
    }
    let mut max = f64::MIN;
    let mut min = f64::MAX;
    let mut sum = 0.0;
    for &v in values {
        if v > max { max = v; }
        if v < min { min = v; }
        sum += v;
    }
    let mean = sum / values.len() as f64;
    SampleStats {
        max,
        min,
        mean,
        std: population_variance(values, mean).sqrt(),
    }
}

fn population_variance(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}

impl FlowFeatures {
    /// Derive the full feature vector from a finished flow.
    ///
    /// Pure and non-mutating; guards every divisor so that zero-duration
    /// or one-sided flows never produce NaN or infinities.
    pub fn from_flow(flow: &Flow, label: Option<&str>) -> Self {
        let duration = flow.duration_us();
        // Rates fall back to a one-second divisor on zero-duration flows
        let dur_sec = if duration > 0.0 { duration / 1e6 } else { 1.0 };

        let fwd_sum: f64 = flow.fwd_lengths.iter().sum();
        let bwd_sum: f64 = flow.bwd_lengths.iter().sum();
        let all_lengths: Vec<f64> = flow
            .fwd_lengths
            .iter()
            .chain(flow.bwd_lengths.iter())
            .copied()
            .collect();

        let f = sample_stats(&flow.fwd_lengths);
        let b = sample_stats(&flow.bwd_lengths);
        let all = sample_stats(&all_lengths);

        let f_iat = sample_stats(&flow.fwd_iat);
        let b_iat = sample_stats(&flow.bwd_iat);
        // Combined flow IAT is the concatenation of the two per-direction
        // lists, not the true chronological inter-arrival. Trained models
        // expect this exact definition.
        let flow_iat_all: Vec<f64> = flow
            .fwd_iat
            .iter()
            .chain(flow.bwd_iat.iter())
            .copied()
            .collect();
        let flow_iat = sample_stats(&flow_iat_all);

        let fwd_packets = flow.fwd_packets as f64;
        let bwd_packets = flow.bwd_packets as f64;
        let down_up_ratio = if flow.fwd_packets > 0 {
            bwd_packets / fwd_packets
        } else {
            0.0
        };

        let values = vec![
            flow.dst_port as f64,
            duration,
            fwd_packets,
            bwd_packets,
            fwd_sum,
            bwd_sum,
            f.max,
            f.min,
            f.mean,
            f.std,
            b.max,
            b.min,
            b.mean,
            b.std,
            (fwd_sum + bwd_sum) / dur_sec,
            (fwd_packets + bwd_packets) / dur_sec,
            flow_iat.mean,
            flow_iat.std,
            flow_iat.max,
            flow_iat.min,
            flow.fwd_iat.iter().sum(),
            f_iat.mean,
            f_iat.std,
            f_iat.max,
            f_iat.min,
            flow.bwd_iat.iter().sum(),
            b_iat.mean,
            b_iat.std,
            b_iat.max,
            b_iat.min,
            flow.fwd_psh_flags as f64,
            flow.bwd_psh_flags as f64,
            flow.fwd_urg_flags as f64,
            flow.bwd_urg_flags as f64,
            flow.fwd_header_len as f64,
            flow.bwd_header_len as f64,
            fwd_packets / dur_sec,
            bwd_packets / dur_sec,
            all.min,
            all.max,
            all.mean,
            all.std,
            population_variance(&all_lengths, all.mean),
            flow.fin_count as f64,
            flow.syn_count as f64,
            flow.rst_count as f64,
            flow.psh_count as f64,
            flow.ack_count as f64,
            flow.urg_count as f64,
            flow.cwr_count as f64,
            flow.ece_count as f64,
            down_up_ratio,
            all.mean,
            f.mean,
            b.mean,
            flow.fwd_header_len as f64,
            // Bulk metrics are fixed placeholders; the trained scalers were
            // fit on the same constants.
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            fwd_packets,
            fwd_sum,
            bwd_packets,
            bwd_sum,
            flow.init_win_fwd as f64,
            flow.init_win_bwd as f64,
            flow.act_data_pkt_fwd as f64,
            flow.min_seg_size_fwd as f64,
            // Active/idle sub-period placeholders
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
        ];

        debug_assert_eq!(values.len(), NUM_FEATURES);

        Self {
            src_ip: flow.src_ip,
            dst_ip: flow.dst_ip,
            dst_port: flow.dst_port,
            protocol: flow.protocol,
            label: label.map(|s| s.to_string()),
            values,
        }
    }

    /// Look up a feature value by column name.
    ///
    /// `Protocol` resolves to the numeric IP protocol; unknown names
    /// return `None` and are synthesized as 0 by the predictor.
    pub fn get(&self, name: &str) -> Option<f64> {
        if name == "Protocol" {
            return Some(u8::from(self.protocol) as f64);
        }
        FEATURE_COLUMNS
            .iter()
            .position(|&c| c == name)
            .map(|idx| self.values[idx])
    }

    /// Numeric values in `FEATURE_COLUMNS` order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Feature record with explicit raw values, for exercising paths the
    /// derivation itself can never produce (e.g. non-finite inputs)
    #[cfg(test)]
    pub(crate) fn from_raw(values: Vec<f64>) -> Self {
        assert_eq!(values.len(), NUM_FEATURES);
        Self {
            src_ip: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            dst_ip: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            dst_port: 0,
            protocol: IpProtocol::Tcp,
            label: None,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::PacketRecord;
    use std::net::{IpAddr, Ipv4Addr};

    fn udp_packet(len: u32, ts: f64) -> PacketRecord {
        PacketRecord {
            src_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            src_port: 40000,
            dst_port: 53,
            protocol: IpProtocol::Udp,
            length: len,
            flags: None,
            header_len: 0,
            window: 0,
            payload_len: 0,
            ts,
        }
    }

    #[test]
    fn test_schema_width() {
        assert_eq!(FEATURE_COLUMNS.len(), NUM_FEATURES);
    }

    #[test]
    fn test_udp_flow_scenario() {
        // 3 forward packets of 40/60/80 bytes over 2 seconds, no replies
        let mut flow = Flow::new(&udp_packet(40, 0.0));
        flow.add_packet(&udp_packet(40, 0.0));
        flow.add_packet(&udp_packet(60, 1.0));
        flow.add_packet(&udp_packet(80, 2.0));

        let features = FlowFeatures::from_flow(&flow, None);
        assert_eq!(features.get("Flow Duration"), Some(2_000_000.0));
        assert_eq!(features.get("Fwd Packet Length Mean"), Some(60.0));
        assert_eq!(features.get("Bwd Packet Length Mean"), Some(0.0));
        assert_eq!(features.get("Down/Up Ratio"), Some(0.0));
        assert_eq!(features.get("Flow Packets/s"), Some(1.5));
        assert_eq!(features.get("Total Length of Fwd Packets"), Some(180.0));
    }

    #[test]
    fn test_empty_backward_samples_are_zero() {
        let mut flow = Flow::new(&udp_packet(100, 0.0));
        flow.add_packet(&udp_packet(100, 0.0));

        let features = FlowFeatures::from_flow(&flow, None);
        for col in ["Bwd Packet Length Max", "Bwd Packet Length Min",
                    "Bwd Packet Length Mean", "Bwd Packet Length Std",
                    "Bwd IAT Mean", "Bwd IAT Std", "Bwd IAT Max", "Bwd IAT Min"] {
            assert_eq!(features.get(col), Some(0.0), "{col} should be 0");
        }
        assert!(features.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_duration_rates_are_finite() {
        let mut flow = Flow::new(&udp_packet(100, 5.0));
        flow.add_packet(&udp_packet(100, 5.0));

        let features = FlowFeatures::from_flow(&flow, None);
        // Zero duration falls back to a one-second divisor
        assert_eq!(features.get("Flow Bytes/s"), Some(100.0));
        assert_eq!(features.get("Flow Packets/s"), Some(1.0));
    }

    #[test]
    fn test_placeholder_columns_fixed_zero() {
        let mut flow = Flow::new(&udp_packet(100, 0.0));
        flow.add_packet(&udp_packet(100, 0.0));
        flow.add_packet(&udp_packet(200, 3.0));

        let features = FlowFeatures::from_flow(&flow, None);
        for col in ["Fwd Avg Bytes/Bulk", "Bwd Avg Bulk Rate", "Active Mean",
                    "Idle Max", "Active Std", "Idle Min"] {
            assert_eq!(features.get(col), Some(0.0));
        }
    }

    #[test]
    fn test_protocol_passthrough() {
        let mut flow = Flow::new(&udp_packet(100, 0.0));
        flow.add_packet(&udp_packet(100, 0.0));

        let features = FlowFeatures::from_flow(&flow, None);
        assert_eq!(features.get("Protocol"), Some(17.0));
        assert_eq!(features.get("Source IP"), None);
    }

    #[test]
    fn test_combined_iat_is_concatenation() {
        let fwd = udp_packet(100, 0.0);
        let mut bwd = udp_packet(100, 0.0);
        std::mem::swap(&mut bwd.src_ip, &mut bwd.dst_ip);
        std::mem::swap(&mut bwd.src_port, &mut bwd.dst_port);

        let mut flow = Flow::new(&fwd);
        // fwd at t=0 and t=1 (one IAT of 1s); bwd at t=0.5 and t=3 (one IAT of 2.5s)
        flow.add_packet(&fwd);
        let mut b1 = bwd.clone();
        b1.ts = 0.5;
        flow.add_packet(&b1);
        let mut f2 = fwd.clone();
        f2.ts = 1.0;
        flow.add_packet(&f2);
        let mut b2 = bwd.clone();
        b2.ts = 3.0;
        flow.add_packet(&b2);

        let features = FlowFeatures::from_flow(&flow, None);
        // Concatenated [1e6, 2.5e6]: mean 1.75e6, max 2.5e6, min 1e6
        assert_eq!(features.get("Flow IAT Mean"), Some(1_750_000.0));
        assert_eq!(features.get("Flow IAT Max"), Some(2_500_000.0));
        assert_eq!(features.get("Flow IAT Min"), Some(1_000_000.0));
    }
}
