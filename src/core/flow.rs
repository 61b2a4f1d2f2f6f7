//! Bidirectional flow aggregation
//!
//! A `Flow` accumulates per-direction statistics for one conversation.
//! The packet that creates the flow defines the forward direction for the
//! flow's whole lifetime.

use std::net::IpAddr;

use super::packet::{IpProtocol, PacketRecord};

/// Sentinel for the forward minimum segment size before any observation
const SEG_SIZE_SENTINEL: u32 = 65_535;

/// Canonical bidirectional flow identity.
///
/// The two `(ip, port)` endpoints are stored sorted, so packets traveling
/// in either direction of one conversation compute the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub endpoint_a: (IpAddr, u16),
    pub endpoint_b: (IpAddr, u16),
    pub protocol: IpProtocol,
}

impl FlowKey {
    pub fn from_packet(pkt: &PacketRecord) -> Self {
        let src = (pkt.src_ip, pkt.src_port);
        let dst = (pkt.dst_ip, pkt.dst_port);
        if src <= dst {
            Self { endpoint_a: src, endpoint_b: dst, protocol: pkt.protocol }
        } else {
            Self { endpoint_a: dst, endpoint_b: src, protocol: pkt.protocol }
        }
    }
}

/// Mutable aggregate of one bidirectional conversation.
///
/// Owned exclusively by the flow table while active; once evicted it is an
/// immutable snapshot handed to feature derivation.
#[derive(Debug, Clone)]
pub struct Flow {
    // Identity recorded from the creating packet; defines "forward"
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: IpProtocol,

    /// Flow start, seconds since Unix epoch
    pub start_time: f64,
    /// Last packet time, never decreases below `start_time`
    pub last_seen: f64,

    // Forward direction (creator -> responder)
    pub fwd_packets: u64,
    pub fwd_lengths: Vec<f64>,
    /// Forward inter-arrival times, microseconds
    pub fwd_iat: Vec<f64>,
    pub fwd_last_ts: Option<f64>,
    pub fwd_psh_flags: u32,
    pub fwd_urg_flags: u32,
    pub fwd_header_len: u64,

    // Backward direction
    pub bwd_packets: u64,
    pub bwd_lengths: Vec<f64>,
    /// Backward inter-arrival times, microseconds
    pub bwd_iat: Vec<f64>,
    pub bwd_last_ts: Option<f64>,
    pub bwd_psh_flags: u32,
    pub bwd_urg_flags: u32,
    pub bwd_header_len: u64,

    // Direction-agnostic transport flag tallies
    pub fin_count: u32,
    pub syn_count: u32,
    pub rst_count: u32,
    pub psh_count: u32,
    pub ack_count: u32,
    pub urg_count: u32,
    pub ece_count: u32,
    pub cwr_count: u32,

    /// Window size of the first forward / backward packet
    pub init_win_fwd: u16,
    pub init_win_bwd: u16,
    /// Forward packets carrying payload
    pub act_data_pkt_fwd: u64,
    /// Minimum forward header+segment size (0 until first observation)
    pub min_seg_size_fwd: u32,
}

impl Flow {
    /// Create an empty flow from the first packet's identity.
    ///
    /// The creating packet itself must still be routed through
    /// `add_packet` so its counters land in the forward direction.
    pub fn new(pkt: &PacketRecord) -> Self {
        Self {
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
            protocol: pkt.protocol,
            start_time: pkt.ts,
            last_seen: pkt.ts,
            fwd_packets: 0,
            fwd_lengths: Vec::new(),
            fwd_iat: Vec::new(),
            fwd_last_ts: None,
            fwd_psh_flags: 0,
            fwd_urg_flags: 0,
            fwd_header_len: 0,
            bwd_packets: 0,
            bwd_lengths: Vec::new(),
            bwd_iat: Vec::new(),
            bwd_last_ts: None,
            bwd_psh_flags: 0,
            bwd_urg_flags: 0,
            bwd_header_len: 0,
            fin_count: 0,
            syn_count: 0,
            rst_count: 0,
            psh_count: 0,
            ack_count: 0,
            urg_count: 0,
            ece_count: 0,
            cwr_count: 0,
            init_win_fwd: 0,
            init_win_bwd: 0,
            act_data_pkt_fwd: 0,
            min_seg_size_fwd: 0,
        }
    }

    /// Route one packet into the flow.
    ///
    /// Direction is determined solely by comparing the packet's source
    /// address against the flow's creation-time `src_ip`.
    pub fn add_packet(&mut self, pkt: &PacketRecord) {
        let ts = pkt.ts;
        let is_fwd = pkt.src_ip == self.src_ip;

        if is_fwd {
            self.fwd_packets += 1;
            self.fwd_lengths.push(pkt.length as f64);
            if let Some(last) = self.fwd_last_ts {
                self.fwd_iat.push((ts - last) * 1e6);
            }
            self.fwd_last_ts = Some(ts);

            if let Some(flags) = pkt.flags {
                if self.fwd_packets == 1 {
                    self.init_win_fwd = pkt.window;
                }
                if flags.psh { self.fwd_psh_flags += 1; }
                if flags.urg { self.fwd_urg_flags += 1; }
                self.fwd_header_len += pkt.header_len as u64;
                if pkt.payload_len > 0 {
                    self.act_data_pkt_fwd += 1;
                }
                let seg = pkt.header_len + pkt.payload_len;
                let current = if self.min_seg_size_fwd == 0 {
                    SEG_SIZE_SENTINEL
                } else {
                    self.min_seg_size_fwd
                };
                self.min_seg_size_fwd = current.min(seg);
            }
        } else {
            self.bwd_packets += 1;
            self.bwd_lengths.push(pkt.length as f64);
            if let Some(last) = self.bwd_last_ts {
                self.bwd_iat.push((ts - last) * 1e6);
            }
            self.bwd_last_ts = Some(ts);

            if let Some(flags) = pkt.flags {
                if self.bwd_packets == 1 {
                    self.init_win_bwd = pkt.window;
                }
                if flags.psh { self.bwd_psh_flags += 1; }
                if flags.urg { self.bwd_urg_flags += 1; }
                self.bwd_header_len += pkt.header_len as u64;
            }
        }

        if let Some(flags) = pkt.flags {
            if flags.fin { self.fin_count += 1; }
            if flags.syn { self.syn_count += 1; }
            if flags.rst { self.rst_count += 1; }
            if flags.psh { self.psh_count += 1; }
            if flags.ack { self.ack_count += 1; }
            if flags.urg { self.urg_count += 1; }
            if flags.cwr { self.cwr_count += 1; }
            if flags.ece { self.ece_count += 1; }
        }

        if ts > self.last_seen {
            self.last_seen = ts;
        }
    }

    /// Total packets in both directions
    pub fn total_packets(&self) -> u64 {
        self.fwd_packets + self.bwd_packets
    }

    /// Flow duration in microseconds
    pub fn duration_us(&self) -> f64 {
        (self.last_seen - self.start_time) * 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::TcpFlags;
    use std::net::Ipv4Addr;

    fn tcp_packet(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, ts: f64) -> PacketRecord {
        PacketRecord {
            src_ip: IpAddr::V4(Ipv4Addr::from(src)),
            dst_ip: IpAddr::V4(Ipv4Addr::from(dst)),
            src_port: sport,
            dst_port: dport,
            protocol: IpProtocol::Tcp,
            length: 60,
            flags: Some(TcpFlags { syn: true, ..Default::default() }),
            header_len: 20,
            window: 8192,
            payload_len: 0,
            ts,
        }
    }

    #[test]
    fn test_key_symmetry() {
        let p1 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 0.0);
        let p2 = tcp_packet([10, 0, 0, 1], [192, 168, 1, 10], 443, 54321, 0.1);
        assert_eq!(FlowKey::from_packet(&p1), FlowKey::from_packet(&p2));
    }

    #[test]
    fn test_key_differs_by_protocol() {
        let p1 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 0.0);
        let mut p2 = p1.clone();
        p2.protocol = IpProtocol::Udp;
        assert_ne!(FlowKey::from_packet(&p1), FlowKey::from_packet(&p2));
    }

    #[test]
    fn test_direction_by_source_address() {
        let p1 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 0.0);
        let mut flow = Flow::new(&p1);
        flow.add_packet(&p1);
        assert_eq!(flow.fwd_packets, 1);

        let reply = tcp_packet([10, 0, 0, 1], [192, 168, 1, 10], 443, 54321, 0.5);
        flow.add_packet(&reply);
        assert_eq!(flow.bwd_packets, 1);

        // Same source address, different port: still forward (address-only rule)
        let odd = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 60000, 443, 1.0);
        flow.add_packet(&odd);
        assert_eq!(flow.fwd_packets, 2);
    }

    #[test]
    fn test_iat_from_second_packet() {
        let p1 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 100.0);
        let mut flow = Flow::new(&p1);
        flow.add_packet(&p1);
        assert!(flow.fwd_iat.is_empty());

        let p2 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 100.5);
        flow.add_packet(&p2);
        assert_eq!(flow.fwd_iat.len(), 1);
        assert!((flow.fwd_iat[0] - 500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_init_window_and_seg_size() {
        let mut p1 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 0.0);
        p1.window = 1024;
        p1.payload_len = 100;
        let mut flow = Flow::new(&p1);
        flow.add_packet(&p1);
        assert_eq!(flow.init_win_fwd, 1024);
        assert_eq!(flow.act_data_pkt_fwd, 1);
        assert_eq!(flow.min_seg_size_fwd, 120);

        let mut p2 = p1.clone();
        p2.ts = 0.1;
        p2.window = 4096;
        p2.payload_len = 0;
        flow.add_packet(&p2);
        // First forward window sticks, smaller segment wins
        assert_eq!(flow.init_win_fwd, 1024);
        assert_eq!(flow.min_seg_size_fwd, 20);
        assert_eq!(flow.act_data_pkt_fwd, 1);
    }

    #[test]
    fn test_global_flag_tallies() {
        let mut p1 = tcp_packet([192, 168, 1, 10], [10, 0, 0, 1], 54321, 443, 0.0);
        p1.flags = Some(TcpFlags::from_u8(0x12)); // SYN+ACK
        let mut flow = Flow::new(&p1);
        flow.add_packet(&p1);

        let mut reply = tcp_packet([10, 0, 0, 1], [192, 168, 1, 10], 443, 54321, 0.2);
        reply.flags = Some(TcpFlags::from_u8(0x11)); // FIN+ACK
        flow.add_packet(&reply);

        assert_eq!(flow.syn_count, 1);
        assert_eq!(flow.ack_count, 2);
        assert_eq!(flow.fin_count, 1);
        assert!(flow.last_seen >= flow.start_time);
    }
}
