//! Decoded packet representation
//!
//! `PacketRecord` is the minimal per-packet record the flow engine consumes.
//! It is produced by a decoder adapter (see `capture`); the engine never
//! touches a capture library directly.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Icmpv6,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(val: u8) -> Self {
        match val {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            58 => IpProtocol::Icmpv6,
            other => IpProtocol::Other(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(val: IpProtocol) -> Self {
        match val {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Icmpv6 => 58,
            IpProtocol::Other(v) => v,
        }
    }
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// TCP flags, including the two reserved-bit indicators (ECE/CWR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
            ece: flags & 0x40 != 0,
            cwr: flags & 0x80 != 0,
        }
    }

    pub fn to_u8(&self) -> u8 {
        let mut flags = 0u8;
        if self.fin { flags |= 0x01; }
        if self.syn { flags |= 0x02; }
        if self.rst { flags |= 0x04; }
        if self.psh { flags |= 0x08; }
        if self.ack { flags |= 0x10; }
        if self.urg { flags |= 0x20; }
        if self.ece { flags |= 0x40; }
        if self.cwr { flags |= 0x80; }
        flags
    }
}

/// One decoded packet as delivered by the decoder adapter.
///
/// `flags` is `Some` iff the packet carried a parsed transport header
/// (TCP); window, header and payload lengths are only meaningful then.
/// Timestamps are seconds since the Unix epoch and must be monotonically
/// non-decreasing within a capture.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: IpProtocol,
    /// Raw packet length on the wire (all headers included)
    pub length: u32,
    /// Transport flags; `Some` marks TCP framing as present
    pub flags: Option<TcpFlags>,
    /// Transport header length in bytes (0 when no transport framing)
    pub header_len: u32,
    /// Advertised window size (TCP only)
    pub window: u16,
    /// Transport payload length in bytes
    pub payload_len: u32,
    /// Capture timestamp, seconds since Unix epoch
    pub ts: f64,
}

impl PacketRecord {
    /// Check that the packet carries a usable 4-tuple
    pub fn has_flow_identity(&self) -> bool {
        matches!(self.protocol, IpProtocol::Tcp | IpProtocol::Udp)
    }
}

/// Current wall-clock time in the `PacketRecord` timestamp convention
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
