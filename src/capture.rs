//! Offline packet ingestion
//!
//! Reads classic pcap files (both byte orders, microsecond or nanosecond
//! timestamps) and decodes Ethernet frames into `PacketRecord`s with
//! etherparse. Live capture is out of scope; a sniffer writing pcap files
//! or feeding the engine channel directly sits in front of this.

use std::fs::File;
use std::io::{BufReader, Read};
use std::net::IpAddr;
use std::path::Path;

use etherparse::SlicedPacket;
use thiserror::Error;
use tracing::trace;

use crate::core::packet::{IpProtocol, PacketRecord, TcpFlags};

const MAGIC_USEC: u32 = 0xa1b2_c3d4;
const MAGIC_NSEC: u32 = 0xa1b2_3c4d;
const LINKTYPE_ETHERNET: u32 = 1;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a pcap file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("unsupported link type {0}, only Ethernet is handled")]
    UnsupportedLinkType(u32),
    #[error("truncated record: header says {want} bytes, {got} available")]
    Truncated { want: usize, got: usize },
}

/// One raw captured frame with its capture-time timestamp
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Seconds since Unix epoch
    pub ts: f64,
    pub data: Vec<u8>,
}

/// Sequential reader over a classic pcap file
#[derive(Debug)]
pub struct PcapReader<R: Read> {
    reader: R,
    swapped: bool,
    nanos: bool,
}

impl PcapReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> PcapReader<R> {
    /// Parse the 24-byte global header and validate the link type
    pub fn new(mut reader: R) -> Result<Self, CaptureError> {
        let mut header = [0u8; 24];
        reader.read_exact(&mut header)?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let (swapped, nanos) = match magic {
            MAGIC_USEC => (false, false),
            MAGIC_NSEC => (false, true),
            m if m.swap_bytes() == MAGIC_USEC => (true, false),
            m if m.swap_bytes() == MAGIC_NSEC => (true, true),
            m => return Err(CaptureError::BadMagic(m)),
        };

        let read_u32 = |bytes: &[u8]| {
            let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
            if swapped { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) }
        };
        let linktype = read_u32(&header[20..24]);
        if linktype != LINKTYPE_ETHERNET {
            return Err(CaptureError::UnsupportedLinkType(linktype));
        }

        Ok(Self { reader, swapped, nanos })
    }

    fn read_u32(&self, bytes: &[u8]) -> u32 {
        let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if self.swapped { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) }
    }

    /// Next frame, or `None` at a clean end of file
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let mut header = [0u8; 16];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let sec = self.read_u32(&header[0..4]) as f64;
        let frac = self.read_u32(&header[4..8]) as f64;
        let caplen = self.read_u32(&header[8..12]) as usize;

        let ts = if self.nanos { sec + frac / 1e9 } else { sec + frac / 1e6 };

        let mut data = vec![0u8; caplen];
        match self.reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(CaptureError::Truncated { want: caplen, got: 0 });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Some(RawFrame { ts, data }))
    }
}

/// Decode one Ethernet frame into a packet record.
///
/// Returns `None` for frames the pipeline cannot use: non-IP traffic,
/// malformed headers, anything etherparse rejects.
pub fn decode_frame(frame: &RawFrame) -> Option<PacketRecord> {
    let sliced = match SlicedPacket::from_ethernet(&frame.data) {
        Ok(sliced) => sliced,
        Err(e) => {
            trace!("unparseable frame: {}", e);
            return None;
        }
    };

    let (src_ip, dst_ip, protocol): (IpAddr, IpAddr, IpProtocol) = match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            let protocol = match header.protocol() {
                etherparse::IpNumber::TCP => IpProtocol::Tcp,
                etherparse::IpNumber::UDP => IpProtocol::Udp,
                etherparse::IpNumber::ICMP => IpProtocol::Icmp,
                other => IpProtocol::Other(other.0),
            };
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
                protocol,
            )
        }
        Some(etherparse::NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            let protocol = match header.next_header() {
                etherparse::IpNumber::TCP => IpProtocol::Tcp,
                etherparse::IpNumber::UDP => IpProtocol::Udp,
                etherparse::IpNumber::IPV6_ICMP => IpProtocol::Icmpv6,
                other => IpProtocol::Other(other.0),
            };
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
                protocol,
            )
        }
        _ => return None, // ARP, etc.
    };

    let mut record = PacketRecord {
        src_ip,
        dst_ip,
        src_port: 0,
        dst_port: 0,
        protocol,
        length: frame.data.len() as u32,
        flags: None,
        header_len: 0,
        window: 0,
        payload_len: 0,
        ts: frame.ts,
    };

    match &sliced.transport {
        Some(etherparse::TransportSlice::Tcp(tcp)) => {
            record.src_port = tcp.source_port();
            record.dst_port = tcp.destination_port();
            record.flags = Some(TcpFlags {
                fin: tcp.fin(),
                syn: tcp.syn(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                ack: tcp.ack(),
                urg: tcp.urg(),
                ece: tcp.ece(),
                cwr: tcp.cwr(),
            });
            record.header_len = (tcp.slice().len() - tcp.payload().len()) as u32;
            record.window = tcp.window_size();
            record.payload_len = tcp.payload().len() as u32;
        }
        Some(etherparse::TransportSlice::Udp(udp)) => {
            record.src_port = udp.source_port();
            record.dst_port = udp.destination_port();
            record.payload_len = udp.payload().len() as u32;
        }
        _ => {}
    }

    Some(record)
}
