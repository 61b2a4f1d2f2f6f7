//! Core data model: decoded packets and bidirectional flows

pub mod flow;
pub mod packet;

pub use flow::{Flow, FlowKey};
pub use packet::{unix_now, IpProtocol, PacketRecord, TcpFlags};
