//! Boundary to the network/routing layer.
//!
//! The transport never routes.  It hands finished segments to a [`Network`]
//! implementation and is handed inbound datagrams through
//! [`crate::transport::Transport::on_datagram`].  Delivery may be lossy,
//! reordered, or duplicated; nothing here assumes otherwise.

use crate::error::SendFailed;

/// Address of a node on the mesh.
pub type NodeAddr = u16;
/// Transport port number.
pub type Port = u8;

/// Network-layer collaborator consumed by the transport.
pub trait Network {
    /// Address of the node this transport runs on.
    fn local_addr(&self) -> NodeAddr;

    /// Best-effort transmission of one datagram.
    fn send_datagram(
        &mut self,
        dest_addr: NodeAddr,
        dest_port: Port,
        src_port: Port,
        payload: &[u8],
    ) -> Result<(), SendFailed>;
}
