use crate::types::NodeId;

/// Network seam for the runtime.
///
/// In production: a QUIC/WebRTC node. In tests: `MockTransport`, which
/// records sends. The in-memory `MemoryNode` implements it directly.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send raw frame bytes to a target node.
    async fn send_raw(&self, target: NodeId, data: &[u8]) -> Result<(), String>;

    /// Open (or reuse) a channel to a peer.
    fn connect(&self, target: NodeId) -> Result<(), String>;

    /// Close the channel to a peer.
    fn disconnect(&self, target: NodeId);

    /// Peers with a currently open channel.
    fn connected_peers(&self) -> Vec<NodeId>;
}

#[async_trait::async_trait]
impl Transport for tom_transport::MemoryNode {
    async fn send_raw(&self, target: NodeId, data: &[u8]) -> Result<(), String> {
        tom_transport::MemoryNode::send_raw(self, target, data)
            .await
            .map_err(|e| e.to_string())
    }

    fn connect(&self, target: NodeId) -> Result<(), String> {
        tom_transport::MemoryNode::connect(self, target)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn disconnect(&self, target: NodeId) {
        tom_transport::MemoryNode::disconnect(self, target)
    }

    fn connected_peers(&self) -> Vec<NodeId> {
        tom_transport::MemoryNode::connected_peers(self)
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────
