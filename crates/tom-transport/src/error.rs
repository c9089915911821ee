/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TomTransportError {
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("connection to {0} closed")]
    ConnectionClosed(String),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("transport shut down")]
    Shutdown,
}
