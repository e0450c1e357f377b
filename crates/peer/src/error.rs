use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerError {
    /// Missing or inconsistent configuration; fatal at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// TCP or stream I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed framed message on a stream.
    #[error("protocol error: {0}")]
    Protocol(acn_codec::CodecError),

    /// Failure inside the libp2p host or DHT.
    #[error(transparent)]
    Network(#[from] acn_network::NetworkError),

    /// Could not negotiate a new overlay stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// An operation-level deadline elapsed.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// No provider for the address appeared within the lookup deadline.
    #[error("no provider found for address {0}")]
    NoProvider(String),

    /// A stored or received peer id string failed to parse.
    #[error("invalid peer id {0:?}")]
    InvalidPeerId(String),

    /// The local agent callback rejected an envelope.
    #[error("agent error: {0}")]
    Agent(String),
}

impl From<acn_codec::CodecError> for PeerError {
    fn from(e: acn_codec::CodecError) -> Self {
        // I/O failures keep their transport identity; framing and
        // serialization problems are protocol errors.
        match e {
            acn_codec::CodecError::Io(io) => PeerError::Transport(io),
            other => PeerError::Protocol(other),
        }
    }
}
