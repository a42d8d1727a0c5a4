//! Transport error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Failures raised by the transport layer.
///
/// These are deliberately coarse: the connector's REST executor owns the
/// mapping from transport failures into its retry/indeterminate policy, so
/// this enum only distinguishes the cases that mapping cares about.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not even be constructed (bad URL, header, body).
    #[error("failed to build request: {0}")]
    BuildRequest(String),

    /// Connection-level failure: refused, reset, DNS, TLS.
    #[error("network: {0}")]
    Network(String),

    /// The call did not complete within its timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// WebSocket-level failure (handshake, frame, close).
    #[error("websocket: {0}")]
    WebSocket(String),

    /// Payload could not be serialised for the wire.
    #[error("serialisation: {0}")]
    Serialisation(String),
}
