/// Errors from calls to the execution service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The endpoint could not be configured or connected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The RPC failed at the transport or returned a non-OK gRPC status.
    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// The service answered with a negative response code.
    #[error("{operation} returned negative response code {code}")]
    NegativeCode { operation: &'static str, code: i32 },

    /// A stream ended without a terminal status event.
    #[error("{0} stream closed before a terminal status was received")]
    StreamClosed(&'static str),

    /// A response was missing a required field.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
