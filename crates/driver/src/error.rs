//! Driver error types
//!
//! Errors are split by layer: [`TransportError`] is the status a bus backend
//! reports for a single bulk transfer, [`RegistrarError`] is what the node
//! registrar can fail with, and [`DriverError`] is the taxonomy every driver
//! operation surfaces to callers.

use thiserror::Error;

/// Status of a failed bus transfer, carried unchanged to callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transfer did not complete within the timeout
    #[error("transfer timed out")]
    Timeout,

    /// Endpoint stalled
    #[error("endpoint stalled")]
    Pipe,

    /// Device disappeared mid-transfer
    #[error("device is no longer present")]
    NoDevice,

    /// Device returned more data than the buffer could hold
    #[error("transfer overflowed the buffer")]
    Overflow,

    /// Low-level I/O error on the bus
    #[error("bus I/O error")]
    Io,

    /// Anything the backend could not classify
    #[error("transfer failed: {message}")]
    Other { message: String },
}

/// Errors from node registration
#[derive(Debug, Error)]
pub enum RegistrarError {
    /// Every minor in the node class range is taken
    #[error("no free minor numbers in the node class range")]
    MinorsExhausted,

    /// The registrar could not expose the node
    #[error("failed to expose node: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by driver operations
#[derive(Debug, Error)]
pub enum DriverError {
    /// No device handle is bound to the node being opened
    #[error("no device bound to this node")]
    NoSuchDevice,

    /// The interface lacks a usable bulk endpoint pair
    #[error("could not find both bulk-in and bulk-out endpoints")]
    NoEndpoints,

    /// Buffer allocation failed while preparing the device handle
    #[error("out of memory preparing device buffers")]
    OutOfMemory,

    /// The device is busy or suspended and cannot serve the request
    #[error("device is busy or suspended")]
    DeviceBusy,

    /// A bulk transfer failed; the transport status is preserved
    #[error("bulk transfer failed: {0}")]
    Transport(#[from] TransportError),

    /// Packet data could not be copied to or from the caller
    #[error("failed to copy packet data: {0}")]
    Fault(#[from] std::io::Error),

    /// Node registration failed during attach
    #[error("node registration failed: {0}")]
    Registration(#[from] RegistrarError),
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            format!("{}", TransportError::Timeout),
            "transfer timed out"
        );
        let err = TransportError::Other {
            message: "pipe closed".to_string(),
        };
        assert!(format!("{}", err).contains("pipe closed"));
    }

    #[test]
    fn test_driver_error_preserves_transport_status() {
        let err = DriverError::Transport(TransportError::Pipe);
        let msg = format!("{}", err);
        assert!(msg.contains("bulk transfer failed"));
        assert!(msg.contains("endpoint stalled"));
    }

    #[test]
    fn test_registration_error_wraps() {
        let err: DriverError = RegistrarError::MinorsExhausted.into();
        assert!(matches!(
            err,
            DriverError::Registration(RegistrarError::MinorsExhausted)
        ));
    }
}
