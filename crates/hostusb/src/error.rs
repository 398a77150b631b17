//! Host backend error types

use thiserror::Error;

/// Errors from the libusb backend
#[derive(Debug, Error)]
pub enum HostError {
    /// Anything rusb reported
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),

    /// The device does not expose the expected interface number
    #[error("device has no interface {0}")]
    MissingInterface(u8),
}

/// Type alias for host backend results
pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HostError::MissingInterface(0);
        assert_eq!(format!("{}", err), "device has no interface 0");

        let err: HostError = rusb::Error::NoDevice.into();
        assert!(format!("{}", err).starts_with("usb error"));
    }
}
