//! Host bus abstraction
//!
//! The driver core never talks to hardware directly. A backend (libusb in
//! production, a scripted mock in tests) implements [`BusDevice`] and
//! [`BusInterface`], and the lifecycle controller consumes whatever the
//! backend hands it. Transfers are synchronous and blocking; timeouts are
//! the caller's problem.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

/// Opaque identity of a bound interface
///
/// Assigned by the backend and stable for the lifetime of one plug-in.
/// The lifecycle controller keys its registry on it; backends typically
/// pack a bus number and device address into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub u32);

/// Endpoint direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// USB transfer kind of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint descriptor of the active alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint address, direction bit included
    pub address: u8,
    /// Direction decoded from the address
    pub direction: Direction,
    /// Transfer kind from the attributes field
    pub kind: TransferKind,
    /// Maximum packet size in bytes
    pub max_packet_size: u16,
}

/// A device a backend can run bulk transfers against
///
/// Implementations must be safe to share across threads; the driver core
/// serializes access to its own buffers but will happily issue a read and
/// a write concurrently on distinct endpoints.
pub trait BusDevice: Send + Sync {
    /// Blocking bulk IN transfer into `buf`, returning the bytes received
    ///
    /// A zero-length completion is a valid outcome, not an error. On
    /// failure `buf` contents are unspecified and the status is returned.
    fn bulk_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError>;

    /// Blocking bulk OUT transfer of `data`, returning the bytes accepted
    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError>;

    /// Keep the device out of suspend until the matching [`power_put`]
    ///
    /// Denied when the device cannot be woken or is otherwise unable to
    /// serve a new session.
    ///
    /// [`power_put`]: BusDevice::power_put
    fn power_get(&self) -> std::result::Result<(), TransportError>;

    /// Release one suspend hold taken by [`power_get`]
    ///
    /// [`power_get`]: BusDevice::power_get
    fn power_put(&self);
}

/// The interface object a backend passes to probe
pub trait BusInterface: Send + Sync {
    /// Registry key for this binding
    fn id(&self) -> InterfaceId;

    /// Endpoint descriptors of the active alternate setting, in order
    fn endpoints(&self) -> Vec<EndpointDescriptor>;

    /// Counted reference to the device behind this interface
    fn device(&self) -> Arc<dyn BusDevice>;
}

/// RAII hold on the device's power state
///
/// Acquired when a session opens and released exactly once when the token
/// drops, after the session's device reference is gone.
pub struct PowerToken {
    device: Arc<dyn BusDevice>,
}

impl PowerToken {
    /// Take a suspend hold on `device`
    pub fn acquire(device: Arc<dyn BusDevice>) -> std::result::Result<Self, TransportError> {
        device.power_get()?;
        Ok(Self { device })
    }
}

impl Drop for PowerToken {
    fn drop(&mut self) {
        self.device.power_put();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDevice;

    #[test]
    fn test_power_token_releases_on_drop() {
        let device = Arc::new(MockDevice::new());
        let token = PowerToken::acquire(device.clone() as Arc<dyn BusDevice>).unwrap();
        assert_eq!(device.power_holds(), 1);
        drop(token);
        assert_eq!(device.power_holds(), 0);
    }

    #[test]
    fn test_power_token_denied() {
        let device = Arc::new(MockDevice::new());
        device.deny_power();
        let result = PowerToken::acquire(device.clone() as Arc<dyn BusDevice>);
        assert!(result.is_err());
        assert_eq!(device.power_holds(), 0);
    }
}
