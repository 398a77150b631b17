//! Open sessions against a bound device
//!
//! A [`Session`] is what a node open hands back: one counted reference to
//! the device handle plus a power hold that keeps the device awake. All
//! packet I/O goes through it. [`TinNode`] is the driver's implementation
//! of the node capability set, routing opens back through the lifecycle
//! controller so a detached interface can no longer be opened.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::bus::{InterfaceId, PowerToken};
use crate::device::TinDevice;
use crate::error::{DriverError, Result};
use crate::lifecycle::TinDriver;
use crate::node::NodeOps;
use crate::transfer;

/// One open session on a device handle
///
/// Sessions stay valid across an unplug: the device reference keeps the
/// handle alive and transfers simply start failing with
/// [`TransportError::NoDevice`](crate::TransportError::NoDevice).
pub struct Session {
    // Drop order: device reference first, then the power token.
    device: Arc<TinDevice>,
    power: PowerToken,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("interface", &self.device.interface())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(device: Arc<TinDevice>, power: PowerToken) -> Self {
        Self { device, power }
    }

    /// Read one packet from the device into `out`
    ///
    /// At most `min(out.len(), bulk_in_max_packet)` bytes are transferred;
    /// the return value is the length actually received, possibly zero.
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        transfer::read_packet(&self.device, out)
    }

    /// Write one packet to the device
    ///
    /// At most 512 bytes are transferred; the clamped length is returned
    /// on success.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        transfer::write_packet(&self.device, data)
    }

    /// The device handle this session holds open
    pub fn device(&self) -> &Arc<TinDevice> {
        &self.device
    }

    /// Close the session, releasing its device reference and power hold
    ///
    /// Dropping the session does the same; this just makes call sites read
    /// like the operation they perform.
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("session on interface {} closed", self.device.interface().0);
    }
}

/// The driver's node capability set, one instance per registered node
///
/// Holds the controller weakly: a node retained past driver shutdown must
/// fail opens, not revive the controller.
pub struct TinNode {
    driver: Weak<TinDriver>,
    interface: InterfaceId,
}

impl TinNode {
    pub(crate) fn new(driver: Weak<TinDriver>, interface: InterfaceId) -> Self {
        Self { driver, interface }
    }
}

impl NodeOps for TinNode {
    fn open(&self) -> Result<Session> {
        let driver = self.driver.upgrade().ok_or(DriverError::NoSuchDevice)?;
        driver.open_session(self.interface)
    }
}
