//! rusb-backed bus device
//!
//! Wraps an opened, claimed device handle and maps its transfer results
//! onto the driver core's transport status. Dropping the wrapper releases
//! the interface and hands the device back to the kernel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rusb::{Context, DeviceHandle};
use tracing::{debug, warn};

use driver::{BusDevice, TransportError};

/// One opened tin device
///
/// Transfers go straight through to libusb, which is thread-safe, so this
/// type needs no locking of its own. Power holds are counted but always
/// granted: an open libusb handle already keeps the device resumed, there
/// is no userspace suspend to fight over.
pub struct UsbBusDevice {
    handle: DeviceHandle<Context>,
    interface_number: u8,
    power_holds: AtomicUsize,
}

impl UsbBusDevice {
    pub(crate) fn new(handle: DeviceHandle<Context>, interface_number: u8) -> Self {
        Self {
            handle,
            interface_number,
            power_holds: AtomicUsize::new(0),
        }
    }
}

impl BusDevice for UsbBusDevice {
    fn bulk_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }

    fn power_get(&self) -> std::result::Result<(), TransportError> {
        let holds = self.power_holds.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("power hold taken ({} outstanding)", holds);
        Ok(())
    }

    fn power_put(&self) {
        let holds = self.power_holds.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("power hold released ({} outstanding)", holds);
    }
}

impl Drop for UsbBusDevice {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface_number) {
            warn!(
                "failed to release interface {}: {}",
                self.interface_number, e
            );
        }

        // Hand the device back to whatever kernel driver we displaced.
        if let Err(e) = self.handle.attach_kernel_driver(self.interface_number) {
            debug!(
                "could not reattach kernel driver to interface {} (may not have been detached): {}",
                self.interface_number, e
            );
        } else {
            debug!(
                "reattached kernel driver to interface {}",
                self.interface_number
            );
        }
    }
}

/// Map rusb::Error to the driver's transport status
///
/// Statuses the driver core distinguishes keep their identity; everything
/// else is carried through as text.
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        _ => TransportError::Other {
            message: err.to_string(),
        },
    }
}
