//! libusb backing for the tin driver
//!
//! Implements the driver core's bus seam on top of rusb, and watches the
//! bus for arrivals and removals of the matching device. The watcher owns
//! a dedicated thread's event loop and drives the lifecycle controller
//! from it.

pub mod device;
pub mod error;
pub mod interface;
pub mod watch;

pub use device::{UsbBusDevice, map_rusb_error};
pub use error::{HostError, Result};
pub use interface::{TIN_INTERFACE, UsbBusInterface, open_interface, pack_interface_id};
pub use watch::{DeviceListing, HotplugWatcher, list_devices, spawn_watcher};
