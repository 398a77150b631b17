//! Driver core for the tin USB peripheral
//!
//! This crate implements the device side of the bridge: endpoint
//! resolution, the refcounted device handle, the synchronous bulk transfer
//! engine, and the attach/open/close/detach lifecycle. It is portable by
//! construction; hardware access and node exposure come in through the
//! [`bus`] and [`node`] seams, so the whole crate runs against the
//! scripted bus in [`test_utils`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use driver::{InterfaceId, NodeClass, NodeTable, TinDriver};
//! use driver::test_utils::MockInterface;
//!
//! let table = Arc::new(NodeTable::new(NodeClass::default()));
//! let driver = TinDriver::new(table.clone());
//!
//! // A matching interface appears on the bus.
//! let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
//! let minor = driver.probe(&iface).unwrap();
//!
//! // Userland opens the node and moves a packet.
//! let session = table.open(minor).unwrap();
//! session.write(&[0x01, 0x02]).unwrap();
//! session.close();
//!
//! driver.disconnect(InterfaceId(1));
//! ```

pub mod bus;
pub mod device;
pub mod endpoints;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod session;
pub mod test_utils;
pub mod transfer;

pub use bus::{
    BusDevice, BusInterface, Direction, EndpointDescriptor, InterfaceId, PowerToken, TransferKind,
};
pub use device::TinDevice;
pub use endpoints::{ResolvedEndpoints, resolve_bulk_pair};
pub use error::{DriverError, RegistrarError, Result, TransportError};
pub use lifecycle::TinDriver;
pub use node::{MinorNumber, NodeClass, NodeOps, NodeRegistrar, NodeTable};
pub use session::{Session, TinNode};
pub use transfer::TRANSFER_TIMEOUT;

/// Vendor id of the tin peripheral
pub const VENDOR_ID: u16 = 0x1687;

/// Product id of the tin peripheral
pub const PRODUCT_ID: u16 = 0x3257;

/// Transmit staging buffer size; writes clamp to this many bytes
pub const MAX_PACKET_SIZE: usize = 512;

/// Node name pattern; `%d` is replaced with the minor number
pub const NODE_NAME_PATTERN: &str = "tin%d";

/// First minor number handed out for nodes
pub const NODE_MINOR_BASE: u32 = 48;

/// Number of minors reserved for nodes
pub const NODE_MINOR_COUNT: u32 = 16;
