//! Opening and describing the tin interface
//!
//! Turns a rusb device into the interface object the lifecycle controller
//! probes, with the endpoint descriptors of the active alternate setting
//! mapped into driver types.

use std::sync::Arc;

use rusb::{Context, Device};
use tracing::{debug, warn};

use driver::{BusDevice, BusInterface, Direction, EndpointDescriptor, InterfaceId, TransferKind};

use crate::device::UsbBusDevice;
use crate::error::{HostError, Result};

/// Interface number the tin device exposes its bulk pair on
pub const TIN_INTERFACE: u8 = 0;

/// Build the registry key for an interface binding
///
/// Bus number, device address, and interface number each get a byte, so
/// the same physical port re-plugging yields a fresh key only when the
/// address changes, which is how libusb behaves.
pub fn pack_interface_id(bus: u8, address: u8, interface: u8) -> InterfaceId {
    InterfaceId(((bus as u32) << 16) | ((address as u32) << 8) | interface as u32)
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_kind(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// A claimed tin interface, ready for probe
pub struct UsbBusInterface {
    id: InterfaceId,
    endpoints: Vec<EndpointDescriptor>,
    device: Arc<UsbBusDevice>,
}

impl BusInterface for UsbBusInterface {
    fn id(&self) -> InterfaceId {
        self.id
    }

    fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.endpoints.clone()
    }

    fn device(&self) -> Arc<dyn BusDevice> {
        self.device.clone()
    }
}

/// Open `device` and claim `interface_number`
///
/// Detaches an active kernel driver first, the same displacement a kernel
/// driver's bind would perform. The claim stays held for the lifetime of
/// the returned interface's device.
pub fn open_interface(device: &Device<Context>, interface_number: u8) -> Result<UsbBusInterface> {
    let bus = device.bus_number();
    let address = device.address();
    let handle = device.open()?;

    match handle.kernel_driver_active(interface_number) {
        Ok(true) => {
            debug!(
                "detaching kernel driver from interface {} (bus {}, addr {})",
                interface_number, bus, address
            );
            if let Err(e) = handle.detach_kernel_driver(interface_number) {
                warn!(
                    "failed to detach kernel driver from interface {}: {}",
                    interface_number, e
                );
            }
        }
        Ok(false) => {
            debug!("no kernel driver active on interface {}", interface_number);
        }
        Err(e) => {
            debug!(
                "could not check kernel driver status for interface {}: {}",
                interface_number, e
            );
        }
    }

    handle.claim_interface(interface_number)?;
    debug!(
        "claimed interface {} on bus {} address {}",
        interface_number, bus, address
    );

    let config = device.active_config_descriptor()?;
    let iface = config
        .interfaces()
        .find(|iface| iface.number() == interface_number)
        .ok_or(HostError::MissingInterface(interface_number))?;

    // Alternate setting 0 is the active one until somebody switches it,
    // and nothing in this driver ever does.
    let alt = iface
        .descriptors()
        .next()
        .ok_or(HostError::MissingInterface(interface_number))?;

    let endpoints = alt
        .endpoint_descriptors()
        .map(|ep| EndpointDescriptor {
            address: ep.address(),
            direction: map_direction(ep.direction()),
            kind: map_transfer_kind(ep.transfer_type()),
            max_packet_size: ep.max_packet_size(),
        })
        .collect();

    Ok(UsbBusInterface {
        id: pack_interface_id(bus, address, interface_number),
        endpoints,
        device: Arc::new(UsbBusDevice::new(handle, interface_number)),
    })
}
