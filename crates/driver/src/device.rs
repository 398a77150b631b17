//! Device handle
//!
//! One [`TinDevice`] exists per bound interface. It owns the transfer
//! buffers and a counted reference to the bus device; everything else in
//! the crate works through `Arc<TinDevice>`.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::MAX_PACKET_SIZE;
use crate::bus::{BusDevice, InterfaceId};
use crate::endpoints::ResolvedEndpoints;
use crate::error::{DriverError, Result};

/// Receive-side state, guarded as one unit
///
/// The buffer is allocated once at probe, sized to the bulk-IN endpoint's
/// maximum packet, and reused for every IN transfer. `filled` records the
/// length of the last completed transfer and `copied` how much of it was
/// handed to the caller; the synchronous read path always delivers whole
/// transfers, so the two track each other today.
pub(crate) struct ReadBuffer {
    pub(crate) buf: Vec<u8>,
    pub(crate) filled: usize,
    pub(crate) copied: usize,
}

/// Per-interface device state
///
/// Held as `Arc<TinDevice>`: the lifecycle controller owns one reference
/// while the interface is bound and each open session owns one more. The
/// last reference dropping is what tears the handle down, so a session can
/// outlive an unplug and still release cleanly.
pub struct TinDevice {
    device: Arc<dyn BusDevice>,
    interface: InterfaceId,
    bulk_in_address: u8,
    bulk_out_address: u8,
    bulk_in_max_packet: usize,
    pub(crate) read_state: Mutex<ReadBuffer>,
    pub(crate) write_buf: Mutex<[u8; MAX_PACKET_SIZE]>,
}

impl TinDevice {
    /// Build the handle for a freshly resolved interface
    ///
    /// The receive buffer allocation is the one fallible step; failure
    /// surfaces as [`DriverError::OutOfMemory`] so probe can unwind.
    pub(crate) fn new(
        device: Arc<dyn BusDevice>,
        interface: InterfaceId,
        endpoints: &ResolvedEndpoints,
    ) -> Result<Self> {
        let size = endpoints.bulk_in.max_packet_size as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| DriverError::OutOfMemory)?;
        buf.resize(size, 0);

        Ok(Self {
            device,
            interface,
            bulk_in_address: endpoints.bulk_in.address,
            bulk_out_address: endpoints.bulk_out.address,
            bulk_in_max_packet: size,
            read_state: Mutex::new(ReadBuffer {
                buf,
                filled: 0,
                copied: 0,
            }),
            write_buf: Mutex::new([0u8; MAX_PACKET_SIZE]),
        })
    }

    /// Registry key of the interface this handle is bound to
    pub fn interface(&self) -> InterfaceId {
        self.interface
    }

    /// Address of the resolved bulk-IN endpoint
    pub fn bulk_in_address(&self) -> u8 {
        self.bulk_in_address
    }

    /// Address of the resolved bulk-OUT endpoint
    pub fn bulk_out_address(&self) -> u8 {
        self.bulk_out_address
    }

    /// Maximum packet size of the bulk-IN endpoint, in bytes
    pub fn bulk_in_max_packet(&self) -> usize {
        self.bulk_in_max_packet
    }

    pub(crate) fn bus(&self) -> &Arc<dyn BusDevice> {
        &self.device
    }
}

impl Drop for TinDevice {
    fn drop(&mut self) {
        debug!(
            "device handle for interface {} destroyed, buffers released",
            self.interface.0
        );
    }
}
