//! Interface lifecycle
//!
//! [`TinDriver`] is the piece a bus backend drives: it gets [`probe`] when
//! a matching interface appears and [`disconnect`] when it goes away, and
//! in between it owns the binding from interface to device handle and
//! registered node. Probe unwinds completely on any failure; disconnect
//! never fails outward.
//!
//! [`probe`]: TinDriver::probe
//! [`disconnect`]: TinDriver::disconnect

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use crate::bus::{BusInterface, InterfaceId, PowerToken};
use crate::device::TinDevice;
use crate::endpoints::resolve_bulk_pair;
use crate::error::{DriverError, Result};
use crate::node::{MinorNumber, NodeRegistrar};
use crate::session::{Session, TinNode};

struct Bound {
    device: Arc<TinDevice>,
    /// Assigned once node registration succeeds
    minor: Option<MinorNumber>,
}

/// Lifecycle controller for every bound interface
pub struct TinDriver {
    registrar: Arc<dyn NodeRegistrar>,
    // Handed to nodes so opens can route back here without a cycle.
    self_weak: Weak<TinDriver>,
    attached: Mutex<HashMap<InterfaceId, Bound>>,
}

impl TinDriver {
    pub fn new(registrar: Arc<dyn NodeRegistrar>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registrar,
            self_weak: weak.clone(),
            attached: Mutex::new(HashMap::new()),
        })
    }

    /// Bind a matching interface
    ///
    /// Resolves the bulk endpoint pair, builds the device handle, then
    /// associates it and registers a node for it. Every failure releases
    /// whatever was set up before it, leaving no trace of the attempt.
    pub fn probe(&self, iface: &dyn BusInterface) -> Result<MinorNumber> {
        let id = iface.id();
        let endpoints = iface.endpoints();

        debug!("probing interface {}: {} endpoints", id.0, endpoints.len());
        for ep in &endpoints {
            debug!(
                "endpoint {:#04x}: {:?} {:?}, max packet {}",
                ep.address, ep.kind, ep.direction, ep.max_packet_size
            );
        }

        let resolved = match resolve_bulk_pair(&endpoints) {
            Ok(resolved) => resolved,
            Err(err) => {
                error!("could not find both bulk-in and bulk-out endpoints");
                return Err(err);
            }
        };
        debug!(
            "resolved bulk pair: in={:#04x} (max packet {}), out={:#04x}",
            resolved.bulk_in.address, resolved.bulk_in.max_packet_size, resolved.bulk_out.address
        );

        let device = Arc::new(TinDevice::new(iface.device(), id, &resolved)?);

        {
            let mut attached = self.attached.lock().unwrap();
            if attached.contains_key(&id) {
                warn!("interface {} is already bound", id.0);
                return Err(DriverError::DeviceBusy);
            }
            attached.insert(
                id,
                Bound {
                    device: device.clone(),
                    minor: None,
                },
            );
        }

        let node = Arc::new(TinNode::new(self.self_weak.clone(), id));
        match self.registrar.register(node) {
            Ok(minor) => {
                let mut attached = self.attached.lock().unwrap();
                if let Some(bound) = attached.get_mut(&id) {
                    bound.minor = Some(minor);
                }
                info!("tin device attached on minor {}", minor.0);
                Ok(minor)
            }
            Err(err) => {
                error!("node registration failed for interface {}: {}", id.0, err);
                self.attached.lock().unwrap().remove(&id);
                Err(err.into())
            }
        }
    }

    /// Unbind an interface after the device went away
    ///
    /// New opens stop finding the handle immediately; sessions already
    /// open keep their references and fail at transfer time. An unknown
    /// interface is only worth a warning, unplug races make it normal.
    pub fn disconnect(&self, id: InterfaceId) {
        let bound = self.attached.lock().unwrap().remove(&id);
        match bound {
            Some(bound) => {
                if let Some(minor) = bound.minor {
                    self.registrar.deregister(minor);
                    info!("tin device on minor {} now disconnected", minor.0);
                } else {
                    info!("interface {} detached before registration finished", id.0);
                }
            }
            None => warn!("disconnect for unknown interface {}", id.0),
        }
    }

    /// Disconnect everything still attached, in minor order
    pub fn shutdown(&self) {
        let ids: Vec<InterfaceId> = {
            let attached = self.attached.lock().unwrap();
            let mut entries: Vec<(Option<MinorNumber>, InterfaceId)> = attached
                .iter()
                .map(|(id, bound)| (bound.minor, *id))
                .collect();
            entries.sort();
            entries.into_iter().map(|(_, id)| id).collect()
        };
        for id in ids {
            self.disconnect(id);
        }
    }

    /// Number of interfaces currently bound
    pub fn attached_count(&self) -> usize {
        self.attached.lock().unwrap().len()
    }

    /// Open a session on a bound interface
    ///
    /// The returned session owns a device reference and a power hold of
    /// its own. The lookup failing means the node outlived its device.
    pub(crate) fn open_session(&self, interface: InterfaceId) -> Result<Session> {
        let device = {
            let attached = self.attached.lock().unwrap();
            attached.get(&interface).map(|bound| bound.device.clone())
        };
        let device = device.ok_or(DriverError::NoSuchDevice)?;

        let power = match PowerToken::acquire(device.bus().clone()) {
            Ok(power) => power,
            Err(err) => {
                debug!("power hold denied for interface {}: {}", interface.0, err);
                return Err(DriverError::DeviceBusy);
            }
        };

        debug!("session opened on interface {}", interface.0);
        Ok(Session::new(device, power))
    }
}
