//! Test utilities for the driver core
//!
//! Scripted bus implementations and descriptor builders shared by the unit
//! and integration tests. Nothing here touches hardware; transfers complete
//! against queues and every interaction is recorded for assertions.
//!
//! # Example
//!
//! ```
//! use driver::test_utils::MockDevice;
//!
//! let device = MockDevice::new();
//! device.queue_in_packet(vec![1, 2, 3]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bus::{BusDevice, BusInterface, Direction, EndpointDescriptor, InterfaceId, TransferKind};
use crate::endpoints::ResolvedEndpoints;
use crate::error::TransportError;

/// Endpoint list with one bulk pair: IN at 0x81, OUT at 0x02
pub fn bulk_endpoints(in_max_packet: u16) -> Vec<EndpointDescriptor> {
    vec![
        EndpointDescriptor {
            address: 0x81,
            direction: Direction::In,
            kind: TransferKind::Bulk,
            max_packet_size: in_max_packet,
        },
        EndpointDescriptor {
            address: 0x02,
            direction: Direction::Out,
            kind: TransferKind::Bulk,
            max_packet_size: 512,
        },
    ]
}

/// Pre-resolved bulk pair matching [`bulk_endpoints`]
pub fn bulk_pair(in_max_packet: u16) -> ResolvedEndpoints {
    let endpoints = bulk_endpoints(in_max_packet);
    ResolvedEndpoints {
        bulk_in: endpoints[0],
        bulk_out: endpoints[1],
    }
}

#[derive(Default)]
struct MockState {
    in_queue: VecDeque<Result<Vec<u8>, TransportError>>,
    out_failures: VecDeque<TransportError>,
    accept_limit: Option<usize>,
    out_payloads: Vec<Vec<u8>>,
    in_request_lens: Vec<usize>,
    in_transfers: usize,
    out_transfers: usize,
}

/// Scripted bus device
///
/// IN transfers pop from a packet queue (an empty queue reads as a
/// timeout, like a device with nothing to say); OUT transfers record the
/// exact payload they were handed. An optional delay before each transfer
/// widens race windows for the concurrency tests.
pub struct MockDevice {
    state: Mutex<MockState>,
    delay: Mutex<Option<Duration>>,
    power_holds: AtomicUsize,
    power_denied: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            delay: Mutex::new(None),
            power_holds: AtomicUsize::new(0),
            power_denied: AtomicBool::new(false),
        }
    }

    /// Queue one packet for the next IN transfer
    pub fn queue_in_packet(&self, data: Vec<u8>) {
        self.state.lock().unwrap().in_queue.push_back(Ok(data));
    }

    /// Make the next IN transfer fail with `err`
    pub fn fail_next_in(&self, err: TransportError) {
        self.state.lock().unwrap().in_queue.push_back(Err(err));
    }

    /// Make the next OUT transfer fail with `err`
    pub fn fail_next_out(&self, err: TransportError) {
        self.state.lock().unwrap().out_failures.push_back(err);
    }

    /// Cap how many bytes OUT transfers report as accepted
    pub fn accept_at_most(&self, limit: usize) {
        self.state.lock().unwrap().accept_limit = Some(limit);
    }

    /// Sleep this long at the start of every transfer
    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Deny power holds from now on
    pub fn deny_power(&self) {
        self.power_denied.store(true, Ordering::SeqCst);
    }

    /// Outstanding power holds
    pub fn power_holds(&self) -> usize {
        self.power_holds.load(Ordering::SeqCst)
    }

    /// Every OUT payload seen so far, in completion order
    pub fn out_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().out_payloads.clone()
    }

    /// Buffer length of every IN transfer seen so far
    pub fn in_request_lens(&self) -> Vec<usize> {
        self.state.lock().unwrap().in_request_lens.clone()
    }

    /// Number of IN transfers issued
    pub fn in_transfers(&self) -> usize {
        self.state.lock().unwrap().in_transfers
    }

    /// Number of OUT transfers issued
    pub fn out_transfers(&self) -> usize {
        self.state.lock().unwrap().out_transfers
    }

    fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BusDevice for MockDevice {
    fn bulk_in(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.pause();
        let mut state = self.state.lock().unwrap();
        state.in_transfers += 1;
        state.in_request_lens.push(buf.len());
        match state.in_queue.pop_front() {
            Some(Ok(packet)) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            Some(Err(err)) => Err(err),
            None => Err(TransportError::Timeout),
        }
    }

    fn bulk_out(
        &self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.pause();
        let mut state = self.state.lock().unwrap();
        state.out_transfers += 1;
        if let Some(err) = state.out_failures.pop_front() {
            return Err(err);
        }
        let accepted = state.accept_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.out_payloads.push(data.to_vec());
        Ok(accepted)
    }

    fn power_get(&self) -> Result<(), TransportError> {
        if self.power_denied.load(Ordering::SeqCst) {
            return Err(TransportError::Other {
                message: "device refused to resume".to_string(),
            });
        }
        self.power_holds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_put(&self) {
        self.power_holds.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted interface handed to probe
pub struct MockInterface {
    id: InterfaceId,
    endpoints: Vec<EndpointDescriptor>,
    device: Arc<MockDevice>,
}

impl MockInterface {
    pub fn new(id: InterfaceId, endpoints: Vec<EndpointDescriptor>, device: Arc<MockDevice>) -> Self {
        Self {
            id,
            endpoints,
            device,
        }
    }

    /// Interface with a standard bulk pair on a fresh device
    pub fn with_bulk_pair(id: InterfaceId, in_max_packet: u16) -> Self {
        Self::new(id, bulk_endpoints(in_max_packet), Arc::new(MockDevice::new()))
    }

    /// The scripted device behind this interface
    pub fn mock(&self) -> &Arc<MockDevice> {
        &self.device
    }
}

impl BusInterface for MockInterface {
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
