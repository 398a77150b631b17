//! Driver Integration Tests
//!
//! End-to-end scenarios over the driver core with a scripted bus:
//! - Attach and probe unwinding
//! - Session reference counting and power holds
//! - Transfer clamping and error propagation
//! - Concurrent access to one device
//!
//! Run with: `cargo test -p driver --test lifecycle_tests`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use driver::test_utils::{MockDevice, MockInterface, bulk_endpoints};
use driver::{
    Direction, DriverError, EndpointDescriptor, InterfaceId, MinorNumber, NodeClass, NodeTable,
    RegistrarError, TinDriver, TransferKind, TransportError,
};

fn table_with(minor_count: u32) -> Arc<NodeTable> {
    Arc::new(NodeTable::new(NodeClass {
        minor_count,
        ..NodeClass::default()
    }))
}

fn default_table() -> Arc<NodeTable> {
    Arc::new(NodeTable::new(NodeClass::default()))
}

// ============================================================================
// Attach / Probe
// ============================================================================

#[test]
fn test_probe_registers_a_node() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);

    let minor = driver.probe(&iface).unwrap();
    assert_eq!(minor, MinorNumber(48));
    assert_eq!(table.minors(), vec![MinorNumber(48)]);
    assert_eq!(table.node_name(minor), "tin48");
    assert_eq!(driver.attached_count(), 1);
}

#[test]
fn test_probe_without_bulk_pair_leaves_no_trace() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());

    let device = Arc::new(MockDevice::new());
    let endpoints = vec![EndpointDescriptor {
        address: 0x83,
        direction: Direction::In,
        kind: TransferKind::Interrupt,
        max_packet_size: 8,
    }];
    let iface = MockInterface::new(InterfaceId(1), endpoints, device);

    let err = driver.probe(&iface).unwrap_err();
    assert!(matches!(err, DriverError::NoEndpoints));
    assert_eq!(driver.attached_count(), 0);
    assert!(table.minors().is_empty());
    // The interface holds the only remaining reference to the bus device.
    assert_eq!(Arc::strong_count(iface.mock()), 1);
}

#[test]
fn test_probe_unwinds_when_minors_run_out() {
    let table = table_with(1);
    let driver = TinDriver::new(table.clone());

    driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(1), 64))
        .unwrap();

    let second = MockInterface::with_bulk_pair(InterfaceId(2), 64);
    let err = driver.probe(&second).unwrap_err();
    assert!(matches!(
        err,
        DriverError::Registration(RegistrarError::MinorsExhausted)
    ));
    assert_eq!(driver.attached_count(), 1);
    assert_eq!(table.minors(), vec![MinorNumber(48)]);
    assert_eq!(Arc::strong_count(second.mock()), 1);
}

#[test]
fn test_minors_are_allocated_lowest_first_and_reused() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());

    let a = driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(1), 64))
        .unwrap();
    let b = driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(2), 64))
        .unwrap();
    assert_eq!((a, b), (MinorNumber(48), MinorNumber(49)));

    driver.disconnect(InterfaceId(1));
    let c = driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(3), 64))
        .unwrap();
    assert_eq!(c, MinorNumber(48));
}

// ============================================================================
// Sessions and reference counting
// ============================================================================

#[test]
fn test_two_sessions_hold_three_references() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let minor = driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(1), 64))
        .unwrap();

    let first = table.open(minor).unwrap();
    let second = table.open(minor).unwrap();
    assert_eq!(Arc::strong_count(first.device()), 3);

    second.close();
    assert_eq!(Arc::strong_count(first.device()), 2);
}

#[test]
fn test_open_after_detach_fails() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let minor = driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(1), 64))
        .unwrap();

    driver.disconnect(InterfaceId(1));
    assert!(matches!(table.open(minor), Err(DriverError::NoSuchDevice)));
}

#[test]
fn test_session_survives_detach_until_closed() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    let session = table.open(minor).unwrap();
    let weak = Arc::downgrade(session.device());

    driver.disconnect(InterfaceId(1));

    // The handle is still alive through the session and transfers still
    // reach the bus; only the hardware's absence makes them fail.
    assert!(weak.upgrade().is_some());
    assert_eq!(session.write(&[1, 2, 3]).unwrap(), 3);
    assert_eq!(mock.out_payloads().len(), 1);

    mock.fail_next_out(TransportError::NoDevice);
    let err = session.write(&[4]).unwrap_err();
    assert!(matches!(
        err,
        DriverError::Transport(TransportError::NoDevice)
    ));

    session.close();
    assert!(weak.upgrade().is_none());
    assert_eq!(mock.power_holds(), 0);
}

#[test]
fn test_power_holds_follow_session_lifetimes() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    let first = table.open(minor).unwrap();
    let second = table.open(minor).unwrap();
    assert_eq!(mock.power_holds(), 2);

    first.close();
    assert_eq!(mock.power_holds(), 1);
    second.close();
    assert_eq!(mock.power_holds(), 0);
}

#[test]
fn test_suspended_device_rejects_open() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    mock.deny_power();
    assert!(matches!(table.open(minor), Err(DriverError::DeviceBusy)));
    assert_eq!(mock.power_holds(), 0);
}

// ============================================================================
// Transfers through sessions
// ============================================================================

#[test]
fn test_write_clamps_to_packet_size() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    let session = table.open(minor).unwrap();
    let n = session.write(&vec![0xEE; 600]).unwrap();
    assert_eq!(n, 512);
    assert_eq!(mock.out_payloads()[0].len(), 512);
}

#[test]
fn test_each_read_issues_a_fresh_transfer() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    mock.queue_in_packet(vec![0x01; 16]);
    mock.queue_in_packet(vec![0x02; 16]);

    let session = table.open(minor).unwrap();
    let mut out = [0u8; 64];

    assert_eq!(session.read(&mut out).unwrap(), 16);
    assert_eq!(out[0], 0x01);
    assert_eq!(session.read(&mut out).unwrap(), 16);
    assert_eq!(out[0], 0x02);
    assert_eq!(mock.in_transfers(), 2);
}

#[test]
fn test_read_timeout_surfaces_transport_status() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let minor = driver
        .probe(&MockInterface::with_bulk_pair(InterfaceId(1), 64))
        .unwrap();

    let session = table.open(minor).unwrap();
    let mut out = [0u8; 64];
    let err = session.read(&mut out).unwrap_err();
    assert!(matches!(
        err,
        DriverError::Transport(TransportError::Timeout)
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_writers_emit_whole_packets() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    mock.set_transfer_delay(Duration::from_millis(2));

    let writes_per_thread = 8;
    let mut handles = Vec::new();
    for byte in [0xAAu8, 0xBB, 0xCC] {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            let session = table.open(minor).unwrap();
            for _ in 0..writes_per_thread {
                let len = 200 + byte as usize;
                assert_eq!(session.write(&vec![byte; len]).unwrap(), len);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let payloads = mock.out_payloads();
    assert_eq!(payloads.len(), 3 * writes_per_thread);
    for payload in payloads {
        let first = payload[0];
        assert_eq!(payload.len(), 200 + first as usize);
        assert!(payload.iter().all(|&b| b == first));
    }
}

#[test]
fn test_reader_and_writer_can_overlap() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());
    let iface = MockInterface::with_bulk_pair(InterfaceId(1), 64);
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    for _ in 0..16 {
        mock.queue_in_packet(vec![0x5A; 32]);
    }
    mock.set_transfer_delay(Duration::from_millis(1));

    let reader_table = table.clone();
    let reader = thread::spawn(move || {
        let session = reader_table.open(minor).unwrap();
        let mut out = [0u8; 64];
        for _ in 0..16 {
            assert_eq!(session.read(&mut out).unwrap(), 32);
        }
    });
    let writer = thread::spawn(move || {
        let session = table.open(minor).unwrap();
        for _ in 0..16 {
            assert_eq!(session.write(&[0xA5; 32]).unwrap(), 32);
        }
    });

    reader.join().unwrap();
    writer.join().unwrap();
    assert_eq!(mock.in_transfers(), 16);
    assert_eq!(mock.out_transfers(), 16);
}

// ============================================================================
// Endpoint ordering
// ============================================================================

#[test]
fn test_probe_uses_first_bulk_pair_in_descriptor_order() {
    let table = default_table();
    let driver = TinDriver::new(table.clone());

    let mut endpoints = bulk_endpoints(64);
    endpoints.push(EndpointDescriptor {
        address: 0x85,
        direction: Direction::In,
        kind: TransferKind::Bulk,
        max_packet_size: 512,
    });
    let iface = MockInterface::new(InterfaceId(1), endpoints, Arc::new(MockDevice::new()));
    let mock = iface.mock().clone();
    let minor = driver.probe(&iface).unwrap();

    // Reads clamp to the first IN endpoint's 64-byte packets, not the
    // later endpoint's 512.
    let session = table.open(minor).unwrap();
    mock.queue_in_packet(vec![0u8; 512]);
    let mut out = [0u8; 512];
    assert_eq!(session.read(&mut out).unwrap(), 64);
    assert_eq!(mock.in_request_lens(), vec![64]);
}
