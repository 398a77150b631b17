//! Bulk transfer engine
//!
//! Synchronous packet I/O against the resolved endpoint pair. Both
//! directions stage through the handle-owned buffers; each buffer's lock
//! is held across the copy and the transfer, so concurrent callers
//! serialize into whole packets instead of interleaving.

use std::time::Duration;

use tracing::{debug, warn};

use crate::MAX_PACKET_SIZE;
use crate::device::TinDevice;
use crate::error::Result;

/// Fixed timeout applied to every bulk transfer
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Read one packet from the bulk-IN endpoint into `out`
///
/// Transfers at most `min(out.len(), bulk_in_max_packet)` bytes and
/// returns the number actually received; zero is a valid completion. On
/// a transport error nothing is copied and `out` is left untouched.
pub(crate) fn read_packet(dev: &TinDevice, out: &mut [u8]) -> Result<usize> {
    let want = out.len().min(dev.bulk_in_max_packet());
    let mut state = dev.read_state.lock().unwrap();

    debug!(
        "bulk read: endpoint={:#04x}, requested={}, clamped={}",
        dev.bulk_in_address(),
        out.len(),
        want
    );

    let received = match dev
        .bus()
        .bulk_in(dev.bulk_in_address(), &mut state.buf[..want], TRANSFER_TIMEOUT)
    {
        Ok(n) => n,
        Err(err) => {
            warn!(
                "bulk read failed on endpoint {:#04x}: {}",
                dev.bulk_in_address(),
                err
            );
            return Err(err.into());
        }
    };

    state.filled = received;
    out[..received].copy_from_slice(&state.buf[..received]);
    state.copied = received;

    Ok(received)
}

/// Write one packet to the bulk-OUT endpoint
///
/// Stages `min(data.len(), MAX_PACKET_SIZE)` bytes and reports that
/// clamped length on success, regardless of how much the device chose to
/// accept; a short completion is only logged.
pub(crate) fn write_packet(dev: &TinDevice, data: &[u8]) -> Result<usize> {
    let len = data.len().min(MAX_PACKET_SIZE);
    let mut buf = dev.write_buf.lock().unwrap();
    buf[..len].copy_from_slice(&data[..len]);

    debug!(
        "bulk write: endpoint={:#04x}, requested={}, clamped={}",
        dev.bulk_out_address(),
        data.len(),
        len
    );

    let sent = match dev
        .bus()
        .bulk_out(dev.bulk_out_address(), &buf[..len], TRANSFER_TIMEOUT)
    {
        Ok(n) => n,
        Err(err) => {
            warn!(
                "bulk write failed on endpoint {:#04x}: {}",
                dev.bulk_out_address(),
                err
            );
            return Err(err.into());
        }
    };

    if sent != len {
        debug!("bulk write: device accepted {} of {} bytes", sent, len);
    }

    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bus::InterfaceId;
    use crate::error::{DriverError, TransportError};
    use crate::test_utils::{MockDevice, bulk_pair};

    fn device_with(mock: &Arc<MockDevice>, in_max: u16) -> TinDevice {
        TinDevice::new(mock.clone(), InterfaceId(1), &bulk_pair(in_max)).unwrap()
    }

    #[test]
    fn test_read_clamps_to_max_packet() {
        let mock = Arc::new(MockDevice::new());
        mock.queue_in_packet(vec![0x55; 64]);
        let dev = device_with(&mock, 64);

        let mut out = [0u8; 1024];
        let n = read_packet(&dev, &mut out).unwrap();
        assert_eq!(n, 64);
        assert_eq!(mock.in_request_lens(), vec![64]);
        assert!(out[..64].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_read_clamps_to_caller_buffer() {
        let mock = Arc::new(MockDevice::new());
        mock.queue_in_packet(vec![0x11; 64]);
        let dev = device_with(&mock, 64);

        let mut out = [0u8; 8];
        let n = read_packet(&dev, &mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(mock.in_request_lens(), vec![8]);
    }

    #[test]
    fn test_read_updates_bookkeeping() {
        let mock = Arc::new(MockDevice::new());
        mock.queue_in_packet(vec![1, 2, 3]);
        let dev = device_with(&mock, 64);

        let mut out = [0u8; 64];
        read_packet(&dev, &mut out).unwrap();
        let state = dev.read_state.lock().unwrap();
        assert_eq!(state.filled, 3);
        assert_eq!(state.copied, 3);
    }

    #[test]
    fn test_zero_length_read_is_valid() {
        let mock = Arc::new(MockDevice::new());
        mock.queue_in_packet(Vec::new());
        let dev = device_with(&mock, 64);

        let mut out = [0u8; 64];
        assert_eq!(read_packet(&dev, &mut out).unwrap(), 0);
    }

    #[test]
    fn test_read_error_leaves_caller_buffer_untouched() {
        let mock = Arc::new(MockDevice::new());
        mock.fail_next_in(TransportError::Timeout);
        let dev = device_with(&mock, 64);

        let mut out = [0xAAu8; 64];
        let err = read_packet(&dev, &mut out).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Transport(TransportError::Timeout)
        ));
        assert!(out.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_write_clamps_to_max_packet() {
        let mock = Arc::new(MockDevice::new());
        let dev = device_with(&mock, 64);

        let data = vec![0xC3u8; 600];
        let n = write_packet(&dev, &data).unwrap();
        assert_eq!(n, 512);
        let sent = mock.out_payloads();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], vec![0xC3u8; 512]);
    }

    #[test]
    fn test_write_passes_exact_payload() {
        let mock = Arc::new(MockDevice::new());
        let dev = device_with(&mock, 64);

        let data = vec![1, 2, 3, 4, 5];
        assert_eq!(write_packet(&dev, &data).unwrap(), 5);
        assert_eq!(mock.out_payloads(), vec![data]);
    }

    #[test]
    fn test_write_reports_clamped_length_on_short_accept() {
        let mock = Arc::new(MockDevice::new());
        mock.accept_at_most(200);
        let dev = device_with(&mock, 64);

        let data = vec![0u8; 600];
        assert_eq!(write_packet(&dev, &data).unwrap(), 512);
    }

    #[test]
    fn test_write_error_propagates_status() {
        let mock = Arc::new(MockDevice::new());
        mock.fail_next_out(TransportError::NoDevice);
        let dev = device_with(&mock, 64);

        let err = write_packet(&dev, &[0u8; 4]).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Transport(TransportError::NoDevice)
        ));
    }
}
