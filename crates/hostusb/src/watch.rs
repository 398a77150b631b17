//! Bus watching
//!
//! A dedicated thread owns the libusb event loop: hotplug callbacks
//! forward arrivals and removals over a channel, and the loop drains it
//! between `handle_events` rounds, probing and disconnecting the driver
//! as the matching device comes and goes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use tracing::{debug, error, info, warn};

use driver::{PRODUCT_ID, TinDriver, VENDOR_ID};

use crate::error::Result;
use crate::interface::{TIN_INTERFACE, open_interface, pack_interface_id};

enum WatchEvent {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// Forwards hotplug callbacks onto the watcher's channel
///
/// Callbacks run inside `handle_events` on the watch thread; they only
/// hand the event over, the loop does the actual work outside libusb's
/// callback context.
struct HotplugForwarder {
    sender: async_channel::Sender<WatchEvent>,
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "hotplug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.sender.send_blocking(WatchEvent::Arrived(device)) {
            error!("failed to forward arrival event: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "hotplug: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let event = WatchEvent::Left {
            bus: device.bus_number(),
            address: device.address(),
        };
        if let Err(e) = self.sender.send_blocking(event) {
            error!("failed to forward removal event: {}", e);
        }
    }
}

/// Watches the bus for the tin device and drives the lifecycle controller
pub struct HotplugWatcher {
    context: Context,
    driver: Arc<TinDriver>,
    events: async_channel::Receiver<WatchEvent>,
    running: Arc<AtomicBool>,
    _registration: Registration<Context>,
}

impl HotplugWatcher {
    /// Set up the context and register for matching hotplug events
    ///
    /// Registration is filtered to the tin vendor and product id, so the
    /// channel only ever carries devices we care about.
    pub fn new(driver: Arc<TinDriver>) -> Result<Self> {
        let context = Context::new()?;
        let (sender, events) = async_channel::bounded(32);

        let registration = HotplugBuilder::new()
            .vendor_id(VENDOR_ID)
            .product_id(PRODUCT_ID)
            .enumerate(false) // initial scan happens in run()
            .register(&context, Box::new(HotplugForwarder { sender }))?;

        Ok(Self {
            context,
            driver,
            events,
            running: Arc::new(AtomicBool::new(true)),
            _registration: registration,
        })
    }

    /// Flag that stops [`run`] when cleared
    ///
    /// [`run`]: HotplugWatcher::run
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run the watch loop until the running flag is cleared
    ///
    /// Scans for already-plugged devices first, then alternates between
    /// draining forwarded events and pumping libusb. On exit every
    /// remaining binding is disconnected.
    pub fn run(self) {
        info!("usb watch started");
        self.attach_existing();

        while self.running.load(Ordering::SeqCst) {
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event);
            }

            match self.context.handle_events(Some(Duration::from_millis(100))) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("usb event handling interrupted");
                }
                Err(e) => {
                    warn!("error handling usb events: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        self.driver.shutdown();
        info!("usb watch stopped");
    }

    fn attach_existing(&self) {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("failed to enumerate devices: {}", e);
                return;
            }
        };

        let mut found = 0;
        for device in devices.iter() {
            if Self::matches(&device) {
                found += 1;
                self.attach(device);
            }
        }
        debug!("initial scan complete, {} matching device(s)", found);
    }

    fn matches(device: &Device<Context>) -> bool {
        device
            .device_descriptor()
            .map(|desc| desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID)
            .unwrap_or(false)
    }

    fn attach(&self, device: Device<Context>) {
        let (bus, address) = (device.bus_number(), device.address());
        info!("tin device found on bus {} address {}", bus, address);

        match open_interface(&device, TIN_INTERFACE) {
            Ok(iface) => {
                if let Err(err) = self.driver.probe(&iface) {
                    warn!("probe failed for bus {} address {}: {}", bus, address, err);
                }
            }
            Err(err) => {
                warn!(
                    "could not open tin device on bus {} address {}: {}",
                    bus, address, err
                );
            }
        }
    }

    fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Arrived(device) => self.attach(device),
            WatchEvent::Left { bus, address } => {
                self.driver
                    .disconnect(pack_interface_id(bus, address, TIN_INTERFACE));
            }
        }
    }
}

/// Spawn the watch loop on its own named thread
pub fn spawn_watcher(
    driver: Arc<TinDriver>,
) -> Result<(std::thread::JoinHandle<()>, Arc<AtomicBool>)> {
    let watcher = HotplugWatcher::new(driver)?;
    let running = watcher.running_flag();
    let handle = std::thread::Builder::new()
        .name("usb-watch".to_string())
        .spawn(move || watcher.run())
        .expect("Failed to spawn usb watch thread");
    Ok((handle, running))
}

/// One matching device on the bus, for listings
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

/// Enumerate every tin device currently on the bus
pub fn list_devices() -> Result<Vec<DeviceListing>> {
    let context = Context::new()?;
    let mut listings = Vec::new();

    for device in context.devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() != VENDOR_ID || desc.product_id() != PRODUCT_ID {
            continue;
        }

        // Strings need an open handle; skip them if the device is busy.
        let product = device.open().ok().and_then(|handle| {
            desc.product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        });

        listings.push(DeviceListing {
            bus_number: device.bus_number(),
            address: device.address(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            product,
        });
    }

    Ok(listings)
}
