//! USB access for the F710 via libusb
//!
//! [`ConnectionManager`] finds the controller by vendor/product ID, claims
//! its interface and hands out a [`DeviceHandle`] bound to the first
//! endpoint of the first interface. Backends sit behind [`UsbBackend`] so the
//! poll state machine can run against scripted devices in tests.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;
use std::time::Duration;

use rusb::UsbContext;

use crate::config::DeviceId;
use crate::report::DecodeError;

/// Buffer size used when the endpoint reports no max packet size
const FALLBACK_PACKET_SIZE: usize = 32;

// ============================================================================
// Traits
// ============================================================================

/// An open, claimed controller interface
pub trait DeviceHandle: Send {
    /// Identity of the matched device
    fn device_id(&self) -> &DeviceId;

    /// Size of one report read from the bound endpoint
    fn packet_size(&self) -> usize;

    /// Blocking read of one report into `buf`
    ///
    /// Returns the number of bytes read. A timeout surfaces as
    /// [`LinkError::ReadTimeout`].
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;

    /// Release the claimed interface
    ///
    /// Failures come back as [`LinkError::ReleaseFailure`].
    fn release(self: Box<Self>) -> Result<(), LinkError>;
}

/// Source of [`DeviceHandle`]s
pub trait UsbBackend: Send {
    /// Open and claim the first device matching `ids`, in order
    ///
    /// Fails with [`LinkError::DeviceAbsent`] when no matching device is
    /// present.
    fn open(&mut self, ids: &[DeviceId], interface: u8) -> Result<Box<dyn DeviceHandle>, LinkError>;
}

/// Try every id in order until one opens
///
/// Absent ids are skipped. Any other failure is logged and the next id is
/// tried; if nothing opens, the last such failure is returned, or
/// [`LinkError::DeviceAbsent`] if every id was absent.
/// [`LinkError::TransportUnavailable`] stops the search immediately.
pub fn open_first<H, F>(ids: &[DeviceId], mut try_open: F) -> Result<H, LinkError>
where
    F: FnMut(&DeviceId) -> Result<H, LinkError>,
{
    let mut last_error = None;

    for id in ids {
        match try_open(id) {
            Ok(handle) => return Ok(handle),
            Err(LinkError::DeviceAbsent) => {
                tracing::debug!(device = %id, "Controller not found");
            }
            Err(e @ LinkError::TransportUnavailable(_)) => return Err(e),
            Err(e) => {
                tracing::debug!(device = %id, error = %e, "Could not open controller, trying next id");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(LinkError::DeviceAbsent))
}

// ============================================================================
// Connection Manager
// ============================================================================

/// Discover/claim/release bookkeeping for one controller
pub struct ConnectionManager {
    backend: Box<dyn UsbBackend>,
    devices: Vec<DeviceId>,
    interface: u8,
    initial_retry: Duration,
    reconnect_retry: Duration,
    /// Set after the first successful acquisition
    ever_connected: bool,
}

impl ConnectionManager {
    pub fn new(
        backend: Box<dyn UsbBackend>,
        devices: Vec<DeviceId>,
        interface: u8,
        initial_retry: Duration,
        reconnect_retry: Duration,
    ) -> Self {
        Self {
            backend,
            devices,
            interface,
            initial_retry,
            reconnect_retry,
            ever_connected: false,
        }
    }

    /// Build a manager from the daemon configuration
    pub fn from_config(backend: Box<dyn UsbBackend>, config: &crate::config::Config) -> Self {
        Self::new(
            backend,
            config.devices.clone(),
            config.interface,
            config.initial_retry(),
            config.reconnect_retry(),
        )
    }

    /// Try once to find and claim the controller
    ///
    /// Returns `Ok(None)` when the controller is absent. Only
    /// [`LinkError::TransportUnavailable`] is returned as an error; any other
    /// failure while opening is logged and reported as absent.
    pub fn acquire(&mut self) -> Result<Option<Box<dyn DeviceHandle>>, LinkError> {
        match self.backend.open(&self.devices, self.interface) {
            Ok(handle) => {
                let id = handle.device_id();
                if id.is_wired() {
                    tracing::info!(
                        device = %id,
                        "Wired F710 pairing found, switch the controller to XInput mode if no input arrives"
                    );
                } else {
                    tracing::info!(device = %id, "F710 controller found");
                }
                self.ever_connected = true;
                Ok(Some(handle))
            }
            Err(LinkError::DeviceAbsent) => Ok(None),
            Err(e @ LinkError::TransportUnavailable(_)) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open controller, treating as absent");
                Ok(None)
            }
        }
    }

    /// Delay before the next acquisition attempt
    ///
    /// Long until the controller has been seen once, short afterwards.
    pub fn retry_delay(&self) -> Duration {
        if self.ever_connected {
            self.reconnect_retry
        } else {
            self.initial_retry
        }
    }

    /// Whether the controller has been acquired at least once
    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    /// Best-effort release, failures are logged and swallowed
    pub fn release(&mut self, handle: Box<dyn DeviceHandle>) {
        let id = handle.device_id().clone();
        match handle.release() {
            Ok(()) => tracing::debug!(device = %id, "Controller interface released"),
            Err(e) => tracing::debug!(device = %id, error = %e, "Ignoring release failure"),
        }
    }
}

// ============================================================================
// libusb backend
// ============================================================================

/// Backend standing in for libusb when it could not be initialised
///
/// Every open fails with [`LinkError::TransportUnavailable`], which parks the
/// poll loop.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl UsbBackend for UnavailableBackend {
    fn open(&mut self, _ids: &[DeviceId], _interface: u8) -> Result<Box<dyn DeviceHandle>, LinkError> {
        Err(LinkError::TransportUnavailable(self.reason.clone()))
    }
}

/// libusb backend, or [`UnavailableBackend`] if libusb cannot be initialised
pub fn default_backend() -> Box<dyn UsbBackend> {
    match RusbBackend::new() {
        Ok(backend) => Box::new(backend),
        Err(LinkError::TransportUnavailable(reason)) => Box::new(UnavailableBackend::new(reason)),
        Err(e) => Box::new(UnavailableBackend::new(e.to_string())),
    }
}

/// [`UsbBackend`] on top of a libusb context
pub struct RusbBackend {
    context: rusb::Context,
}

impl RusbBackend {
    /// Initialise libusb
    ///
    /// Fails with [`LinkError::TransportUnavailable`] if the library cannot
    /// be loaded or initialised.
    pub fn new() -> Result<Self, LinkError> {
        let context =
            rusb::Context::new().map_err(|e| LinkError::TransportUnavailable(e.to_string()))?;
        tracing::debug!("libusb context created");
        Ok(Self { context })
    }

    /// List every device on the bus that matches one of `ids`
    pub fn list_devices(&self, ids: &[DeviceId]) -> Result<Vec<UsbDeviceInfo>, LinkError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| LinkError::TransportUnavailable(e.to_string()))?;

        let mut found = Vec::new();
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping device without descriptor");
                    continue;
                }
            };

            if let Some(id) = ids.iter().find(|id| {
                id.vendor_id == descriptor.vendor_id() && id.product_id == descriptor.product_id()
            }) {
                found.push(UsbDeviceInfo {
                    id: id.clone(),
                    bus: device.bus_number(),
                    address: device.address(),
                });
            }
        }

        Ok(found)
    }

    fn claim(
        &self,
        mut handle: rusb::DeviceHandle<rusb::Context>,
        id: &DeviceId,
        interface: u8,
    ) -> Result<RusbHandle, LinkError> {
        handle.reset().map_err(classify)?;

        let detached = claim_with_driver(&mut handle, interface)?;

        let (endpoint, packet_size) = match interface_endpoint(&handle, interface) {
            Ok(ep) => ep,
            Err(e) => {
                unclaim(&mut handle, interface, detached);
                return Err(e);
            }
        };

        tracing::info!(
            device = %id,
            interface,
            endpoint = %format!("0x{:02X}", endpoint),
            packet_size,
            "Claimed controller interface"
        );

        Ok(RusbHandle {
            handle,
            id: id.clone(),
            interface,
            endpoint,
            packet_size,
            detached,
        })
    }
}

impl UsbBackend for RusbBackend {
    fn open(&mut self, ids: &[DeviceId], interface: u8) -> Result<Box<dyn DeviceHandle>, LinkError> {
        let devices = self.context.devices().map_err(classify)?;

        open_first(ids, |id| {
            let device = find_device(&devices, id).ok_or(LinkError::DeviceAbsent)?;
            // Open errors such as EACCES surface here instead of as "absent"
            let handle = device.open().map_err(classify)?;
            let claimed = self.claim(handle, id, interface)?;
            Ok(Box::new(claimed) as Box<dyn DeviceHandle>)
        })
    }
}

fn find_device(
    devices: &rusb::DeviceList<rusb::Context>,
    id: &DeviceId,
) -> Option<rusb::Device<rusb::Context>> {
    devices.iter().find(|device| {
        device
            .device_descriptor()
            .map(|d| d.vendor_id() == id.vendor_id && d.product_id() == id.product_id)
            .unwrap_or(false)
    })
}

// ============================================================================
// Interface claiming
// ============================================================================

/// Interface-level operations used while claiming
pub trait InterfaceClaim {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;
}

impl InterfaceClaim for rusb::DeviceHandle<rusb::Context> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        rusb::DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::release_interface(self, interface)
    }
}

/// Detach an active kernel driver (best-effort) and claim `interface`
///
/// Returns whether a driver was detached. If the claim fails the driver is
/// attached again.
pub fn claim_with_driver<C: InterfaceClaim>(handle: &mut C, interface: u8) -> Result<bool, LinkError> {
    let detached = match handle.kernel_driver_active(interface) {
        Ok(true) => match handle.detach_kernel_driver(interface) {
            Ok(()) => {
                tracing::debug!(interface, "Kernel driver detached");
                true
            }
            Err(e) => {
                tracing::warn!(interface, error = %e, "Could not detach kernel driver");
                false
            }
        },
        Ok(false) => false,
        Err(e) => {
            tracing::debug!(interface, error = %e, "Kernel driver state unknown");
            false
        }
    };

    if let Err(e) = handle.claim_interface(interface) {
        if detached {
            reattach(handle, interface);
        }
        return Err(classify(e));
    }

    Ok(detached)
}

/// Release `interface` and hand it back to the kernel driver, both best-effort
fn unclaim<C: InterfaceClaim>(handle: &mut C, interface: u8, detached: bool) {
    if let Err(e) = handle.release_interface(interface) {
        tracing::debug!(interface, error = %e, "Ignoring release failure");
    }
    if detached {
        reattach(handle, interface);
    }
}

fn reattach<C: InterfaceClaim>(handle: &mut C, interface: u8) {
    match handle.attach_kernel_driver(interface) {
        Ok(()) => tracing::debug!(interface, "Kernel driver reattached"),
        Err(e) => tracing::debug!(interface, error = %e, "Could not reattach kernel driver"),
    }
}

/// First endpoint of `interface` in the active configuration
fn interface_endpoint(
    handle: &rusb::DeviceHandle<rusb::Context>,
    interface: u8,
) -> Result<(u8, usize), LinkError> {
    let config = handle
        .device()
        .active_config_descriptor()
        .map_err(classify)?;

    let interfaces = config.interfaces().map(|iface| {
        let endpoint = iface
            .descriptors()
            .next()
            .and_then(|descriptor| descriptor.endpoint_descriptors().next())
            .map(|ep| (ep.address(), ep.max_packet_size()));
        (iface.number(), endpoint)
    });

    pick_endpoint(interfaces, interface)
}

/// Select the first endpoint of interface number `interface`
///
/// Each item is an interface number with the address and max packet size of
/// its first endpoint, if any.
pub fn pick_endpoint<I>(interfaces: I, interface: u8) -> Result<(u8, usize), LinkError>
where
    I: IntoIterator<Item = (u8, Option<(u8, u16)>)>,
{
    let (address, max_packet_size) = interfaces
        .into_iter()
        .find(|(number, _)| *number == interface)
        .ok_or_else(|| LinkError::Fault(format!("no interface {}", interface)))?
        .1
        .ok_or_else(|| LinkError::Fault(format!("no endpoint on interface {}", interface)))?;

    let packet_size = match max_packet_size as usize {
        0 => FALLBACK_PACKET_SIZE,
        n => n,
    };

    Ok((address, packet_size))
}

/// Claimed F710 interface
pub struct RusbHandle {
    handle: rusb::DeviceHandle<rusb::Context>,
    id: DeviceId,
    interface: u8,
    endpoint: u8,
    packet_size: usize,
    /// Kernel driver was detached while claiming
    detached: bool,
}

impl DeviceHandle for RusbHandle {
    fn device_id(&self) -> &DeviceId {
        &self.id
    }

    fn packet_size(&self) -> usize {
        self.packet_size
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        self.handle
            .read_interrupt(self.endpoint, buf, timeout)
            .map_err(classify)
    }

    fn release(mut self: Box<Self>) -> Result<(), LinkError> {
        let interface = self.interface;
        let released = self
            .handle
            .release_interface(interface)
            .map_err(|e| LinkError::ReleaseFailure(e.to_string()));
        if self.detached {
            reattach(&mut self.handle, interface);
        }
        released
    }
}

/// A matching device found on the bus
#[derive(Debug, Clone)]
pub struct UsbDeviceInfo {
    pub id: DeviceId,
    pub bus: u8,
    pub address: u8,
}

// ============================================================================
// Error Types
// ============================================================================

/// Map a libusb error onto the link taxonomy
pub fn classify(error: rusb::Error) -> LinkError {
    match error {
        rusb::Error::Timeout => LinkError::ReadTimeout,
        rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::NotFound => {
            LinkError::Disconnect(error.to_string())
        }
        other => LinkError::Fault(other.to_string()),
    }
}

/// Failures seen by the poll loop
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// libusb could not be initialised, fatal for the feature
    TransportUnavailable(String),
    /// No matching controller on the bus
    DeviceAbsent,
    /// No report within the read timeout
    ReadTimeout,
    /// Device removed or I/O failure
    Disconnect(String),
    /// Any other transport failure, handled like a disconnect
    Fault(String),
    /// Report could not be decoded, handled like a disconnect
    Decode(DecodeError),
    /// Interface release failed, always swallowed
    ReleaseFailure(String),
}

impl LinkError {
    /// True for failures that end the current connection
    ///
    /// Only a read timeout keeps it; release failures are cleanup noise.
    pub fn ends_connection(&self) -> bool {
        !matches!(self, LinkError::ReadTimeout | LinkError::ReleaseFailure(_))
    }
}

impl From<DecodeError> for LinkError {
    fn from(e: DecodeError) -> Self {
        LinkError::Decode(e)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::TransportUnavailable(e) => write!(f, "USB backend unavailable: {}", e),
            LinkError::DeviceAbsent => write!(f, "F710 controller not found"),
            LinkError::ReadTimeout => write!(f, "Read timed out"),
            LinkError::Disconnect(e) => write!(f, "Controller disconnected: {}", e),
            LinkError::Fault(e) => write!(f, "USB transport fault: {}", e),
            LinkError::Decode(e) => write!(f, "Malformed report: {}", e),
            LinkError::ReleaseFailure(e) => write!(f, "Interface release failed: {}", e),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Decode(e) => Some(e),
            _ => None,
        }
    }
}
