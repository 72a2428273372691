//! Native USB bulk transport backed by `rusb` (libusb).

use std::time::Duration;

use log::debug;
use rusb::{Context, DeviceHandle, UsbContext};

use super::{ENDPOINT_IN, ENDPOINT_OUT, Transport, VENDOR_ID};
use crate::error::{Error, Result};

/// A bulk USB transport to a device in ODIN download mode.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    vendor_id: u16,
    product_id: u16,
}

impl UsbTransport {
    /// Discover the first device matching `vendor_id`, open it, and claim
    /// its first interface.
    ///
    /// Fails with [`Error::DeviceNotFound`] if no device matches.
    pub fn discover(vendor_id: u16) -> Result<Self> {
        Self::discover_filtered(vendor_id, None)
    }

    /// Discover the first device matching `vendor_id` and, if given,
    /// `product_id` — used to re-select a remembered device among several
    /// candidates with the same vendor ID.
    ///
    /// Fails with [`Error::DeviceNotFound`] if no device matches.
    pub fn discover_filtered(vendor_id: u16, product_id: Option<u16>) -> Result<Self> {
        let context = Context::new()?;
        let devices = context.devices()?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.vendor_id() != vendor_id {
                continue;
            }
            if let Some(pid) = product_id {
                if descriptor.product_id() != pid {
                    continue;
                }
            }

            debug!(
                "found candidate device {:04x}:{:04x}",
                descriptor.vendor_id(),
                descriptor.product_id()
            );

            let mut handle = device.open()?;
            handle.set_active_configuration(1)?;

            let interface = 0;
            handle.claim_interface(interface)?;

            return Ok(Self {
                handle,
                interface,
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
            });
        }

        Err(Error::DeviceNotFound)
    }

    /// Discover a device with the standard ODIN vendor ID (`0x04E8`).
    pub fn discover_default() -> Result<Self> {
        Self::discover(VENDOR_ID)
    }

    /// The vendor/product ID pair of the connected device, for callers that
    /// want to remember it across runs.
    #[must_use]
    pub fn device_info(&self) -> (u16, u16) {
        (self.vendor_id, self.product_id)
    }
}

/// Identifying information for a USB device, for display purposes only.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// USB bus number.
    pub bus_number: u8,
    /// Device address on its bus.
    pub address: u8,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Product ID.
    pub product_id: u16,
}

/// List every USB device matching `vendor_id`, without opening any of
/// them. Used by CLI tooling to show candidates before `discover` commits
/// to the first match.
pub fn list_devices(vendor_id: u16) -> Result<Vec<DeviceInfo>> {
    let context = Context::new()?;
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() != vendor_id {
            continue;
        }
        found.push(DeviceInfo {
            bus_number: device.bus_number(),
            address: device.address(),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
        });
    }
    Ok(found)
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.handle
            .write_bulk(ENDPOINT_OUT, data, super::DEFAULT_TIMEOUT)
            .map_err(|e| Error::TransportError(e.to_string()))?;
        Ok(())
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.handle.read_bulk(ENDPOINT_IN, &mut buf, timeout).map_err(|e| {
            if matches!(e, rusb::Error::Timeout) {
                Error::Timeout(e.to_string())
            } else {
                Error::TransportError(e.to_string())
            }
        })?;
        buf.truncate(n);
        Ok(buf)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}
