//! AOA protocol types and constants
//!
//! This module defines the vendor request codes, fixed identifiers, and
//! identification types of the accessory handshake. All values are part of
//! the wire contract and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor request: read the accessory protocol version a device supports.
///
/// Device-to-host, returns a 2-byte little-endian unsigned version where
/// zero means the device has no accessory support.
pub const REQUEST_GET_PROTOCOL: u8 = 51;

/// Vendor request: send one identification string.
///
/// Host-to-device; `wIndex` selects the string slot (see [`AccessoryString`]).
pub const REQUEST_SEND_STRING: u8 = 52;

/// Vendor request: restart the device in accessory mode. No payload.
pub const REQUEST_START_ACCESSORY: u8 = 53;

/// Vendor ID a device re-enumerates under once switched to accessory mode.
pub const ACCESSORY_VENDOR_ID: u16 = 0x18d1;

/// Product IDs of a switched device (accessory, accessory + ADB).
pub const ACCESSORY_PRODUCT_IDS: [u16; 2] = [0x2d00, 0x2d01];

/// Bulk IN endpoint of the accessory interface.
pub const ENDPOINT_IN: u8 = 0x81;

/// Bulk OUT endpoint of the accessory interface.
pub const ENDPOINT_OUT: u8 = 0x01;

/// Interface claimed for the lifetime of an accessory session.
pub const ACCESSORY_INTERFACE: u8 = 0;

/// Maximum bytes moved per bulk transfer. Reads and writes share this
/// capacity; larger writes are segmented (see [`crate::chunk`]).
pub const TRANSFER_CAPACITY: usize = 16384;

/// USB vendor/product identifier pair
///
/// Used both as allow-list entries for devices that should be switched into
/// accessory mode and to classify incoming hotplug events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Create an identity from a vendor/product pair
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Whether this identity is one a switched device re-enumerates under
    pub fn is_accessory(&self) -> bool {
        self.vendor_id == ACCESSORY_VENDOR_ID && ACCESSORY_PRODUCT_IDS.contains(&self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Identification string slots of the accessory handshake
///
/// The discriminant order matches the fixed order the accessory-side
/// implementation expects to receive the strings in, before the start
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessoryString {
    Manufacturer,
    Model,
    Description,
    Version,
    Uri,
    SerialNumber,
}

impl AccessoryString {
    /// `wIndex` value of vendor request 52 for this slot
    pub fn index(self) -> u16 {
        match self {
            Self::Manufacturer => 0,
            Self::Model => 1,
            Self::Description => 2,
            Self::Version => 3,
            Self::Uri => 4,
            Self::SerialNumber => 5,
        }
    }

    /// Operation label used to annotate transfer failures
    pub fn label(self) -> &'static str {
        match self {
            Self::Manufacturer => "send manufacturer string",
            Self::Model => "send model string",
            Self::Description => "send description string",
            Self::Version => "send version string",
            Self::Uri => "send uri string",
            Self::SerialNumber => "send serial number string",
        }
    }
}

/// Identification strings sent during the mode-switch handshake
///
/// Manufacturer and model are mandatory and sent unconditionally; the
/// remaining fields are skipped when absent. A profile is immutable for the
/// lifetime of one watcher instance and reused for every handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessoryProfile {
    pub manufacturer: String,
    pub model: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl AccessoryProfile {
    /// Create a profile with only the mandatory fields set
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            description: None,
            version: None,
            uri: None,
            serial_number: None,
        }
    }

    /// Strings in wire order: mandatory fields first, then whichever
    /// optional fields are present
    pub fn ident_strings(&self) -> Vec<(AccessoryString, &str)> {
        let mut strings = vec![
            (AccessoryString::Manufacturer, self.manufacturer.as_str()),
            (AccessoryString::Model, self.model.as_str()),
        ];

        let optional = [
            (AccessoryString::Description, self.description.as_deref()),
            (AccessoryString::Version, self.version.as_deref()),
            (AccessoryString::Uri, self.uri.as_deref()),
            (AccessoryString::SerialNumber, self.serial_number.as_deref()),
        ];
        for (slot, value) in optional {
            if let Some(value) = value {
                strings.push((slot, value));
            }
        }

        strings
    }
}
