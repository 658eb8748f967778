//! AOA wire contract for rust-aoa-bridge
//!
//! This crate defines the value types and bit-exact constants of the Android
//! Open Accessory vendor protocol: the control request codes used by the
//! mode-switch handshake, the identification string slots, the vendor and
//! product identifiers a switched device re-enumerates under, the bulk
//! endpoints, and the transfer segmentation rule shared by reads and writes.
//!
//! Nothing in this crate touches USB; the `accessory` crate consumes these
//! definitions to drive actual devices.
//!
//! # Example
//!
//! ```
//! use protocol::{AccessoryProfile, DeviceIdentity};
//!
//! let profile = AccessoryProfile::new("Acme", "BridgeDemo");
//! assert_eq!(profile.ident_strings().len(), 2);
//!
//! let identity = DeviceIdentity::new(0x18d1, 0x2d01);
//! assert!(identity.is_accessory());
//! ```

pub mod chunk;
pub mod types;

pub use chunk::chunk_spans;
pub use types::{
    ACCESSORY_INTERFACE, ACCESSORY_PRODUCT_IDS, ACCESSORY_VENDOR_ID, AccessoryProfile,
    AccessoryString, DeviceIdentity, ENDPOINT_IN, ENDPOINT_OUT, REQUEST_GET_PROTOCOL,
    REQUEST_SEND_STRING, REQUEST_START_ACCESSORY, TRANSFER_CAPACITY,
};
