//! Accessory mode-switch handshake
//!
//! One-shot vendor-request sequence asking an Android device to restart in
//! accessory mode. There is no synchronous success signal: the device
//! either disconnects and re-enumerates under the accessory identity
//! shortly after, or it does not. The watcher only logs the outcome and
//! never retries.

use crate::error::{Error, Result};
use crate::transport::{CONTROL_TIMEOUT, DeviceIo, RusbDeviceIo};
use byteorder::{ByteOrder, LittleEndian};
use protocol::{
    AccessoryProfile, DeviceIdentity, REQUEST_GET_PROTOCOL, REQUEST_SEND_STRING,
    REQUEST_START_ACCESSORY,
};
use rusb::{Context, Device};
use tracing::debug;

/// Open `device` and run the handshake against it.
///
/// The handle is closed on every exit path when it drops.
pub(crate) fn switch_to_accessory(
    device: &Device<Context>,
    identity: DeviceIdentity,
    profile: &AccessoryProfile,
) -> Result<()> {
    let handle = device
        .open()
        .map_err(Error::transport("open device for mode switch"))?;
    run_handshake(&RusbDeviceIo::new(handle), identity, profile)
}

/// The fixed sequence: version probe, identification strings in wire
/// order, start command. Any transfer failure aborts the attempt.
fn run_handshake(
    io: &dyn DeviceIo,
    identity: DeviceIdentity,
    profile: &AccessoryProfile,
) -> Result<()> {
    let mut version_raw = [0u8; 2];
    io.vendor_read(REQUEST_GET_PROTOCOL, 0, 0, &mut version_raw, CONTROL_TIMEOUT)
        .map_err(Error::transport("read accessory protocol version"))?;

    // A short read leaves the buffer zeroed, which reads back as version 0.
    let version = LittleEndian::read_u16(&version_raw);
    if version == 0 {
        return Err(Error::NoAccessorySupport(identity));
    }
    debug!(%identity, version, "device supports the accessory protocol");

    for (slot, value) in profile.ident_strings() {
        io.vendor_write(
            REQUEST_SEND_STRING,
            0,
            slot.index(),
            value.as_bytes(),
            CONTROL_TIMEOUT,
        )
        .map_err(Error::transport(slot.label()))?;
    }

    io.vendor_write(REQUEST_START_ACCESSORY, 0, 0, &[], CONTROL_TIMEOUT)
        .map_err(Error::transport("start accessory mode"))?;

    debug!(%identity, "mode switch handshake sent");
    Ok(())
}
