//! Host-side Android Open Accessory bridge
//!
//! This crate watches USB hotplug events, switches allow-listed Android
//! devices into accessory mode via the AOA vendor handshake, and exposes
//! re-enumerated accessory devices as chunked byte-stream channels.
//!
//! The lifecycle is event-driven: a switched device physically disconnects
//! and comes back under the accessory identity, so the watcher treats
//! "candidate to switch" and "accessory to activate" as two independent
//! recognitions of unrelated arrival events.
//!
//! # Example
//!
//! ```no_run
//! use accessory::AccessoryWatcher;
//! use protocol::{AccessoryProfile, DeviceIdentity};
//!
//! # async fn run() -> accessory::Result<()> {
//! accessory::setup_logging("info")?;
//!
//! let watcher = AccessoryWatcher::new(AccessoryProfile::new("Acme", "BridgeDemo"))?;
//! watcher.add_candidate(DeviceIdentity::new(0x04e8, 0x6860));
//! watcher.start_watching()?;
//!
//! let channels = watcher.delivered_channels();
//! while let Ok(channel) = channels.recv().await {
//!     channel.start_reading(|data| println!("{} bytes in", data.len()))?;
//!     channel.write(bytes::Bytes::from_static(b"hello")).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod logging;
mod switch;
pub mod transport;
pub mod watcher;

pub use channel::{AccessoryChannel, DeviceKey};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use transport::DeviceIo;
pub use watcher::AccessoryWatcher;

// Re-exported so embedding applications rarely need the protocol crate
// directly.
pub use protocol::{AccessoryProfile, DeviceIdentity};
