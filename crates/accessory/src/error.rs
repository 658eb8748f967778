//! Error types for the accessory runtime

use protocol::DeviceIdentity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A USB transfer or another libusb call returned a failure status.
    #[error("usb error while trying to {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: rusb::Error,
    },

    /// The device answered the version probe with protocol version 0.
    #[error("device {0} reports accessory protocol version 0")]
    NoAccessorySupport(DeviceIdentity),

    /// Operation attempted on a closed channel; no I/O was performed.
    #[error("accessory channel is closed")]
    ChannelClosed,

    /// The libusb build on this platform cannot deliver hotplug events.
    #[error("hotplug notifications are not supported by this platform's libusb")]
    HotplugUnsupported,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Annotate a libusb failure with the operation that was running.
    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(rusb::Error) -> Self {
        move |source| Self::Transport { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
