//! Accessory I/O channel
//!
//! Wraps one re-enumerated accessory-mode device as a byte-stream session:
//! a continuous bulk-IN read loop and a chunked bulk-OUT write operation.
//! Interface 0 is claimed at construction and released exactly once at
//! close, no matter how many clones of the channel exist.

use crate::error::{Error, Result};
use crate::transport::{DeviceIo, RusbDeviceIo};
use bytes::Bytes;
use protocol::{ACCESSORY_INTERFACE, ENDPOINT_IN, ENDPOINT_OUT, TRANSFER_CAPACITY, chunk_spans};
use rusb::{Context, Device};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Length of one bulk-IN poll. Timeouts mean "no data yet" and give the
/// read loop a bounded window in which to observe cancellation.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Bulk-OUT transfers block until the accessory drains them (libusb treats
/// a zero timeout as unlimited).
const WRITE_TIMEOUT: Duration = Duration::ZERO;

/// Identity of the underlying device object as reported by the transfer
/// primitive. Keys the watcher's active-channel set and matches departure
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub bus_number: u8,
    pub address: u8,
}

/// One active, switched, open accessory-mode USB connection.
///
/// Cheap to clone; clones share the session. The channel is `Open` from
/// construction until [`close`](AccessoryChannel::close), after which every
/// operation fails with [`Error::ChannelClosed`].
#[derive(Clone)]
pub struct AccessoryChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    io: Box<dyn DeviceIo>,
    key: DeviceKey,
    closed: AtomicBool,
    /// Held across one read iteration. `close()` acquires it to wait out an
    /// in-flight transfer before releasing the interface.
    read_gate: Mutex<()>,
    /// Reusable buffer for full-capacity write chunks; the lock serializes
    /// concurrent writers.
    write_scratch: Mutex<Box<[u8]>>,
}

impl AccessoryChannel {
    /// Open a re-enumerated accessory device and claim its interface.
    pub(crate) fn open(device: &Device<Context>) -> Result<Self> {
        let key = DeviceKey {
            bus_number: device.bus_number(),
            address: device.address(),
        };
        let handle = device
            .open()
            .map_err(Error::transport("open accessory device"))?;
        Self::from_io(Box::new(RusbDeviceIo::new(handle)), key)
    }

    pub(crate) fn from_io(io: Box<dyn DeviceIo>, key: DeviceKey) -> Result<Self> {
        io.claim_interface(ACCESSORY_INTERFACE)
            .map_err(Error::transport("claim accessory interface"))?;

        Ok(Self {
            inner: Arc::new(ChannelInner {
                io,
                key,
                closed: AtomicBool::new(false),
                read_gate: Mutex::new(()),
                write_scratch: Mutex::new(vec![0u8; TRANSFER_CAPACITY].into_boxed_slice()),
            }),
        })
    }

    pub fn key(&self) -> DeviceKey {
        self.inner.key
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Start the continuous read loop.
    ///
    /// `on_data` runs on the read task itself, once per non-empty transfer,
    /// strictly in transfer order; a slow callback delays the next receive.
    /// The task ends when the channel closes (resolving to `Ok`) or when a
    /// transfer fails (resolving to that error, with no automatic retry;
    /// a dead read task is for the application to notice and react to).
    pub fn start_reading<F>(&self, on_data: F) -> Result<JoinHandle<Result<()>>>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let inner = self.inner.clone();
        Ok(tokio::task::spawn_blocking(move || inner.read_loop(on_data)))
    }

    /// Send `data`, segmented into bulk transfers of at most
    /// [`TRANSFER_CAPACITY`] bytes, strictly in offset order.
    ///
    /// Callers wanting an offset/length window pass `data.slice(..)`.
    /// Closing the channel mid-write abandons the remaining chunks without
    /// error; a failing transfer on an open channel aborts the write.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.blocking_write(&data)).await?
    }

    /// Close the channel: stop the read loop and release the claimed
    /// interface. Idempotent, never fails from the caller's point of view.
    /// Blocks for at most one read poll; the device handle itself closes
    /// when the last clone drops.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl ChannelInner {
    fn read_loop<F>(&self, mut on_data: F) -> Result<()>
    where
        F: FnMut(Bytes),
    {
        let mut buf = vec![0u8; TRANSFER_CAPACITY];

        loop {
            let received = {
                let _gate = self.read_gate.lock().unwrap();
                if self.closed.load(Ordering::Acquire) {
                    return Ok(());
                }

                match self.io.read_bulk(ENDPOINT_IN, &mut buf, READ_POLL_TIMEOUT) {
                    Ok(received) => received,
                    // No data within this poll; go around and re-check the flag.
                    Err(rusb::Error::Timeout) => continue,
                    Err(_) if self.closed.load(Ordering::Acquire) => return Ok(()),
                    Err(source) => {
                        warn!(key = ?self.key, error = %source, "accessory read loop ended");
                        return Err(Error::Transport {
                            operation: "bulk read from accessory",
                            source,
                        });
                    }
                }
            };

            if received > 0 {
                on_data(Bytes::copy_from_slice(&buf[..received]));
            }
        }
    }

    fn blocking_write(&self, data: &[u8]) -> Result<()> {
        let mut scratch = self.write_scratch.lock().unwrap();

        for span in chunk_spans(0, data.len(), TRANSFER_CAPACITY) {
            if self.closed.load(Ordering::Acquire) {
                debug!(key = ?self.key, "channel closed mid-write, abandoning remaining chunks");
                return Ok(());
            }

            let chunk = &data[span];
            let result = if chunk.len() == TRANSFER_CAPACITY {
                scratch.copy_from_slice(chunk);
                self.io.write_bulk(ENDPOINT_OUT, &scratch[..], WRITE_TIMEOUT)
            } else {
                // Final short chunk goes out of a freshly sized buffer.
                let tail = chunk.to_vec();
                self.io.write_bulk(ENDPOINT_OUT, &tail, WRITE_TIMEOUT)
            };

            match result {
                Ok(_) => {}
                // The interface was released under us; treat like closed-mid-write.
                Err(_) if self.closed.load(Ordering::Acquire) => return Ok(()),
                Err(source) => {
                    return Err(Error::Transport {
                        operation: "bulk write to accessory",
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Wait out an in-flight read before touching the interface.
        drop(self.read_gate.lock().unwrap());

        if let Err(e) = self.io.release_interface(ACCESSORY_INTERFACE) {
            debug!(key = ?self.key, error = %e, "failed to release accessory interface");
        }
        debug!(key = ?self.key, "closed accessory channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockDeviceIo;

    const KEY: DeviceKey = DeviceKey {
        bus_number: 1,
        address: 7,
    };

    fn mock_channel() -> (AccessoryChannel, Arc<Mutex<crate::transport::mock::MockState>>) {
        let (mock, state) = MockDeviceIo::new();
        let channel = AccessoryChannel::from_io(Box::new(mock), KEY).unwrap();
        (channel, state)
    }

    #[tokio::test]
    async fn test_write_segments_into_capacity_chunks() {
        let (channel, state) = mock_channel();
        let payload: Vec<u8> = (0..2 * TRANSFER_CAPACITY + 7).map(|i| i as u8).collect();

        channel.write(Bytes::from(payload.clone())).await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.bulk_writes.len(), 3);
        assert_eq!(state.bulk_writes[0].1.len(), TRANSFER_CAPACITY);
        assert_eq!(state.bulk_writes[1].1.len(), TRANSFER_CAPACITY);
        assert_eq!(state.bulk_writes[2].1.len(), 7);
        for (endpoint, _) in &state.bulk_writes {
            assert_eq!(*endpoint, ENDPOINT_OUT);
        }

        let reassembled: Vec<u8> = state
            .bulk_writes
            .iter()
            .flat_map(|(_, chunk)| chunk.clone())
            .collect();
        assert_eq!(reassembled, payload);
    }

    #[tokio::test]
    async fn test_exact_capacity_write_is_one_transfer() {
        let (channel, state) = mock_channel();

        channel
            .write(Bytes::from(vec![0xa5; TRANSFER_CAPACITY]))
            .await
            .unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.bulk_writes.len(), 1);
        assert_eq!(state.bulk_writes[0].1.len(), TRANSFER_CAPACITY);
    }

    #[tokio::test]
    async fn test_empty_write_issues_no_transfer() {
        let (channel, state) = mock_channel();

        channel.write(Bytes::new()).await.unwrap();

        assert!(state.lock().unwrap().bulk_writes.is_empty());
    }

    #[tokio::test]
    async fn test_failing_transfer_aborts_rest_of_write() {
        let (channel, state) = mock_channel();
        state.lock().unwrap().fail_write_at = Some(1);

        let err = channel
            .write(Bytes::from(vec![0u8; 3 * TRANSFER_CAPACITY]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
        // Only the first chunk went out; the failure stopped the rest.
        assert_eq!(state.lock().unwrap().bulk_writes.len(), 1);
    }

    #[tokio::test]
    async fn test_write_after_close_is_a_state_error() {
        let (channel, state) = mock_channel();
        channel.close();

        let err = channel.write(Bytes::from_static(b"data")).await.unwrap_err();

        assert!(matches!(err, Error::ChannelClosed));
        assert!(state.lock().unwrap().bulk_writes.is_empty());
    }

    #[tokio::test]
    async fn test_start_reading_after_close_is_a_state_error() {
        let (channel, _state) = mock_channel();
        channel.close();

        assert!(matches!(
            channel.start_reading(|_| {}),
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_once() {
        let (channel, state) = mock_channel();

        channel.close();
        channel.close();
        channel.clone().close();

        let state = state.lock().unwrap();
        assert_eq!(state.claims, 1);
        assert_eq!(state.releases, 1);
    }

    #[tokio::test]
    async fn test_read_loop_skips_empty_transfers_and_ends_on_error() {
        let (channel, state) = mock_channel();
        {
            let mut state = state.lock().unwrap();
            state.bulk_reads.push_back(Ok(vec![1, 2, 3]));
            state.bulk_reads.push_back(Ok(Vec::new()));
            state.bulk_reads.push_back(Err(rusb::Error::Timeout));
            state.bulk_reads.push_back(Ok(vec![4, 5]));
            state.bulk_reads.push_back(Err(rusb::Error::NoDevice));
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let task = channel
            .start_reading(move |data| sink.lock().unwrap().push(data))
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Transport { .. })));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(&received[0][..], &[1, 2, 3][..]);
        assert_eq!(&received[1][..], &[4, 5][..]);
        // The zero-length transfer never reached the callback.
        assert!(received.iter().all(|data| !data.is_empty()));
    }

    #[tokio::test]
    async fn test_close_ends_read_loop_without_error() {
        let (channel, state) = mock_channel();
        state.lock().unwrap().bulk_reads.push_back(Ok(vec![9]));

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let task = channel
            .start_reading(move |data| sink.lock().unwrap().push(data))
            .unwrap();

        // Wait for the scripted payload to come through, then close while
        // the loop is polling an otherwise quiet device.
        while received.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let closer = channel.clone();
        tokio::task::spawn_blocking(move || closer.close())
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
