//! Device registry & hotplug watcher
//!
//! Bridges libusb hotplug notifications into mode switching and channel
//! creation. The libusb callback only forwards events onto an async
//! channel; one dedicated blocking task pumps `handle_events`, and one
//! async dispatch task consumes the bridge, so caller-visible work never
//! runs on the driver callback.

use crate::channel::{AccessoryChannel, DeviceKey};
use crate::error::{Error, Result};
use crate::switch::switch_to_accessory;
use protocol::{AccessoryProfile, DeviceIdentity};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound of one pump iteration; bounds `stop_watching` latency.
const PUMP_TIMEOUT: Duration = Duration::from_secs(1);

/// Hotplug events forwarded from the libusb callback to the dispatch task.
enum HotplugEvent {
    Arrived {
        device: Device<Context>,
        identity: DeviceIdentity,
    },
    Left {
        key: DeviceKey,
    },
}

/// What one arrival event asks the watcher to do.
///
/// The two recognitions are independent: a successful mode switch makes
/// the device disappear and a *different* enumeration appear under the
/// accessory identity, so "just switched" and "already an accessory" never
/// describe the same device object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArrivalDecision {
    switch: bool,
    activate: bool,
}

fn classify_arrival(identity: DeviceIdentity, candidates: &[DeviceIdentity]) -> ArrivalDecision {
    ArrivalDecision {
        switch: candidates.contains(&identity),
        activate: identity.is_accessory(),
    }
}

fn take_departed(
    active: &Mutex<HashMap<DeviceKey, AccessoryChannel>>,
    key: DeviceKey,
) -> Option<AccessoryChannel> {
    active.lock().unwrap().remove(&key)
}

/// Watches USB hotplug events, switches allow-listed devices into
/// accessory mode, and publishes re-enumerated accessory devices as
/// [`AccessoryChannel`]s on the delivery queue.
pub struct AccessoryWatcher {
    shared: Arc<WatcherShared>,
    tasks: Mutex<Option<WatchTasks>>,
}

struct WatcherShared {
    context: Context,
    profile: AccessoryProfile,
    candidates: Mutex<Vec<DeviceIdentity>>,
    active: Mutex<HashMap<DeviceKey, AccessoryChannel>>,
    delivery_tx: async_channel::Sender<AccessoryChannel>,
    delivery_rx: async_channel::Receiver<AccessoryChannel>,
    pump_stop: AtomicBool,
}

struct WatchTasks {
    /// Dropping the registration unregisters the callback, which also
    /// closes the event bridge and drains the dispatch task.
    registration: Registration<Context>,
    pump: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl AccessoryWatcher {
    /// Create a watcher for the given accessory profile.
    ///
    /// Fails with [`Error::HotplugUnsupported`] when the libusb build on
    /// this platform cannot deliver hotplug events.
    pub fn new(profile: AccessoryProfile) -> Result<Self> {
        if !rusb::has_hotplug() {
            return Err(Error::HotplugUnsupported);
        }

        let context = Context::new().map_err(Error::transport("initialise usb context"))?;
        let (delivery_tx, delivery_rx) = async_channel::unbounded();

        Ok(Self {
            shared: Arc::new(WatcherShared {
                context,
                profile,
                candidates: Mutex::new(Vec::new()),
                active: Mutex::new(HashMap::new()),
                delivery_tx,
                delivery_rx,
                pump_stop: AtomicBool::new(false),
            }),
            tasks: Mutex::new(None),
        })
    }

    /// Add a vendor/product pair that should be switched into accessory
    /// mode. Takes effect for subsequent arrivals; already-connected
    /// devices are unaffected.
    pub fn add_candidate(&self, identity: DeviceIdentity) {
        self.shared.candidates.lock().unwrap().push(identity);
    }

    /// Snapshot of the candidate allow-list.
    pub fn candidates(&self) -> Vec<DeviceIdentity> {
        self.shared.candidates.lock().unwrap().clone()
    }

    /// Keys of the currently active accessory channels.
    pub fn active_channels(&self) -> Vec<DeviceKey> {
        self.shared.active.lock().unwrap().keys().copied().collect()
    }

    /// Queue of newly activated channels.
    ///
    /// Receiving blocks until the next channel is available; the queue
    /// closes when the watcher is dropped. The receiver can be cloned and
    /// consumed from any task.
    pub fn delivered_channels(&self) -> async_channel::Receiver<AccessoryChannel> {
        self.shared.delivery_rx.clone()
    }

    /// Start watching hotplug events. Idempotent: calling while already
    /// watching is a no-op.
    ///
    /// Devices already connected at this point are reported as arrivals
    /// too, so a phone plugged in before the watcher started still gets
    /// switched.
    pub fn start_watching(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.is_some() {
            return Ok(());
        }

        let (event_tx, event_rx) = async_channel::unbounded();
        let registration = HotplugBuilder::new()
            .enumerate(true)
            .register(
                &self.shared.context,
                Box::new(HotplugForwarder { events: event_tx }),
            )
            .map_err(Error::transport("register hotplug callback"))?;

        self.shared.pump_stop.store(false, Ordering::Release);

        let shared = self.shared.clone();
        let pump = tokio::task::spawn_blocking(move || shared.run_pump());

        let shared = self.shared.clone();
        let dispatch = tokio::spawn(async move { shared.run_dispatch(event_rx).await });

        *tasks = Some(WatchTasks {
            registration,
            pump,
            dispatch,
        });
        info!("accessory watcher started");
        Ok(())
    }

    /// Stop watching and wait for the pump and dispatch tasks to finish.
    /// Idempotent; safe to call even if never started.
    pub async fn stop_watching(&self) {
        let Some(tasks) = self.tasks.lock().unwrap().take() else {
            return;
        };

        self.shared.pump_stop.store(true, Ordering::Release);
        // Unregister first so the event bridge closes and the dispatch
        // task drains out.
        drop(tasks.registration);

        if let Err(e) = tasks.pump.await {
            warn!(error = %e, "hotplug pump task failed");
        }
        if let Err(e) = tasks.dispatch.await {
            warn!(error = %e, "hotplug dispatch task failed");
        }
        info!("accessory watcher stopped");
    }
}

impl Drop for AccessoryWatcher {
    fn drop(&mut self) {
        // Detached tasks must not outlive the watcher; the registration
        // drops with `tasks`, and the flag stops the pump.
        self.shared.pump_stop.store(true, Ordering::Release);
    }
}

impl WatcherShared {
    /// Blocking libusb event pump. One bounded iteration per timeout so
    /// the stop flag is observed promptly.
    fn run_pump(&self) {
        while !self.pump_stop.load(Ordering::Acquire) {
            match self.context.handle_events(Some(PUMP_TIMEOUT)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("usb event handling interrupted");
                }
                Err(e) => {
                    warn!(error = %e, "error handling usb events");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
        debug!("hotplug pump stopped");
    }

    async fn run_dispatch(self: Arc<Self>, events: async_channel::Receiver<HotplugEvent>) {
        while let Ok(event) = events.recv().await {
            match event {
                HotplugEvent::Arrived { device, identity } => {
                    // Arrivals are handled concurrently; a slow open or
                    // handshake must not hold up later events.
                    let shared = self.clone();
                    tokio::spawn(async move { shared.handle_arrival(device, identity).await });
                }
                HotplugEvent::Left { key } => self.handle_departure(key).await,
            }
        }
        debug!("hotplug dispatch stopped");
    }

    async fn handle_arrival(self: Arc<Self>, device: Device<Context>, identity: DeviceIdentity) {
        let decision = {
            let candidates = self.candidates.lock().unwrap();
            classify_arrival(identity, &candidates)
        };

        if decision.switch {
            // Fire and forget: the outcome is only observable through the
            // log and through the device re-enumerating as an accessory.
            let profile = self.profile.clone();
            let device = device.clone();
            tokio::task::spawn_blocking(move || {
                match switch_to_accessory(&device, identity, &profile) {
                    Ok(()) => info!(%identity, "mode switch handshake sent"),
                    Err(e) => warn!(%identity, error = %e, "mode switch failed"),
                }
            });
        }

        if decision.activate {
            let key = DeviceKey {
                bus_number: device.bus_number(),
                address: device.address(),
            };

            match tokio::task::spawn_blocking(move || AccessoryChannel::open(&device)).await {
                Ok(Ok(channel)) => {
                    self.active.lock().unwrap().insert(key, channel.clone());
                    info!(%identity, ?key, "accessory channel activated");
                    if self.delivery_tx.send(channel).await.is_err() {
                        warn!(?key, "delivery queue closed, dropping accessory channel");
                    }
                }
                Ok(Err(e)) => {
                    warn!(%identity, error = %e, "failed to open accessory device");
                }
                Err(e) => {
                    warn!(%identity, error = %e, "accessory open task failed");
                }
            }
        }
    }

    async fn handle_departure(&self, key: DeviceKey) {
        if let Some(channel) = take_departed(&self.active, key) {
            info!(?key, "accessory device left, closing channel");
            // close() blocks for up to one read poll; keep it off the
            // async lane.
            if let Err(e) = tokio::task::spawn_blocking(move || channel.close()).await {
                warn!(?key, error = %e, "channel close task failed");
            }
        }
    }
}

/// Forwards libusb callbacks onto the event bridge.
struct HotplugForwarder {
    events: async_channel::Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        let identity = match device.device_descriptor() {
            Ok(descriptor) => {
                DeviceIdentity::new(descriptor.vendor_id(), descriptor.product_id())
            }
            Err(e) => {
                warn!(error = %e, "could not read descriptor of arrived device, dropping event");
                return;
            }
        };

        debug!(%identity, "device arrived");
        let _ = self
            .events
            .send_blocking(HotplugEvent::Arrived { device, identity });
    }

    fn device_left(&mut self, device: Device<Context>) {
        let key = DeviceKey {
            bus_number: device.bus_number(),
            address: device.address(),
        };
        debug!(?key, "device left");
        let _ = self.events.send_blocking(HotplugEvent::Left { key });
    }
}
