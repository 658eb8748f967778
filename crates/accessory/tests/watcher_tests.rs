//! Watcher lifecycle integration tests
//!
//! These exercise the real libusb context. Environments without a usable
//! libusb (stripped-down containers, CI runners) make construction or
//! callback registration fail; the tests skip in that case rather than
//! assert, mirroring the fact that no hardware is required for the
//! lifecycle contract itself.

use accessory::AccessoryWatcher;
use protocol::{AccessoryProfile, DeviceIdentity};

fn test_watcher() -> Option<AccessoryWatcher> {
    match AccessoryWatcher::new(AccessoryProfile::new("Acme", "BridgeTest")) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            eprintln!("skipping watcher test (no usable libusb): {e}");
            None
        }
    }
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let Some(watcher) = test_watcher() else { return };
    watcher.add_candidate(DeviceIdentity::new(0x04e8, 0x6860));

    if let Err(e) = watcher.start_watching() {
        eprintln!("skipping watcher test (hotplug registration failed): {e}");
        return;
    }

    // Second call while watching is a no-op.
    watcher.start_watching().expect("repeated start should be a no-op");

    watcher.stop_watching().await;
    watcher.stop_watching().await;
}

#[tokio::test]
async fn test_stop_without_start_is_safe() {
    let Some(watcher) = test_watcher() else { return };

    watcher.stop_watching().await;
}

#[tokio::test]
async fn test_candidates_snapshot_preserves_order() {
    let Some(watcher) = test_watcher() else { return };

    let first = DeviceIdentity::new(0x04e8, 0x6860);
    let second = DeviceIdentity::new(0x2717, 0xff40);
    watcher.add_candidate(first);
    watcher.add_candidate(second);

    assert_eq!(watcher.candidates(), vec![first, second]);
    assert!(watcher.active_channels().is_empty());
}

#[tokio::test]
async fn test_delivery_queue_is_empty_until_devices_arrive() {
    let Some(watcher) = test_watcher() else { return };

    let channels = watcher.delivered_channels();
    assert!(channels.try_recv().is_err());
}
