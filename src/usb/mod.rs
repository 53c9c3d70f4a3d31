//! USB permission tracking.
//!
//! The host forwards permission results as [`UsbEvent`]s over a channel
//! obtained from [`UsbPermissions::event_sender`]. A listener task applies
//! them to the list of authorized devices. Events sent while no listener is
//! registered are never seen.

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    /// OS device path or name, unique per attached device.
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    PermissionGranted { device: UsbDevice },
    PermissionDenied { device: UsbDevice },
    Detached { name: String },
}

struct Listener {
    tx: mpsc::Sender<UsbEvent>,
    task: JoinHandle<()>,
}

/// Registry of devices the user has authorized.
pub struct UsbPermissions {
    authorized: Arc<RwLock<Vec<UsbDevice>>>,
    listener: Mutex<Option<Listener>>,
}

impl UsbPermissions {
    pub fn new() -> Self {
        Self {
            authorized: Arc::new(RwLock::new(Vec::new())),
            listener: Mutex::new(None),
        }
    }

    /// Start listening for permission events. Registering twice keeps the
    /// existing listener. Returns the number of authorized devices.
    pub fn register(&self) -> usize {
        let mut listener = self.listener.lock();
        if listener.is_none() {
            let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
            let authorized = Arc::clone(&self.authorized);
            let task = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    apply_event(&authorized, event);
                }
            });
            *listener = Some(Listener { tx, task });
            info!("[USB] Permission listener registered");
        }
        self.authorized_count()
    }

    /// Stop listening. Unregistering when not registered is a no-op.
    /// Returns whether a listener was running.
    pub fn unregister(&self) -> bool {
        match self.listener.lock().take() {
            Some(listener) => {
                listener.task.abort();
                info!("[USB] Permission listener unregistered");
                true
            }
            None => {
                debug!("[USB] Unregister without a listener");
                false
            }
        }
    }

    pub fn is_registered(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Channel for delivering permission events, if a listener is running.
    pub fn event_sender(&self) -> Option<mpsc::Sender<UsbEvent>> {
        self.listener.lock().as_ref().map(|l| l.tx.clone())
    }

    pub fn authorized_devices(&self) -> Vec<UsbDevice> {
        self.authorized.read().clone()
    }

    pub fn authorized_count(&self) -> usize {
        self.authorized.read().len()
    }
}

impl Default for UsbPermissions {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UsbPermissions {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.task.abort();
        }
    }
}

fn apply_event(authorized: &RwLock<Vec<UsbDevice>>, event: UsbEvent) {
    match event {
        UsbEvent::PermissionGranted { device } => {
            let mut devices = authorized.write();
            if devices.iter().any(|d| d.name == device.name) {
                debug!("[USB] {} already authorized", device.name);
            } else {
                info!(
                    "[USB] Permission granted for {} ({:04X}:{:04X})",
                    device.name, device.vendor_id, device.product_id
                );
                devices.push(device);
            }
        }
        UsbEvent::PermissionDenied { device } => {
            warn!("[USB] Permission denied for {}", device.name);
        }
        UsbEvent::Detached { name } => {
            let mut devices = authorized.write();
            let before = devices.len();
            devices.retain(|d| d.name != name);
            if devices.len() != before {
                info!("[USB] {} detached", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> UsbDevice {
        UsbDevice {
            name: name.to_string(),
            vendor_id: 0x1A86,
            product_id: 0x7523,
        }
    }

    async fn settle(permissions: &UsbPermissions, expected: usize) {
        for _ in 0..100 {
            if permissions.authorized_count() == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!(
            "expected {} authorized devices, found {}",
            expected,
            permissions.authorized_count()
        );
    }

    #[test]
    fn test_apply_event_deduplicates_and_detaches() {
        let authorized = RwLock::new(Vec::new());
        apply_event(&authorized, UsbEvent::PermissionGranted { device: device("a") });
        apply_event(&authorized, UsbEvent::PermissionGranted { device: device("a") });
        apply_event(&authorized, UsbEvent::PermissionDenied { device: device("b") });
        assert_eq!(authorized.read().len(), 1);

        apply_event(&authorized, UsbEvent::Detached { name: "a".into() });
        assert!(authorized.read().is_empty());
    }

    #[tokio::test]
    async fn test_events_flow_through_listener() {
        let permissions = UsbPermissions::new();
        assert!(permissions.event_sender().is_none());
        assert_eq!(permissions.register(), 0);

        let tx = permissions.event_sender().expect("listener registered");
        tx.send(UsbEvent::PermissionGranted { device: device("/dev/bus/usb/001/004") })
            .await
            .unwrap();
        settle(&permissions, 1).await;

        assert_eq!(permissions.register(), 1);
        assert_eq!(
            permissions.authorized_devices()[0].name,
            "/dev/bus/usb/001/004"
        );
    }

    #[tokio::test]
    async fn test_unregister_twice_is_tolerated() {
        let permissions = UsbPermissions::new();
        permissions.register();
        assert!(permissions.unregister());
        assert!(!permissions.unregister());
        assert!(!permissions.is_registered());
        assert!(permissions.event_sender().is_none());
    }

    #[tokio::test]
    async fn test_authorizations_survive_reregistration() {
        let permissions = UsbPermissions::new();
        permissions.register();
        let tx = permissions.event_sender().unwrap();
        tx.send(UsbEvent::PermissionGranted { device: device("a") })
            .await
            .unwrap();
        settle(&permissions, 1).await;

        permissions.unregister();
        assert_eq!(permissions.register(), 1);
    }
}
