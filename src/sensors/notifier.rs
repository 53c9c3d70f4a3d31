//! Single-subscriber delivery of sensor readings.
//!
//! At most one stream is attached at a time. Attaching a new stream
//! replaces the old one, whose receiver then ends.

use super::SensorReading;
use futures_util::Stream;
use log::{debug, warn};
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Publishes readings to zero or one [`ReadingStream`].
pub struct ReadingNotifier {
    capacity: usize,
    subscriber: Mutex<Option<mpsc::Sender<SensorReading>>>,
}

impl ReadingNotifier {
    /// Create a notifier whose streams buffer up to `capacity` readings.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscriber: Mutex::new(None),
        }
    }

    /// Attach a new subscriber, detaching any previous one.
    pub fn attach(&self) -> ReadingStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.subscriber.lock().replace(tx).is_some() {
            debug!("[Notifier] Previous subscriber replaced");
        }
        ReadingStream { rx }
    }

    /// Detach the current subscriber. Returns whether one was attached.
    pub fn detach(&self) -> bool {
        self.subscriber.lock().take().is_some()
    }

    /// Whether a subscriber is attached and still listening.
    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Hand a reading to the subscriber without waiting.
    ///
    /// A full buffer drops the reading. A subscriber whose stream was
    /// dropped is detached. Returns whether the reading was delivered.
    pub fn publish(&self, reading: SensorReading) -> bool {
        let mut slot = self.subscriber.lock();
        let Some(tx) = slot.as_ref() else {
            return false;
        };

        match tx.try_send(reading) {
            Ok(()) => true,
            Err(TrySendError::Full(reading)) => {
                warn!(
                    "[Notifier] Subscriber is lagging, dropped reading {} from {}",
                    reading.value, reading.port
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[Notifier] Subscriber went away, detaching");
                *slot = None;
                false
            }
        }
    }
}

/// Receiving end of a subscription.
///
/// Ends (yields `None`) once the subscriber is detached and every buffered
/// reading has been consumed.
#[derive(Debug)]
pub struct ReadingStream {
    rx: mpsc::Receiver<SensorReading>,
}

impl ReadingStream {
    pub async fn recv(&mut self) -> Option<SensorReading> {
        self.rx.recv().await
    }

    /// Take a buffered reading if one is ready.
    pub fn try_recv(&mut self) -> Option<SensorReading> {
        match self.rx.try_recv() {
            Ok(reading) => Some(reading),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl Stream for ReadingStream {
    type Item = SensorReading;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_publish_without_subscriber_is_dropped() {
        let notifier = ReadingNotifier::new(4);
        assert!(!notifier.has_subscriber());
        assert!(!notifier.publish(SensorReading::new("COM3", 1)));
    }

    #[tokio::test]
    async fn test_attached_stream_receives_in_order() {
        let notifier = ReadingNotifier::new(4);
        let mut stream = notifier.attach();
        assert!(notifier.has_subscriber());

        assert!(notifier.publish(SensorReading::new("COM3", 1)));
        assert!(notifier.publish(SensorReading::new("COM3", 2)));

        assert_eq!(stream.next().await.map(|r| r.value), Some(1));
        assert_eq!(stream.recv().await.map(|r| r.value), Some(2));
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_subscriber() {
        let notifier = ReadingNotifier::new(4);
        let mut first = notifier.attach();
        let mut second = notifier.attach();

        assert!(notifier.publish(SensorReading::new("COM3", 9)));
        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await.map(|r| r.value), Some(9));
    }

    #[test]
    fn test_full_buffer_drops_reading() {
        let notifier = ReadingNotifier::new(1);
        let mut stream = notifier.attach();

        assert!(notifier.publish(SensorReading::new("COM3", 1)));
        assert!(!notifier.publish(SensorReading::new("COM3", 2)));
        assert!(notifier.has_subscriber());
        assert_eq!(stream.try_recv().map(|r| r.value), Some(1));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn test_dropped_stream_detaches_on_publish() {
        let notifier = ReadingNotifier::new(4);
        drop(notifier.attach());

        assert!(!notifier.has_subscriber());
        assert!(!notifier.publish(SensorReading::new("COM3", 1)));
        assert!(!notifier.detach());
    }

    #[test]
    fn test_detach_is_idempotent() {
        let notifier = ReadingNotifier::new(4);
        let _stream = notifier.attach();
        assert!(notifier.detach());
        assert!(!notifier.detach());
        assert!(!notifier.has_subscriber());
    }
}
