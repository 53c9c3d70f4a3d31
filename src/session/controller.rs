//! Sensor session controller.
//!
//! Owns the open port, the poll loop and the latest reading. All session
//! state lives behind one async mutex that is held for the whole of every
//! driver call, so driver access is strictly sequential. Driver calls run
//! on the blocking pool.

use super::poller::PollTask;
use crate::config::SensorConfig;
use crate::driver::{STATUS_BUFFER_LEN, SensorDriver, decode_reading};
use crate::error::{DriverError, Result, SessionError};
use crate::sensors::{ReadingNotifier, ReadingStream, SensorReading};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Externally visible lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum SessionState {
    Closed,
    Open,
    OpenPolling,
}

#[derive(Default)]
struct Session {
    port_name: Option<String>,
    threshold: Option<i32>,
    last_reading: Option<u16>,
    poll: Option<PollTask>,
}

impl Session {
    fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(PollTask::is_active)
    }
}

struct Shared {
    driver: Arc<dyn SensorDriver>,
    session: AsyncMutex<Session>,
    notifier: ReadingNotifier,
    /// Parent of every poll loop token; cancelled when the controller drops.
    poll_parent: CancellationToken,
}

impl Shared {
    async fn blocking<T, F>(&self, job: F) -> std::result::Result<T, JoinError>
    where
        F: FnOnce(&dyn SensorDriver) -> T + Send + 'static,
        T: Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        tokio::task::spawn_blocking(move || job(driver.as_ref())).await
    }

    async fn open_locked(&self, session: &mut Session, port: &str, level: i32) -> Result<()> {
        let name = port.to_string();
        let opened = self
            .blocking(move |driver| {
                driver.open_port(&name)?;
                driver.set_threshold(&name, level);
                Ok::<_, DriverError>(())
            })
            .await;

        match opened {
            Ok(result) => result?,
            Err(e) => {
                // The worker died after a possible successful open.
                warn!("[Session] Open of {} aborted, releasing port: {}", port, e);
                let name = port.to_string();
                if let Err(close_err) = self.blocking(move |driver| driver.close_port(&name)).await
                {
                    warn!("[Session] Releasing {} failed: {}", port, close_err);
                }
                return Err(e.into());
            }
        }

        session.port_name = Some(port.to_string());
        session.threshold = Some(level);
        session.last_reading = None;
        Ok(())
    }

    async fn read_locked(&self, session: &mut Session) -> Result<SensorReading> {
        let port = session.port_name.clone().ok_or(SessionError::NoPortOpen)?;

        let name = port.clone();
        let value = self
            .blocking(move |driver| {
                let mut buffer = [0u8; STATUS_BUFFER_LEN];
                driver
                    .read_status(&name, &mut buffer)
                    .map(|()| decode_reading(&buffer))
            })
            .await??;

        session.last_reading = Some(value);
        Ok(SensorReading::new(port, value))
    }

    /// Cancel polling and close the port. The cancelled poll task is
    /// returned so the caller can join it after releasing the lock.
    async fn close_locked(&self, session: &mut Session) -> Option<PollTask> {
        let poll = session.poll.take();
        if let Some(task) = &poll {
            task.cancel();
        }

        if let Some(port) = session.port_name.take() {
            let name = port.clone();
            if let Err(e) = self.blocking(move |driver| driver.close_port(&name)).await {
                warn!("[Session] Closing {} failed: {}", port, e);
            }
            info!("[Session] Closed {}", port);
        }
        session.threshold = None;
        session.last_reading = None;
        poll
    }

    fn spawn_poll_locked(self: &Arc<Self>, session: &mut Session, period: Duration) {
        let shared = Arc::clone(self);
        session.poll = Some(PollTask::spawn(
            period,
            self.poll_parent.child_token(),
            move |token| {
                let shared = Arc::clone(&shared);
                async move { shared.tick(&token).await }
            },
        ));
        info!("[Session] Polling every {:?}", period);
    }

    /// Replace whatever session is open with one on `port`.
    ///
    /// A running poll loop carries over to the new port. If the new open
    /// fails the subscriber is detached so its stream ends.
    async fn replace_session(self: Arc<Self>, port: String, level: i32) -> Result<()> {
        let mut session = self.session.lock().await;
        let resume = session
            .poll
            .as_ref()
            .filter(|task| task.is_active())
            .map(PollTask::period);

        let replaced = if let Some(previous) = session.port_name.clone() {
            info!("[Session] Replacing session on {} with {}", previous, port);
            self.close_locked(&mut session).await
        } else {
            None
        };

        let result = self.open_locked(&mut session, &port, level).await;
        match (&result, resume) {
            (Ok(()), Some(period)) => self.spawn_poll_locked(&mut session, period),
            (Err(_), Some(_)) => {
                if self.notifier.detach() {
                    info!("[Session] Subscriber detached, replacement open failed");
                }
            }
            _ => {}
        }
        drop(session);

        if let Some(task) = replaced {
            task.join().await;
        }

        match &result {
            Ok(()) => info!("[Session] Opened {} (IR level {})", port, level),
            Err(e) => warn!("[Session] Failed to open {}: {}", port, e),
        }
        result
    }

    /// Open `port` unless a session is already open. Returns whether a
    /// port was opened.
    async fn open_if_closed(self: Arc<Self>, port: Option<String>, level: i32) -> Result<bool> {
        let mut session = self.session.lock().await;
        if session.port_name.is_some() {
            return Ok(false);
        }
        let port = port.ok_or(SessionError::NoPortOpen)?;

        match self.open_locked(&mut session, &port, level).await {
            Ok(()) => {
                info!("[Session] Opened {} (IR level {})", port, level);
                Ok(true)
            }
            Err(e) => {
                warn!("[Session] Failed to open {}: {}", port, e);
                Err(e)
            }
        }
    }

    async fn tick(&self, token: &CancellationToken) {
        let mut session = self.session.lock().await;
        if token.is_cancelled() {
            return;
        }
        if session.port_name.is_none() || !self.notifier.has_subscriber() {
            debug!("[Poll] Nothing to do this tick");
            return;
        }

        match self.read_locked(&mut session).await {
            Ok(reading) => {
                if token.is_cancelled() {
                    return;
                }
                debug!("[Poll] {} -> {}", reading.port, reading.value);
                self.notifier.publish(reading);
            }
            Err(e) => warn!("[Poll] Skipping tick: {}", e),
        }
    }
}

/// Manages the single sensor session of a process.
///
/// Dropping the controller stops any running poll loop. The port itself is
/// only closed by [`stop_session`](Self::stop_session) or
/// [`shutdown`](Self::shutdown).
pub struct SessionController {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl SessionController {
    pub fn new(driver: Arc<dyn SensorDriver>, config: &SensorConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            shared: Arc::new(Shared {
                driver,
                session: AsyncMutex::new(Session::default()),
                notifier: ReadingNotifier::new(config.subscriber_buffer),
                poll_parent: shutdown.clone(),
            }),
            shutdown,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Configured default poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Open `port_name` and apply `ir_level`.
    ///
    /// A session that is already open is torn down first, so a failed open
    /// leaves the controller closed. If the old session was polling, polling
    /// resumes on the new port at the same interval; if the open fails the
    /// subscriber is detached instead.
    ///
    /// The work runs on its own task, so dropping this future does not
    /// leave a port open behind the session's back.
    pub async fn start_session(&self, port_name: &str, ir_level: i32) -> Result<()> {
        if port_name.trim().is_empty() {
            return Err(SessionError::InvalidArguments(
                "port name must not be empty".to_string(),
            ));
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.replace_session(port_name.to_string(), ir_level)).await?
    }

    /// Open `port_name` only if no session is open, checked and opened
    /// under one lock. `None` on a closed session yields `NoPortOpen`.
    /// Returns whether a port was opened.
    pub async fn start_session_if_closed(
        &self,
        port_name: Option<&str>,
        ir_level: i32,
    ) -> Result<bool> {
        if port_name.is_some_and(|p| p.trim().is_empty()) {
            return Err(SessionError::InvalidArguments(
                "port name must not be empty".to_string(),
            ));
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.open_if_closed(port_name.map(String::from), ir_level)).await?
    }

    /// Stop polling and close the port. No-op when already closed.
    pub async fn stop_session(&self) {
        let mut session = self.shared.session.lock().await;
        let poll = self.shared.close_locked(&mut session).await;
        drop(session);

        if let Some(task) = poll {
            task.join().await;
        }
    }

    /// Read and decode one value from the open port.
    pub async fn read_once(&self) -> Result<u16> {
        let mut session = self.shared.session.lock().await;
        self.shared
            .read_locked(&mut session)
            .await
            .map(|reading| reading.value)
    }

    /// Start the poll loop. No-op when it is already running.
    ///
    /// Ticks read only while a subscriber is attached; failed reads are
    /// logged and retried on the next tick.
    pub async fn start_polling(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(SessionError::InvalidArguments(
                "poll interval must be non-zero".to_string(),
            ));
        }

        let mut session = self.shared.session.lock().await;
        if session.port_name.is_none() {
            return Err(SessionError::NoPortOpen);
        }
        if let Some(task) = session.poll.as_ref().filter(|task| task.is_active()) {
            debug!("[Session] Already polling every {:?}", task.period());
            return Ok(());
        }

        self.shared.spawn_poll_locked(&mut session, interval);
        Ok(())
    }

    /// Stop the poll loop. Once this returns no further reading is
    /// published.
    pub async fn stop_polling(&self) {
        let poll = {
            let mut session = self.shared.session.lock().await;
            let poll = session.poll.take();
            if let Some(task) = &poll {
                task.cancel();
            }
            poll
        };

        if let Some(task) = poll {
            task.join().await;
            info!("[Session] Polling stopped");
        }
    }

    /// Attach the single subscriber, replacing any previous one.
    pub fn subscribe(&self) -> ReadingStream {
        self.shared.notifier.attach()
    }

    /// Detach the subscriber. Returns whether one was attached.
    pub fn unsubscribe(&self) -> bool {
        self.shared.notifier.detach()
    }

    pub fn has_subscriber(&self) -> bool {
        self.shared.notifier.has_subscriber()
    }

    /// Enumerate ports known to the driver.
    pub async fn list_ports(&self) -> Result<Vec<String>> {
        let _session = self.shared.session.lock().await;
        Ok(self.shared.blocking(|driver| driver.list_ports()).await?)
    }

    pub async fn state(&self) -> SessionState {
        let session = self.shared.session.lock().await;
        match (&session.port_name, session.is_polling()) {
            (None, _) => SessionState::Closed,
            (Some(_), false) => SessionState::Open,
            (Some(_), true) => SessionState::OpenPolling,
        }
    }

    pub async fn port_name(&self) -> Option<String> {
        self.shared.session.lock().await.port_name.clone()
    }

    pub async fn threshold(&self) -> Option<i32> {
        self.shared.session.lock().await.threshold
    }

    /// Most recent decoded value of the current session.
    pub async fn last_reading(&self) -> Option<u16> {
        self.shared.session.lock().await.last_reading
    }

    /// Tear everything down: polling, port and subscriber.
    pub async fn shutdown(&self) {
        self.stop_session().await;
        if self.unsubscribe() {
            debug!("[Session] Subscriber detached on shutdown");
        }
        info!("[Session] Controller shut down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
