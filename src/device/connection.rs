use std::sync::{Arc, Mutex, MutexGuard};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::store::PreferenceStore;
use crate::config::types::{ConnectionConfig, Rgb};
use crate::device::codec::{encode, Command};
use crate::device::radio::Radio;
use crate::device::scanner::Scanner;
use crate::device::service::{resolve_write_target, ServiceFilter};
use crate::device::transport::{GattCharacteristic, GattService, Transport};
use crate::device::types::{ConnectionState, DeviceEvent, FailureReason};
use crate::error::{DeviceError, ErrorKind, TransportError};

#[derive(Debug, Clone)]
struct Link {
    address: String,
    service: Uuid,
    characteristic: GattCharacteristic,
    // cancelled when too many writes failed in a row
    lost: CancellationToken,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: ConnectionState,
    link: Option<Link>,
    session: Option<Session>,
    write_failures: u32,
}

enum AttemptFailure {
    AdapterUnavailable,
    NoCompatibleService,
    Link(TransportError),
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    scanner: Scanner<T>,
    radio: Radio,
    filter: ServiceFilter,
    config: ConnectionConfig,
    preferences: Arc<dyn PreferenceStore>,
    shared: Mutex<Shared>,
    observers: Mutex<Vec<UnboundedSender<DeviceEvent>>>,
    write_lock: tokio::sync::Mutex<()>,
    app_cancel: CancellationToken,
}

/// Owns the connection state machine of one session with one controller.
///
/// Handles are cheap to clone and all refer to the same state machine.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        ConnectionManager { inner: self.inner.clone() }
    }
}

fn session_address(state: &ConnectionState) -> Option<&str> {
    match state {
        ConnectionState::Connecting { address }
        | ConnectionState::Connected { address, .. }
        | ConnectionState::Reconnecting { address, .. } => Some(address),
        _ => None,
    }
}

impl<T: Transport> Inner<T> {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("Failed to lock connection state")
    }

    fn notify(&self, event: DeviceEvent) {
        let mut observers = self.observers.lock().expect("Failed to lock observers");
        // observers that went away are dropped, nobody is ever waited on
        observers.retain(|observer| observer.unbounded_send(event.clone()).is_ok());
    }

    // The only place the state changes. Callers hold the shared lock, which keeps notifications in
    // transition order.
    fn transition(&self, shared: &mut Shared, state: ConnectionState, error: Option<ErrorKind>) {
        info!("Connection state: {}", state);
        if let Some(error) = error {
            self.notify(DeviceEvent::Error(error));
        }
        shared.state = state.clone();
        self.notify(DeviceEvent::StateChange(state));
    }

    /// Transitions on behalf of the session identified by `cancel`, unless it has been cancelled
    /// in the meantime.
    fn session_transition(&self, cancel: &CancellationToken, state: ConnectionState, link: Option<Link>, error: Option<ErrorKind>) -> bool {
        let mut shared = self.shared();
        if cancel.is_cancelled() {
            return false;
        }

        shared.write_failures = 0;
        shared.link = link;
        self.transition(&mut shared, state, error);
        true
    }

    async fn locate(&self, address: &str, cancel: &CancellationToken, announce: bool) -> Result<(), AttemptFailure> {
        if announce {
            self.session_transition(cancel, ConnectionState::Scanning, None, None);
        }

        let located = self.scanner.locate(address, self.config.scan_timeout(), &self.filter).await;

        if announce {
            self.session_transition(cancel, ConnectionState::Connecting { address: address.to_string() }, None, None);
        }

        match located {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                warn!("Device {} was not found while scanning", address);
                Err(AttemptFailure::Link(TransportError::UnknownDevice { address: address.to_string() }))
            },
            Err(DeviceError::ScanFailed { source }) => {
                warn!("Scanning for {} failed: {:?}", address, source);
                Err(AttemptFailure::Link(source))
            },
            Err(err) => {
                warn!("Can not scan for {}: {:?}", address, err);
                Err(AttemptFailure::AdapterUnavailable)
            },
        }
    }

    async fn connect_link(&self, address: &str) -> Result<Vec<GattService>, TransportError> {
        let _radio = self.radio.acquire_for_connect().await;

        match timeout(self.config.connect_timeout(), self.transport.connect(address)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Connecting to {} took too long", address);
                Err(TransportError::Timeout)
            },
        }
    }

    /// One connect attempt: locate if needed, connect, discover, and resolve the write target.
    async fn attempt(&self, address: &str, cancel: &CancellationToken, initial: bool) -> Result<(Uuid, GattCharacteristic), AttemptFailure> {
        let services = match self.connect_link(address).await {
            Err(TransportError::UnknownDevice { .. }) => {
                self.locate(address, cancel, initial).await?;
                self.connect_link(address).await
            },
            result => result,
        };

        let services = match services {
            Ok(services) => services,
            Err(TransportError::AdapterUnavailable) => return Err(AttemptFailure::AdapterUnavailable),
            Err(err) => return Err(AttemptFailure::Link(err)),
        };

        match resolve_write_target(&self.filter, &services) {
            Some(target) => Ok(target),
            None => {
                warn!("Device {} offers none of the services {:?}", address, self.filter.to_vec());
                self.release_link(address).await;
                Err(AttemptFailure::NoCompatibleService)
            },
        }
    }

    async fn release_link(&self, address: &str) {
        match self.transport.disconnect(address).await {
            Ok(()) => {},
            Err(TransportError::UnknownDevice { .. }) => {},
            Err(err) => warn!("Failed to disconnect from {}: {:?}", address, err),
        }
    }

    /// Returns once the link is considered lost, or immediately when the session is cancelled.
    async fn monitor(&self, link: &Link, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = link.lost.cancelled() => {
                    warn!("Too many failed writes, treating the connection as lost");
                    return;
                },
                _ = sleep(self.config.poll_interval()) => {
                    match timeout(self.config.write_timeout(), self.transport.is_connected(&link.address)).await {
                        Err(_) => {
                            warn!("Checking for connection status took too long");
                            return;
                        },
                        Ok(Err(err)) => {
                            warn!("Error checking for connection state: {:?}", err);
                            return;
                        },
                        Ok(Ok(false)) => {
                            warn!("Connection lost");
                            return;
                        },
                        Ok(Ok(true)) => {},
                    }
                },
            }
        }
    }

    fn record(&self, command: &Command) {
        match *command {
            Command::PowerOn => self.preferences.set_power_state(true),
            Command::PowerOff => self.preferences.set_power_state(false),
            Command::SetColor { red, green, blue } => self.preferences.set_last_color(Rgb::new(red, green, blue)),
            Command::SetBrightness { level } => self.preferences.set_last_brightness(level),
            Command::SetEffect { mode, speed } => self.preferences.set_last_effect(mode, speed),
        }
    }
}

async fn run_session<T: Transport>(inner: Arc<Inner<T>>, address: String, cancel: CancellationToken) {
    let max_attempts = inner.config.max_reconnect_attempts;
    // 0 is the initial connect, everything after that is a reconnect attempt
    let mut attempt: u32 = 0;
    let mut error: Option<ErrorKind> = None;

    loop {
        if attempt > 0 {
            if attempt > max_attempts {
                let state = ConnectionState::Failed { reason: FailureReason::ReconnectExhausted };
                inner.session_transition(&cancel, state, None, Some(ErrorKind::ReconnectExhausted));
                return;
            }

            let delay = inner.config.backoff_delay(attempt);
            let state = ConnectionState::Reconnecting { address: address.clone(), attempt, next_delay: delay };
            if !inner.session_transition(&cancel, state, None, error.take()) {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {},
            }
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = inner.attempt(&address, &cancel, attempt == 0) => outcome,
        };

        match outcome {
            Ok((service, characteristic)) => {
                let link = Link {
                    address: address.clone(),
                    service,
                    characteristic: characteristic.clone(),
                    lost: cancel.child_token(),
                };
                let state = ConnectionState::Connected {
                    address: address.clone(),
                    service_uuid: service,
                    write_characteristic: characteristic.uuid,
                };
                if !inner.session_transition(&cancel, state, Some(link.clone()), None) {
                    return;
                }
                inner.preferences.set_last_device(&address);

                inner.monitor(&link, &cancel).await;
                if cancel.is_cancelled() {
                    return;
                }

                inner.release_link(&address).await;
                attempt = 1;
                error = Some(ErrorKind::UnexpectedDisconnect);
            },
            Err(AttemptFailure::NoCompatibleService) => {
                let state = ConnectionState::Failed { reason: FailureReason::NoCompatibleService };
                inner.session_transition(&cancel, state, None, Some(ErrorKind::NoCompatibleService));
                return;
            },
            Err(AttemptFailure::AdapterUnavailable) => {
                let state = ConnectionState::Failed { reason: FailureReason::ScanUnavailable };
                inner.session_transition(&cancel, state, None, Some(ErrorKind::ScanUnavailable));
                return;
            },
            Err(AttemptFailure::Link(err)) => {
                warn!("Connecting to {} failed: {:?}", address, err);
                attempt += 1;
            },
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, config: ConnectionConfig, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self::with_radio(transport, Radio::default(), ServiceFilter::default(), config, preferences)
    }

    pub fn with_radio(
        transport: Arc<T>,
        radio: Radio,
        filter: ServiceFilter,
        config: ConnectionConfig,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let inner = Inner {
            scanner: Scanner::new(transport.clone(), radio.clone()),
            transport,
            radio,
            filter,
            config,
            preferences,
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                link: None,
                session: None,
                write_failures: 0,
            }),
            observers: Mutex::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
            app_cancel: CancellationToken::new(),
        };
        ConnectionManager { inner: Arc::new(inner) }
    }

    /// A scanner sharing the radio with this manager.
    pub fn scanner(&self) -> Scanner<T> {
        self.inner.scanner.clone()
    }

    pub fn filter(&self) -> &ServiceFilter {
        &self.inner.filter
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared().state.clone()
    }

    /// Registers an observer. It receives every event from now on, in order.
    pub fn subscribe(&self) -> UnboundedReceiver<DeviceEvent> {
        let (sender, receiver) = unbounded();
        self.add_observer(sender);
        receiver
    }

    pub fn add_observer(&self, sender: UnboundedSender<DeviceEvent>) {
        self.inner.observers.lock().expect("Failed to lock observers").push(sender);
    }

    /// Starts a session with `address`. Progress is reported to the observers.
    pub fn connect(&self, address: &str) -> Result<(), DeviceError> {
        if self.inner.app_cancel.is_cancelled() {
            return Err(DeviceError::Busy);
        }

        let mut shared = self.inner.shared();
        match shared.state {
            ConnectionState::Disconnected | ConnectionState::Failed { .. } => {},
            _ => return Err(DeviceError::Busy),
        }

        let cancel = self.inner.app_cancel.child_token();
        shared.link = None;
        shared.write_failures = 0;
        self.inner.transition(&mut shared, ConnectionState::Connecting { address: address.to_string() }, None);

        let handle = spawn(run_session(self.inner.clone(), address.to_string(), cancel.clone()));
        shared.session = Some(Session { cancel, handle });
        Ok(())
    }

    /// Connects to the last used device if the user asked for that.
    pub fn auto_connect(&self) -> Result<bool, DeviceError> {
        if !self.inner.preferences.auto_connect() {
            return Ok(false);
        }

        match self.inner.preferences.last_device() {
            Some(address) => {
                info!("Auto-connecting to {}", address);
                self.connect(&address)?;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Ends the session: stops any connect or reconnect in progress and closes the link. No
    /// automatic reconnect happens afterwards.
    pub async fn disconnect(&self) {
        let (session, address) = {
            let mut shared = self.inner.shared();
            if shared.state == ConnectionState::Disconnected {
                return;
            }

            let session = shared.session.take();
            if let Some(session) = &session {
                session.cancel.cancel();
            }

            let address = session_address(&shared.state).map(str::to_string);
            shared.link = None;
            self.inner.transition(&mut shared, ConnectionState::Disconnected, None);
            (session, address)
        };

        if let Some(session) = session {
            if let Err(err) = session.handle.await {
                warn!("Connection task failed: {:?}", err);
            }
        }

        if let Some(address) = address {
            self.inner.release_link(&address).await;
        }
    }

    /// Disconnects and refuses further sessions. Call before dropping the transport.
    pub async fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.inner.app_cancel.cancel();
        self.disconnect().await;
    }

    /// Encodes and writes one command. Writes are strictly one at a time, in call order.
    pub async fn send_command(&self, command: Command) -> Result<(), DeviceError> {
        let frame = encode(&command)?;

        let _write = self.inner.write_lock.lock().await;

        let link = {
            let shared = self.inner.shared();
            match (&shared.state, &shared.link) {
                (ConnectionState::Connected { .. }, Some(link)) => link.clone(),
                _ => return Err(DeviceError::NotConnected),
            }
        };

        let write = self.inner.transport.write(&link.address, link.service, &link.characteristic, frame.as_bytes());
        let result = match timeout(self.inner.config.write_timeout(), write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match result {
            Ok(()) => {
                debug!("Sent {} ({:?})", frame, command);
                self.inner.shared().write_failures = 0;
                self.inner.record(&command);
                Ok(())
            },
            Err(source) => {
                warn!("Failed to send to data characteristic: {:?}", source);

                let mut shared = self.inner.shared();
                shared.write_failures += 1;
                if shared.write_failures >= self.inner.config.write_failure_threshold {
                    shared.write_failures = 0;
                    link.lost.cancel();
                }
                Err(DeviceError::WriteFailed { source })
            },
        }
    }
}
