//! The endpoint: one side of a peer-to-peer grain connection.
//!
//! An endpoint owns a grain registry, a dispatcher for inbound calls and at
//! most one connection at a time. Either side may bind and accept, or
//! connect; once connected both sides are equal.
//!
//! Threads per endpoint:
//! - a garbage collector sweeping unused proxies every `gc_interval`
//! - an accept loop while bound
//! - per connection, a reader plus the heartbeat and latency monitors
//! - the elastic pool running inbound invocations

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use grainrpc_frame::{FrameConfig, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
use grainrpc_transport::{EndpointAddr, Listener, Stream, TransportError};
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::connection::{self, Connection, DisconnectReason};
use crate::dispatcher::Dispatcher;
use crate::error::{CallResult, EndpointError, Result, RpcError};
use crate::handshake::{self, HandshakeConfig, HandshakeResult};
use crate::heartbeat::{self, Heartbeat, HeartbeatServant};
use crate::ids::{is_reserved, ConnectionId, GrainId, HEARTBEAT_GRAIN_ID, LATENCY_GRAIN_ID};
use crate::interface::RemoteInterface;
use crate::latency::{self, Latency, LatencyServant, RoundtripSamples};
use crate::marshal::{self, MarshalScope};
use crate::message::{Invocation, Message, Release};
use crate::pending::PendingCalls;
use crate::proxy::{ArgumentWriter, CallChannel, CallTarget, OutgoingCall};
use crate::registry::{CollectionStats, GrainInfo, GrainRegistry, Servant};
use crate::settings::EndpointSettings;
use crate::signal::StopSignal;
use crate::stats::{EndpointStatistics, StatCounters};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type AddressHandler = Arc<dyn Fn(&EndpointAddr, ConnectionId) + Send + Sync>;
type FailureHandler = Arc<dyn Fn(DisconnectReason, ConnectionId) + Send + Sync>;

/// Builds an [`Endpoint`].
pub struct EndpointBuilder {
    name: String,
    settings: EndpointSettings,
    client_authenticator: Option<Arc<dyn Authenticator>>,
    server_authenticator: Option<Arc<dyn Authenticator>>,
}

impl EndpointBuilder {
    /// Replace the default settings.
    pub fn with_settings(mut self, settings: EndpointSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Authenticates connecting clients. On the connecting side, answers
    /// the server's challenge.
    pub fn with_client_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.client_authenticator = Some(authenticator);
        self
    }

    /// Authenticates the accepting server. On the accepting side, answers
    /// the client's challenge.
    pub fn with_server_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.server_authenticator = Some(authenticator);
        self
    }

    /// Validate the settings and create the endpoint.
    ///
    /// The endpoint starts unconnected, with its garbage collector running.
    pub fn build(self) -> Result<Endpoint> {
        self.settings.validate()?;
        if self.name.is_empty() {
            return Err(EndpointError::InvalidArgument(
                "endpoint name must not be empty".to_string(),
            ));
        }

        let inner = Arc::new_cyclic(|this: &Weak<EndpointInner>| {
            let channel: Weak<dyn CallChannel> = this.clone();
            EndpointInner::new(self, this.clone(), channel)
        });
        inner.install_internal_grains()?;
        inner.start_collector()?;
        debug!(endpoint = %inner.name, "endpoint created");
        Ok(Endpoint { inner })
    }
}

impl fmt::Debug for EndpointBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointBuilder")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("client_authenticator", &self.client_authenticator)
            .field("server_authenticator", &self.server_authenticator)
            .finish()
    }
}

/// One side of a grain connection.
///
/// Dropping the endpoint disposes it: the connection is closed, the
/// listener stops and every grain is released.
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    /// An endpoint with default settings and no authentication.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::builder(name).build()
    }

    /// Create a builder for an endpoint called `name`. The name is sent to
    /// the peer during the handshake.
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            name: name.into(),
            settings: EndpointSettings::default(),
            client_authenticator: None,
            server_authenticator: None,
        }
    }

    /// Get the endpoint's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the settings the endpoint was built with.
    pub fn settings(&self) -> &EndpointSettings {
        &self.inner.settings
    }

    /// Starts accepting connections on `addr`. Returns the bound address,
    /// which carries the real port when `addr` asked for port 0.
    pub fn bind(&self, addr: &EndpointAddr) -> Result<EndpointAddr> {
        self.inner.bind(addr)
    }

    /// Connects using the handshake timeout as connect timeout.
    pub fn connect(&self, addr: &EndpointAddr) -> Result<ConnectionId> {
        self.inner.connect(addr, self.inner.settings.handshake_timeout())
    }

    pub fn connect_timeout(&self, addr: &EndpointAddr, timeout: Duration) -> Result<ConnectionId> {
        self.inner.connect(addr, timeout)
    }

    /// Like [`connect_timeout`](Self::connect_timeout) but reports a failed
    /// attempt as `Ok(false)`. Misuse (a zero timeout, connecting to itself,
    /// connecting while connected) is still an error.
    pub fn try_connect(&self, addr: &EndpointAddr, timeout: Duration) -> Result<bool> {
        match self.inner.connect(addr, timeout) {
            Ok(_) => Ok(true),
            Err(err @ EndpointError::InvalidArgument(_))
            | Err(err @ EndpointError::AlreadyConnected(_))
            | Err(err @ EndpointError::Connecting(_))
            | Err(err @ EndpointError::Disposed(_)) => Err(err),
            Err(err) => {
                debug!(endpoint = %self.inner.name, addr = %addr, error = %err, "connection attempt failed");
                Ok(false)
            }
        }
    }

    /// Closes the current connection, if any. Does not wait for the peer.
    pub fn disconnect(&self) {
        let id = self.inner.current_connection_id();
        if !id.is_none() {
            self.inner.disconnect_with(id, DisconnectReason::RequestedByEndpoint);
        }
    }

    /// Closes connection `id` with `reason`. Ignored when `id` is not the
    /// current connection. Returns whether a connection was closed.
    pub fn disconnect_with(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        self.inner.disconnect_with(id, reason)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current_connection().is_some()
    }

    /// [`ConnectionId::NONE`] while not connected.
    pub fn current_connection_id(&self) -> ConnectionId {
        self.inner.current_connection_id()
    }

    /// The bound address, or the local address of the current connection.
    pub fn local_addr(&self) -> Option<EndpointAddr> {
        let state = self.inner.state();
        state.listener.clone().or_else(|| {
            state
                .connection
                .as_ref()
                .and_then(|connection| connection.local_addr().cloned())
        })
    }

    pub fn remote_addr(&self) -> Option<EndpointAddr> {
        self.inner
            .current_connection()
            .map(|connection| connection.remote_addr().clone())
    }

    /// Name the peer announced in the handshake.
    pub fn remote_name(&self) -> Option<String> {
        self.inner
            .current_connection()
            .map(|connection| connection.remote_name().to_string())
    }

    /// Exposes `subject` to the peer under `grain_id`.
    pub fn create_servant<I: ?Sized + RemoteInterface>(
        &self,
        grain_id: GrainId,
        subject: Arc<I>,
    ) -> Result<Arc<Servant>> {
        check_user_grain_id(grain_id)?;
        self.inner.registry.create_servant(grain_id, subject)
    }

    pub fn remove_servant(&self, grain_id: GrainId) -> bool {
        !is_reserved(grain_id) && self.inner.registry.remove_servant(grain_id)
    }

    /// Creates a proxy for the peer's servant `grain_id`. Works while
    /// disconnected; calls fail with `NotConnected` until a connection is up.
    pub fn create_proxy<I: ?Sized + RemoteInterface>(&self, grain_id: GrainId) -> Result<Arc<I>> {
        check_user_grain_id(grain_id)?;
        self.inner.registry.create_proxy(grain_id, self.inner.channel())
    }

    pub fn get_existing_or_create_new_proxy<I: ?Sized + RemoteInterface>(
        &self,
        grain_id: GrainId,
    ) -> Result<Arc<I>> {
        check_user_grain_id(grain_id)?;
        self.inner
            .registry
            .get_existing_or_create_new_proxy(grain_id, self.inner.channel(), false)
    }

    /// The subject of servant `grain_id`, if it exists and implements `I`.
    pub fn retrieve_subject<I: ?Sized + RemoteInterface>(&self, grain_id: GrainId) -> Option<Arc<I>> {
        self.inner.registry.retrieve_subject(grain_id)
    }

    /// Runs after every successful connect, on the connecting thread.
    pub fn on_connected(&self, handler: impl Fn(&EndpointAddr, ConnectionId) + Send + Sync + 'static) {
        lock(&self.inner.events.connected).push(Arc::new(handler));
    }

    /// Runs after a disconnect either side requested.
    pub fn on_disconnected(
        &self,
        handler: impl Fn(&EndpointAddr, ConnectionId) + Send + Sync + 'static,
    ) {
        lock(&self.inner.events.disconnected).push(Arc::new(handler));
    }

    /// Runs after a connection failed. Replaces `on_disconnected` for that
    /// connection.
    pub fn on_failure(&self, handler: impl Fn(DisconnectReason, ConnectionId) + Send + Sync + 'static) {
        lock(&self.inner.events.failure).push(Arc::new(handler));
    }

    /// Mean of the recent latency samples. Zero until the first sample of
    /// the current connection.
    pub fn roundtrip_time(&self) -> Duration {
        self.inner.roundtrip.mean()
    }

    /// Outgoing calls awaiting a result.
    pub fn num_pending_method_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Incoming calls whose result has not been sent yet.
    pub fn num_pending_method_invocations(&self) -> usize {
        self.inner.dispatcher.num_pending_invocations()
    }

    pub fn proxies(&self) -> Vec<GrainInfo> {
        self.inner.registry.proxy_list()
    }

    pub fn servants(&self) -> Vec<GrainInfo> {
        self.inner.registry.servant_list()
    }

    pub fn collection_stats(&self) -> CollectionStats {
        self.inner.registry.collection_stats()
    }

    pub fn statistics(&self) -> EndpointStatistics {
        self.inner
            .stats
            .snapshot(self.inner.registry.collection_stats())
    }

    /// Runs one garbage collection sweep now.
    pub fn collect_garbage(&self) {
        self.inner.collect_garbage();
    }

    /// Shuts the endpoint down. Further connects fail with `Disposed`.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.name)
            .field("connection", &self.inner.current_connection_id())
            .finish()
    }
}

fn check_user_grain_id(grain_id: GrainId) -> Result<()> {
    if is_reserved(grain_id) {
        return Err(EndpointError::InvalidArgument(format!(
            "grain id #{grain_id} is reserved for internal use"
        )));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unconnected,
    Connecting,
    Connected,
}

struct EndpointState {
    phase: Phase,
    connection: Option<Arc<Connection>>,
    monitors: Vec<Arc<StopSignal>>,
    listener: Option<EndpointAddr>,
    connections_established: u64,
    disposed: bool,
}

#[derive(Default)]
struct Events {
    connected: Mutex<Vec<AddressHandler>>,
    disconnected: Mutex<Vec<AddressHandler>>,
    failure: Mutex<Vec<FailureHandler>>,
}

impl Events {
    fn fire<H: ?Sized>(event: &'static str, handlers: &Mutex<Vec<Arc<H>>>, call: impl Fn(&H)) {
        let handlers = lock(handlers).clone();
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| call(handler.as_ref()))).is_err() {
                warn!(event, "event handler panicked");
            }
        }
    }
}

struct InternalGrains {
    heartbeat: Arc<dyn Heartbeat>,
    latency: Arc<dyn Latency>,
}

pub(crate) struct EndpointInner {
    name: String,
    settings: EndpointSettings,
    client_authenticator: Option<Arc<dyn Authenticator>>,
    server_authenticator: Option<Arc<dyn Authenticator>>,
    registry: Arc<GrainRegistry>,
    scope: Arc<MarshalScope>,
    pending: PendingCalls,
    dispatcher: Dispatcher,
    stats: Arc<StatCounters>,
    roundtrip: Arc<RoundtripSamples>,
    internal: OnceLock<InternalGrains>,
    state: Mutex<EndpointState>,
    events: Events,
    shutdown: Arc<StopSignal>,
    this: Weak<EndpointInner>,
}

impl EndpointInner {
    fn new(
        builder: EndpointBuilder,
        this: Weak<EndpointInner>,
        channel: Weak<dyn CallChannel>,
    ) -> Self {
        let EndpointBuilder {
            name,
            settings,
            client_authenticator,
            server_authenticator,
        } = builder;
        let registry = Arc::new(GrainRegistry::new(name.clone()));
        let scope = Arc::new(MarshalScope::new(name.clone(), Arc::clone(&registry), channel));
        let stats = Arc::new(StatCounters::default());
        Self {
            pending: PendingCalls::new(name.clone(), settings.max_concurrent_calls),
            dispatcher: Dispatcher::new(
                name.clone(),
                Arc::clone(&registry),
                Arc::clone(&scope),
                Arc::clone(&stats),
                settings.worker_keep_alive(),
            ),
            roundtrip: Arc::new(RoundtripSamples::new(settings.latency.num_samples)),
            name,
            settings,
            client_authenticator,
            server_authenticator,
            registry,
            scope,
            stats,
            internal: OnceLock::new(),
            state: Mutex::new(EndpointState {
                phase: Phase::Unconnected,
                connection: None,
                monitors: Vec::new(),
                listener: None,
                connections_established: 0,
                disposed: false,
            }),
            events: Events::default(),
            shutdown: Arc::new(StopSignal::new()),
            this,
        }
    }

    fn state(&self) -> MutexGuard<'_, EndpointState> {
        lock(&self.state)
    }

    fn channel(&self) -> Weak<dyn CallChannel> {
        self.this.clone()
    }

    /// Both sides serve and hold a proxy for the heartbeat and latency
    /// grains under the same reserved ids.
    fn install_internal_grains(&self) -> Result<()> {
        self.registry
            .create_servant::<dyn Heartbeat>(HEARTBEAT_GRAIN_ID, Arc::new(HeartbeatServant))?;
        self.registry
            .create_servant::<dyn Latency>(LATENCY_GRAIN_ID, Arc::new(LatencyServant))?;
        let grains = InternalGrains {
            heartbeat: self
                .registry
                .create_proxy::<dyn Heartbeat>(HEARTBEAT_GRAIN_ID, self.channel())?,
            latency: self
                .registry
                .create_proxy::<dyn Latency>(LATENCY_GRAIN_ID, self.channel())?,
        };
        let _ = self.internal.set(grains);
        Ok(())
    }

    fn start_collector(&self) -> Result<()> {
        let this = self.this.clone();
        let stop = Arc::clone(&self.shutdown);
        let interval = self.settings.gc_interval();
        thread::Builder::new()
            .name(format!("{}-gc", self.name))
            .spawn(move || {
                while !stop.wait(interval) {
                    let Some(inner) = this.upgrade() else {
                        break;
                    };
                    inner.collect_garbage();
                }
            })
            .map_err(TransportError::Io)?;
        Ok(())
    }

    fn collect_garbage(&self) {
        self.registry.remove_unused_proxies();
        self.stats.record_gc_sweep();
        let released = self.registry.take_released();
        if released.is_empty() {
            return;
        }
        let Some(connection) = self.current_connection() else {
            return;
        };
        debug!(endpoint = %self.name, count = released.len(), "releasing implicit grains");
        let message = Message::Release(Release { grains: released });
        if let Err(err) = connection.send(&message) {
            debug!(endpoint = %self.name, error = %err, "failed to send release");
        }
    }

    pub(crate) fn current_connection(&self) -> Option<Arc<Connection>> {
        self.state().connection.clone()
    }

    fn current_connection_id(&self) -> ConnectionId {
        self.state()
            .connection
            .as_ref()
            .map_or(ConnectionId::NONE, |connection| connection.id())
    }

    fn handshake_config(&self, timeout: Duration) -> HandshakeConfig {
        HandshakeConfig {
            name: self.name.clone(),
            timeout,
            client_authenticator: self.client_authenticator.clone(),
            server_authenticator: self.server_authenticator.clone(),
            ..HandshakeConfig::default()
        }
    }

    // -- listening --------------------------------------------------------

    fn bind(&self, addr: &EndpointAddr) -> Result<EndpointAddr> {
        let mut state = self.state();
        if state.disposed {
            return Err(EndpointError::Disposed(self.name.clone()));
        }
        if let Some(bound) = &state.listener {
            return Err(EndpointError::AlreadyBound {
                name: self.name.clone(),
                addr: bound.clone(),
            });
        }

        let listener = Listener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr();

        let this = self.this.clone();
        let stop = Arc::clone(&self.shutdown);
        thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || accept_loop(this, listener, stop))
            .map_err(TransportError::Io)?;

        state.listener = Some(local.clone());
        info!(endpoint = %self.name, addr = %local, "listening");
        Ok(local)
    }

    fn accept_connection(&self, stream: Stream) {
        let peer_addr = stream.peer_addr();
        let blocked = {
            let mut state = self.state();
            if state.disposed || state.phase != Phase::Unconnected {
                true
            } else {
                state.phase = Phase::Connecting;
                false
            }
        };

        let timeout = self.settings.handshake_timeout();
        let (mut reader, mut writer) = match handshake_frames(stream, timeout) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(endpoint = %self.name, error = %err, "failed to prepare incoming connection");
                if !blocked {
                    self.abort_connecting();
                }
                return;
            }
        };

        if blocked {
            // Consume the hello so closing the socket does not reset it
            // before the peer read the rejection.
            let _ = reader.read_frame();
            if let Err(err) = handshake::reject_blocked(&mut writer, &self.name) {
                debug!(endpoint = %self.name, error = %err, "failed to reject incoming connection");
            }
            let _ = writer.get_ref().shutdown();
            info!(endpoint = %self.name, "rejected incoming connection, already connected");
            return;
        }

        let result =
            handshake::handshake_server(&mut reader, &mut writer, &self.handshake_config(timeout))
                .and_then(|result| {
                    finish_handshake(&mut reader, &mut writer)?;
                    Ok(result)
                });
        match result {
            Ok(result) => {
                let remote = peer_addr
                    .or_else(|| self.state().listener.clone())
                    .unwrap_or_else(|| EndpointAddr::loopback(0));
                if let Err(err) = self.install(reader, writer, remote, result) {
                    warn!(endpoint = %self.name, error = %err, "failed to install incoming connection");
                    self.abort_connecting();
                }
            }
            Err(err) => {
                warn!(endpoint = %self.name, error = %err, "incoming handshake failed");
                let _ = writer.get_ref().shutdown();
                self.abort_connecting();
            }
        }
    }

    // -- connecting -------------------------------------------------------

    fn connect(&self, addr: &EndpointAddr, timeout: Duration) -> Result<ConnectionId> {
        self.begin_connecting(addr, timeout)?;
        self.establish(addr, timeout).inspect_err(|err| {
            warn!(endpoint = %self.name, addr = %addr, error = %err, "connect failed");
            self.abort_connecting();
        })
    }

    fn begin_connecting(&self, addr: &EndpointAddr, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(EndpointError::InvalidArgument(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        let mut state = self.state();
        if state.disposed {
            return Err(EndpointError::Disposed(self.name.clone()));
        }
        if state.listener.as_ref() == Some(addr) {
            return Err(EndpointError::InvalidArgument(format!(
                "endpoint '{}' cannot connect to its own address {addr}",
                self.name
            )));
        }
        match state.phase {
            Phase::Connected => Err(EndpointError::AlreadyConnected(self.name.clone())),
            Phase::Connecting => Err(EndpointError::Connecting(self.name.clone())),
            Phase::Unconnected => {
                state.phase = Phase::Connecting;
                Ok(())
            }
        }
    }

    fn abort_connecting(&self) {
        let mut state = self.state();
        if state.phase == Phase::Connecting {
            state.phase = Phase::Unconnected;
        }
    }

    fn establish(&self, addr: &EndpointAddr, timeout: Duration) -> Result<ConnectionId> {
        let stream = grainrpc_transport::connect(addr, timeout).map_err(|err| {
            EndpointError::NoSuchEndpoint {
                addr: addr.clone(),
                reason: err.to_string(),
            }
        })?;
        let (mut reader, mut writer) = handshake_frames(stream, timeout)?;
        let result =
            handshake::handshake_client(&mut reader, &mut writer, &self.handshake_config(timeout))
                .and_then(|result| {
                    finish_handshake(&mut reader, &mut writer)?;
                    Ok(result)
                });
        match result {
            Ok(result) => self.install(reader, writer, addr.clone(), result),
            Err(err) => {
                let _ = writer.get_ref().shutdown();
                Err(err)
            }
        }
    }

    /// Publishes a connection that passed the handshake.
    fn install(
        &self,
        reader: FrameReader<Stream>,
        writer: FrameWriter<Stream>,
        remote_addr: EndpointAddr,
        handshake: HandshakeResult,
    ) -> Result<ConnectionId> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| EndpointError::Disposed(self.name.clone()))?;
        let connection = {
            let mut state = self.state();
            if state.disposed {
                let _ = writer.get_ref().shutdown();
                return Err(EndpointError::Disposed(self.name.clone()));
            }
            let id = ConnectionId::new(state.connections_established + 1);
            let connection = Arc::new(Connection::new(
                id,
                remote_addr,
                handshake.remote_name,
                writer,
                Arc::clone(&self.stats),
            )?);
            state.connections_established += 1;
            self.roundtrip.clear();
            self.pending.start_accepting();
            state.phase = Phase::Connected;
            state.connection = Some(Arc::clone(&connection));
            connection
        };

        let reader_connection = Arc::clone(&connection);
        let spawned = thread::Builder::new()
            .name(format!("{}-reader", self.name))
            .spawn(move || this.run_reader(reader_connection, reader));
        if let Err(err) = spawned {
            self.disconnect_with(connection.id(), DisconnectReason::UnhandledException);
            return Err(TransportError::Io(err).into());
        }
        self.start_monitors(&connection);

        info!(
            endpoint = %self.name,
            connection_id = %connection.id(),
            remote = %connection.remote_addr(),
            peer = connection.remote_name(),
            version = %handshake.protocol_version,
            "connected"
        );
        Events::fire("connected", &self.events.connected, |handler| {
            handler(connection.remote_addr(), connection.id())
        });
        Ok(connection.id())
    }

    fn start_monitors(&self, connection: &Arc<Connection>) {
        let Some(internal) = self.internal.get() else {
            return;
        };
        let id = connection.id();
        let mut monitors = Vec::new();

        let this = self.this.clone();
        match heartbeat::start_monitor(
            &self.name,
            Arc::clone(connection),
            Arc::clone(&internal.heartbeat),
            self.settings.heartbeat.clone(),
            move || {
                if let Some(inner) = this.upgrade() {
                    inner.disconnect_with(id, DisconnectReason::HeartbeatFailure);
                }
            },
        ) {
            Ok(stop) => monitors.push(stop),
            Err(err) => warn!(endpoint = %self.name, error = %err, "failed to start heartbeat monitor"),
        }

        if self.settings.latency.perform_measurements {
            match latency::start_monitor(
                &self.name,
                Arc::clone(connection),
                Arc::clone(&internal.latency),
                self.settings.latency.clone(),
                Arc::clone(&self.roundtrip),
            ) {
                Ok(stop) => monitors.push(stop),
                Err(err) => warn!(endpoint = %self.name, error = %err, "failed to start latency monitor"),
            }
        }

        let mut state = self.state();
        let current = state.connection.as_ref().map(|connection| connection.id());
        if current == Some(id) {
            state.monitors.extend(monitors);
        } else {
            monitors.iter().for_each(|stop| stop.stop());
        }
    }

    fn run_reader(self: Arc<Self>, connection: Arc<Connection>, mut reader: FrameReader<Stream>) {
        let reason = connection::read_messages(&connection, &mut reader, &self.stats, |message| {
            self.handle_message(&connection, message)
        });
        debug!(endpoint = %self.name, connection_id = %connection.id(), reason = %reason, "reader stopped");
        self.disconnect_with(connection.id(), reason);
    }

    fn handle_message(
        &self,
        connection: &Arc<Connection>,
        message: Message,
    ) -> std::result::Result<(), DisconnectReason> {
        match message {
            Message::Call(invocation) => self.dispatcher.dispatch(connection, invocation),
            Message::Result(result) => {
                let rpc_id = result.rpc_id;
                if !self.pending.complete(rpc_id, result.outcome.into_result()) {
                    debug!(endpoint = %self.name, rpc_id, "ignoring result of an unknown call");
                }
                Ok(())
            }
            Message::Goodbye => Err(DisconnectReason::RequestedByRemoteEndpoint),
            Message::Release(release) => {
                self.registry.release_servants(&release.grains);
                Ok(())
            }
        }
    }

    // -- disconnecting ----------------------------------------------------

    fn disconnect_with(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let (connection, monitors, cancelled) = {
            let mut state = self.state();
            let is_current = state
                .connection
                .as_ref()
                .is_some_and(|connection| connection.id() == id);
            if !is_current {
                return false;
            }
            let Some(connection) = state.connection.take() else {
                return false;
            };
            state.phase = Phase::Unconnected;
            let monitors = std::mem::take(&mut state.monitors);
            let cancelled = self.pending.stop_accepting();
            self.dispatcher.clear_invocations();
            self.registry.remove_transient_proxies();
            self.registry.remove_implicit_servants();
            (connection, monitors, cancelled)
        };

        for stop in &monitors {
            stop.stop();
        }
        self.pending.fail_all(&cancelled);
        if reason == DisconnectReason::RequestedByEndpoint {
            connection.say_goodbye(self.settings.goodbye_timeout());
        }
        connection.shutdown();

        if reason.is_failure() {
            warn!(
                endpoint = %self.name,
                connection_id = %id,
                reason = %reason,
                cancelled_calls = cancelled.len(),
                "connection failed"
            );
            Events::fire("failure", &self.events.failure, |handler| handler(reason, id));
        } else {
            info!(
                endpoint = %self.name,
                connection_id = %id,
                reason = %reason,
                cancelled_calls = cancelled.len(),
                "disconnected"
            );
            Events::fire("disconnected", &self.events.disconnected, |handler| {
                handler(connection.remote_addr(), id)
            });
        }
        true
    }

    fn dispose(&self) {
        {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        self.shutdown.stop();
        let id = self.current_connection_id();
        if !id.is_none() {
            self.disconnect_with(id, DisconnectReason::RequestedByEndpoint);
        }
        self.dispatcher.shutdown();
        self.registry.clear();
        info!(endpoint = %self.name, "endpoint disposed");
    }
}

impl CallChannel for EndpointInner {
    fn send_call(
        &self,
        target: CallTarget,
        encode: &dyn Fn(&mut ArgumentWriter) -> CallResult<()>,
    ) -> OutgoingCall {
        let Some(connection) = self.current_connection() else {
            return OutgoingCall::failed(RpcError::NotConnected {
                endpoint: self.name.clone(),
            });
        };

        let args = {
            let _scope = marshal::enter(Arc::clone(&self.scope));
            let mut writer = ArgumentWriter::new();
            if let Err(err) = encode(&mut writer) {
                return OutgoingCall::failed(err);
            }
            writer.into_values()
        };

        let one_way = target.method.dispatch.is_one_way();
        let pending = if one_way {
            None
        } else {
            match self.pending.enqueue(target.grain_id, target.method.name) {
                Ok(call) => Some(call),
                Err(err) => return OutgoingCall::failed(err),
            }
        };
        let rpc_id = pending
            .as_ref()
            .map_or_else(|| self.pending.next_rpc_id(), |call| call.rpc_id());

        let message = Message::Call(Invocation {
            rpc_id,
            grain_id: target.grain_id,
            interface: target.interface.name.to_string(),
            method: target.method.name.to_string(),
            args,
            one_way,
        });
        self.stats.record_call_invoked();
        if let Err(err) = connection.send(&message) {
            debug!(
                endpoint = %self.name,
                rpc_id,
                grain = target.grain_id,
                method = target.method.name,
                error = %err,
                "failed to send call"
            );
            let lost = RpcError::ConnectionLost {
                endpoint: self.name.clone(),
            };
            self.pending.complete(rpc_id, Err(lost.clone()));
            if !connection.is_closed() {
                self.disconnect_with(connection.id(), DisconnectReason::WriteFailure);
            }
            return OutgoingCall::failed(lost);
        }

        match pending {
            Some(call) => OutgoingCall::pending(call, Arc::clone(&self.scope)),
            None => OutgoingCall::detached(),
        }
    }
}

fn accept_loop(this: Weak<EndpointInner>, listener: Listener, stop: Arc<StopSignal>) {
    while !stop.is_stopped() {
        match listener.poll_accept() {
            Ok(Some(stream)) => {
                let Some(inner) = this.upgrade() else {
                    break;
                };
                inner.accept_connection(stream);
            }
            Ok(None) => {
                if stop.wait(ACCEPT_POLL_INTERVAL) {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                if stop.wait(ACCEPT_POLL_INTERVAL) {
                    break;
                }
            }
        }
    }
    debug!(addr = %listener.local_addr(), "accept loop stopped");
}

fn handshake_frames(
    stream: Stream,
    timeout: Duration,
) -> Result<(FrameReader<Stream>, FrameWriter<Stream>)> {
    let config = FrameConfig {
        max_payload_size: HandshakeConfig::default().max_handshake_payload,
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
    };
    let reader = FrameReader::with_config_stream(stream.try_clone()?, config.clone())?;
    let writer = FrameWriter::with_config_stream(stream, config)?;
    Ok((reader, writer))
}

/// Lifts the pre-authentication limits once the handshake succeeded.
fn finish_handshake(
    reader: &mut FrameReader<Stream>,
    writer: &mut FrameWriter<Stream>,
) -> Result<()> {
    reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
    writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
    reader.set_read_timeout(None)?;
    writer.set_write_timeout(None)?;
    Ok(())
}
