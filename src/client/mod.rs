//! # Client World
//!
//! [`NetworkClient`] owns one client session: the transport, the session's framing
//! state, the client-side message registry and the spawn mirror.
//!
//! The mirror is built only from spawn and unspawn messages. When the session
//! ends, every mirrored entity is destroyed through the [`SpawnHost`], so nothing
//! outlives the server's directory.

use crate::config::{ClientConfig, NetworkConfig, TransportConfig};
use crate::core::framing::{frame_into, unframe, FramingBuffer};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::auth::ClientAuthenticator;
use crate::protocol::message::{encode_payload, message_id, NetworkMessage, MESSAGE_ID_SIZE};
use crate::protocol::messages::{SpawnMessage, UnspawnMessage};
use crate::protocol::registry::{DispatchOutcome, MessageRegistry};
use crate::spawn::{ClientSpawnDirectory, LocalEntity, MirroredEntity, NetworkId, SpawnHost};
use crate::transport::{Channel, ClientEvent, ClientTransport};
use crate::utils::{BufferPool, Metrics};
use bytes::Bytes;
use std::mem;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

type SessionCallback = Rc<dyn Fn(&mut NetworkClient)>;

/// Where the client session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// The client world
pub struct NetworkClient {
    config: ClientConfig,
    transport_config: TransportConfig,
    transport: Box<dyn ClientTransport>,
    state: SessionState,
    authenticated: bool,
    framing: FramingBuffer,
    registry: MessageRegistry<NetworkClient, ()>,
    authenticator: Option<Rc<dyn ClientAuthenticator>>,
    mirror: ClientSpawnDirectory,
    host: Box<dyn SpawnHost>,
    connected_callbacks: Vec<SessionCallback>,
    disconnected_callbacks: Vec<SessionCallback>,
    buffers: BufferPool,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("state", &self.state)
            .field("authenticated", &self.authenticated)
            .field("registry", &self.registry)
            .field("mirrored", &self.mirror.len())
            .finish()
    }
}

impl NetworkClient {
    /// Create a client. Spawned entities are instantiated through `host`.
    pub fn new(
        config: &NetworkConfig,
        transport: impl ClientTransport + 'static,
        host: impl SpawnHost + 'static,
    ) -> Self {
        let mut client = Self {
            config: config.client.clone(),
            transport_config: config.transport.clone(),
            transport: Box::new(transport),
            state: SessionState::Disconnected,
            authenticated: true,
            framing: FramingBuffer::new(),
            registry: MessageRegistry::new(),
            authenticator: None,
            mirror: ClientSpawnDirectory::new(),
            host: Box::new(host),
            connected_callbacks: Vec::new(),
            disconnected_callbacks: Vec::new(),
            buffers: BufferPool::with_buffers(
                config.transport.buffer_pool_size,
                config.transport.max_message_size,
            ),
            metrics: Arc::new(Metrics::new()),
        };
        client.install_core_handlers();
        client
    }

    fn install_core_handlers(&mut self) {
        let spawn = self.register_handler::<SpawnMessage, _>(true, Self::apply_spawn);
        let unspawn = self.register_handler::<UnspawnMessage, _>(true, Self::apply_unspawn);
        if let Err(e) = spawn.and(unspawn) {
            error!(error = %e, "Failed to install core handlers");
        }
    }

    /// Begin connecting to `address`.
    #[instrument(skip(self))]
    pub fn connect(&mut self, address: &str) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(ProtocolError::TransportError(
                constants::ERR_SESSION_OPEN.into(),
            ));
        }

        self.framing.reset();
        self.authenticated = self.authenticator.is_none();
        self.transport.connect(address)?;
        self.state = SessionState::Connecting;
        debug!("Connecting");
        Ok(())
    }

    /// Connect to the address from the client configuration.
    pub fn connect_configured(&mut self) -> Result<()> {
        let address = self.config.address.clone();
        self.connect(&address)
    }

    /// End the session. Returns `false` if there was none.
    pub fn disconnect(&mut self) -> bool {
        if self.state == SessionState::Disconnected {
            return false;
        }
        self.transport.disconnect();
        self.teardown();
        true
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Drain pending transport events on the calling thread. Returns how many
    /// events were processed.
    pub fn update(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.transport.poll() {
            processed += 1;
            match event {
                ClientEvent::Connected => self.handle_connected(),
                ClientEvent::Data(bytes) => self.handle_data(bytes),
                ClientEvent::Disconnected => {
                    if self.state != SessionState::Disconnected {
                        debug!("Transport dropped the session");
                        self.teardown();
                    }
                }
            }
        }
        processed
    }

    fn handle_connected(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.state = SessionState::Connected;
        self.metrics.connection_established();
        info!("Connected");

        if let Some(authenticator) = self.authenticator.clone() {
            authenticator.on_connected(self);
        }
        for callback in self.connected_callbacks.clone() {
            if self.state != SessionState::Connected {
                break;
            }
            callback(self);
        }
    }

    fn handle_data(&mut self, bytes: Bytes) {
        if self.state != SessionState::Connected {
            debug!(len = bytes.len(), "Data outside a session");
            return;
        }
        self.metrics.bytes_received(bytes.len() as u64);

        let mut framing = mem::take(&mut self.framing);
        let max_message_size = self.transport_config.max_message_size;
        let intact = unframe(&bytes, &mut framing, max_message_size, |payload| {
            self.dispatch(payload);
        });

        if self.state != SessionState::Connected {
            framing.reset();
        }
        self.framing = framing;

        if !intact {
            self.metrics.framing_violation();
            warn!("Framing violation, closing session");
            self.disconnect();
        }
    }

    fn teardown(&mut self) {
        let was_connected = self.state == SessionState::Connected;
        self.state = SessionState::Disconnected;
        self.authenticated = self.authenticator.is_none();
        self.framing.reset();

        let mirrored = self.mirror.drain();
        for entity in &mirrored {
            self.host.destroy(entity.local);
            self.metrics.entity_despawned();
        }

        if was_connected {
            self.metrics.connection_closed();
        }
        info!(mirrored = mirrored.len(), "Session closed");

        for callback in self.disconnected_callbacks.clone() {
            callback(self);
        }
    }

    /// Dispatch one complete payload from the server to its handler.
    pub fn dispatch(&mut self, payload: &[u8]) -> DispatchOutcome {
        if self.state != SessionState::Connected {
            debug!("Dropping message outside a session");
            return DispatchOutcome::NoConnection;
        }

        let id = match message_id(payload) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Dropping malformed payload");
                self.metrics.malformed_message();
                return DispatchOutcome::Malformed;
            }
        };

        let handler = match self.registry.resolve(id, self.authenticated) {
            Ok(handler) => handler,
            Err(outcome) => {
                match outcome {
                    DispatchOutcome::UnknownMessage(_) => {
                        warn!(message_id = id, "No handler for message");
                        self.metrics.unknown_message();
                    }
                    DispatchOutcome::Unauthenticated(_) => {
                        warn!(message_id = id, "Dropping gated message before authentication");
                        self.metrics.unauthenticated_drop();
                    }
                    _ => {}
                }
                return outcome;
            }
        };

        let outcome = handler.invoke(self, (), &payload[MESSAGE_ID_SIZE..]);
        match outcome {
            DispatchOutcome::Handled => self.metrics.message_received(),
            DispatchOutcome::Malformed => self.metrics.malformed_message(),
            DispatchOutcome::HandlerFailed(_) => self.metrics.handler_error(),
            _ => {}
        }
        outcome
    }

    /// Encode and send `msg` to the server.
    pub fn send<M: NetworkMessage>(&mut self, msg: &M, channel: Channel) -> Result<()> {
        let mut payload = self.buffers.take();
        let result = encode_payload(msg, &mut payload)
            .and_then(|()| self.send_payload(&payload, channel));
        self.buffers.give(payload);
        result
    }

    /// Frame and send an already encoded payload (message id + body).
    pub fn send_payload(&mut self, payload: &[u8], channel: Channel) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(ProtocolError::NotConnected);
        }

        let max = self.transport_config.max_message_size;
        if payload.len() > max {
            return Err(ProtocolError::OversizedMessage {
                size: payload.len(),
                max,
            });
        }

        let mut framed = self.buffers.take();
        let result = frame_into(payload, &mut framed).and_then(|()| {
            if self.transport.send(&framed, channel) {
                self.metrics.message_sent(framed.len() as u64);
                Ok(())
            } else {
                Err(ProtocolError::TransportError(
                    constants::ERR_TRANSPORT_SEND_FAILED.into(),
                ))
            }
        });
        self.buffers.give(framed);
        result
    }

    /// Register the handler for `M`. See [`MessageRegistry::register`].
    pub fn register_handler<M, F>(&mut self, requires_authentication: bool, handler: F) -> Result<()>
    where
        M: NetworkMessage,
        F: Fn(&mut NetworkClient, M) -> Result<()> + 'static,
    {
        self.registry
            .register::<M, _>(requires_authentication, move |client, (), msg| {
                handler(client, msg)
            })
    }

    pub fn unregister_handler<M: NetworkMessage>(&mut self) -> bool {
        self.registry.unregister::<M>()
    }

    /// Install an authenticator and run its `on_start` immediately.
    ///
    /// The session counts as unauthenticated until the authenticator says otherwise.
    /// If `on_start` fails the client keeps its previous authenticator and flag.
    pub fn set_authenticator(
        &mut self,
        authenticator: impl ClientAuthenticator + 'static,
    ) -> Result<()> {
        let authenticator: Rc<dyn ClientAuthenticator> = Rc::new(authenticator);
        authenticator.on_start(self)?;
        self.authenticator = Some(authenticator);
        self.authenticated = false;
        Ok(())
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Run `callback` each time the session reaches `Connected`.
    pub fn on_connected<F>(&mut self, callback: F)
    where
        F: Fn(&mut NetworkClient) + 'static,
    {
        self.connected_callbacks.push(Rc::new(callback));
    }

    /// Run `callback` each time a session ends, after the mirror was torn down.
    pub fn on_disconnected<F>(&mut self, callback: F)
    where
        F: Fn(&mut NetworkClient) + 'static,
    {
        self.disconnected_callbacks.push(Rc::new(callback));
    }

    fn apply_spawn(&mut self, msg: SpawnMessage) -> Result<()> {
        if let Some(existing) = self.mirror.get_mut(msg.network_id) {
            if existing.owned != msg.owned {
                existing.owned = msg.owned;
                self.host.set_owned(existing.local, msg.owned);
                debug!(network_id = %msg.network_id, owned = msg.owned, "Ownership updated");
            }
            return Ok(());
        }

        let local = match self.host.instantiate(msg.prefab, msg.network_id, msg.owned) {
            Ok(local) => local,
            Err(e) => {
                warn!(network_id = %msg.network_id, prefab = %msg.prefab, error = %e, "Entity not mirrored");
                return Err(e);
            }
        };

        self.mirror.insert(MirroredEntity {
            network_id: msg.network_id,
            local,
            prefab: msg.prefab,
            owned: msg.owned,
        });
        self.metrics.entity_spawned();
        debug!(network_id = %msg.network_id, local = %local, owned = msg.owned, "Entity mirrored");
        Ok(())
    }

    fn apply_unspawn(&mut self, msg: UnspawnMessage) -> Result<()> {
        match self.mirror.remove(msg.network_id) {
            Some(entity) => {
                self.host.destroy(entity.local);
                self.metrics.entity_despawned();
                debug!(network_id = %msg.network_id, "Entity unmirrored");
            }
            None => debug!(network_id = %msg.network_id, "Unspawn for an entity not mirrored"),
        }
        Ok(())
    }

    /// Mirror entry for a network id
    pub fn entity(&self, network_id: NetworkId) -> Option<&MirroredEntity> {
        self.mirror.get(network_id)
    }

    pub fn network_id_of(&self, local: LocalEntity) -> Option<NetworkId> {
        self.mirror.network_id_of(local)
    }

    /// Network ids this client owns, ascending
    pub fn owned_entities(&self) -> Vec<NetworkId> {
        self.mirror.owned()
    }

    pub fn mirror_len(&self) -> usize {
        self.mirror.len()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}
