//! # Server World
//!
//! [`NetworkServer`] owns everything one server session needs: the transport, the
//! connection table, the message registry, the authoritative spawn directory and
//! the metrics. Every mutation happens on the thread that calls [`NetworkServer::update`].
//!
//! ## Connection lifecycle
//! 1. The transport reports a connection; it is added to the table, authenticated
//!    unless an authenticator is installed.
//! 2. Stream bytes are reassembled per connection and dispatched by message id.
//! 3. A kick, a transport drop or a framing violation removes the connection and fires
//!    the disconnect callbacks exactly once.
//!
//! ## Example
//! ```rust
//! use net_session::config::NetworkConfig;
//! use net_session::server::NetworkServer;
//! use net_session::transport::memory::MemoryNetwork;
//!
//! let network = MemoryNetwork::new();
//! let mut server = NetworkServer::new(&NetworkConfig::default(), network.server_transport());
//! server.start().unwrap();
//! server.update();
//! server.stop();
//! ```

pub mod connection;

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::core::framing::{frame_into, unframe, FramingBuffer};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::auth::ServerAuthenticator;
use crate::protocol::message::{encode_payload, message_id, NetworkMessage, MESSAGE_ID_SIZE};
use crate::protocol::messages::UnspawnMessage;
use crate::protocol::registry::{DispatchOutcome, MessageRegistry};
use crate::spawn::{NetworkId, Ownership, ServerEntity, ServerSpawnDirectory, SpawnedEntity};
use crate::transport::{Channel, ServerEvent, ServerTransport};
use crate::utils::{BufferPool, Metrics};
use bytes::Bytes;
use connection::{Connection, ConnectionId, ConnectionTable};
use std::mem;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

type ConnectedCallback = Rc<dyn Fn(&mut NetworkServer, ConnectionId)>;
type DisconnectedCallback = Rc<dyn Fn(&mut NetworkServer, ConnectionId, &[NetworkId])>;

/// What the server does with a connection's owned entities when it disconnects.
///
/// The disconnect callbacks always receive the owned ids, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnedEntityPolicy {
    /// Leave them alone; the disconnect callback decides
    #[default]
    Manual,
    /// Destroy them and broadcast the unspawn
    Destroy,
    /// Keep them alive with no owner
    Unown,
}

/// The server world
pub struct NetworkServer {
    config: ServerConfig,
    transport_config: TransportConfig,
    transport: Box<dyn ServerTransport>,
    connections: ConnectionTable,
    registry: MessageRegistry<NetworkServer, ConnectionId>,
    authenticator: Option<Rc<dyn ServerAuthenticator>>,
    directory: ServerSpawnDirectory,
    policy: OwnedEntityPolicy,
    connected_callbacks: Vec<ConnectedCallback>,
    disconnected_callbacks: Vec<DisconnectedCallback>,
    buffers: BufferPool,
    metrics: Arc<Metrics>,
    active: bool,
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("address", &self.config.address)
            .field("active", &self.active)
            .field("connections", &self.connections.len())
            .field("registry", &self.registry)
            .field("spawned", &self.directory.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl NetworkServer {
    pub fn new(config: &NetworkConfig, transport: impl ServerTransport + 'static) -> Self {
        Self {
            config: config.server.clone(),
            transport_config: config.transport.clone(),
            transport: Box::new(transport),
            connections: ConnectionTable::new(),
            registry: MessageRegistry::new(),
            authenticator: None,
            directory: ServerSpawnDirectory::new(),
            policy: OwnedEntityPolicy::default(),
            connected_callbacks: Vec::new(),
            disconnected_callbacks: Vec::new(),
            buffers: BufferPool::with_buffers(
                config.transport.buffer_pool_size,
                config.transport.max_message_size,
            ),
            metrics: Arc::new(Metrics::new()),
            active: false,
        }
    }

    /// Start the transport and the installed authenticator.
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }

        self.transport.start()?;
        self.active = true;
        info!("Server started");

        if let Some(authenticator) = self.authenticator.clone() {
            authenticator.on_start(self)?;
        }
        Ok(())
    }

    /// Disconnect everyone, stop the transport and clear the spawn directory.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }

        if let Some(authenticator) = self.authenticator.clone() {
            authenticator.on_stop(self);
        }

        for connection in self.connections.ids() {
            self.transport.disconnect(connection);
            self.remove_connection(connection);
        }

        self.transport.stop();
        self.directory.clear();
        self.buffers.clear();
        self.active = false;

        self.metrics.log_metrics();
        info!("Server stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active && self.transport.is_active()
    }

    /// Drain pending transport events on the calling thread. Returns how many
    /// events were processed.
    pub fn update(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.transport.poll() {
            processed += 1;
            match event {
                ServerEvent::Connected(connection) => self.handle_connected(connection),
                ServerEvent::Data(connection, bytes) => self.handle_data(connection, bytes),
                ServerEvent::Disconnected(connection) => {
                    if self.remove_connection(connection) {
                        debug!(connection = %connection, "Transport dropped connection");
                    }
                }
            }
        }
        processed
    }

    fn handle_connected(&mut self, connection: ConnectionId) {
        if self.connections.len() >= self.config.max_connections {
            warn!(
                connection = %connection,
                max = self.config.max_connections,
                "Connection limit reached, refusing connection"
            );
            self.metrics.connection_rejected();
            self.transport.disconnect(connection);
            return;
        }

        let address = self.transport.address(connection).unwrap_or_default();
        let authenticated = self.authenticator.is_none();
        let framing = FramingBuffer::with_storage(self.buffers.take());

        if let Some(stale) = self.connections.insert(Connection::with_framing(
            connection,
            address.clone(),
            authenticated,
            framing,
        )) {
            warn!(connection = %connection, "Transport reused a live connection id");
            self.buffers.give(stale.framing.into_storage());
        }
        self.metrics.connection_established();
        info!(connection = %connection, address = %address, authenticated, "Connection established");

        match self.authenticator.clone() {
            Some(authenticator) => authenticator.on_connected(self, connection),
            None => self.send_world_snapshot(connection),
        }

        for callback in self.connected_callbacks.clone() {
            if !self.connections.contains(connection) {
                break;
            }
            callback(self, connection);
        }
    }

    fn handle_data(&mut self, connection: ConnectionId, bytes: Bytes) {
        self.metrics.bytes_received(bytes.len() as u64);

        let Some(entry) = self.connections.get_mut(connection) else {
            debug!(connection = %connection, len = bytes.len(), "Data for unknown connection");
            return;
        };

        let mut framing = mem::take(&mut entry.framing);
        let max_message_size = self.transport_config.max_message_size;
        let intact = unframe(&bytes, &mut framing, max_message_size, |payload| {
            self.dispatch(connection, payload);
        });

        match self.connections.get_mut(connection) {
            Some(entry) => entry.framing = framing,
            None => self.buffers.give(framing.into_storage()),
        }

        if !intact {
            self.metrics.framing_violation();
            warn!(connection = %connection, "Framing violation, closing connection");
            self.disconnect(connection);
        }
    }

    /// Dispatch one complete payload from `connection` to its handler.
    ///
    /// Every drop is logged and counted; none of them closes the connection.
    pub fn dispatch(&mut self, connection: ConnectionId, payload: &[u8]) -> DispatchOutcome {
        let Some(authenticated) = self
            .connections
            .get(connection)
            .map(Connection::is_authenticated)
        else {
            debug!(connection = %connection, "Dropping message for closed connection");
            return DispatchOutcome::NoConnection;
        };

        let id = match message_id(payload) {
            Ok(id) => id,
            Err(e) => {
                warn!(connection = %connection, error = %e, "Dropping malformed payload");
                self.metrics.malformed_message();
                return DispatchOutcome::Malformed;
            }
        };

        let handler = match self.registry.resolve(id, authenticated) {
            Ok(handler) => handler,
            Err(outcome) => {
                self.report_drop(connection, outcome);
                return outcome;
            }
        };

        let outcome = handler.invoke(self, connection, &payload[MESSAGE_ID_SIZE..]);
        match outcome {
            DispatchOutcome::Handled => self.metrics.message_received(),
            DispatchOutcome::Malformed => self.metrics.malformed_message(),
            DispatchOutcome::HandlerFailed(_) => self.metrics.handler_error(),
            _ => {}
        }
        outcome
    }

    fn report_drop(&mut self, connection: ConnectionId, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::UnknownMessage(id) => {
                warn!(connection = %connection, message_id = id, "No handler for message");
                self.metrics.unknown_message();
            }
            DispatchOutcome::Unauthenticated(id) => {
                let attempts = self
                    .connections
                    .get_mut(connection)
                    .map_or(0, Connection::record_unauthenticated_attempt);
                warn!(
                    connection = %connection,
                    message_id = id,
                    attempts,
                    "Dropping gated message from unauthenticated connection"
                );
                self.metrics.unauthenticated_drop();
            }
            _ => {}
        }
    }

    /// Encode and send `msg` to one connection.
    pub fn send<M: NetworkMessage>(
        &mut self,
        connection: ConnectionId,
        msg: &M,
        channel: Channel,
    ) -> Result<()> {
        let mut payload = self.buffers.take();
        let result = encode_payload(msg, &mut payload)
            .and_then(|()| self.send_payload(connection, &payload, channel));
        self.buffers.give(payload);
        result
    }

    /// Frame and send an already encoded payload (message id + body).
    ///
    /// # Errors
    /// `UnknownConnection`, `OversizedMessage` above the configured bound, or
    /// `TransportError` when the transport refuses the bytes.
    pub fn send_payload(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: Channel,
    ) -> Result<()> {
        if !self.connections.contains(connection) {
            return Err(ProtocolError::UnknownConnection(connection));
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
            if self.transport.send(connection, &framed, channel) {
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

    /// Send `msg` to every authenticated connection. Returns how many sends succeeded.
    pub fn broadcast<M: NetworkMessage>(&mut self, msg: &M, channel: Channel) -> Result<usize> {
        let mut payload = self.buffers.take();
        if let Err(e) = encode_payload(msg, &mut payload) {
            self.buffers.give(payload);
            return Err(e);
        }

        let mut delivered = 0;
        for connection in self.connections.authenticated_ids() {
            match self.send_payload(connection, &payload, channel) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection = %connection, error = %e, "Broadcast send failed"),
            }
        }
        self.buffers.give(payload);
        Ok(delivered)
    }

    /// Kick a connection. Returns `false` if it was already gone.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        if !self.connections.contains(connection) {
            return false;
        }
        self.transport.disconnect(connection);
        self.remove_connection(connection)
    }

    fn remove_connection(&mut self, connection: ConnectionId) -> bool {
        let Some(removed) = self.connections.remove(connection) else {
            return false;
        };
        self.buffers.give(removed.framing.into_storage());
        self.metrics.connection_closed();

        let owned = self.directory.owned_by(connection);
        self.directory.remove_player(connection);

        match self.policy {
            OwnedEntityPolicy::Manual => {}
            OwnedEntityPolicy::Destroy => {
                for network_id in &owned {
                    if let Err(e) = self.destroy(*network_id) {
                        error!(network_id = %network_id, error = %e, "Failed to destroy owned entity");
                    }
                }
            }
            OwnedEntityPolicy::Unown => {
                for network_id in &owned {
                    if let Err(e) = self.directory.set_owner(*network_id, Ownership::Unowned) {
                        error!(network_id = %network_id, error = %e, "Failed to release owned entity");
                    }
                }
            }
        }

        info!(connection = %connection, owned = owned.len(), "Connection closed");

        for callback in self.disconnected_callbacks.clone() {
            callback(self, connection, &owned);
        }
        true
    }

    pub fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.connections.is_authenticated(connection)
    }

    /// Flip a connection's authentication flag.
    ///
    /// A connection that becomes authenticated is sent a spawn message for every
    /// entity currently in the directory. A connection that loses authentication is
    /// sent an unspawn for each of them.
    pub fn set_authenticated(&mut self, connection: ConnectionId, authenticated: bool) -> Result<()> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(ProtocolError::UnknownConnection(connection))?;

        let was_authenticated = entry.is_authenticated();
        entry.set_authenticated(authenticated);

        if authenticated && !was_authenticated {
            debug!(connection = %connection, "Connection authenticated");
            self.send_world_snapshot(connection);
        } else if !authenticated && was_authenticated {
            debug!(connection = %connection, "Connection deauthenticated");
            self.withdraw_world(connection);
        }
        Ok(())
    }

    fn withdraw_world(&mut self, connection: ConnectionId) {
        for network_id in self.directory.ids() {
            let msg = UnspawnMessage { network_id };
            if let Err(e) = self.send(connection, &msg, Channel::Reliable) {
                warn!(connection = %connection, network_id = %network_id, error = %e, "Failed to send unspawn");
            }
        }
    }

    fn send_world_snapshot(&mut self, connection: ConnectionId) {
        for network_id in self.directory.ids() {
            let Some(msg) = self.directory.spawn_message_for(network_id, connection) else {
                continue;
            };
            if let Err(e) = self.send(connection, &msg, Channel::Reliable) {
                warn!(connection = %connection, network_id = %network_id, error = %e, "Failed to send spawn snapshot");
            }
        }
    }

    /// Install an authenticator. From now on new connections start unauthenticated.
    ///
    /// Replacing an authenticator on a running server stops the old one first.
    pub fn set_authenticator(
        &mut self,
        authenticator: impl ServerAuthenticator + 'static,
    ) -> Result<()> {
        let authenticator: Rc<dyn ServerAuthenticator> = Rc::new(authenticator);
        if let Some(previous) = self.authenticator.replace(Rc::clone(&authenticator)) {
            if self.active {
                previous.on_stop(self);
            }
        }
        if self.active {
            authenticator.on_start(self)?;
        }
        Ok(())
    }

    /// Register the handler for `M`. See [`MessageRegistry::register`].
    pub fn register_handler<M, F>(&mut self, requires_authentication: bool, handler: F) -> Result<()>
    where
        M: NetworkMessage,
        F: Fn(&mut NetworkServer, ConnectionId, M) -> Result<()> + 'static,
    {
        self.registry.register::<M, F>(requires_authentication, handler)
    }

    pub fn unregister_handler<M: NetworkMessage>(&mut self) -> bool {
        self.registry.unregister::<M>()
    }

    /// Run `callback` after each connection is established.
    pub fn on_connected<F>(&mut self, callback: F)
    where
        F: Fn(&mut NetworkServer, ConnectionId) + 'static,
    {
        self.connected_callbacks.push(Rc::new(callback));
    }

    /// Run `callback` once per removed connection, with the ids it owned.
    pub fn on_disconnected<F>(&mut self, callback: F)
    where
        F: Fn(&mut NetworkServer, ConnectionId, &[NetworkId]) + 'static,
    {
        self.disconnected_callbacks.push(Rc::new(callback));
    }

    pub fn set_owned_entity_policy(&mut self, policy: OwnedEntityPolicy) {
        self.policy = policy;
    }

    pub fn owned_entity_policy(&self) -> OwnedEntityPolicy {
        self.policy
    }

    /// Register a spawned entity and announce it to every authenticated connection.
    #[instrument(skip(self, entity), fields(network_id = %entity.network_id()))]
    pub fn spawn(&mut self, entity: ServerEntity, owner: Option<ConnectionId>) -> Result<NetworkId> {
        if let Some(owner) = owner {
            if !self.connections.contains(owner) {
                return Err(ProtocolError::UnknownConnection(owner));
            }
        }

        let network_id = entity.network_id();
        self.directory.insert(SpawnedEntity {
            network_id,
            prefab: entity.prefab,
            owner: owner.into(),
        })?;
        self.metrics.entity_spawned();
        debug!(prefab = %entity.prefab, "Entity spawned");

        self.announce(network_id);
        Ok(network_id)
    }

    /// Make `entity` the player entity of `connection`, owned by it.
    ///
    /// Only `connection` receives the spawn with `owned = true`. Joining with an entity
    /// that is already another connection's player takes it over, and that
    /// connection is left without a player entity.
    ///
    /// # Errors
    /// `Unauthenticated` before the connection has authenticated, `AlreadyJoined` if
    /// it already has a player entity.
    #[instrument(skip(self, entity), fields(network_id = %entity.network_id()))]
    pub fn join_world(&mut self, connection: ConnectionId, entity: ServerEntity) -> Result<NetworkId> {
        let entry = self
            .connections
            .get(connection)
            .ok_or(ProtocolError::UnknownConnection(connection))?;
        if !entry.is_authenticated() {
            return Err(ProtocolError::Unauthenticated(connection));
        }
        if let Some(existing) = self.directory.player_of(connection) {
            return Err(ProtocolError::AlreadyJoined {
                connection,
                entity: existing,
            });
        }

        let network_id = entity.network_id();
        if self.directory.contains(network_id) {
            let previous = self
                .directory
                .set_owner(network_id, Ownership::Owned(connection))?;
            if let Ownership::Owned(old) = previous {
                if old != connection && self.directory.player_of(old) == Some(network_id) {
                    self.directory.remove_player(old);
                }
            }
        } else {
            self.directory.insert(SpawnedEntity {
                network_id,
                prefab: entity.prefab,
                owner: Ownership::Owned(connection),
            })?;
            self.metrics.entity_spawned();
        }
        self.directory.set_player(connection, network_id);
        info!(connection = %connection, "Connection joined the world");

        self.announce(network_id);
        Ok(network_id)
    }

    /// Remove an entity from the directory and broadcast the unspawn.
    pub fn destroy(&mut self, network_id: NetworkId) -> Result<()> {
        self.directory
            .remove(network_id)
            .ok_or(ProtocolError::UnknownEntity(network_id))?;
        self.metrics.entity_despawned();
        debug!(network_id = %network_id, "Entity destroyed");

        self.broadcast(&UnspawnMessage { network_id }, Channel::Reliable)?;
        Ok(())
    }

    /// Hand an entity to another owner (or to nobody) and re-announce it.
    ///
    /// Returns the previous owner.
    pub fn transfer_ownership(&mut self, network_id: NetworkId, owner: Ownership) -> Result<Ownership> {
        if let Ownership::Owned(connection) = owner {
            if !self.connections.contains(connection) {
                return Err(ProtocolError::UnknownConnection(connection));
            }
        }

        let previous = self.directory.set_owner(network_id, owner)?;
        if let Ownership::Owned(old) = previous {
            if previous != owner && self.directory.player_of(old) == Some(network_id) {
                self.directory.remove_player(old);
            }
        }

        self.announce(network_id);
        Ok(previous)
    }

    fn announce(&mut self, network_id: NetworkId) {
        for connection in self.connections.authenticated_ids() {
            let Some(msg) = self.directory.spawn_message_for(network_id, connection) else {
                return;
            };
            if let Err(e) = self.send(connection, &msg, Channel::Reliable) {
                warn!(connection = %connection, network_id = %network_id, error = %e, "Failed to send spawn");
            }
        }
    }

    pub fn player_of(&self, connection: ConnectionId) -> Option<NetworkId> {
        self.directory.player_of(connection)
    }

    pub fn owner_of(&self, network_id: NetworkId) -> Option<Ownership> {
        self.directory.get(network_id).map(|e| e.owner)
    }

    /// The authoritative spawn directory
    pub fn spawned(&self) -> &ServerSpawnDirectory {
        &self.directory
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connection(&self, connection: ConnectionId) -> Option<&Connection> {
        self.connections.get(connection)
    }

    pub fn connection_mut(&mut self, connection: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(connection)
    }

    /// Remote address as reported by the transport
    pub fn address_of(&self, connection: ConnectionId) -> Option<String> {
        self.transport.address(connection)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        if self.active {
            self.transport.stop();
        }
    }
}
