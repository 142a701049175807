//! Authentication handshake
//!
//! An authenticator is a pluggable protocol step. While a server connection (or the
//! client session) is not authenticated, every handler registered with
//! `requires_authentication = true` is skipped by dispatch.
//!
//! Installing a [`ServerAuthenticator`] makes new connections start out
//! unauthenticated; the authenticator flips the flag with
//! [`NetworkServer::set_authenticated`] once its exchange completes.
//!
//! The bundled [`BasicServerAuthenticator`] / [`BasicClientAuthenticator`] pair runs a
//! one-round username/password exchange.

use super::messages::{AuthRequestMessage, AuthResponseMessage};
use crate::client::NetworkClient;
use crate::error::{constants, Result};
use crate::server::connection::ConnectionId;
use crate::server::NetworkServer;
use crate::transport::Channel;
use tracing::{debug, info, instrument, warn};

/// Longest username or password the basic authenticator accepts
pub const MAX_CREDENTIAL_LENGTH: usize = 64;

/// Server half of an authentication exchange
pub trait ServerAuthenticator {
    /// Called once when the server starts; register the exchange's handlers here
    /// (with `requires_authentication = false`).
    fn on_start(&self, server: &mut NetworkServer) -> Result<()>;

    /// Called for every new connection, after it was added unauthenticated.
    fn on_connected(&self, server: &mut NetworkServer, connection: ConnectionId);

    /// Called when the server stops.
    fn on_stop(&self, _server: &mut NetworkServer) {}
}

/// Client half of an authentication exchange
pub trait ClientAuthenticator {
    /// Called once when the authenticator is installed
    fn on_start(&self, client: &mut NetworkClient) -> Result<()>;

    /// Called when the session reaches `Connected`
    fn on_connected(&self, client: &mut NetworkClient);
}

/// Username/password check on the server
#[derive(Debug, Clone)]
pub struct BasicServerAuthenticator {
    username: String,
    password: String,
}

impl BasicServerAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn accepts(&self, request: &AuthRequestMessage) -> bool {
        request.username.len() <= MAX_CREDENTIAL_LENGTH
            && request.password.len() <= MAX_CREDENTIAL_LENGTH
            && request.username == self.username
            && request.password == self.password
    }
}

impl ServerAuthenticator for BasicServerAuthenticator {
    fn on_start(&self, server: &mut NetworkServer) -> Result<()> {
        let check = self.clone();
        server.register_handler::<AuthRequestMessage, _>(
            false,
            move |server, connection, request| check.handle_request(server, connection, request),
        )
    }

    fn on_connected(&self, _server: &mut NetworkServer, connection: ConnectionId) {
        debug!(connection = %connection, "Waiting for credentials");
    }

    fn on_stop(&self, server: &mut NetworkServer) {
        server.unregister_handler::<AuthRequestMessage>();
    }
}

impl BasicServerAuthenticator {
    #[instrument(skip(self, server, request))]
    fn handle_request(
        &self,
        server: &mut NetworkServer,
        connection: ConnectionId,
        request: AuthRequestMessage,
    ) -> Result<()> {
        if server.is_authenticated(connection) {
            debug!("Ignoring credentials from authenticated connection");
            return Ok(());
        }

        let accepted = self.accepts(&request);
        server.send(connection, &AuthResponseMessage { accepted }, Channel::Reliable)?;

        if accepted {
            info!(username = %request.username, "Connection authenticated");
            server.set_authenticated(connection, true)
        } else {
            warn!(username = %request.username, "{}", constants::ERR_AUTH_REJECTED);
            server.disconnect(connection);
            Ok(())
        }
    }
}

/// Sends credentials as soon as the session connects
#[derive(Debug, Clone)]
pub struct BasicClientAuthenticator {
    username: String,
    password: String,
}

impl BasicClientAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl ClientAuthenticator for BasicClientAuthenticator {
    fn on_start(&self, client: &mut NetworkClient) -> Result<()> {
        client.register_handler::<AuthResponseMessage, _>(false, |client, response| {
            if response.accepted {
                info!("Server accepted credentials");
                client.set_authenticated(true);
            } else {
                warn!("{}", constants::ERR_AUTH_REJECTED);
                client.disconnect();
            }
            Ok(())
        })
    }

    fn on_connected(&self, client: &mut NetworkClient) {
        let request = AuthRequestMessage {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        if let Err(e) = client.send(&request, Channel::Reliable) {
            warn!(error = %e, "Failed to send credentials");
        }
    }
}
