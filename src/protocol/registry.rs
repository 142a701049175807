//! Message registry
//!
//! Maps a 16-bit message id to exactly one typed decode + handler pair. The server
//! and client each own an independent registry.
//!
//! Handlers are reference counted: the owning world resolves a handler, releases
//! its borrow of the registry and then invokes the handler with `&mut` access to
//! itself. A handler may therefore register or unregister handlers while it runs.

use super::message::{decode_body, NetworkMessage};
use crate::error::{ProtocolError, Result};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{error, warn};

type ErasedHandler<Ctx, Src> = dyn Fn(&mut Ctx, Src, &[u8]) -> HandlerResult;

enum HandlerResult {
    Ok,
    Decode(ProtocolError),
    Failed(ProtocolError),
}

/// What happened to a dispatched payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and returned `Ok`
    Handled,
    /// No handler registered for the id
    UnknownMessage(u16),
    /// The handler requires authentication and the sender has none
    Unauthenticated(u16),
    /// The payload could not be decoded
    Malformed,
    /// The handler returned an error
    HandlerFailed(u16),
    /// The sender is not (or no longer) connected
    NoConnection,
}

impl DispatchOutcome {
    pub fn is_handled(self) -> bool {
        self == DispatchOutcome::Handled
    }
}

/// A registered decode + dispatch pair for one message id
pub struct RegisteredHandler<Ctx, Src> {
    message_id: u16,
    requires_authentication: bool,
    invoke: Rc<ErasedHandler<Ctx, Src>>,
}

impl<Ctx, Src> Clone for RegisteredHandler<Ctx, Src> {
    fn clone(&self) -> Self {
        Self {
            message_id: self.message_id,
            requires_authentication: self.requires_authentication,
            invoke: Rc::clone(&self.invoke),
        }
    }
}

impl<Ctx, Src> fmt::Debug for RegisteredHandler<Ctx, Src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("message_id", &self.message_id)
            .field("requires_authentication", &self.requires_authentication)
            .finish()
    }
}

impl<Ctx, Src> RegisteredHandler<Ctx, Src> {
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn requires_authentication(&self) -> bool {
        self.requires_authentication
    }

    /// Decode `body` (payload without the id prefix) and run the handler.
    pub fn invoke(&self, ctx: &mut Ctx, source: Src, body: &[u8]) -> DispatchOutcome {
        match (self.invoke)(ctx, source, body) {
            HandlerResult::Ok => DispatchOutcome::Handled,
            HandlerResult::Decode(e) => {
                warn!(message_id = self.message_id, error = %e, "Failed to decode message body");
                DispatchOutcome::Malformed
            }
            HandlerResult::Failed(e) => {
                warn!(message_id = self.message_id, error = %e, "Message handler failed");
                DispatchOutcome::HandlerFailed(self.message_id)
            }
        }
    }
}

/// Message id -> handler table for one role
pub struct MessageRegistry<Ctx, Src> {
    handlers: HashMap<u16, RegisteredHandler<Ctx, Src>>,
}

impl<Ctx, Src> Default for MessageRegistry<Ctx, Src> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<Ctx, Src> fmt::Debug for MessageRegistry<Ctx, Src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<u16> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("MessageRegistry").field("ids", &ids).finish()
    }
}

impl<Ctx: 'static, Src: 'static> MessageRegistry<Ctx, Src> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `M`.
    ///
    /// # Errors
    /// `DuplicateHandler` if `M::ID` already has a handler; the existing handler
    /// stays active.
    pub fn register<M, F>(&mut self, requires_authentication: bool, handler: F) -> Result<()>
    where
        M: NetworkMessage,
        F: Fn(&mut Ctx, Src, M) -> Result<()> + 'static,
    {
        if self.handlers.contains_key(&M::ID) {
            error!(message_id = M::ID, "Refusing duplicate handler registration");
            return Err(ProtocolError::DuplicateHandler(M::ID));
        }

        let invoke = move |ctx: &mut Ctx, source: Src, body: &[u8]| match decode_body::<M>(body)
        {
            Ok(msg) => match handler(ctx, source, msg) {
                Ok(()) => HandlerResult::Ok,
                Err(e) => HandlerResult::Failed(e),
            },
            Err(e) => HandlerResult::Decode(e),
        };

        self.handlers.insert(
            M::ID,
            RegisteredHandler {
                message_id: M::ID,
                requires_authentication,
                invoke: Rc::new(invoke),
            },
        );
        Ok(())
    }
}

impl<Ctx, Src> MessageRegistry<Ctx, Src> {
    /// Remove the handler for `M`. Returns whether one was registered.
    pub fn unregister<M: NetworkMessage>(&mut self) -> bool {
        self.handlers.remove(&M::ID).is_some()
    }

    pub fn is_registered(&self, message_id: u16) -> bool {
        self.handlers.contains_key(&message_id)
    }

    /// Find the handler for `message_id`, applying the authentication gate.
    ///
    /// On refusal the returned outcome says why; nothing is logged here, the caller
    /// knows the connection and reports it.
    pub fn resolve(
        &self,
        message_id: u16,
        authenticated: bool,
    ) -> std::result::Result<RegisteredHandler<Ctx, Src>, DispatchOutcome> {
        let handler = self
            .handlers
            .get(&message_id)
            .ok_or(DispatchOutcome::UnknownMessage(message_id))?;

        if handler.requires_authentication && !authenticated {
            return Err(DispatchOutcome::Unauthenticated(message_id));
        }

        Ok(handler.clone())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::message::encode_payload;
    use crate::protocol::message::MESSAGE_ID_SIZE;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Move {
        dx: i16,
        dy: i16,
    }

    impl NetworkMessage for Move {
        const ID: u16 = 0x0010;
    }

    #[derive(Default)]
    struct Log {
        seen: Vec<(u8, i16)>,
    }

    fn body(msg: &Move) -> Vec<u8> {
        let mut out = Vec::new();
        encode_payload(msg, &mut out).unwrap();
        out.split_off(MESSAGE_ID_SIZE)
    }

    #[test]
    fn test_duplicate_registration_keeps_first_handler() {
        let mut registry: MessageRegistry<Log, u8> = MessageRegistry::new();
        registry
            .register::<Move, _>(false, |log, src, m| {
                log.seen.push((src, m.dx));
                Ok(())
            })
            .unwrap();

        let second = registry.register::<Move, _>(false, |log, _, _| {
            log.seen.push((99, 99));
            Ok(())
        });
        assert!(matches!(second, Err(ProtocolError::DuplicateHandler(0x0010))));

        let mut log = Log::default();
        let handler = registry.resolve(Move::ID, true).unwrap();
        let outcome = handler.invoke(&mut log, 1, &body(&Move { dx: 4, dy: 0 }));
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(log.seen, vec![(1, 4)]);
    }

    #[test]
    fn test_unregister_then_register_again() {
        let mut registry: MessageRegistry<Log, u8> = MessageRegistry::new();
        registry.register::<Move, _>(true, |_, _, _| Ok(())).unwrap();
        assert!(registry.unregister::<Move>());
        assert!(!registry.unregister::<Move>());
        registry.register::<Move, _>(true, |_, _, _| Ok(())).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_applies_authentication_gate() {
        let mut registry: MessageRegistry<Log, u8> = MessageRegistry::new();
        registry.register::<Move, _>(true, |_, _, _| Ok(())).unwrap();

        assert_eq!(
            registry.resolve(Move::ID, false).unwrap_err(),
            DispatchOutcome::Unauthenticated(Move::ID)
        );
        assert!(registry.resolve(Move::ID, true).is_ok());
        assert_eq!(
            registry.resolve(0x0011, true).unwrap_err(),
            DispatchOutcome::UnknownMessage(0x0011)
        );
    }

    #[test]
    fn test_decode_and_handler_failures_are_distinguished() {
        let mut registry: MessageRegistry<Log, u8> = MessageRegistry::new();
        registry
            .register::<Move, _>(false, |_, _, m| {
                if m.dx < 0 {
                    Err(ProtocolError::Custom("negative".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        let handler = registry.resolve(Move::ID, false).unwrap();
        let mut log = Log::default();
        assert_eq!(
            handler.invoke(&mut log, 0, &[1, 2]),
            DispatchOutcome::Malformed
        );
        assert_eq!(
            handler.invoke(&mut log, 0, &body(&Move { dx: -1, dy: 0 })),
            DispatchOutcome::HandlerFailed(Move::ID)
        );
    }
}
