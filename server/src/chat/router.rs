//! Per-event handling for active connections.
//!
//! Sends are persisted before anything else happens. After a successful write
//! the recipient either gets the message pushed in real time or, when not
//! connected here, gains one unread count. Read acknowledgements hit the store
//! first and the cache second, so a failure in between can only leave a stale
//! non-zero count that the next hydration corrects.

use crate::chat::presence::broadcast_presence;
use crate::chat::unread::{push_unread_counts, UnreadCounter};
use crate::error::ChatError;
use crate::store::{run_blocking, Message, SharedStore, UnreadCounts};
use crate::ws::broadcast::send_event;
use crate::ws::protocol::{InboundEvent, OutboundEvent};
use crate::ws::registry::ConnectionHandle;
use crate::ws::ConnectionRegistry;
use crate::UserId;

/// Shared handle to the messaging core: registry, unread cache and store.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    unread: UnreadCounter,
    store: SharedStore,
}

impl MessageRouter {
    pub fn new(store: SharedStore) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            unread: UnreadCounter::new(),
            store,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn unread(&self) -> &UnreadCounter {
        &self.unread
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Handle one decoded event from `user` on `conn`, replying on `conn`.
    pub async fn handle_event(&self, user: UserId, conn: &ConnectionHandle, event: InboundEvent) {
        match event {
            InboundEvent::Send { to, body } => match self.send(user, to, body).await {
                Ok(message) => {
                    // Echo doubles as the sender's success signal
                    send_event(conn, &OutboundEvent::from(&message));
                }
                Err(err) => reply_error(conn, &err),
            },
            InboundEvent::Read { from } => {
                if let Err(err) = self.mark_read(user, from).await {
                    reply_error(conn, &err);
                }
            }
            InboundEvent::Register => self.confirm_presence(user, conn),
        }
    }

    /// Validate, persist, then deliver or count as unread.
    pub async fn send(
        &self,
        sender: UserId,
        recipient: UserId,
        body: String,
    ) -> Result<Message, ChatError> {
        if recipient <= 0 {
            return Err(ChatError::validation("invalid recipient"));
        }
        if sender == recipient {
            return Err(ChatError::validation("cannot send a message to yourself"));
        }
        if body.trim().is_empty() {
            return Err(ChatError::validation("message body is empty"));
        }

        let message = run_blocking(&self.store, move |store| {
            store.append(sender, recipient, &body)
        })
        .await
        .map_err(|e| {
            tracing::warn!(
                sender = sender,
                recipient = recipient,
                error = %e,
                "Failed to persist message"
            );
            ChatError::from(e)
        })?;

        match self.registry.lookup(recipient) {
            Some(conn) => {
                // Already durable: a failed push is recovered through history
                if send_event(&conn, &OutboundEvent::from(&message)) {
                    tracing::debug!(
                        message_id = message.id,
                        recipient = recipient,
                        "Delivered message in real time"
                    );
                } else {
                    tracing::debug!(
                        message_id = message.id,
                        recipient = recipient,
                        connection = %conn.id(),
                        "Real-time push failed, connection closing"
                    );
                }
            }
            None => {
                // The push below only lands if the recipient connected after the lookup
                let pending = self.unread.increment(recipient, sender);
                tracing::debug!(
                    message_id = message.id,
                    recipient = recipient,
                    pending = pending,
                    "Recipient offline, counted as unread"
                );
                push_unread_counts(&self.registry, &self.unread, recipient);
            }
        }

        Ok(message)
    }

    /// Acknowledge every message from `from` to `reader`.
    pub async fn mark_read(&self, reader: UserId, from: UserId) -> Result<(), ChatError> {
        if from <= 0 {
            return Err(ChatError::validation("invalid sender"));
        }
        if reader == from {
            return Err(ChatError::validation("cannot mark your own messages read"));
        }

        let updated = run_blocking(&self.store, move |store| store.mark_read(reader, from))
            .await
            .map_err(|e| {
                tracing::warn!(
                    reader = reader,
                    from = from,
                    error = %e,
                    "Failed to mark messages read"
                );
                ChatError::from(e)
            })?;

        self.unread.clear(reader, from);
        tracing::debug!(reader = reader, from = from, updated = updated, "Messages marked read");
        push_unread_counts(&self.registry, &self.unread, reader);
        Ok(())
    }

    /// Merge durable unread counts into the cache and return the result.
    pub async fn hydrate(&self, user: UserId) -> Result<UnreadCounts, ChatError> {
        let durable = run_blocking(&self.store, move |store| store.unread_counts(user)).await?;
        Ok(self.unread.hydrate(user, durable))
    }

    /// `register`/`heartbeat`: re-registering the current connection changes
    /// nothing. An empty slot is re-taken; a newer connection is left alone.
    fn confirm_presence(&self, user: UserId, conn: &ConnectionHandle) {
        match self.registry.lookup(user) {
            Some(current) if current.id() == conn.id() => {}
            Some(_) => {
                tracing::debug!(user_id = user, "Register from superseded connection ignored");
            }
            None => {
                self.registry.register(user, conn.clone());
                broadcast_presence(&self.registry);
                return;
            }
        }
        send_event(
            conn,
            &OutboundEvent::Presence {
                user_ids: self.registry.snapshot(),
            },
        );
    }
}

fn reply_error(conn: &ConnectionHandle, err: &ChatError) {
    send_event(conn, &OutboundEvent::from_error(err));
}
