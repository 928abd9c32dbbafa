//! WebSocket Gateway
//!
//! Connection registry and fan-out hub. The gateway is the process-wide
//! [`EventPublisher`]: every emitted event is serialized once, pushed to the
//! matching local connections, and forwarded to the backplane so other
//! instances can do the same for theirs.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Audience, EventPublisher, Except, RealtimeEvent};
use crate::infrastructure::backplane::{BackplaneEnvelope, BackplaneForwarder};
use crate::infrastructure::metrics;

/// Items queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-encoded text frame, shared between every recipient
    Frame(Arc<str>),
    /// Transport-level ping
    Ping,
    /// Close the socket and stop writing
    Close,
}

/// One live socket on this instance.
pub struct ConnectedClient {
    pub user_id: i64,
    pub connection_id: Uuid,
    rooms: Mutex<HashSet<i64>>,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ConnectedClient {
    pub fn rooms(&self) -> Vec<i64> {
        let mut rooms: Vec<i64> = self.rooms.lock().iter().copied().collect();
        rooms.sort_unstable();
        rooms
    }
}

/// WebSocket gateway managing all local connections
pub struct Gateway {
    /// Identifies this instance on the backplane
    node_id: Uuid,
    connections: DashMap<Uuid, Arc<ConnectedClient>>,
    /// User ID to connection IDs (one user can hold many connections)
    user_connections: DashMap<i64, HashSet<Uuid>>,
    /// Chat ID to connection IDs
    rooms: DashMap<i64, HashSet<Uuid>>,
    forwarder: Option<BackplaneForwarder>,
}

impl Gateway {
    pub fn new(node_id: Uuid, forwarder: Option<BackplaneForwarder>) -> Self {
        Self {
            node_id,
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            rooms: DashMap::new(),
            forwarder,
        }
    }

    /// Gateway without a backplane; events stay on this instance.
    pub fn single_process() -> Self {
        Self::new(Uuid::new_v4(), None)
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Register a connection and join its chat rooms.
    pub fn register(
        &self,
        connection_id: Uuid,
        user_id: i64,
        chat_ids: &[i64],
        sender: mpsc::UnboundedSender<Outbound>,
    ) {
        let client = Arc::new(ConnectedClient {
            user_id,
            connection_id,
            rooms: Mutex::new(chat_ids.iter().copied().collect()),
            sender,
        });
        self.connections.insert(connection_id, client);

        self.user_connections
            .entry(user_id)
            .or_default()
            .insert(connection_id);

        for chat_id in chat_ids {
            self.rooms.entry(*chat_id).or_default().insert(connection_id);
        }

        metrics::set_websocket_connections(self.connections.len());
        tracing::info!(
            user_id,
            connection_id = %connection_id,
            rooms = chat_ids.len(),
            "Connection registered"
        );
    }

    /// Remove a connection from every index. Returns the removed client.
    pub fn unregister(&self, connection_id: Uuid) -> Option<Arc<ConnectedClient>> {
        let (_, client) = self.connections.remove(&connection_id)?;

        if let Some(mut ids) = self.user_connections.get_mut(&client.user_id) {
            ids.remove(&connection_id);
        }
        self.user_connections
            .remove_if(&client.user_id, |_, ids| ids.is_empty());

        for chat_id in client.rooms() {
            self.remove_from_room(connection_id, chat_id);
        }

        metrics::set_websocket_connections(self.connections.len());
        tracing::info!(
            user_id = client.user_id,
            connection_id = %connection_id,
            "Connection unregistered"
        );
        Some(client)
    }

    /// Add a room to a live connection. Returns false if the connection is
    /// gone.
    pub fn join_room(&self, connection_id: Uuid, chat_id: i64) -> bool {
        let Some(client) = self.connections.get(&connection_id).map(|c| Arc::clone(c.value()))
        else {
            return false;
        };
        client.rooms.lock().insert(chat_id);
        self.rooms.entry(chat_id).or_default().insert(connection_id);

        // An unregister that ran after the lookup already swept the rooms.
        if !self.connections.contains_key(&connection_id) {
            self.remove_from_room(connection_id, chat_id);
            return false;
        }
        true
    }

    fn remove_from_room(&self, connection_id: Uuid, chat_id: i64) {
        if let Some(mut ids) = self.rooms.get_mut(&chat_id) {
            ids.remove(&connection_id);
        }
        self.rooms.remove_if(&chat_id, |_, ids| ids.is_empty());
    }

    pub fn connection_in_room(&self, connection_id: Uuid, chat_id: i64) -> bool {
        self.rooms
            .get(&chat_id)
            .map(|ids| ids.contains(&connection_id))
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections of a user on this instance.
    pub fn user_connection_count(&self, user_id: i64) -> usize {
        self.user_connections
            .get(&user_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Queue a pre-encoded frame for every matching local connection.
    /// Returns how many connections it was queued for.
    pub fn deliver_local(&self, audience: &Audience, frame: Arc<str>) -> usize {
        let targets = self.resolve(audience);

        // Senders are collected first so no map guard is held while queueing.
        let mut delivered = 0;
        for sender in targets {
            if sender.send(Outbound::Frame(Arc::clone(&frame))).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an envelope received from another instance.
    pub fn deliver_from_backplane(&self, envelope: BackplaneEnvelope) -> usize {
        if envelope.origin == self.node_id {
            return 0;
        }
        metrics::record_backplane_envelope_received();
        tracing::trace!(event = %envelope.event, origin = %envelope.origin, "Backplane envelope");
        self.deliver_local(&envelope.audience, Arc::from(envelope.frame))
    }

    fn resolve(&self, audience: &Audience) -> Vec<mpsc::UnboundedSender<Outbound>> {
        let ids: Vec<Uuid> = match audience {
            Audience::Chats { chat_ids, except } => {
                let mut seen = HashSet::new();
                for chat_id in chat_ids {
                    if let Some(room) = self.rooms.get(chat_id) {
                        seen.extend(room.iter().copied());
                    }
                }
                if let Except::Connection(excluded) = except {
                    seen.remove(excluded);
                }
                seen.into_iter().collect()
            }
            Audience::User { user_id } => self
                .user_connections
                .get(user_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            Audience::Connection { connection_id } => vec![*connection_id],
        };

        let excluded_user = match audience {
            Audience::Chats {
                except: Except::User(user_id),
                ..
            } => Some(*user_id),
            _ => None,
        };

        ids.iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|client| Some(client.user_id) != excluded_user)
            .map(|client| client.sender.clone())
            .collect()
    }
}

impl EventPublisher for Gateway {
    fn publish(&self, audience: Audience, event: RealtimeEvent) {
        let name = event.name();
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(event = name, error = %e, "Failed to encode event");
                return;
            }
        };
        metrics::record_event_emitted(name);

        if let (Some(forwarder), false) = (&self.forwarder, audience.is_local_only()) {
            forwarder.forward(&BackplaneEnvelope {
                origin: self.node_id,
                audience: audience.clone(),
                event: name.to_string(),
                frame: frame.clone(),
            });
        }

        let delivered = self.deliver_local(&audience, Arc::from(frame));
        tracing::trace!(event = name, delivered, "Event published");
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::single_process()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TypingPayload;
    use pretty_assertions::assert_eq;

    fn connect(
        gateway: &Gateway,
        user_id: i64,
        chats: &[i64],
    ) -> (Uuid, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        gateway.register(id, user_id, chats, tx);
        (id, rx)
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Frame(frame) = item {
                out.push(frame.to_string());
            }
        }
        out
    }

    fn typing(chat_id: i64, user_id: i64) -> RealtimeEvent {
        RealtimeEvent::TypingStart(TypingPayload {
            chat_id,
            user_id,
            expires_in_ms: Some(3000),
        })
    }

    #[test]
    fn chat_broadcast_skips_excluded_user_and_other_rooms() {
        let gateway = Gateway::single_process();
        let (_, mut typist) = connect(&gateway, 1, &[10]);
        let (_, mut peer) = connect(&gateway, 2, &[10]);
        let (_, mut outsider) = connect(&gateway, 3, &[11]);

        gateway.publish(Audience::chat_except_user(10, 1), typing(10, 1));

        assert!(frames(&mut typist).is_empty());
        assert_eq!(frames(&mut peer).len(), 1);
        assert!(frames(&mut outsider).is_empty());
    }

    #[test]
    fn connection_in_several_rooms_receives_once() {
        let gateway = Gateway::single_process();
        let (_, mut rx) = connect(&gateway, 2, &[10, 11]);

        gateway.publish(
            Audience::Chats {
                chat_ids: vec![10, 11],
                except: Except::Nobody,
            },
            typing(10, 1),
        );

        assert_eq!(frames(&mut rx).len(), 1);
    }

    #[test]
    fn user_audience_reaches_every_connection_of_that_user() {
        let gateway = Gateway::single_process();
        let (_, mut phone) = connect(&gateway, 7, &[]);
        let (_, mut laptop) = connect(&gateway, 7, &[]);
        let (_, mut other) = connect(&gateway, 8, &[]);

        gateway.publish(Audience::user(7), typing(1, 2));

        assert_eq!(frames(&mut phone).len(), 1);
        assert_eq!(frames(&mut laptop).len(), 1);
        assert!(frames(&mut other).is_empty());
        assert_eq!(gateway.user_connection_count(7), 2);
    }

    #[test]
    fn joined_room_receives_and_unregister_cleans_indices() {
        let gateway = Gateway::single_process();
        let (id, mut rx) = connect(&gateway, 2, &[]);

        assert!(gateway.join_room(id, 42));
        assert!(gateway.connection_in_room(id, 42));
        gateway.publish(Audience::chat(42), typing(42, 1));
        assert_eq!(frames(&mut rx).len(), 1);

        let removed = gateway.unregister(id).unwrap();
        assert_eq!(removed.rooms(), vec![42]);
        assert!(!gateway.connection_in_room(id, 42));
        assert_eq!(gateway.connection_count(), 0);
        assert_eq!(gateway.user_connection_count(2), 0);
        assert!(!gateway.join_room(id, 43));
        assert!(!gateway.rooms.contains_key(&42));
        assert!(!gateway.rooms.contains_key(&43));
    }

    #[test]
    fn room_index_is_dropped_when_connection_vanishes_mid_join() {
        let gateway = Gateway::single_process();
        let (id, _rx) = connect(&gateway, 2, &[]);
        let (other, _other_rx) = connect(&gateway, 3, &[7]);

        // Simulate the unregister landing between lookup and insert.
        gateway.connections.remove(&id);
        gateway.rooms.entry(7).or_default().insert(id);
        gateway.remove_from_room(id, 7);

        assert!(!gateway.connection_in_room(id, 7));
        assert!(gateway.connection_in_room(other, 7));
        assert!(!gateway.join_room(id, 8));
        assert!(!gateway.rooms.contains_key(&8));
    }

    #[test]
    fn own_backplane_envelopes_are_ignored() {
        let gateway = Gateway::single_process();
        let (_, mut rx) = connect(&gateway, 2, &[10]);
        let frame = typing(10, 1).to_frame().unwrap();

        let own = BackplaneEnvelope {
            origin: gateway.node_id(),
            audience: Audience::chat(10),
            event: "typing:start".into(),
            frame: frame.clone(),
        };
        assert_eq!(gateway.deliver_from_backplane(own), 0);

        let remote = BackplaneEnvelope {
            origin: Uuid::new_v4(),
            audience: Audience::chat(10),
            event: "typing:start".into(),
            frame: frame.clone(),
        };
        assert_eq!(gateway.deliver_from_backplane(remote), 1);
        assert_eq!(frames(&mut rx), vec![frame]);
    }
}
