//! Client table and room membership

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outbound queue of one connection
pub type ClientTx = mpsc::UnboundedSender<Bytes>;

struct Client {
    /// Distinguishes a re-registration from the connection it replaced
    conn_id: u64,
    room: String,
    tx: ClientTx,
}

/// Who is connected and which room they joined
#[derive(Default)]
pub struct Directory {
    clients: HashMap<String, Client>,
    rooms: HashMap<String, Vec<String>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client_id` to `room`, returning the members already there
    ///
    /// A live registration under the same id is replaced; its queue is
    /// dropped, which ends that connection's writer.
    pub fn join(&mut self, client_id: &str, room: &str, conn_id: u64, tx: ClientTx) -> Vec<ClientTx> {
        if let Some(old) = self.clients.remove(client_id) {
            info!(
                "Client '{}' re-registered, replacing connection {}",
                client_id, old.conn_id
            );
            self.leave_room(client_id, &old.room);
        }

        let members = self
            .rooms
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.clients.get(id))
                    .map(|c| c.tx.clone())
                    .collect()
            })
            .unwrap_or_default();

        self.rooms
            .entry(room.to_string())
            .or_default()
            .push(client_id.to_string());
        self.clients.insert(
            client_id.to_string(),
            Client {
                conn_id,
                room: room.to_string(),
                tx,
            },
        );

        members
    }

    /// Remove `client_id` if `conn_id` is still its connection
    pub fn leave(&mut self, client_id: &str, conn_id: u64) -> bool {
        match self.clients.get(client_id) {
            Some(client) if client.conn_id == conn_id => {}
            _ => return false,
        }

        if let Some(client) = self.clients.remove(client_id) {
            self.leave_room(client_id, &client.room);
        }
        true
    }

    fn leave_room(&mut self, client_id: &str, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.retain(|id| id != client_id);
            if members.is_empty() {
                debug!("Room '{}' is empty, removing", room);
                self.rooms.remove(room);
            }
        }
    }

    pub fn route(&self, target: &str) -> Option<ClientTx> {
        self.clients.get(target).map(|c| c.tx.clone())
    }

    /// Whether `conn_id` is the live connection of `client_id`
    pub fn is_current(&self, client_id: &str, conn_id: u64) -> bool {
        self.clients
            .get(client_id)
            .map(|c| c.conn_id == conn_id)
            .unwrap_or(false)
    }

    pub fn room_members(&self, room: &str) -> Vec<String> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
