//! Contacts between hosts
//!
//! A [`Connection`] is an unordered pair of hosts that can currently talk. It
//! carries at most one message transfer at a time; the transfer consumes
//! `size / rate` seconds of simulated time. The [`ConnectionTable`] owns every
//! connection and remembers, per host, the order in which its connections
//! came up.

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::SimTime;
use crate::error::{RouterError, RouterResult};
use crate::identity::HostId;
use crate::message::Message;

/// Identifier of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A message in flight over a connection
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Copy of the message being sent
    pub message: Message,
    /// Sending host
    pub from: HostId,
    /// When the transfer started
    pub started_at: SimTime,
    /// When the last byte arrives
    pub completes_at: SimTime,
}

/// An up or down contact between two hosts
#[derive(Debug, Clone)]
pub struct Connection {
    /// Connection identifier
    pub id: ConnectionId,
    /// Host that opened the contact
    initiator: HostId,
    /// The other end
    responder: HostId,
    /// Nominal transfer rate in bytes per second
    rate: f64,
    /// Whether the contact is up
    up: bool,
    /// When the contact came up
    pub opened_at: SimTime,
    /// Transfer in flight, if any
    transfer: Option<Transfer>,
    /// Bytes of completed transfers over this contact
    bytes_transferred: u64,
}

impl Connection {
    /// Create an up connection opened by `initiator`
    pub fn new(
        id: ConnectionId,
        initiator: HostId,
        responder: HostId,
        rate: f64,
        now: SimTime,
    ) -> Self {
        Self {
            id,
            initiator,
            responder,
            rate,
            up: true,
            opened_at: now,
            transfer: None,
            bytes_transferred: 0,
        }
    }

    /// Whether the contact is up
    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Whether `host` opened this contact
    pub fn is_initiator(&self, host: HostId) -> bool {
        self.initiator == host
    }

    /// The host that opened this contact
    pub fn initiator(&self) -> HostId {
        self.initiator
    }

    /// The end of the connection that is not `host`
    pub fn other_node(&self, host: HostId) -> HostId {
        if self.initiator == host {
            self.responder
        } else {
            self.initiator
        }
    }

    /// Whether `host` is one of the two ends
    pub fn involves(&self, host: HostId) -> bool {
        self.initiator == host || self.responder == host
    }

    /// Nominal transfer rate in bytes per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether a transfer is in flight
    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    /// The transfer in flight
    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    /// Whether `host` is the sender of the transfer in flight
    pub fn is_sending_from(&self, host: HostId) -> bool {
        self.transfer.as_ref().is_some_and(|t| t.from == host)
    }

    /// Whether the transfer in flight has delivered all its bytes
    pub fn is_transfer_done(&self, now: SimTime) -> bool {
        self.transfer.as_ref().is_some_and(|t| t.completes_at <= now)
    }

    /// Total bytes of completed transfers
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Start sending `message` from `from`
    pub fn begin_transfer(&mut self, from: HostId, message: Message, now: SimTime) -> RouterResult<()> {
        if self.transfer.is_some() || !self.up {
            return Err(RouterError::ConnectionBusy(self.id));
        }
        let duration = if self.rate > 0.0 && self.rate.is_finite() {
            message.size as f64 / self.rate
        } else {
            0.0
        };
        trace!(
            connection = %self.id,
            from = %from,
            message = %message.id,
            duration,
            "Transfer started"
        );
        self.transfer = Some(Transfer {
            message,
            from,
            started_at: now,
            completes_at: now + duration,
        });
        Ok(())
    }

    /// Clear a completed transfer and count its bytes
    pub fn finalize_transfer(&mut self) -> Option<Transfer> {
        let transfer = self.transfer.take()?;
        self.bytes_transferred += transfer.message.size;
        Some(transfer)
    }

    /// Clear the transfer slot without counting bytes
    pub fn abort_transfer(&mut self) -> Option<Transfer> {
        self.transfer.take()
    }

    fn set_down(&mut self) {
        self.up = false;
    }
}

/// All connections of the network
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
    by_host: HashMap<HostId, Vec<ConnectionId>>,
    next_id: u32,
}

impl ConnectionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring up a connection between `initiator` and `responder`
    ///
    /// Returns the existing connection when the pair is already connected.
    pub fn open(&mut self, initiator: HostId, responder: HostId, rate: f64, now: SimTime) -> ConnectionId {
        if let Some(existing) = self.find(initiator, responder) {
            return existing;
        }
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections
            .insert(id, Connection::new(id, initiator, responder, rate, now));
        self.by_host.entry(initiator).or_default().push(id);
        self.by_host.entry(responder).or_default().push(id);
        id
    }

    /// Take a connection down and remove it from the table
    ///
    /// The returned connection still holds any transfer that was in flight.
    pub fn close(&mut self, id: ConnectionId) -> RouterResult<Connection> {
        let mut conn = self
            .connections
            .remove(&id)
            .ok_or(RouterError::UnknownConnection(id))?;
        conn.set_down();
        for host in [conn.initiator, conn.responder] {
            if let Some(list) = self.by_host.get_mut(&host) {
                list.retain(|c| *c != id);
            }
        }
        Ok(conn)
    }

    /// Find the up connection between two hosts
    pub fn find(&self, a: HostId, b: HostId) -> Option<ConnectionId> {
        self.by_host
            .get(&a)?
            .iter()
            .find(|id| self.connections.get(id).is_some_and(|c| c.involves(b)))
            .copied()
    }

    /// Look up a connection
    pub fn get(&self, id: ConnectionId) -> RouterResult<&Connection> {
        self.connections
            .get(&id)
            .ok_or(RouterError::UnknownConnection(id))
    }

    /// Look up a connection mutably
    pub fn get_mut(&mut self, id: ConnectionId) -> RouterResult<&mut Connection> {
        self.connections
            .get_mut(&id)
            .ok_or(RouterError::UnknownConnection(id))
    }

    /// Connections of `host`, in the order they came up
    pub fn connections_of(&self, host: HostId) -> &[ConnectionId] {
        self.by_host.get(&host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any connection of `host` carries a transfer
    pub fn is_host_busy(&self, host: HostId) -> bool {
        self.connections_of(host)
            .iter()
            .filter_map(|id| self.connections.get(id))
            .any(Connection::is_transferring)
    }

    /// Number of up connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is up
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, size: u64) -> Message {
        Message::unicast(id, HostId(0), HostId(1), size, 0.0)
    }

    #[test]
    fn test_transfer_duration_follows_rate() {
        let mut conn = Connection::new(ConnectionId(0), HostId(0), HostId(1), 100.0, 10.0);
        conn.begin_transfer(HostId(0), msg("M1", 250), 10.0).unwrap();
        assert!(!conn.is_transfer_done(12.0));
        assert!(conn.is_transfer_done(12.5));

        let done = conn.finalize_transfer().unwrap();
        assert_eq!(done.message.id.as_str(), "M1");
        assert_eq!(conn.bytes_transferred(), 250);
    }

    #[test]
    fn test_single_transfer_per_connection() {
        let mut conn = Connection::new(ConnectionId(0), HostId(0), HostId(1), 100.0, 0.0);
        conn.begin_transfer(HostId(0), msg("M1", 10), 0.0).unwrap();
        assert!(matches!(
            conn.begin_transfer(HostId(1), msg("M2", 10), 0.0),
            Err(RouterError::ConnectionBusy(_))
        ));
    }

    #[test]
    fn test_abort_does_not_count_bytes() {
        let mut conn = Connection::new(ConnectionId(0), HostId(0), HostId(1), 100.0, 0.0);
        conn.begin_transfer(HostId(0), msg("M1", 10), 0.0).unwrap();
        assert!(conn.abort_transfer().is_some());
        assert_eq!(conn.bytes_transferred(), 0);
        assert!(!conn.is_transferring());
    }

    #[test]
    fn test_other_node_and_initiator() {
        let conn = Connection::new(ConnectionId(0), HostId(4), HostId(7), 1.0, 0.0);
        assert_eq!(conn.other_node(HostId(4)), HostId(7));
        assert_eq!(conn.other_node(HostId(7)), HostId(4));
        assert!(conn.is_initiator(HostId(4)));
        assert!(!conn.is_initiator(HostId(7)));
    }

    #[test]
    fn test_table_open_find_close() {
        let mut table = ConnectionTable::new();
        let c1 = table.open(HostId(0), HostId(1), 10.0, 0.0);
        let c2 = table.open(HostId(0), HostId(2), 10.0, 1.0);
        assert_eq!(table.open(HostId(1), HostId(0), 10.0, 2.0), c1);
        assert_eq!(table.connections_of(HostId(0)), &[c1, c2]);
        assert_eq!(table.find(HostId(2), HostId(0)), Some(c2));

        let closed = table.close(c1).unwrap();
        assert!(!closed.is_up());
        assert_eq!(table.connections_of(HostId(0)), &[c2]);
        assert!(table.connections_of(HostId(1)).is_empty());
        assert!(matches!(table.close(c1), Err(RouterError::UnknownConnection(_))));
    }
}
