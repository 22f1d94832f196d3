//! Active transfer protocol
//!
//! Drives a router through one simulation tick: completes finished transfers,
//! sweeps expired messages, delivers to directly connected recipients, and
//! finally offers the strategy's relay candidates. A connection carries one
//! transfer at a time, and a host that is sending or receiving anything
//! starts nothing new.

use std::collections::HashSet;

use ferry_core::{
    Connection, ConnectionId, ConnectionTable, HostId, Message, MessageId, ReceiveOutcome,
    RouterError, RouterResult, SimTime,
};
use tracing::{debug, trace};

use crate::network::SimContext;
use crate::router::{Env, Router};
use crate::strategy::{BufferView, Candidate, Contact, ForwardView, ForwardingStrategy, Link};

/// Offer message `id` from `sender` to `receiver` over `connection`
///
/// On acceptance the transfer occupies the connection until it completes.
/// With `delete_delivered` set, a final recipient that already has the
/// message makes the sender drop its copy.
pub fn start_transfer<S: ForwardingStrategy>(
    sender: &mut Router<S>,
    receiver: &mut Router<S>,
    connections: &mut ConnectionTable,
    connection: ConnectionId,
    id: &MessageId,
    now: SimTime,
) -> RouterResult<ReceiveOutcome> {
    if connections.get(connection)?.is_transferring() {
        return Ok(ReceiveOutcome::TryLaterBusy);
    }
    let message = sender
        .message(id)
        .cloned()
        .ok_or_else(|| RouterError::UnknownMessage {
            host: sender.host(),
            id: id.clone(),
        })?;

    let env = Env {
        now,
        connections: &*connections,
    };
    let outcome = receiver.receive_message(&message, sender.host(), env)?;
    match outcome {
        ReceiveOutcome::Ok => {
            trace!(
                from = %sender.host(),
                to = %receiver.host(),
                message = %id,
                "Starting transfer"
            );
            connections
                .get_mut(connection)?
                .begin_transfer(sender.host(), message, now)?;
        }
        ReceiveOutcome::DeniedOld
            if sender.config().delete_delivered
                && message.unicast_destination() == Some(receiver.host()) =>
        {
            sender.delete_message(id, false, now)?;
        }
        _ => {}
    }
    Ok(outcome)
}

impl<S: ForwardingStrategy> Router<S> {
    /// Advance this router by one tick
    pub fn update(&mut self, ctx: &mut SimContext<'_, S>) -> RouterResult<()> {
        let now = ctx.now();
        self.finalize_transfers(ctx)?;

        let sending = !self.sending_ids(ctx.env()).is_empty();
        if !sending && now - self.last_ttl_check >= self.config().ttl_check_interval {
            self.drop_expired_messages(now)?;
            self.last_ttl_check = now;
        }

        if self.is_transferring(ctx.env())
            || self.message_count() == 0
            || ctx.connections().connections_of(self.host()).is_empty()
        {
            return Ok(());
        }

        if self.exchange_deliverable_messages(ctx)? {
            return Ok(());
        }

        let candidates = {
            let queue = self.queue_order(now);
            let links = self.links(ctx.connections());
            let capacity = self.config().buffer_size;
            let host = self.host();
            let peers = ctx.peers();
            let (mut messages, strategy) = self.split_buffer_and_strategy();
            queue.sort(&mut messages);
            let view = ForwardView {
                host,
                now,
                capacity,
                messages: &messages,
                links: &links,
                queue,
                peers: &peers,
            };
            strategy.relay_candidates(&view)
        };
        self.try_candidates(ctx, candidates)?;
        Ok(())
    }

    /// React to a connection going up or down
    ///
    /// On "up" the initiator exchanges strategy state with the peer from
    /// snapshots taken before either side changes. Repeated notifications for
    /// the same connection are ignored.
    pub fn changed_connection(
        &mut self,
        ctx: &mut SimContext<'_, S>,
        connection: &Connection,
    ) -> RouterResult<()> {
        let now = ctx.now();
        let contact = Contact {
            host: self.host(),
            peer: connection.other_node(self.host()),
            connection: connection.id,
            now,
        };

        if !connection.is_up() {
            if self.contacts.remove(&connection.id) {
                self.strategy
                    .contact_down(&contact, connection.bytes_transferred());
            }
            return Ok(());
        }

        if !self.contacts.insert(connection.id) {
            debug!(
                host = %self.host(),
                connection = %connection.id,
                "Ignoring repeated connection up"
            );
            return Ok(());
        }
        if !connection.is_initiator(self.host()) {
            return Ok(());
        }

        let (peer, table) = ctx.split(contact.peer)?;
        let mine = self.strategy.snapshot(contact.host, now);
        let theirs = peer.strategy.snapshot(contact.peer, now);
        self.strategy.contact_up(&contact, &theirs);
        peer.strategy.contact_up(&contact.reversed(), &mine);

        let env = Env {
            now,
            connections: &*table,
        };
        self.purge_acknowledged(env)?;
        peer.purge_acknowledged(env)?;
        debug!(
            host = %contact.host,
            peer = %contact.peer,
            strategy = self.strategy.name(),
            "Contact exchange done"
        );
        Ok(())
    }

    /// Whether this host is sending or receiving on any connection
    pub fn is_transferring(&self, env: Env<'_>) -> bool {
        env.connections.is_host_busy(self.host())
    }

    /// IDs of the messages this host is currently sending
    pub fn sending_ids(&self, env: Env<'_>) -> HashSet<MessageId> {
        env.connections
            .connections_of(self.host())
            .iter()
            .filter_map(|id| env.connections.get(*id).ok())
            .filter_map(|c| c.transfer())
            .filter(|t| t.from == self.host())
            .map(|t| t.message.id.clone())
            .collect()
    }

    /// Free enough buffer space for a message of `size` bytes
    ///
    /// Evicts the strategy's choice, never a message being sent, until the
    /// message fits. Returns `false` when that is impossible.
    pub fn make_room_for_message(&mut self, size: u64, env: Env<'_>) -> RouterResult<bool> {
        if size > self.config().buffer_size {
            return Ok(false);
        }
        let sending = self.sending_ids(env);
        let queue = self.queue_order(env.now);
        let capacity = self.config().buffer_size;
        let host = self.host();

        while self.free_buffer_space() < size {
            let victim = {
                let (messages, strategy) = self.split_buffer_and_strategy();
                let view = BufferView {
                    host,
                    now: env.now,
                    capacity,
                    messages: &messages,
                    sending: &sending,
                    queue,
                };
                strategy.next_to_evict(&view)
            };
            let Some(victim) = victim else {
                return Ok(false);
            };
            if sending.contains(&victim) {
                return Ok(false);
            }
            trace!(host = %host, message = %victim, "Evicting to make room");
            self.delete_message(&victim, true, env.now)?;
        }
        Ok(true)
    }

    /// Drop every message whose TTL ran out
    pub fn drop_expired_messages(&mut self, now: SimTime) -> RouterResult<()> {
        let expired: Vec<MessageId> = self
            .messages()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id.clone())
            .collect();
        for id in expired {
            self.delete_message(&id, true, now)?;
        }
        Ok(())
    }

    /// Offer messages addressed to connected peers, then ask peers for
    /// messages addressed to this host
    pub fn exchange_deliverable_messages(&mut self, ctx: &mut SimContext<'_, S>) -> RouterResult<bool> {
        let now = ctx.now();
        let links = self.links(ctx.connections());

        for link in &links {
            for id in self.deliverable_to(link.peer, now) {
                let (receiver, table) = ctx.split(link.peer)?;
                match start_transfer(self, receiver, table, link.connection, &id, now)? {
                    ReceiveOutcome::Ok => return Ok(true),
                    ReceiveOutcome::TryLaterBusy => break,
                    _ => {}
                }
            }
        }

        for link in &links {
            let (peer, table) = ctx.split(link.peer)?;
            if peer.request_deliverable_messages(self, table, link.connection, now)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Send `requester` one of the messages addressed to it, if idle
    pub fn request_deliverable_messages(
        &mut self,
        requester: &mut Router<S>,
        connections: &mut ConnectionTable,
        connection: ConnectionId,
        now: SimTime,
    ) -> RouterResult<bool> {
        if connections.is_host_busy(self.host()) {
            return Ok(false);
        }
        for id in self.deliverable_to(requester.host(), now) {
            if start_transfer(self, requester, connections, connection, &id, now)?.is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Try candidates in order until one transfer starts
    fn try_candidates(
        &mut self,
        ctx: &mut SimContext<'_, S>,
        candidates: Vec<Candidate>,
    ) -> RouterResult<bool> {
        let now = ctx.now();
        let mut busy: HashSet<ConnectionId> = HashSet::new();

        for candidate in candidates {
            if busy.contains(&candidate.connection) || !self.has_message(&candidate.message) {
                continue;
            }
            let peer = ctx
                .connections()
                .get(candidate.connection)?
                .other_node(self.host());
            if ctx.router(peer)?.has_message(&candidate.message) {
                continue;
            }
            let (receiver, table) = ctx.split(peer)?;
            match start_transfer(self, receiver, table, candidate.connection, &candidate.message, now)? {
                ReceiveOutcome::Ok => return Ok(true),
                ReceiveOutcome::TryLaterBusy => {
                    busy.insert(candidate.connection);
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// Complete every transfer this host sent that has delivered all bytes
    fn finalize_transfers(&mut self, ctx: &mut SimContext<'_, S>) -> RouterResult<()> {
        let now = ctx.now();
        let host = self.host();
        let connections: Vec<ConnectionId> = ctx.connections().connections_of(host).to_vec();

        for id in connections {
            let conn = ctx.connections_mut().get_mut(id)?;
            if !conn.is_sending_from(host) || !conn.is_transfer_done(now) {
                continue;
            }
            let peer = conn.other_node(host);
            let Some(transfer) = conn.finalize_transfer() else {
                continue;
            };
            let message_id = transfer.message.id.clone();

            let delete_local = {
                let peers = ctx.peers();
                self.strategy
                    .on_transfer_done(host, &transfer.message, peer, &peers)
            };
            if delete_local && self.has_message(&message_id) {
                self.delete_message(&message_id, false, now)?;
            }

            let (receiver, table) = ctx.split(peer)?;
            receiver.message_transferred(
                &message_id,
                host,
                Env {
                    now,
                    connections: &*table,
                },
            )?;
        }
        Ok(())
    }

    /// Delete buffered messages the strategy knows to be delivered
    pub(crate) fn purge_acknowledged(&mut self, env: Env<'_>) -> RouterResult<()> {
        let sending = self.sending_ids(env);
        let acked: Vec<MessageId> = self
            .messages()
            .filter(|m| !sending.contains(&m.id) && self.strategy.is_acknowledged(&m.id))
            .map(|m| m.id.clone())
            .collect();
        for id in acked {
            self.delete_message(&id, false, env.now)?;
        }
        Ok(())
    }

    /// Up connections of this host, in the order they came up
    fn links(&self, connections: &ConnectionTable) -> Vec<Link> {
        connections
            .connections_of(self.host())
            .iter()
            .filter_map(|id| connections.get(*id).ok())
            .filter(|c| c.is_up())
            .map(|c| Link {
                connection: c.id,
                peer: c.other_node(self.host()),
            })
            .collect()
    }

    /// IDs of buffered messages `peer` should receive as a final recipient
    fn deliverable_to(&self, peer: HostId, now: SimTime) -> Vec<MessageId> {
        let mut deliverable: Vec<&Message> = self
            .messages()
            .filter(|m| m.is_recipient(peer) && !m.has_visited(peer))
            .collect();
        self.queue_order(now).sort(&mut deliverable);
        deliverable.into_iter().map(|m| m.id.clone()).collect()
    }
}
