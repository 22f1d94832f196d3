//! Router base: message buffer and bookkeeping
//!
//! A [`Router`] owns one host's message buffer, the receptions in flight
//! towards it, the IDs of messages delivered to it and the IDs it refuses to
//! take again. Forwarding decisions are delegated to its
//! [`ForwardingStrategy`]; the transfer protocol that drives everything lives
//! in [`crate::active`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use ferry_core::{
    ConfigResult, ConnectionId, ConnectionTable, HostId, Message, MessageEvent, MessageId,
    ReceiveOutcome, Recipients, RouterError, RouterResult, SettingsView, SharedListener, SimTime,
    Ttl,
};
use tracing::{debug, trace};

use crate::handler::MessageHandler;
use crate::queue::{QueueMode, QueueOrder};
use crate::report::{BufferedMessage, RouterReport};
use crate::strategy::ForwardingStrategy;

/// Prefix of the IDs of response messages
pub const RESPONSE_PREFIX: &str = "R_";

/// Router configuration shared by every host of a group
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Buffer capacity in bytes
    /// Default: unlimited
    pub buffer_size: u64,

    /// TTL stamped on new messages that do not carry one, in minutes
    /// Default: None (infinite)
    pub default_ttl: Option<u32>,

    /// Send-queue ordering
    /// Default: random
    pub queue_mode: QueueMode,

    /// Delete the local copy when the final recipient already has it
    /// Default: false
    pub delete_delivered: bool,

    /// Seconds between expired-message sweeps
    /// Default: 60
    pub ttl_check_interval: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            buffer_size: u64::MAX,
            default_ttl: None,
            queue_mode: QueueMode::Random,
            delete_delivered: false,
            ttl_check_interval: 60.0,
        }
    }
}

impl RouterConfig {
    /// Read the router settings of a namespace
    pub fn from_settings(view: &SettingsView<'_>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let queue_mode = match view.get_str("send_queue") {
            Some(raw) => QueueMode::parse(raw)
                .map_err(|_| view.invalid("send_queue", raw, "expected random, fifo, 1 or 2"))?,
            None => defaults.queue_mode,
        };
        let default_ttl = match view.get::<u32>("msg_ttl")? {
            Some(0) | None => None,
            Some(minutes) => Some(minutes),
        };

        Ok(Self {
            buffer_size: view.get_size("buffer_size")?.unwrap_or(defaults.buffer_size),
            default_ttl,
            queue_mode,
            delete_delivered: view
                .get_bool("delete_delivered")?
                .unwrap_or(defaults.delete_delivered),
            ttl_check_interval: view.get_or("ttl_check_interval", defaults.ttl_check_interval)?,
        })
    }

    /// Create a config with a bounded buffer
    pub fn with_buffer_size(mut self, bytes: u64) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Create a config with a default TTL in minutes
    pub fn with_default_ttl(mut self, minutes: u32) -> Self {
        self.default_ttl = Some(minutes);
        self
    }

    /// Create a config with a queue mode
    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    fn stamped_ttl(&self) -> Ttl {
        match self.default_ttl {
            Some(minutes) => Ttl::Minutes(minutes),
            None => Ttl::Infinite,
        }
    }
}

/// What a router sees of the world during one operation
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    pub now: SimTime,
    pub connections: &'a ConnectionTable,
}

/// Message router of one host
pub struct Router<S> {
    host: HostId,
    config: Arc<RouterConfig>,
    pub(crate) strategy: S,
    buffer: BTreeMap<MessageId, Message>,
    buffered_bytes: u64,
    incoming: HashMap<(MessageId, HostId), Message>,
    incoming_bytes: u64,
    delivered: HashSet<MessageId>,
    blacklist: HashSet<MessageId>,
    handlers: Vec<Box<dyn MessageHandler>>,
    listeners: Vec<SharedListener>,
    /// Connections whose up notification has been processed
    pub(crate) contacts: HashSet<ConnectionId>,
    pub(crate) last_ttl_check: SimTime,
}

impl<S: ForwardingStrategy> Router<S> {
    /// Create a router for `host`
    pub fn new(host: HostId, config: Arc<RouterConfig>, strategy: S) -> Self {
        Self {
            host,
            config,
            strategy,
            buffer: BTreeMap::new(),
            buffered_bytes: 0,
            incoming: HashMap::new(),
            incoming_bytes: 0,
            delivered: HashSet::new(),
            blacklist: HashSet::new(),
            handlers: Vec::new(),
            listeners: Vec::new(),
            contacts: HashSet::new(),
            last_ttl_check: 0.0,
        }
    }

    /// Fresh router for another host with the same configuration
    ///
    /// Listeners are shared, handlers and strategy are replicated, buffers
    /// and statistics start empty.
    pub fn replicate(&self, host: HostId) -> Self {
        let mut router = Self::new(host, Arc::clone(&self.config), self.strategy.replicate());
        router.handlers = self.handlers.iter().map(|h| h.replicate()).collect();
        router.listeners = self.listeners.clone();
        router
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The forwarding strategy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Attach a listener for message events
    pub fn add_listener(&mut self, listener: SharedListener) {
        self.listeners.push(listener);
    }

    /// Attach a local application
    pub fn add_handler(&mut self, handler: Box<dyn MessageHandler>) {
        self.handlers.push(handler);
    }

    /// Whether the message is in the buffer
    pub fn has_message(&self, id: &MessageId) -> bool {
        self.buffer.contains_key(id)
    }

    /// Buffered copy of a message
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.buffer.get(id)
    }

    /// Buffered messages, by ID
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.buffer.values()
    }

    pub fn message_count(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes held by buffered messages
    pub fn buffer_occupancy(&self) -> u64 {
        self.buffered_bytes
    }

    /// Bytes reserved by receptions in flight
    pub fn incoming_bytes(&self) -> u64 {
        self.incoming_bytes
    }

    /// Capacity not taken by buffered messages or receptions in flight
    pub fn free_buffer_space(&self) -> u64 {
        self.config
            .buffer_size
            .saturating_sub(self.buffered_bytes)
            .saturating_sub(self.incoming_bytes)
    }

    /// Whether the message was delivered to this host
    pub fn is_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
    }

    /// Whether the message is refused on sight
    pub fn is_blacklisted(&self, id: &MessageId) -> bool {
        self.blacklist.contains(id)
    }

    /// IDs of messages delivered to this host, sorted
    pub fn delivered_ids(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.delivered.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether the reception of `id` from `from` is in flight
    pub fn is_receiving(&self, id: &MessageId, from: HostId) -> bool {
        self.incoming.contains_key(&(id.clone(), from))
    }

    /// Buffered messages alongside mutable access to the strategy
    pub(crate) fn split_buffer_and_strategy(&mut self) -> (Vec<&Message>, &mut S) {
        (self.buffer.values().collect(), &mut self.strategy)
    }

    pub(crate) fn queue_order(&self, now: SimTime) -> QueueOrder {
        QueueOrder::new(self.config.queue_mode, now)
    }

    fn emit(&self, event: MessageEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }

    /// Take in a message created at this host
    ///
    /// Returns `false` when the buffer cannot make room for it.
    pub fn create_new_message(&mut self, mut message: Message, env: Env<'_>) -> RouterResult<bool> {
        if message.ttl == Ttl::Unset {
            message.ttl = self.config.stamped_ttl();
        }
        message.receive_time = env.now;

        if !self.make_room_for_message(message.size, env)? {
            debug!(
                host = %self.host,
                message = %message.id,
                size = message.size,
                "No room for new message"
            );
            return Ok(false);
        }

        let id = message.id.clone();
        self.strategy.on_new_message(&message);
        self.add_to_buffer(message);
        self.emit(MessageEvent::Created {
            host: self.host,
            message: id,
            time: env.now,
        });
        Ok(true)
    }

    /// Answer a transfer offer from `from`
    ///
    /// On acceptance a copy of the message, with this host appended to its
    /// hop list, waits in the incoming table until the transfer completes.
    pub fn receive_message(
        &mut self,
        message: &Message,
        from: HostId,
        env: Env<'_>,
    ) -> RouterResult<ReceiveOutcome> {
        let outcome = self.check_receiving(message, from, env)?;
        if outcome != ReceiveOutcome::Ok {
            trace!(
                host = %self.host,
                from = %from,
                message = %message.id,
                ?outcome,
                "Offer refused"
            );
            return Ok(outcome);
        }

        let mut copy = message.clone();
        copy.add_node_on_path(self.host);
        self.incoming_bytes += copy.size;
        self.incoming.insert((copy.id.clone(), from), copy);

        self.emit(MessageEvent::TransferStarted {
            from,
            to: self.host,
            message: message.id.clone(),
            time: env.now,
        });
        Ok(ReceiveOutcome::Ok)
    }

    fn check_receiving(
        &mut self,
        message: &Message,
        from: HostId,
        env: Env<'_>,
    ) -> RouterResult<ReceiveOutcome> {
        if self.is_transferring(env) {
            return Ok(ReceiveOutcome::TryLaterBusy);
        }
        if self.has_message(&message.id)
            || self.is_delivered(&message.id)
            || self.is_blacklisted(&message.id)
        {
            return Ok(ReceiveOutcome::DeniedOld);
        }
        if message.is_expired(env.now) && !message.is_recipient(self.host) {
            return Ok(ReceiveOutcome::DeniedTtl);
        }
        if !self.strategy.accept_message(message, from) {
            return Ok(ReceiveOutcome::DeniedPolicy);
        }
        if !self.make_room_for_message(message.size, env)? {
            return Ok(ReceiveOutcome::DeniedNoSpace);
        }
        Ok(ReceiveOutcome::Ok)
    }

    /// Complete the reception of `id` from `from`
    ///
    /// Returns the message as it left the local handlers.
    pub fn message_transferred(
        &mut self,
        id: &MessageId,
        from: HostId,
        env: Env<'_>,
    ) -> RouterResult<Message> {
        let mut incoming = self.take_incoming(id, from)?;
        incoming.receive_time = env.now;

        let mut outgoing = Some(incoming.clone());
        for handler in self
            .handlers
            .iter_mut()
            .filter(|h| h.serves(incoming.app_id.as_deref()))
        {
            outgoing = outgoing.and_then(|m| handler.handle(m, self.host));
            if outgoing.is_none() {
                break;
            }
        }

        let message = outgoing.clone().unwrap_or(incoming);
        let final_recipient = message.is_recipient(self.host);
        let first_delivery = final_recipient && !self.is_delivered(&message.id);
        let keep_relaying =
            outgoing.is_some() && (!final_recipient || has_other_recipients(&message));

        if first_delivery {
            self.delivered.insert(message.id.clone());
            self.strategy.on_delivered(&message);
        }
        if keep_relaying {
            self.strategy.on_new_message(&message);
            self.add_to_buffer(message.clone());
        } else if outgoing.is_none() && !first_delivery {
            self.blacklist.insert(message.id.clone());
        }

        debug!(
            host = %self.host,
            from = %from,
            message = %message.id,
            hops = message.hop_count(),
            first_delivery,
            "Message transferred"
        );
        self.emit(MessageEvent::Transferred {
            from,
            to: self.host,
            message: message.id.clone(),
            first_delivery,
            time: env.now,
        });

        if first_delivery && message.response_size > 0 {
            let response = Message::unicast(
                format!("{RESPONSE_PREFIX}{}", message.id),
                self.host,
                message.from,
                message.response_size,
                env.now,
            );
            self.create_new_message(response, env)?;
        }

        Ok(message)
    }

    /// Discard the partial reception of `id` from `from`
    pub fn message_aborted(&mut self, id: &MessageId, from: HostId, now: SimTime) -> RouterResult<()> {
        self.take_incoming(id, from)?;
        debug!(host = %self.host, from = %from, message = %id, "Transfer aborted");
        self.emit(MessageEvent::Aborted {
            from,
            to: self.host,
            message: id.clone(),
            time: now,
        });
        Ok(())
    }

    /// Remove a message from the buffer
    ///
    /// `drop` marks removals by buffer management, as opposed to removals
    /// after a delivery.
    pub fn delete_message(&mut self, id: &MessageId, drop: bool, now: SimTime) -> RouterResult<Message> {
        let removed = self
            .buffer
            .remove(id)
            .ok_or_else(|| RouterError::UnknownMessage {
                host: self.host,
                id: id.clone(),
            })?;
        self.buffered_bytes -= removed.size;
        trace!(host = %self.host, message = %id, drop, "Message deleted");
        self.emit(MessageEvent::Deleted {
            host: self.host,
            message: id.clone(),
            dropped: drop,
            time: now,
        });
        Ok(removed)
    }

    fn take_incoming(&mut self, id: &MessageId, from: HostId) -> RouterResult<Message> {
        let message = self
            .incoming
            .remove(&(id.clone(), from))
            .ok_or_else(|| RouterError::NoIncomingTransfer {
                host: self.host,
                id: id.clone(),
                from,
            })?;
        self.incoming_bytes -= message.size;
        Ok(message)
    }

    fn add_to_buffer(&mut self, message: Message) {
        self.buffered_bytes += message.size;
        if let Some(old) = self.buffer.insert(message.id.clone(), message) {
            self.buffered_bytes -= old.size;
        }
    }

    /// Report of the router's state
    pub fn report(&self, env: Env<'_>) -> RouterReport {
        let mut buffer: Vec<_> = self
            .buffer
            .values()
            .map(|m| BufferedMessage {
                id: m.id.clone(),
                size: m.size,
                hop_count: m.hop_count(),
                receive_time: m.receive_time,
                ttl: m.ttl_remaining(env.now),
            })
            .collect();
        buffer.sort_by(|a, b| a.receive_time.total_cmp(&b.receive_time));

        let connections = env
            .connections
            .connections_of(self.host)
            .iter()
            .filter_map(|id| env.connections.get(*id).ok())
            .map(|c| c.other_node(self.host))
            .collect();

        RouterReport {
            host: self.host,
            time: env.now,
            strategy: self.strategy.name().to_string(),
            buffer_size: self.config.buffer_size,
            buffer_occupancy: self.buffered_bytes,
            incoming_bytes: self.incoming_bytes,
            buffer,
            delivered: self.delivered_ids(),
            connections,
            metrics: self.strategy.metrics(self.host, env.now),
        }
    }
}

/// Whether a group message still has recipients beyond its current holder
fn has_other_recipients(message: &Message) -> bool {
    match &message.to {
        Recipients::Unicast(_) => false,
        Recipients::Multicast(_) => !message.pending_recipients().is_empty(),
        Recipients::Broadcast => true,
    }
}
